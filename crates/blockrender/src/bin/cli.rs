use blockrender::Cli;
use clap::Parser;

#[tokio::main]
async fn main() {
    // tokio-tungstenite opens wss:// render services through rustls
    if rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("blockrender: a rustls crypto provider was already installed");
    }

    let cli = Cli::parse();

    if let Err(e) = cli.handle().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
}
