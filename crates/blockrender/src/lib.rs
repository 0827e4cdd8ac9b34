pub mod commands;
pub(crate) mod utils;

use camino::Utf8PathBuf;
use clap::{Parser, Subcommand};

use crate::{
    commands::{init::InitCmd, render::RenderCmd, serve::ServeCmd, targets::TargetsCmd},
    utils::logger::init_cli_logger,
};
use blockrender_config::Config;

#[derive(Parser)]
#[command(name = "blockrender")]
#[command(version)]
#[command(about = "blockrender - MakeCode block rendering")]
#[command(
    long_about = "blockrender turns MakeCode programs into block diagram images by driving the MakeCode \
render service, from the command line or as a chat widget extension over HTTP."
)]
#[command(after_help = "EXAMPLES:\n  \
    blockrender init --local http://localhost:3232/\n  \
    blockrender targets\n  \
    blockrender render --code \"basic.showString('Hello')\"\n  \
    blockrender render --target local program.ts\n  \
    blockrender serve --port 8080\n\
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file path, defaults to ./blockrender.json
    #[arg(long, short = 'c', global = true, default_value_t = Config::default_path())]
    pub config: Utf8PathBuf,

    /// No logging except for errors
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// Verbose logging (-v) or trace logging (-vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl Cli {
    /// `serve` logs through the config's logger section instead
    pub fn cli_logger(&self) -> bool {
        !matches!(&self.command, Commands::Serve(_))
    }

    #[allow(clippy::missing_errors_doc)]
    pub async fn handle(&self) -> anyhow::Result<()> {
        if self.cli_logger() {
            init_cli_logger(self.verbose, self.quiet);
        }

        match &self.command {
            Commands::Init(cmd) => {
                cmd.handle(&self.config)?;
            }
            Commands::Targets(cmd) => cmd.handle(&Config::load_or_default(&self.config)?)?,
            Commands::Render(cmd) => {
                cmd.handle(Config::load_or_default(&self.config)?).await?;
            }
            Commands::Serve(cmd) => {
                cmd.handle(Config::load_or_default(&self.config)?).await?;
            }
        }

        Ok(())
    }
}

#[derive(Debug, Subcommand)]
#[command(styles=utils::styles::get_styles())]
pub enum Commands {
    /// Initialize configuration file
    #[command(long_about = "Initialize blockrender.json with the built-in MakeCode targets.")]
    Init(InitCmd),

    /// List render targets
    #[command(long_about = "Lists the configured render targets and their render-mode pages.")]
    Targets(TargetsCmd),

    /// Render a program once
    #[command(
        long_about = "Render a MakeCode program once against the target's render service and print the artifact as JSON.\n\n\
The render page is opened as a WebSocket connection (http -> ws, https -> wss), so the target must \
point at a service that speaks the MakeCode render protocol over WebSocket, such as a local bridge \
added with `blockrender init --local http://localhost:3232/`. The public makecode.* sites only serve \
the render page to browsers and will refuse the connection."
    )]
    Render(RenderCmd),

    /// Start the extension server
    #[command(long_about = "Start the extension server (exposes /traces and /health endpoints).")]
    Serve(ServeCmd),
}
