use std::{fs::OpenOptions, io::Write, sync::Mutex};

use anyhow::{Context, Result};
use blockrender_config::logger::{LoggerConfig, LoggerFormat};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, writer::BoxMakeWriter},
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

const WHITELISTED_CRATES: &[&str] = &[
    "blockrender",
    "blockrender_broker",
    "blockrender_config",
    "blockrender_extension",
];

pub(crate) fn default_env_filter(level: &str) -> String {
    let mut filters: Vec<String> = WHITELISTED_CRATES
        .iter()
        .map(|crate_name| format!("{crate_name}={level}"))
        .collect();

    // Set default level for all other crates to warn
    filters.insert(0, "warn".to_string());

    filters.join(",")
}

pub(crate) fn init_cli_logger(verbose: u8, quiet: bool) {
    let level_str = if quiet {
        "warn"
    } else if verbose == 0 {
        "info"
    } else if verbose == 1 {
        "debug"
    } else {
        "trace"
    };

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_env_filter(level_str)),
    );

    // For INFO and below, only include/colorize WARN and ERROR levels
    if ["info", "warn", "error"].contains(&level_str) {
        builder.format(|buf, record| {
            if record.level() == tracing::log::Level::Info {
                writeln!(buf, "{}", record.args())
            } else {
                let log_style = buf.default_level_style(record.level());
                writeln!(
                    buf,
                    "{log_style}[{}]{log_style:#} {}",
                    record.level(),
                    record.args()
                )
            }
        });
    }

    if let Err(e) = builder.try_init() {
        eprintln!("blockrender: Failed initializing env_logger: {e:?}");
    }
}

/// Installs the `serve` subscriber described by the config's logger section.
/// `RUST_LOG` takes precedence over the configured level.
pub(crate) fn init_server_logger(cfg: &LoggerConfig) -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_env_filter(&cfg.level.to_string())));

    let writer = match &cfg.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .context(format!("Failed opening log file: {path}"))?;
            BoxMakeWriter::new(Mutex::new(file))
        }
        None => BoxMakeWriter::new(std::io::stdout),
    };

    let fmt_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(cfg.ansi())
        .with_target(true);
    let fmt_layer = match cfg.format {
        LoggerFormat::Compact => fmt_layer.compact().boxed(),
        LoggerFormat::Pretty => fmt_layer.pretty().boxed(),
        LoggerFormat::Json => fmt_layer.json().with_current_span(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .context("Failed installing tracing subscriber")
}
