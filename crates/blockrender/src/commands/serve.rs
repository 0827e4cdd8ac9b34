use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;

use blockrender_broker::{RenderBroker, WebSocketProvisioner};
use blockrender_config::Config;
use blockrender_extension::{AppState, start_server};

use crate::utils::logger::init_server_logger;

#[derive(Debug, Clone, Parser)]
pub struct ServeCmd {
    /// Port to listen on
    #[arg(short, long, default_value = "8080")]
    pub port: u16,

    /// Host address to bind to (use 0.0.0.0 for external access)
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,
}

impl ServeCmd {
    pub(crate) async fn handle(&self, cfg: Config) -> Result<Config> {
        init_server_logger(&cfg.logger)?;

        let broker = RenderBroker::from_config(&cfg, Arc::new(WebSocketProvisioner::new()))?;
        let pump = broker.start().await?;

        info!(
            "Serving {} render target(s), default is `{}`",
            broker.targets().len(),
            broker.targets().default_target().key
        );

        let served = start_server(&self.host, self.port, AppState::new(broker.clone())).await;

        broker.teardown().await;
        pump.abort();
        info!("Shutting down...");

        served?;
        Ok(cfg)
    }
}
