use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use tracing::{debug, info};

use blockrender_broker::{RenderBroker, WebSocketProvisioner};
use blockrender_config::Config;
use blockrender_extension::{Artifact, DisplayCommand, ExtensionAdapter, Rendered};

use crate::utils::styles::{fmt_blue, fmt_success};

#[derive(Debug, Clone, Parser)]
pub struct RenderCmd {
    /// Program source to render
    #[arg(long, conflicts_with = "file")]
    pub code: Option<String>,

    /// File containing the program source
    pub file: Option<Utf8PathBuf>,

    /// Target key, unknown keys fall back to the default target
    #[arg(long, short)]
    pub target: Option<String>,

    /// Shared package to render instead of, or alongside, the code
    #[arg(long)]
    pub package: Option<String>,

    /// Give up when the render service does not answer within this many milliseconds
    #[arg(long, env = "BLOCKRENDER_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,
}

impl RenderCmd {
    fn source_code(&self) -> Result<Option<String>> {
        match (&self.code, &self.file) {
            (Some(code), _) => Ok(Some(code.clone())),
            (None, Some(path)) => std::fs::read_to_string(path)
                .map(Some)
                .context(format!("Failed reading program: {path}")),
            (None, None) => Ok(None),
        }
    }

    fn command(&self) -> Result<DisplayCommand> {
        let source_code = self.source_code()?;
        if source_code.is_none() && self.package.is_none() {
            anyhow::bail!("Nothing to render: pass --code, a FILE or --package");
        }

        Ok(DisplayCommand {
            source_code,
            target_key: self.target.clone(),
            package_id: self.package.clone(),
            request_id: None,
        })
    }

    pub(crate) async fn handle(&self, cfg: Config) -> Result<Rendered> {
        let command = self.command()?;

        let mut broker = RenderBroker::from_config(&cfg, Arc::new(WebSocketProvisioner::new()))?;
        if let Some(ms) = self.timeout_ms {
            broker = broker.with_timeout(Duration::from_millis(ms));
        }
        let pump = broker.start().await?;

        let target = broker
            .targets()
            .resolve(command.target_key.as_deref().unwrap_or_default())
            .clone();
        info!("Rendering with {}", fmt_blue(target.address.as_str()));

        let adapter = ExtensionAdapter::new(broker.clone());
        let mut shown: Vec<Artifact> = Vec::new();
        let rendered = adapter.display(command, &mut shown).await;

        broker.teardown().await;
        pump.abort();
        debug!("Render slot went through {} state(s)", shown.len());

        let rendered = rendered?;
        println!("{}", serde_json::to_string_pretty(&rendered)?);

        match &rendered.artifact {
            Artifact::Error { message } => {
                anyhow::bail!("Render failed: {message}")
            }
            Artifact::Image { width, height, .. } => {
                info!("{}", fmt_success(&format!("Rendered {width}x{height} image")));
            }
            Artifact::Loading { .. } => {}
        }

        Ok(rendered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        cmd: RenderCmd,
    }

    fn parse(args: &[&str]) -> RenderCmd {
        Wrapper::parse_from(std::iter::once("render").chain(args.iter().copied())).cmd
    }

    #[test]
    fn test_command_from_code_flag() {
        let cmd = parse(&["--code", "basic.showNumber(1)", "--target", "arcade"]);
        assert_eq!(
            cmd.command().unwrap(),
            DisplayCommand {
                source_code: Some("basic.showNumber(1)".into()),
                target_key: Some("arcade".into()),
                package_id: None,
                request_id: None,
            }
        );
    }

    #[test]
    fn test_command_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("main.ts");
        std::fs::write(&path, "basic.showIcon(IconNames.Yes)").unwrap();

        let cmd = parse(&[path.to_str().unwrap()]);
        assert_eq!(
            cmd.command().unwrap().source_code.as_deref(),
            Some("basic.showIcon(IconNames.Yes)")
        );
    }

    #[test]
    fn test_command_requires_something_to_render() {
        assert!(parse(&[]).command().is_err());

        let package_only = parse(&["--package", "_abc123"]).command().unwrap();
        assert_eq!(package_only.package_id.as_deref(), Some("_abc123"));
        assert!(package_only.source_code.is_none());
    }

    #[test]
    fn test_code_conflicts_with_file() {
        let res = Wrapper::try_parse_from(["render", "--code", "x", "main.ts"]);
        assert!(res.is_err());
    }
}
