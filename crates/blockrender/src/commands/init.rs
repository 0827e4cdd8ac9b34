use anyhow::Result;
use camino::Utf8PathBuf;
use clap::Parser;
use tracing::info;
use url::Url;

use blockrender_config::Config;

use crate::utils::styles::{fmt_dimmed, fmt_success};

/// Key of the target added by `--local`
pub const LOCAL_TARGET: &str = "local";

#[derive(Debug, Clone, Parser)]
pub struct InitCmd {
    /// Overwrite an existing config file
    #[arg(long)]
    pub force: bool,

    /// Address of a local render service bridge, added as the default `local` target
    #[arg(long, value_name = "URL")]
    pub local: Option<Url>,
}

impl InitCmd {
    pub(crate) fn handle(&self, path: &Utf8PathBuf) -> Result<Config> {
        if path.exists() && !self.force {
            anyhow::bail!("Config file already exists: {path} (use --force to overwrite)");
        }

        let mut cfg = Config::default().with_path(path);
        if let Some(address) = &self.local {
            cfg.targets
                .shift_insert(0, LOCAL_TARGET.to_string(), address.clone());
        }
        cfg.save()?;

        info!("{}", fmt_success(&format!("Created {path}")));
        info!(
            "{}",
            fmt_dimmed(&format!(
                "{} render targets configured, default is `{}`",
                cfg.targets.len(),
                cfg.targets.keys().next().map_or("", String::as_str)
            ))
        );

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("blockrender.json")).unwrap();

        let init = |force| InitCmd { force, local: None };

        let cfg = init(false).handle(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap().targets, cfg.targets);

        assert!(init(false).handle(&path).is_err());
        assert!(init(true).handle(&path).is_ok());
    }

    #[test]
    fn test_init_local_target_becomes_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("blockrender.json")).unwrap();

        InitCmd {
            force: false,
            local: Some(Url::parse("http://localhost:3232/").unwrap()),
        }
        .handle(&path)
        .unwrap();

        let table = Config::load(&path).unwrap().target_table().unwrap();
        assert_eq!(table.default_target().key, LOCAL_TARGET);
        assert_eq!(
            table.default_target().render_url().unwrap().as_str(),
            "http://localhost:3232/--docs?render=1"
        );
        assert_eq!(table.len(), 6);
    }
}
