use anyhow::Result;
use clap::Parser;
use tabled::{
    builder::Builder,
    settings::{Color, Style, object::Rows},
};

use blockrender_config::{Config, targets::TargetTable};

use crate::utils::{CHECK, styles::fmt_red};

#[derive(Debug, Clone, Parser)]
pub struct TargetsCmd {}

impl TargetsCmd {
    pub(crate) fn handle(&self, cfg: &Config) -> Result<()> {
        let table = cfg.target_table()?;
        println!("{}", target_table(&table));
        Ok(())
    }
}

fn target_table(table: &TargetTable) -> String {
    let mut builder = Builder::default();
    builder.push_record(["Key", "Address", "Render URL", "Default"]);

    let default_key = &table.default_target().key;
    for target in table.iter() {
        let render_url = target
            .render_url()
            .map_or_else(|e| fmt_red(&format!("invalid: {e}")), |url| url.to_string());
        builder.push_record([
            target.key.as_str(),
            target.address.as_str(),
            render_url.as_str(),
            if target.key == *default_key { CHECK } else { "" },
        ]);
    }

    builder
        .build()
        .with(Style::rounded())
        .modify(Rows::first(), Color::BOLD)
        .to_string()
}
