// repack/src/cli/search.rs
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use prettytable::{format, Cell, Row, Table};
use repack_common::config::Config;
use repack_common::error::Result;
use repack_common::kv::MemoryStore;
use repack_common::model::{PluginSummary, Resilient};
use repack_net::MarketplaceClient;

#[derive(Args, Debug)]
pub struct Search {
    pub query: String,

    #[arg(long, default_value_t = 1)]
    pub page: u32,

    #[arg(long, default_value_t = 20)]
    pub page_size: u32,
}

impl Search {
    pub async fn run(&self, config: &Config) -> Result<()> {
        tracing::debug!("Searching marketplace for: {}", self.query);
        println!("Searching for \"{}\"", self.query);

        let client = MarketplaceClient::new(config, Arc::new(MemoryStore::new()))?;
        let results = client.search(&self.query, self.page, self.page_size).await?;

        print_degradation(&results);
        print_results(&self.query, &results.value);
        Ok(())
    }
}

pub fn print_degradation<T>(results: &Resilient<T>) {
    if results.stale {
        println!(
            "{} Marketplace unreachable; showing the last known answer.",
            "Warning:".yellow().bold()
        );
    } else if results.fallback_used {
        println!(
            "{} Marketplace API degraded; results come from the web fallback and may be partial.",
            "Warning:".yellow().bold()
        );
    }
}

fn print_results(query: &str, plugins: &[PluginSummary]) {
    if plugins.is_empty() {
        println!("{}", format!("No matches found for '{query}'").yellow());
        return;
    }
    println!(
        "{}",
        format!("Found {} result(s) for '{query}'", plugins.len()).bold()
    );

    let mut tbl = Table::new();
    tbl.set_format(*format::consts::FORMAT_NO_BORDER_LINE_SEPARATOR);
    for plugin in plugins {
        let reference = format!("{}/{}", plugin.author, plugin.name);
        tbl.add_row(Row::new(vec![
            Cell::new(&reference).style_spec("Fb"),
            Cell::new(plugin.latest_version.as_deref().unwrap_or("-")),
            Cell::new(&plugin.category).style_spec("Fg"),
            Cell::new(&plugin.description),
        ]));
    }
    tbl.printstd();
}
