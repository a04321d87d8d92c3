// repack/src/cli/categories.rs
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use repack_common::config::Config;
use repack_common::error::Result;
use repack_common::kv::MemoryStore;
use repack_net::MarketplaceClient;

use crate::cli::search::print_degradation;

#[derive(Args, Debug)]
pub struct Categories {}

impl Categories {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let client = MarketplaceClient::new(config, Arc::new(MemoryStore::new()))?;
        let categories = client.categories().await?;
        print_degradation(&categories);

        if categories.value.is_empty() {
            println!("{}", "No categories available.".yellow());
            return Ok(());
        }
        for category in &categories.value {
            if category.display_name.is_empty() || category.display_name == category.name {
                println!("{}", category.name);
            } else {
                println!("{}  ({})", category.display_name.bold(), category.name);
            }
        }
        Ok(())
    }
}
