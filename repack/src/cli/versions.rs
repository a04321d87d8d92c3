// repack/src/cli/versions.rs
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use repack_common::config::Config;
use repack_common::error::{RepackError, Result};
use repack_common::kv::MemoryStore;
use repack_net::MarketplaceClient;

use crate::cli::search::print_degradation;

#[derive(Args, Debug)]
pub struct Versions {
    /// Marketplace reference in author/name form
    pub plugin: String,
}

impl Versions {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let (author, name) = self.plugin.split_once('/').ok_or_else(|| {
            RepackError::ValidationError(format!(
                "'{}' is not an author/name reference",
                self.plugin
            ))
        })?;

        let client = MarketplaceClient::new(config, Arc::new(MemoryStore::new()))?;
        let versions = client.versions(author, name).await?;
        print_degradation(&versions);

        if versions.value.is_empty() {
            println!(
                "{}",
                format!("No versions found for '{author}/{name}'").yellow()
            );
            return Ok(());
        }
        for v in &versions.value {
            match &v.created_at {
                Some(created_at) => println!("{}  ({created_at})", v.version),
                None => println!("{}", v.version),
            }
        }
        Ok(())
    }
}
