// repack/src/cli/info.rs
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use repack_common::config::Config;
use repack_common::error::{RepackError, Result};
use repack_common::kv::MemoryStore;
use repack_net::MarketplaceClient;

use crate::cli::search::print_degradation;

#[derive(Args, Debug)]
pub struct Info {
    /// Marketplace reference in author/name form
    pub plugin: String,

    /// How many versions to list
    #[arg(long, default_value_t = 10)]
    pub versions: usize,
}

impl Info {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let (author, name) = self.plugin.split_once('/').ok_or_else(|| {
            RepackError::ValidationError(format!(
                "'{}' is not an author/name reference",
                self.plugin
            ))
        })?;

        let client = MarketplaceClient::new(config, Arc::new(MemoryStore::new()))?;
        let detail = client.plugin(author, name).await?;
        print_degradation(&detail);

        let Some(plugin) = detail.value else {
            println!(
                "{}",
                format!("No marketplace entry for '{author}/{name}'").yellow()
            );
            return Ok(());
        };

        println!("{} {}", "==>".bold().blue(), plugin.display_name.bold());
        println!("    {}/{}", plugin.author, plugin.name);
        if !plugin.category.is_empty() {
            println!("    Category: {}", plugin.category.green());
        }
        if let Some(version) = &plugin.latest_version {
            println!("    Latest version: {version}");
        }
        if plugin.install_count > 0 {
            println!("    Installs: {}", plugin.install_count);
        }
        if !plugin.description.is_empty() {
            println!("    {}", plugin.description);
        }

        let versions = client.versions(author, name).await?;
        if !versions.value.is_empty() {
            println!("{} Versions", "==>".bold().blue());
            for v in versions.value.iter().take(self.versions) {
                match &v.created_at {
                    Some(created_at) => println!("    {}  ({created_at})", v.version),
                    None => println!("    {}", v.version),
                }
            }
        }
        Ok(())
    }
}
