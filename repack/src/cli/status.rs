// repack/src/cli/status.rs
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use repack_common::config::Config;
use repack_common::error::Result;
use repack_common::kv::MemoryStore;
use repack_net::{CircuitState, MarketplaceClient};

#[derive(Args, Debug)]
pub struct Status {}

impl Status {
    pub async fn run(&self, config: &Config) -> Result<()> {
        println!("{} Configuration", "==>".bold().blue());
        println!("    Root:            {}", config.root.display());
        println!("    Output dir:      {}", config.output_dir().display());
        println!("    Marketplace API: {}", config.marketplace_api_base);
        println!("    Marketplace web: {}", config.marketplace_web_base);
        println!("    Tool command:    {}", config.tool_command);
        println!("    Platform:        {}", config.default_platform);
        println!("    Suffix:          {}", config.default_suffix);
        match config.worker_count {
            Some(n) => println!("    Workers:         {n}"),
            None => println!("    Workers:         auto"),
        }

        // A live categories call doubles as the marketplace health probe.
        let client = MarketplaceClient::new(config, Arc::new(MemoryStore::new()))?;
        let probe = client.categories().await?;

        println!("{} Marketplace", "==>".bold().blue());
        let health = if probe.stale || (probe.fallback_used && probe.value.is_empty()) {
            "unavailable".red().bold()
        } else if probe.fallback_used {
            "degraded (web fallback)".yellow().bold()
        } else {
            "healthy".green().bold()
        };
        println!("    Health:          {health}");

        let snapshot = client.breaker_snapshot();
        let state = match snapshot.state {
            CircuitState::Closed => "closed".green(),
            CircuitState::HalfOpen => "half-open".yellow(),
            CircuitState::Open => "open".red(),
        };
        println!("    Circuit breaker: {state}");
        println!(
            "    Failures:        {}/{} (reset after {}s)",
            snapshot.failure_count, snapshot.failure_threshold, snapshot.reset_timeout_secs
        );
        Ok(())
    }
}
