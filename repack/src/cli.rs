// repack/src/cli.rs
//! Defines the command-line argument structure using clap.
use clap::{ArgAction, Parser, Subcommand};
use repack_common::config::Config;
use repack_common::error::Result;

pub mod categories;
pub mod info;
pub mod repackage;
pub mod search;
pub mod status;
pub mod versions;

use crate::cli::categories::Categories;
use crate::cli::info::Info;
use crate::cli::repackage::RepackageArgs;
use crate::cli::search::Search;
use crate::cli::status::Status;
use crate::cli::versions::Versions;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, name = "repack", bin_name = "repack")]
#[command(propagate_version = true)]
pub struct CliArgs {
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Repackage one or more plugins for offline installation
    Repackage(RepackageArgs),
    /// Search the marketplace for plugins
    Search(Search),
    /// Show details and versions for one plugin
    Info(Info),
    /// List published versions of one plugin
    Versions(Versions),
    /// List marketplace plugin categories
    Categories(Categories),
    /// Show service configuration and marketplace health
    Status(Status),
}

impl Command {
    pub async fn run(&self, config: &Config) -> Result<()> {
        match self {
            Self::Repackage(command) => command.run(config).await,
            Self::Search(command) => command.run(config).await,
            Self::Info(command) => command.run(config).await,
            Self::Versions(command) => command.run(config).await,
            Self::Categories(command) => command.run(config).await,
            Self::Status(command) => command.run(config).await,
        }
    }
}
