// repack/src/main.rs
use std::fs;
use std::process;

use clap::Parser;
use colored::Colorize;
use repack_common::config::Config;
use repack_common::error::Result;
use tracing::level_filters::LevelFilter;
use tracing::{debug, error};
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::EnvFilter;

mod cli;

use cli::CliArgs;

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    let config = Config::load()?;

    let level_filter = match cli_args.verbose {
        0 => LevelFilter::INFO,
        1 => LevelFilter::DEBUG,
        _ => LevelFilter::TRACE,
    };
    let max_log_level = level_filter.into_level().unwrap_or(tracing::Level::INFO);

    let env_filter = EnvFilter::builder()
        .with_default_directive(level_filter.into())
        .with_env_var("REPACK_LOG")
        .from_env_lossy();

    let log_dir = config.logs_dir();
    if let Err(e) = fs::create_dir_all(&log_dir) {
        eprintln!(
            "{} Failed to create log directory {}: {}",
            "Warning:".yellow().bold(),
            log_dir.display(),
            e
        );
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
    } else if cli_args.verbose > 0 {
        let file_appender = tracing_appender::rolling::daily(&log_dir, "repack.log");
        let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

        // Verbose mode mirrors debug/trace output to stderr and the log file.
        let stderr_writer = std::io::stderr.with_max_level(max_log_level);
        let file_writer = non_blocking_appender.with_max_level(max_log_level);

        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(stderr_writer.and(file_writer))
            .with_ansi(true)
            .without_time()
            .try_init();

        // The guard must outlive main for the appender to flush.
        Box::leak(Box::new(guard));

        debug!(
            "Verbose logging enabled. Writing logs to: {}/repack.log",
            log_dir.display()
        );
    } else {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .with_ansi(true)
            .without_time()
            .try_init();
    }

    if let Err(e) = cli_args.command.run(&config).await {
        error!("Command failed: {:#}", e);
        eprintln!("{}: {:#}", "Error".red().bold(), e);
        process::exit(1);
    }

    debug!("Command completed successfully.");
    Ok(())
}
