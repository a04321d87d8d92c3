// repack/src/cli/repackage.rs
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::Args;
use colored::Colorize;
use repack_common::config::Config;
use repack_common::error::{RepackError, Result};
use repack_common::kv::MemoryStore;
use repack_common::model::{SourceRef, TaskStatus};
use repack_core::{Frame, NotificationHub, PipelineEngine, Subscription};
use repack_net::validate_source_url;
use tokio::task::JoinHandle;
use tracing::debug;

#[derive(Args, Debug)]
pub struct RepackageArgs {
    /// Plugin sources: a download URL, a local package file, or a
    /// marketplace reference (author/name or author/name@version)
    #[arg(required = true)]
    pub targets: Vec<String>,

    /// Target platform tag baked into the repackaged artifact
    #[arg(long)]
    pub platform: Option<String>,

    /// Filename suffix for the produced artifact
    #[arg(long)]
    pub suffix: Option<String>,
}

impl RepackageArgs {
    pub async fn run(&self, config: &Config) -> Result<()> {
        let sources: Vec<SourceRef> = self
            .targets
            .iter()
            .map(|t| parse_source(t))
            .collect::<Result<_>>()?;
        // Reject oversized local files before any task exists.
        for source in &sources {
            if let SourceRef::UploadedFile { path } = source {
                let size = std::fs::metadata(path)?.len();
                if size > config.max_download_bytes {
                    return Err(RepackError::SizeLimit(format!(
                        "{} is {size} bytes, over the configured limit of {} bytes",
                        path.display(),
                        config.max_download_bytes
                    )));
                }
            }
        }

        let store = Arc::new(MemoryStore::new());
        let engine = PipelineEngine::with_defaults(config.clone(), store)?;
        let hub = NotificationHub::new(engine.registry(), config.heartbeat_interval);
        let _hub_loop = hub.start();

        let mut renderers: Vec<JoinHandle<()>> = Vec::new();
        for source in sources {
            let label = source.display_id();
            let task = engine
                .enqueue(source, self.platform.clone(), self.suffix.clone())
                .await?;
            debug!("Enqueued {} as task {}", label, task.id);
            let sub = hub.subscribe(task.id).await?;
            renderers.push(spawn_renderer(hub.clone(), sub, label));
        }

        let summary = engine.run_until_idle().await?;
        for renderer in renderers {
            let _ = renderer.await;
        }

        println!(
            "{}{}",
            "==> ".bold().blue(),
            format!(
                "Done: {} succeeded, {} failed in {:.1}s",
                summary.success_count, summary.fail_count, summary.duration_secs
            )
            .bold()
        );
        if summary.fail_count > 0 {
            return Err(RepackError::Generic(format!(
                "{} job(s) failed",
                summary.fail_count
            )));
        }
        println!(
            "Artifacts written to {}",
            engine.config().output_dir().display()
        );
        Ok(())
    }
}

/// A target is tried as a URL, then a local file, then a marketplace
/// reference. URL targets must pass https-only validation here, before
/// any task exists.
fn parse_source(target: &str) -> Result<SourceRef> {
    if target.contains("://") {
        validate_source_url(target)?;
        return Ok(SourceRef::DirectUrl {
            url: target.to_string(),
        });
    }
    if Path::new(target).is_file() {
        return Ok(SourceRef::UploadedFile {
            path: PathBuf::from(target),
        });
    }
    if let Some((author, rest)) = target.split_once('/') {
        if !author.is_empty() && !rest.is_empty() && !rest.contains('/') {
            let (name, version) = match rest.split_once('@') {
                Some((name, version)) => (name, Some(version.to_string())),
                None => (rest, None),
            };
            if !name.is_empty() {
                return Ok(SourceRef::MarketplaceRef {
                    author: author.to_string(),
                    name: name.to_string(),
                    version,
                });
            }
        }
    }
    Err(RepackError::ValidationError(format!(
        "'{target}' is not a URL, an existing file, or an author/name reference"
    )))
}

/// Prints the task's frame stream until it closes, acknowledging
/// heartbeats so the hub keeps the subscription alive.
fn spawn_renderer(
    hub: Arc<NotificationHub>,
    mut sub: Subscription,
    label: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = sub.frames.recv().await {
            match frame {
                Frame::Update { task } => match task.status {
                    TaskStatus::Completed => {
                        println!("{} {} {}", "✓".green().bold(), label.bold(), task.message);
                    }
                    TaskStatus::Failed => {
                        let detail = task.error.unwrap_or(task.message);
                        println!("{} {} {}", "✗".red().bold(), label.bold(), detail);
                    }
                    _ => {
                        println!(
                            "{} {} [{:>3}%] {}",
                            "==>".bold().blue(),
                            label,
                            task.progress,
                            task.message
                        );
                    }
                },
                Frame::Heartbeat => hub.ack_heartbeat(sub.task_id, sub.client_id),
                Frame::NotFound => {
                    println!("{} {} unknown task", "✗".red().bold(), label.bold());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_and_references_parse() {
        assert!(matches!(
            parse_source("https://example.com/p.difypkg").unwrap(),
            SourceRef::DirectUrl { .. }
        ));
        match parse_source("langgenius/agent@0.0.9").unwrap() {
            SourceRef::MarketplaceRef {
                author,
                name,
                version,
            } => {
                assert_eq!(author, "langgenius");
                assert_eq!(name, "agent");
                assert_eq!(version.as_deref(), Some("0.0.9"));
            }
            other => panic!("Unexpected source {other:?}"),
        }
        assert!(matches!(
            parse_source("langgenius/agent").unwrap(),
            SourceRef::MarketplaceRef { version: None, .. }
        ));
    }

    #[test]
    fn garbage_targets_are_rejected() {
        assert!(parse_source("definitely-not-a-thing").is_err());
        assert!(parse_source("a/b/c").is_err());
        assert!(parse_source("/").is_err());
    }

    #[test]
    fn insecure_urls_are_rejected_before_any_task_exists() {
        let err = parse_source("http://example.com/plugin.difypkg").unwrap_err();
        assert!(err.to_string().contains("https"));
        assert!(parse_source("ftp://example.com/plugin.difypkg").is_err());
        assert!(parse_source("file:///tmp/plugin.difypkg").is_err());
    }
}
