// repack-core/src/pipeline/worker.rs
// One claimed job, start to finish: resolve the source, stage the archive
// in a per-task scratch directory, run the repackaging tool, publish the
// artifact. Every checkpoint is written through the registry so subscribers
// see the same numbers the worker does.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use repack_common::config::Config;
use repack_common::error::{RepackError, Result};
use repack_common::model::{SourceRef, TaskId, TaskOutput, TaskPatch, TaskStatus};
use repack_common::pipeline::{PipelineEvent, QueuedJob};
use repack_net::{validate_source_url, ArchiveFetcher, FetchedArchive, MarketplaceClient};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, warn};

use crate::pipeline::progress::map_tool_percent;
use crate::registry::TaskRegistry;
use crate::repackager::{PackageTool, ToolProgress};

/// Everything a worker needs, shared across the engine's tasks.
pub(crate) struct JobContext {
    pub config: Config,
    pub registry: Arc<TaskRegistry>,
    pub marketplace: Arc<MarketplaceClient>,
    pub fetcher: Arc<dyn ArchiveFetcher>,
    pub tool: Arc<dyn PackageTool>,
    pub events: broadcast::Sender<PipelineEvent>,
}

impl JobContext {
    pub(crate) fn emit(&self, event: PipelineEvent) {
        let _ = self.events.send(event);
    }

    async fn patch(&self, task_id: TaskId, patch: TaskPatch) {
        if let Err(e) = self.registry.apply(task_id, patch).await {
            error!("Failed to persist state for task {task_id}: {e}");
        }
    }
}

/// Runs one job to a terminal state. Returns whether it completed
/// successfully; the failure path has already been recorded by the time
/// this returns.
pub(crate) async fn run_job(ctx: &JobContext, job: QueuedJob) -> bool {
    let task_id = job.task_id;
    ctx.emit(PipelineEvent::JobStarted {
        task_id,
        target: job.source.display_id(),
    });

    let scratch = ctx.config.scratch_dir().join(task_id.to_string());
    let result = execute(ctx, &job, &scratch).await;
    cleanup_scratch(&scratch).await;

    match result {
        Ok(output) => {
            debug!("Task {task_id} completed: {}", output.filename);
            ctx.emit(PipelineEvent::JobSuccess {
                task_id,
                filename: output.filename,
                size_bytes: output.size_bytes,
            });
            true
        }
        Err(e) => {
            error!("Task {task_id} failed: {e}");
            ctx.patch(task_id, TaskPatch::failed(e.to_string())).await;
            ctx.emit(PipelineEvent::job_failed(task_id, &e));
            false
        }
    }
}

async fn execute(ctx: &JobContext, job: &QueuedJob, scratch: &Path) -> Result<TaskOutput> {
    let task_id = job.task_id;

    let mut patch = TaskPatch::progress(5, "Resolving source");
    patch.status = Some(TaskStatus::Downloading);
    ctx.patch(task_id, patch).await;

    let staged = match &job.source {
        SourceRef::DirectUrl { url } => {
            validate_source_url(url)?;
            ctx.emit(PipelineEvent::SourceResolved {
                task_id,
                url: url.clone(),
            });
            ctx.patch(task_id, TaskPatch::progress(10, format!("Fetching {url}")))
                .await;
            fetch(ctx, task_id, url, scratch).await?
        }
        SourceRef::MarketplaceRef {
            author,
            name,
            version,
        } => {
            let resolved = ctx
                .marketplace
                .resolve_download(author, name, version.as_deref())
                .await?;
            if resolved.fallback_used {
                warn!("Resolved {author}/{name} through the scrape fallback");
                ctx.emit(PipelineEvent::LogWarn {
                    message: format!("Marketplace degraded; resolved {author}/{name} via fallback"),
                });
            }
            let mut patch = TaskPatch::progress(
                10,
                format!("Resolved {author}/{name}@{}", resolved.version),
            );
            patch.marketplace_metadata = Some(resolved.metadata.clone());
            ctx.patch(task_id, patch).await;
            ctx.emit(PipelineEvent::SourceResolved {
                task_id,
                url: resolved.url.clone(),
            });
            fetch(ctx, task_id, &resolved.url, scratch).await?
        }
        SourceRef::UploadedFile { path } => stage_local(ctx, path, scratch).await?,
    };
    ctx.patch(task_id, TaskPatch::progress(50, "Archive staged"))
        .await;

    let mut patch = TaskPatch::status(TaskStatus::Processing);
    patch.message = Some("Repackaging".to_string());
    ctx.patch(task_id, patch).await;
    ctx.emit(PipelineEvent::RepackageStarted { task_id });

    let (tx, mut rx) = mpsc::unbounded_channel::<ToolProgress>();
    let forward_registry = ctx.registry.clone();
    let forward_events = ctx.events.clone();
    let forwarder = tokio::spawn(async move {
        while let Some(report) = rx.recv().await {
            let percent = map_tool_percent(report.percent);
            if let Err(e) = forward_registry
                .apply(task_id, TaskPatch::progress(percent, report.message.clone()))
                .await
            {
                error!("Failed to persist tool progress for task {task_id}: {e}");
            }
            let _ = forward_events.send(PipelineEvent::ToolProgress {
                task_id,
                percent,
                message: report.message,
            });
        }
    });

    let artifact = ctx
        .tool
        .repackage(&staged.path, scratch, &job.platform, &job.suffix, tx)
        .await;
    // The sender is gone once repackage returns, so the forwarder drains
    // and exits; waiting here keeps progress writes ordered before publish.
    let _ = forwarder.await;
    let artifact = artifact?;

    ctx.patch(task_id, TaskPatch::progress(95, "Publishing artifact"))
        .await;
    let output = publish(ctx, &artifact).await?;

    let mut patch = TaskPatch::status(TaskStatus::Completed);
    patch.progress = Some(100);
    patch.message = Some(format!("Completed: {}", output.filename));
    patch.output = Some(output.clone());
    ctx.patch(task_id, patch).await;

    Ok(output)
}

async fn fetch(
    ctx: &JobContext,
    task_id: TaskId,
    url: &str,
    scratch: &Path,
) -> Result<FetchedArchive> {
    ctx.emit(PipelineEvent::DownloadStarted {
        task_id,
        url: url.to_string(),
    });
    let archive = ctx.fetcher.fetch(url, scratch).await?;
    ctx.emit(PipelineEvent::DownloadFinished {
        task_id,
        size_bytes: archive.size_bytes,
    });
    Ok(archive)
}

/// Uploaded files are staged by copy so the original is never consumed, with
/// the same size ceiling the download path enforces.
async fn stage_local(ctx: &JobContext, path: &Path, scratch: &Path) -> Result<FetchedArchive> {
    let meta = tokio::fs::metadata(path).await.map_err(|_| {
        RepackError::NotFound(format!("Uploaded file {} does not exist", path.display()))
    })?;
    let size_bytes = meta.len();
    if size_bytes > ctx.config.max_download_bytes {
        return Err(RepackError::SizeLimit(format!(
            "Uploaded file exceeded the configured limit of {} bytes",
            ctx.config.max_download_bytes
        )));
    }

    let filename = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| {
            RepackError::ValidationError(format!("{} has no file name", path.display()))
        })?;
    tokio::fs::create_dir_all(scratch).await?;
    let dest = scratch.join(&filename);
    tokio::fs::copy(path, &dest).await?;

    Ok(FetchedArchive {
        path: dest,
        size_bytes,
    })
}

/// Moves the artifact into the output directory and returns the retrievable
/// handle. Rename first; copy-and-remove covers a cross-device output dir.
async fn publish(ctx: &JobContext, artifact: &Path) -> Result<TaskOutput> {
    let output_dir = ctx.config.output_dir();
    tokio::fs::create_dir_all(&output_dir).await?;

    let filename = artifact
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .ok_or_else(|| {
            RepackError::Generic(format!("Artifact {} has no file name", artifact.display()))
        })?;
    let dest = output_dir.join(&filename);
    let size_bytes = tokio::fs::metadata(artifact).await?.len();

    if tokio::fs::rename(artifact, &dest).await.is_err() {
        tokio::fs::copy(artifact, &dest).await?;
        let _ = tokio::fs::remove_file(artifact).await;
    }

    Ok(TaskOutput {
        size_bytes,
        handle: PathBuf::from(&filename),
        filename,
    })
}

async fn cleanup_scratch(scratch: &Path) {
    if scratch.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(scratch).await {
            warn!("Could not clean scratch directory {}: {e}", scratch.display());
        }
    }
}
