// repack-common/src/pipeline.rs
use serde::{Deserialize, Serialize};

use crate::error::RepackError;
use crate::model::{SourceRef, TaskId};

// --- Shared Structs ---

/// A job as it sits on the queue, before a worker claims it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub task_id: TaskId,
    pub source: SourceRef,
    pub platform: String,
    pub suffix: String,
}

/// Events mirrored onto the broadcast channel while the pipeline runs.
///
/// The registry remains the source of truth for task state; these exist so
/// the CLI status display can narrate without polling the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    EngineStarted {
        worker_count: usize,
    },
    EngineFinished {
        duration_secs: f64,
        success_count: usize,
        fail_count: usize,
    },
    JobStarted {
        task_id: TaskId,
        target: String,
    },
    SourceResolved {
        task_id: TaskId,
        url: String,
    },
    DownloadStarted {
        task_id: TaskId,
        url: String,
    },
    DownloadFinished {
        task_id: TaskId,
        size_bytes: u64,
    },
    RepackageStarted {
        task_id: TaskId,
    },
    ToolProgress {
        task_id: TaskId,
        percent: u8,
        message: String,
    },
    JobSuccess {
        task_id: TaskId,
        filename: String,
        size_bytes: u64,
    },
    JobFailed {
        task_id: TaskId,
        error: String,
    },
    LogInfo {
        message: String,
    },
    LogWarn {
        message: String,
    },
}

impl PipelineEvent {
    pub fn job_failed(task_id: TaskId, error: &RepackError) -> Self {
        PipelineEvent::JobFailed {
            task_id,
            error: error.to_string(),
        }
    }
}
