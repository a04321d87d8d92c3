// ===== repack-common/src/model/task.rs =====
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::marketplace::MarketplaceMetadata;

/// Newtype for task ids. Minted once at creation, immutable afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        TaskId(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(TaskId(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a repackaging job.
///
/// Transitions only ever move forward: pending -> downloading -> processing
/// -> completed | failed. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Downloading,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Rank within the forward-only lifecycle, used to reject regressions.
    pub fn rank(&self) -> u8 {
        match self {
            TaskStatus::Pending => 0,
            TaskStatus::Downloading => 1,
            TaskStatus::Processing => 2,
            TaskStatus::Completed | TaskStatus::Failed => 3,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Downloading => "downloading",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Where the package to repackage comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    DirectUrl {
        url: String,
    },
    MarketplaceRef {
        author: String,
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        version: Option<String>,
    },
    UploadedFile {
        path: PathBuf,
    },
}

impl SourceRef {
    /// Short identifier used in logs and event streams.
    pub fn display_id(&self) -> String {
        match self {
            SourceRef::DirectUrl { url } => url
                .rsplit('/')
                .next()
                .filter(|s| !s.is_empty())
                .unwrap_or(url.as_str())
                .to_string(),
            SourceRef::MarketplaceRef {
                author,
                name,
                version,
            } => match version {
                Some(v) => format!("{author}/{name}@{v}"),
                None => format!("{author}/{name}"),
            },
            SourceRef::UploadedFile { path } => path
                .file_name()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| path.display().to_string()),
        }
    }
}

/// Retrievable artifact of a completed job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskOutput {
    pub filename: String,
    pub size_bytes: u64,
    /// Path under the output directory the artifact can be fetched from.
    pub handle: PathBuf,
}

/// One repackaging job and its tracked state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    /// 0-100, never decreases while the task is live.
    pub progress: u8,
    /// Current-step description, replaced (not appended) on each update.
    pub message: String,
    pub source: SourceRef,
    pub platform: String,
    pub suffix: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Present iff status == failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Present iff status == completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<TaskOutput>,
    /// Denormalized plugin descriptor when the source is a marketplace ref.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marketplace_metadata: Option<MarketplaceMetadata>,
}

impl Task {
    pub fn new(source: SourceRef, platform: String, suffix: String) -> Self {
        let now = Utc::now();
        Task {
            id: TaskId::new(),
            status: TaskStatus::Pending,
            progress: 0,
            message: "Task queued".to_string(),
            source,
            platform,
            suffix,
            created_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
            output: None,
            marketplace_metadata: None,
        }
    }
}

/// Partial mutation applied through the registry's atomic update.
///
/// Only the pipeline worker owning a job constructs these; readers never
/// write. Fields left as `None` keep their current value.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub progress: Option<u8>,
    pub message: Option<String>,
    pub error: Option<String>,
    pub output: Option<TaskOutput>,
    pub marketplace_metadata: Option<MarketplaceMetadata>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        TaskPatch {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u8, message: impl Into<String>) -> Self {
        TaskPatch {
            progress: Some(progress),
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        let error = error.into();
        TaskPatch {
            status: Some(TaskStatus::Failed),
            message: Some(error.clone()),
            error: Some(error),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_ranks_are_forward_only() {
        assert!(TaskStatus::Pending.rank() < TaskStatus::Downloading.rank());
        assert!(TaskStatus::Downloading.rank() < TaskStatus::Processing.rank());
        assert!(TaskStatus::Processing.rank() < TaskStatus::Completed.rank());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn source_ref_serializes_tagged() {
        let source = SourceRef::MarketplaceRef {
            author: "langgenius".to_string(),
            name: "agent".to_string(),
            version: None,
        };
        let json = serde_json::to_value(&source).unwrap();
        assert_eq!(json["kind"], "marketplace_ref");
        assert_eq!(json["author"], "langgenius");
        assert!(json.get("version").is_none());
    }

    #[test]
    fn task_round_trips_through_json() {
        let task = Task::new(
            SourceRef::DirectUrl {
                url: "https://example.com/plugin.difypkg".to_string(),
            },
            "manylinux2014_x86_64".to_string(),
            "offline".to_string(),
        );
        let json = serde_json::to_string(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.status, TaskStatus::Pending);
        assert_eq!(back.progress, 0);
    }
}
