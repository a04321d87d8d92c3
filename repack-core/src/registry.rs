// repack-core/src/registry.rs
// Task registry over the shared KV store. All mutation goes through
// `apply`, which enforces the forward-only lifecycle under the store's
// per-key atomic update and mirrors every accepted change onto a broadcast
// channel for the notification hub.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use repack_common::error::{RepackError, Result};
use repack_common::kv::KvStore;
use repack_common::model::{SourceRef, Task, TaskId, TaskPatch, TaskStatus};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const TASK_PREFIX: &str = "task:";
const INDEX_KEY: &str = "tasks:index";
const UPDATE_CHANNEL_CAPACITY: usize = 256;

pub struct TaskRegistry {
    store: Arc<dyn KvStore>,
    updates: broadcast::Sender<Task>,
}

fn task_key(id: TaskId) -> String {
    format!("{TASK_PREFIX}{id}")
}

impl TaskRegistry {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        TaskRegistry { store, updates }
    }

    /// Snapshot stream of accepted task mutations, newest state per frame.
    pub fn updates(&self) -> broadcast::Receiver<Task> {
        self.updates.subscribe()
    }

    /// Mints a new pending task and prepends it to the recency index.
    pub async fn create(
        &self,
        source: SourceRef,
        platform: String,
        suffix: String,
    ) -> Result<Task> {
        let task = Task::new(source, platform, suffix);
        debug!("Creating task {} for {}", task.id, task.source.display_id());

        self.store
            .put(&task_key(task.id), serde_json::to_value(&task)?, None)
            .await?;

        let id_string = task.id.to_string();
        self.store
            .update(
                INDEX_KEY,
                Box::new(move |current| {
                    let mut ids: Vec<String> = current
                        .and_then(|v| serde_json::from_value(v).ok())
                        .unwrap_or_default();
                    ids.insert(0, id_string);
                    Some(Value::from(ids))
                }),
            )
            .await?;

        let _ = self.updates.send(task.clone());
        Ok(task)
    }

    pub async fn get(&self, id: TaskId) -> Result<Option<Task>> {
        match self.store.get(&task_key(id)).await? {
            Some(raw) => Ok(Some(serde_json::from_value(raw)?)),
            None => Ok(None),
        }
    }

    /// Applies a partial mutation atomically.
    ///
    /// Rules enforced here rather than trusted from callers:
    /// - a task already in a terminal state ignores every further patch;
    /// - status never moves backwards through the lifecycle;
    /// - progress never decreases and is capped at 100;
    /// - `completed_at` is stamped exactly once, on entering a terminal
    ///   state.
    ///
    /// Returns the task as stored after the call, or `None` for an unknown
    /// id.
    pub async fn apply(&self, id: TaskId, patch: TaskPatch) -> Result<Option<Task>> {
        let applied = Arc::new(AtomicBool::new(false));
        let applied_flag = applied.clone();

        let after = self
            .store
            .update(
                &task_key(id),
                Box::new(move |current| {
                    let mut task: Task = serde_json::from_value(current?).ok()?;
                    if task.status.is_terminal() {
                        // Late worker writes after completion are no-ops.
                        return None;
                    }

                    if let Some(status) = patch.status {
                        if status.rank() < task.status.rank() {
                            warn!(
                                "Ignoring status regression {} -> {} for task {}",
                                task.status, status, task.id
                            );
                        } else {
                            task.status = status;
                        }
                    }
                    if let Some(progress) = patch.progress {
                        task.progress = task.progress.max(progress.min(100));
                    }
                    if let Some(message) = patch.message {
                        task.message = message;
                    }
                    if let Some(error) = patch.error {
                        task.error = Some(error);
                    }
                    if let Some(output) = patch.output {
                        task.output = Some(output);
                    }
                    if let Some(metadata) = patch.marketplace_metadata {
                        task.marketplace_metadata = Some(metadata);
                    }

                    task.updated_at = Utc::now();
                    if task.status.is_terminal() && task.completed_at.is_none() {
                        task.completed_at = Some(task.updated_at);
                    }
                    if task.status == TaskStatus::Completed {
                        task.progress = 100;
                    }

                    applied_flag.store(true, Ordering::SeqCst);
                    serde_json::to_value(&task).ok()
                }),
            )
            .await?;

        let task = match after {
            Some(raw) => Some(serde_json::from_value::<Task>(raw)?),
            None => None,
        };
        if applied.load(Ordering::SeqCst) {
            if let Some(task) = &task {
                let _ = self.updates.send(task.clone());
            }
        }
        Ok(task)
    }

    /// Most recently created tasks, newest first.
    pub async fn list_recent(&self, limit: usize) -> Result<Vec<Task>> {
        let ids: Vec<String> = match self.store.get(INDEX_KEY).await? {
            Some(raw) => serde_json::from_value(raw)?,
            None => return Ok(Vec::new()),
        };
        let mut tasks = Vec::new();
        for id in ids.into_iter().take(limit) {
            let id: TaskId = id
                .parse()
                .map_err(|_| RepackError::Store(format!("Corrupt task index entry: {id}")))?;
            if let Some(task) = self.get(id).await? {
                tasks.push(task);
            }
        }
        Ok(tasks)
    }

    /// Completed tasks that actually produced an artifact. A task in the
    /// completed state without an output has nothing retrievable to list.
    pub async fn list_completed(&self, limit: usize) -> Result<Vec<Task>> {
        let all = self.list_recent(usize::MAX).await?;
        Ok(all
            .into_iter()
            .filter(|t| t.status == TaskStatus::Completed && t.output.is_some())
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use repack_common::kv::MemoryStore;
    use repack_common::model::TaskOutput;

    use super::*;

    fn registry() -> TaskRegistry {
        TaskRegistry::new(Arc::new(MemoryStore::new()))
    }

    fn direct_url() -> SourceRef {
        SourceRef::DirectUrl {
            url: "https://example.com/plugin.difypkg".to_string(),
        }
    }

    async fn new_task(registry: &TaskRegistry) -> Task {
        registry
            .create(
                direct_url(),
                "manylinux2014_x86_64".to_string(),
                "offline".to_string(),
            )
            .await
            .unwrap()
    }

    fn completed_with_output() -> TaskPatch {
        let mut patch = TaskPatch::status(TaskStatus::Completed);
        patch.output = Some(TaskOutput {
            filename: "plugin-offline.difypkg".to_string(),
            size_bytes: 42,
            handle: "plugin-offline.difypkg".into(),
        });
        patch
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let registry = registry();
        let task = new_task(&registry).await;
        let loaded = registry.get(task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.status, TaskStatus::Pending);
        assert_eq!(loaded.progress, 0);
    }

    #[tokio::test]
    async fn unknown_id_is_none_not_error() {
        let registry = registry();
        assert!(registry.get(TaskId::new()).await.unwrap().is_none());
        assert!(registry
            .apply(TaskId::new(), TaskPatch::progress(10, "x"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn progress_never_decreases() {
        let registry = registry();
        let task = new_task(&registry).await;

        registry
            .apply(task.id, TaskPatch::progress(50, "halfway"))
            .await
            .unwrap();
        let after = registry
            .apply(task.id, TaskPatch::progress(30, "stale write"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.progress, 50);
        // Message still moves forward even when progress is clamped.
        assert_eq!(after.message, "stale write");
    }

    #[tokio::test]
    async fn status_never_moves_backwards() {
        let registry = registry();
        let task = new_task(&registry).await;

        registry
            .apply(task.id, TaskPatch::status(TaskStatus::Processing))
            .await
            .unwrap();
        let after = registry
            .apply(task.id, TaskPatch::status(TaskStatus::Downloading))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn terminal_tasks_ignore_further_patches() {
        let registry = registry();
        let task = new_task(&registry).await;

        registry
            .apply(task.id, TaskPatch::failed("download failed"))
            .await
            .unwrap();
        let completed_at = registry
            .get(task.id)
            .await
            .unwrap()
            .unwrap()
            .completed_at
            .unwrap();

        let after = registry
            .apply(task.id, TaskPatch::progress(99, "zombie worker"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.status, TaskStatus::Failed);
        assert_ne!(after.message, "zombie worker");
        assert_eq!(after.completed_at, Some(completed_at));
    }

    #[tokio::test]
    async fn completion_forces_progress_to_hundred() {
        let registry = registry();
        let task = new_task(&registry).await;

        let after = registry
            .apply(task.id, completed_with_output())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(after.progress, 100);
        assert!(after.completed_at.is_some());
        assert!(after.output.is_some());
    }

    #[tokio::test]
    async fn recency_index_is_newest_first() {
        let registry = registry();
        let first = new_task(&registry).await;
        let second = new_task(&registry).await;

        let recent = registry.list_recent(10).await.unwrap();
        assert_eq!(recent[0].id, second.id);
        assert_eq!(recent[1].id, first.id);

        assert!(registry.list_completed(10).await.unwrap().is_empty());
        registry
            .apply(first.id, completed_with_output())
            .await
            .unwrap();
        let completed = registry.list_completed(10).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, first.id);
    }

    #[tokio::test]
    async fn completed_task_without_output_is_not_listed() {
        let registry = registry();
        let task = new_task(&registry).await;

        registry
            .apply(task.id, TaskPatch::status(TaskStatus::Completed))
            .await
            .unwrap();
        assert!(registry.list_completed(10).await.unwrap().is_empty());

        // The same state with an artifact attached is listed.
        let with_output = new_task(&registry).await;
        registry
            .apply(with_output.id, completed_with_output())
            .await
            .unwrap();
        let completed = registry.list_completed(10).await.unwrap();
        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0].id, with_output.id);
    }

    #[tokio::test]
    async fn accepted_patches_are_broadcast() {
        let registry = registry();
        let task = new_task(&registry).await;
        let mut updates = registry.updates();

        registry
            .apply(task.id, TaskPatch::progress(25, "downloading"))
            .await
            .unwrap();
        let seen = updates.recv().await.unwrap();
        assert_eq!(seen.id, task.id);
        assert_eq!(seen.progress, 25);
    }
}
