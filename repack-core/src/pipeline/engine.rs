// repack-core/src/pipeline/engine.rs
// Pipeline engine: drains the shared job queue with a bounded pool of
// concurrent workers and narrates on a broadcast channel.
use std::sync::Arc;
use std::time::Instant;

use repack_common::config::Config;
use repack_common::error::{RepackError, Result};
use repack_common::kv::KvStore;
use repack_common::model::{SourceRef, Task};
use repack_common::pipeline::{PipelineEvent, QueuedJob};
use repack_net::{ArchiveFetcher, HttpFetcher, MarketplaceClient};
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::pipeline::worker::{run_job, JobContext};
use crate::registry::TaskRegistry;
use crate::repackager::{CommandPackageTool, PackageTool};

const QUEUE_KEY: &str = "queue:repackage";
const EVENT_CHANNEL_CAPACITY: usize = 256;
const MAX_WORKERS: usize = 6;

#[derive(Debug, Clone, Copy)]
pub struct EngineSummary {
    pub success_count: usize,
    pub fail_count: usize,
    pub duration_secs: f64,
}

pub struct PipelineEngine {
    ctx: Arc<JobContext>,
    store: Arc<dyn KvStore>,
    worker_count: usize,
}

impl PipelineEngine {
    pub fn new(
        config: Config,
        store: Arc<dyn KvStore>,
        registry: Arc<TaskRegistry>,
        marketplace: Arc<MarketplaceClient>,
        fetcher: Arc<dyn ArchiveFetcher>,
        tool: Arc<dyn PackageTool>,
    ) -> Self {
        let worker_count = config
            .worker_count
            .unwrap_or_else(|| num_cpus::get_physical().saturating_sub(1).clamp(1, MAX_WORKERS));
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        PipelineEngine {
            ctx: Arc::new(JobContext {
                config,
                registry,
                marketplace,
                fetcher,
                tool,
                events,
            }),
            store,
            worker_count,
        }
    }

    /// Engine wired with the production transports and the configured
    /// external tool.
    pub fn with_defaults(config: Config, store: Arc<dyn KvStore>) -> Result<Self> {
        let registry = Arc::new(TaskRegistry::new(store.clone()));
        let marketplace = Arc::new(MarketplaceClient::new(&config, store.clone())?);
        let fetcher = Arc::new(HttpFetcher::new(&config)?);
        let tool = Arc::new(CommandPackageTool::new(&config));
        Ok(Self::new(config, store, registry, marketplace, fetcher, tool))
    }

    pub fn registry(&self) -> Arc<TaskRegistry> {
        self.ctx.registry.clone()
    }

    pub fn marketplace(&self) -> Arc<MarketplaceClient> {
        self.ctx.marketplace.clone()
    }

    pub fn config(&self) -> &Config {
        &self.ctx.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<PipelineEvent> {
        self.ctx.events.subscribe()
    }

    /// Creates the task record and places the job on the queue. Platform
    /// and suffix fall back to the configured defaults.
    pub async fn enqueue(
        &self,
        source: SourceRef,
        platform: Option<String>,
        suffix: Option<String>,
    ) -> Result<Task> {
        let platform = platform.unwrap_or_else(|| self.ctx.config.default_platform.clone());
        let suffix = suffix.unwrap_or_else(|| self.ctx.config.default_suffix.clone());

        let task = self
            .ctx
            .registry
            .create(source, platform.clone(), suffix.clone())
            .await?;
        let job = QueuedJob {
            task_id: task.id,
            source: task.source.clone(),
            platform,
            suffix,
        };
        self.store
            .push(QUEUE_KEY, serde_json::to_value(&job)?)
            .await?;
        debug!("Enqueued task {} ({})", task.id, task.source.display_id());
        Ok(task)
    }

    /// Drains the queue with up to `worker_count` jobs in flight and waits
    /// for all of them, returning the run's tally.
    pub async fn run_until_idle(&self) -> Result<EngineSummary> {
        let started = Instant::now();
        self.ctx.emit(PipelineEvent::EngineStarted {
            worker_count: self.worker_count,
        });

        let semaphore = Arc::new(Semaphore::new(self.worker_count));
        let mut join_set: JoinSet<bool> = JoinSet::new();
        let mut success_count = 0usize;
        let mut fail_count = 0usize;

        while let Some(raw) = self.store.pop(QUEUE_KEY).await? {
            let job: QueuedJob = match serde_json::from_value(raw) {
                Ok(job) => job,
                Err(e) => {
                    warn!("Dropping malformed queue entry: {e}");
                    fail_count += 1;
                    continue;
                }
            };

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| RepackError::Generic(format!("Worker pool closed: {e}")))?;
            let ctx = self.ctx.clone();
            join_set.spawn(async move {
                let _permit = permit;
                run_job(&ctx, job).await
            });
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(true) => success_count += 1,
                Ok(false) => fail_count += 1,
                Err(e) => {
                    error!("Worker task panicked: {e}");
                    fail_count += 1;
                }
            }
        }

        let summary = EngineSummary {
            success_count,
            fail_count,
            duration_secs: started.elapsed().as_secs_f64(),
        };
        self.ctx.emit(PipelineEvent::EngineFinished {
            duration_secs: summary.duration_secs,
            success_count,
            fail_count,
        });
        Ok(summary)
    }
}
