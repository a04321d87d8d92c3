// End-to-end pipeline runs against stub transports: a direct-URL success,
// a marketplace resolve that has to fall back to scraping, and a source
// over the size ceiling.
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use repack_common::config::Config;
use repack_common::error::{RepackError, Result};
use repack_common::kv::MemoryStore;
use repack_common::model::{
    PluginCategory, PluginDetail, PluginSummary, PluginVersion, SourceRef, TaskStatus,
};
use repack_core::{PackageTool, PipelineEngine, TaskRegistry, ToolProgress};
use repack_net::{ArchiveFetcher, FetchedArchive, MarketplaceApi, MarketplaceClient, PageFetcher};
use tokio::sync::mpsc;

fn test_config(root: &Path) -> Config {
    Config {
        root: root.to_path_buf(),
        marketplace_api_base: "https://marketplace.example/api/v1".to_string(),
        marketplace_web_base: "https://marketplace.example".to_string(),
        tool_command: "unused".to_string(),
        default_platform: "manylinux2014_x86_64".to_string(),
        default_suffix: "offline".to_string(),
        api_timeout: Duration::from_millis(200),
        scrape_timeout: Duration::from_millis(200),
        scrape_attempts: 1,
        fetch_timeout: Duration::from_secs(5),
        fetch_attempts: 1,
        failure_threshold: 5,
        reset_timeout: Duration::from_secs(60),
        cache_ttl: Duration::from_secs(3600),
        heartbeat_interval: Duration::from_secs(30),
        max_download_bytes: 1024,
        worker_count: Some(2),
    }
}

struct StubFetcher;

#[async_trait]
impl ArchiveFetcher for StubFetcher {
    async fn fetch(&self, _url: &str, dest_dir: &Path) -> Result<FetchedArchive> {
        tokio::fs::create_dir_all(dest_dir).await?;
        let path = dest_dir.join("plugin.difypkg");
        tokio::fs::write(&path, b"archive-bytes").await?;
        Ok(FetchedArchive {
            size_bytes: 13,
            path,
        })
    }
}

struct OversizeFetcher;

#[async_trait]
impl ArchiveFetcher for OversizeFetcher {
    async fn fetch(&self, _url: &str, _dest_dir: &Path) -> Result<FetchedArchive> {
        Err(RepackError::SizeLimit(
            "Source archive exceeded the configured limit of 1024 bytes".to_string(),
        ))
    }
}

/// Writes `<stem>-<suffix>.difypkg` next to the input and reports two
/// progress checkpoints on the tool's own scale.
struct StubTool;

#[async_trait]
impl PackageTool for StubTool {
    async fn repackage(
        &self,
        archive: &Path,
        _work_dir: &Path,
        _platform: &str,
        suffix: &str,
        progress: mpsc::UnboundedSender<ToolProgress>,
    ) -> Result<PathBuf> {
        let _ = progress.send(ToolProgress {
            percent: 25,
            message: "Extracting package".to_string(),
        });
        let stem = archive.file_stem().unwrap().to_string_lossy();
        let output = archive.with_file_name(format!("{stem}-{suffix}.difypkg"));
        tokio::fs::write(&output, b"repackaged-bytes").await?;
        let _ = progress.send(ToolProgress {
            percent: 90,
            message: "Packaging artifact".to_string(),
        });
        Ok(output)
    }
}

struct DeadApi;

#[async_trait]
impl MarketplaceApi for DeadApi {
    async fn search(&self, _q: &str, _p: u32, _s: u32) -> Result<Vec<PluginSummary>> {
        Err(RepackError::Api("service unavailable".to_string()))
    }
    async fn plugin(&self, _a: &str, _n: &str) -> Result<PluginDetail> {
        Err(RepackError::Api("service unavailable".to_string()))
    }
    async fn versions(&self, _a: &str, _n: &str) -> Result<Vec<PluginVersion>> {
        Err(RepackError::Api("service unavailable".to_string()))
    }
    async fn categories(&self) -> Result<Vec<PluginCategory>> {
        Err(RepackError::Api("service unavailable".to_string()))
    }
}

struct DeadPages;

#[async_trait]
impl PageFetcher for DeadPages {
    async fn fetch_page(&self, _url: &str) -> Result<String> {
        Err(RepackError::Scrape("connection refused".to_string()))
    }
}

struct StaticPages(&'static str);

#[async_trait]
impl PageFetcher for StaticPages {
    async fn fetch_page(&self, _url: &str) -> Result<String> {
        Ok(self.0.to_string())
    }
}

fn engine(
    config: Config,
    fetcher: Arc<dyn ArchiveFetcher>,
    api: Arc<dyn MarketplaceApi>,
    pages: Arc<dyn PageFetcher>,
) -> PipelineEngine {
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(TaskRegistry::new(store.clone()));
    let marketplace = Arc::new(MarketplaceClient::with_transports(
        &config,
        store.clone(),
        api,
        pages,
    ));
    PipelineEngine::new(config, store, registry, marketplace, fetcher, Arc::new(StubTool))
}

#[tokio::test]
async fn direct_url_job_completes_and_publishes() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let engine = engine(
        config,
        Arc::new(StubFetcher),
        Arc::new(DeadApi),
        Arc::new(DeadPages),
    );

    let task = engine
        .enqueue(
            SourceRef::DirectUrl {
                url: "https://example.com/plugin.difypkg".to_string(),
            },
            None,
            None,
        )
        .await
        .unwrap();

    let summary = engine.run_until_idle().await.unwrap();
    assert_eq!(summary.success_count, 1);
    assert_eq!(summary.fail_count, 0);

    let done = engine.registry().get(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.progress, 100);
    let output = done.output.expect("completed task carries its output");
    assert_eq!(output.filename, "plugin-offline.difypkg");

    let artifact = engine.config().output_dir().join(&output.filename);
    assert!(artifact.exists());
    // Scratch space is gone once the job reaches a terminal state.
    assert!(!engine
        .config()
        .scratch_dir()
        .join(task.id.to_string())
        .exists());
}

#[tokio::test]
async fn marketplace_job_resolves_through_scrape_when_api_is_down() {
    const PLUGIN_PAGE: &str = r#"<html><body>
        <h1 class="plugin-name">Agent</h1>
        <span class="plugin-version">0.1.0</span>
    </body></html>"#;

    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let engine = engine(
        config,
        Arc::new(StubFetcher),
        Arc::new(DeadApi),
        Arc::new(StaticPages(PLUGIN_PAGE)),
    );

    let task = engine
        .enqueue(
            SourceRef::MarketplaceRef {
                author: "langgenius".to_string(),
                name: "agent".to_string(),
                version: None,
            },
            None,
            None,
        )
        .await
        .unwrap();

    let summary = engine.run_until_idle().await.unwrap();
    assert_eq!(summary.success_count, 1);

    let done = engine.registry().get(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    let metadata = done
        .marketplace_metadata
        .expect("marketplace source attaches its metadata");
    assert_eq!(metadata.source, "marketplace");
    assert_eq!(metadata.author, "langgenius");
    assert_eq!(metadata.version, "0.1.0");
    assert_eq!(metadata.display_name, "Agent");
}

#[tokio::test]
async fn oversize_source_fails_and_cleans_up() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());
    let engine = engine(
        config,
        Arc::new(OversizeFetcher),
        Arc::new(DeadApi),
        Arc::new(DeadPages),
    );

    let task = engine
        .enqueue(
            SourceRef::DirectUrl {
                url: "https://example.com/huge.difypkg".to_string(),
            },
            None,
            None,
        )
        .await
        .unwrap();

    let summary = engine.run_until_idle().await.unwrap();
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.fail_count, 1);

    let done = engine.registry().get(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Failed);
    assert!(done.error.unwrap().contains("limit"));
    assert!(done.completed_at.is_some());
    assert!(!engine
        .config()
        .scratch_dir()
        .join(task.id.to_string())
        .exists());
}

#[tokio::test]
async fn uploaded_file_is_staged_by_copy() {
    let root = tempfile::tempdir().unwrap();
    let config = test_config(root.path());

    let upload = root.path().join("upload.difypkg");
    tokio::fs::write(&upload, b"uploaded-bytes").await.unwrap();

    let engine = engine(
        config,
        Arc::new(StubFetcher),
        Arc::new(DeadApi),
        Arc::new(DeadPages),
    );
    let task = engine
        .enqueue(
            SourceRef::UploadedFile {
                path: upload.clone(),
            },
            None,
            None,
        )
        .await
        .unwrap();

    let summary = engine.run_until_idle().await.unwrap();
    assert_eq!(summary.success_count, 1);

    // The original upload survives; only the copy was consumed.
    assert!(upload.exists());
    let done = engine.registry().get(task.id).await.unwrap().unwrap();
    assert_eq!(done.status, TaskStatus::Completed);
    assert_eq!(done.output.unwrap().filename, "upload-offline.difypkg");
}
