// repack-net/src/http.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use repack_common::config::Config;
use repack_common::error::{RepackError, Result};
use reqwest::header::{HeaderMap, ACCEPT, USER_AGENT};
use reqwest::{Client, StatusCode};
use tokio::fs::File as TokioFile;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, warn};

use crate::validation::{check_declared_size, validate_source_url};

const CONNECT_TIMEOUT_SECS: u64 = 30;
const USER_AGENT_STRING: &str = "repack service (Rust; +https://github.com/repack-tools/repack)";

/// A source archive staged into the scratch directory.
#[derive(Debug, Clone)]
pub struct FetchedArchive {
    pub path: PathBuf,
    pub size_bytes: u64,
}

/// Seam between the pipeline's fetch step and the network. Tests substitute
/// a stub; production uses [`HttpFetcher`].
#[async_trait]
pub trait ArchiveFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedArchive>;
}

pub struct HttpFetcher {
    client: Client,
    max_bytes: u64,
    attempts: u32,
}

impl HttpFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        Ok(HttpFetcher {
            client: build_http_client(config.fetch_timeout)?,
            max_bytes: config.max_download_bytes,
            attempts: config.fetch_attempts.max(1),
        })
    }
}

#[async_trait]
impl ArchiveFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<FetchedArchive> {
        validate_source_url(url)?;
        fs::create_dir_all(dest_dir).map_err(|e| {
            RepackError::Generic(format!(
                "Failed to create scratch directory {}: {}",
                dest_dir.display(),
                e
            ))
        })?;

        let filename = url
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or("plugin-download")
            .to_string();
        let final_path = dest_dir.join(&filename);

        let mut last_error: Option<RepackError> = None;
        for attempt in 1..=self.attempts {
            debug!("Download attempt {attempt}/{} for {url}", self.attempts);
            match download_bounded(&self.client, url, &final_path, self.max_bytes).await {
                Ok(size_bytes) => {
                    debug!(
                        "Downloaded {url} -> {} ({size_bytes} bytes)",
                        final_path.display()
                    );
                    return Ok(FetchedArchive {
                        path: final_path,
                        size_bytes,
                    });
                }
                // Over-limit and hard HTTP statuses are not transient.
                Err(e @ (RepackError::SizeLimit(_) | RepackError::DownloadError(..))) => {
                    return Err(e);
                }
                Err(e) => {
                    error!("Download attempt {attempt} failed for {url}: {e}");
                    last_error = Some(e);
                    if attempt < self.attempts {
                        tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            RepackError::DownloadError(
                filename,
                url.to_string(),
                "All download attempts failed.".to_string(),
            )
        }))
    }
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, USER_AGENT_STRING.parse().unwrap());
    headers.insert(ACCEPT, "*/*".parse().unwrap());
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
        .default_headers(headers)
        .redirect(reqwest::redirect::Policy::limited(10))
        .build()
        .map_err(|e| RepackError::Generic(format!("Failed to build HTTP client: {e}")))
}

/// Streams the body to a temp file next to `final_path`, counting bytes
/// against `max_bytes`, then renames into place. The temp file is removed
/// on any failure so an aborted download leaves nothing behind.
async fn download_bounded(
    client: &Client,
    url: &str,
    final_path: &Path,
    max_bytes: u64,
) -> Result<u64> {
    let temp_filename = format!(
        ".{}.download",
        final_path.file_name().unwrap_or_default().to_string_lossy()
    );
    let temp_path = final_path.with_file_name(temp_filename);
    if temp_path.exists() {
        if let Err(e) = fs::remove_file(&temp_path) {
            warn!(
                "Could not remove existing temporary file {}: {}",
                temp_path.display(),
                e
            );
        }
    }

    let response = client.get(url).send().await.map_err(|e| {
        debug!("HTTP request failed for {url}: {e}");
        RepackError::Generic(format!("HTTP request failed for {url}: {e}"))
    })?;
    let status = response.status();
    debug!("Received HTTP status: {} for {}", status, url);

    if !status.is_success() {
        let name = final_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        return match status {
            StatusCode::NOT_FOUND => Err(RepackError::DownloadError(
                name,
                url.to_string(),
                "Resource not found (404)".to_string(),
            )),
            StatusCode::FORBIDDEN => Err(RepackError::DownloadError(
                name,
                url.to_string(),
                "Access forbidden (403)".to_string(),
            )),
            _ => Err(RepackError::Generic(format!("HTTP error {status} for URL {url}"))),
        };
    }

    // Content-Length, when declared, is rejected before any disk write.
    check_declared_size(response.content_length(), max_bytes, "Source archive")?;

    let mut temp_file = TokioFile::create(&temp_path).await.map_err(|e| {
        RepackError::Generic(format!(
            "Failed to create temp file {}: {}",
            temp_path.display(),
            e
        ))
    })?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(c) => c,
            Err(e) => {
                let _ = fs::remove_file(&temp_path);
                return Err(RepackError::Generic(format!(
                    "Failed while reading response body: {e}"
                )));
            }
        };
        written += chunk.len() as u64;
        if written > max_bytes {
            drop(temp_file);
            let _ = fs::remove_file(&temp_path);
            return Err(RepackError::SizeLimit(format!(
                "Source archive exceeded the configured limit of {max_bytes} bytes"
            )));
        }
        if let Err(e) = temp_file.write_all(&chunk).await {
            let _ = fs::remove_file(&temp_path);
            return Err(RepackError::Generic(format!(
                "Failed to write download stream to {}: {}",
                temp_path.display(),
                e
            )));
        }
    }
    temp_file.flush().await.map_err(RepackError::from)?;
    drop(temp_file);

    fs::rename(&temp_path, final_path).map_err(|e| {
        RepackError::Generic(format!(
            "Failed to move temp file {} to {}: {}",
            temp_path.display(),
            final_path.display(),
            e
        ))
    })?;
    Ok(written)
}
