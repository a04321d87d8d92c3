// repack-core/src/repackager.rs
// Seam around the external repackaging tool. The pipeline only sees the
// trait; production runs the configured command and streams its stdout
// back as progress.
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use repack_common::config::Config;
use repack_common::error::{RepackError, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::pipeline::progress::parse_progress_line;

/// One progress report from the tool, on the tool's own 0-100 scale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolProgress {
    pub percent: u8,
    pub message: String,
}

#[async_trait]
pub trait PackageTool: Send + Sync {
    /// Repackages `archive` in `work_dir` for the given platform, reporting
    /// progress through `progress`, and returns the path of the produced
    /// artifact.
    async fn repackage(
        &self,
        archive: &Path,
        work_dir: &Path,
        platform: &str,
        suffix: &str,
        progress: mpsc::UnboundedSender<ToolProgress>,
    ) -> Result<PathBuf>;
}

/// Runs the configured external command:
/// `<tool> <archive> --platform <platform> --suffix <suffix>` with the
/// scratch directory as its working directory.
pub struct CommandPackageTool {
    command: String,
}

impl CommandPackageTool {
    pub fn new(config: &Config) -> Self {
        CommandPackageTool {
            command: config.tool_command.clone(),
        }
    }
}

#[async_trait]
impl PackageTool for CommandPackageTool {
    async fn repackage(
        &self,
        archive: &Path,
        work_dir: &Path,
        platform: &str,
        suffix: &str,
        progress: mpsc::UnboundedSender<ToolProgress>,
    ) -> Result<PathBuf> {
        debug!(
            "Running {} on {} (platform: {platform}, suffix: {suffix})",
            self.command,
            archive.display()
        );

        let mut child = Command::new(&self.command)
            .arg(archive)
            .arg("--platform")
            .arg(platform)
            .arg("--suffix")
            .arg(suffix)
            .current_dir(work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                RepackError::Tool(
                    self.command.clone(),
                    format!("Failed to start repackaging tool: {e}"),
                )
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let mut lines = BufReader::new(stdout).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if let Some(report) = parse_progress_line(&line) {
                        let _ = progress.send(report);
                    }
                }
            }
        });

        // Keep a bounded tail of stderr for the failure message.
        let stderr_task = tokio::spawn(async move {
            let mut tail: Vec<String> = Vec::new();
            if let Some(stderr) = stderr {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tail.len() >= 10 {
                        tail.remove(0);
                    }
                    tail.push(line);
                }
            }
            tail
        });

        let status = child.wait().await.map_err(|e| {
            RepackError::Tool(self.command.clone(), format!("Tool did not finish: {e}"))
        })?;
        let _ = stdout_task.await;
        let stderr_tail = stderr_task.await.unwrap_or_default();

        if !status.success() {
            let detail = if stderr_tail.is_empty() {
                format!("Tool exited with status {status}")
            } else {
                format!("Tool exited with status {status}: {}", stderr_tail.join(" | "))
            };
            return Err(RepackError::Tool(self.command.clone(), detail));
        }

        let output = expected_output_path(archive, suffix);
        if output.exists() {
            Ok(output)
        } else {
            warn!("Tool succeeded but {} is missing", output.display());
            Err(RepackError::Tool(
                self.command.clone(),
                format!("Expected artifact {} was not produced", output.display()),
            ))
        }
    }
}

/// The tool writes its artifact next to the input as `<stem>-<suffix>.<ext>`.
fn expected_output_path(archive: &Path, suffix: &str) -> PathBuf {
    let stem = archive
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "plugin".to_string());
    let ext = archive
        .extension()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "difypkg".to_string());
    archive.with_file_name(format!("{stem}-{suffix}.{ext}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_path_keeps_extension_and_appends_suffix() {
        let out = expected_output_path(Path::new("/scratch/agent-0.0.9.difypkg"), "offline");
        assert_eq!(
            out,
            Path::new("/scratch/agent-0.0.9-offline.difypkg")
        );
    }
}
