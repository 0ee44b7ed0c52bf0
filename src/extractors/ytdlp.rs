use anyhow::Context;
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

use super::{ExtractorMetadata, MediaExtractor};
use crate::Result;

/// Extractor backed by `yt-dlp --dump-json`
pub struct YtDlpExtractor {
    yt_dlp_path: PathBuf,
    timeout: Duration,
}

impl YtDlpExtractor {
    pub fn new(yt_dlp_path: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            yt_dlp_path: yt_dlp_path.into(),
            timeout,
        }
    }

    fn command(&self, url: &str) -> Command {
        let mut command = Command::new(&self.yt_dlp_path);
        command
            .args(["--dump-json", "--no-playlist", "--no-warnings", "--", url])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

impl Default for YtDlpExtractor {
    fn default() -> Self {
        Self::new("yt-dlp", Duration::from_secs(60))
    }
}

#[async_trait]
impl MediaExtractor for YtDlpExtractor {
    async fn extract(&self, url: &str) -> Result<ExtractorMetadata> {
        tracing::debug!("Extracting media info for: {}", url);

        let output = timeout(self.timeout, self.command(url).output())
            .await
            .with_context(|| format!("yt-dlp timed out after {:?}", self.timeout))?
            .with_context(|| format!("Failed to run {}", self.yt_dlp_path.display()))?;

        if !output.status.success() {
            let error = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("yt-dlp failed: {}", error.trim());
        }

        let metadata: ExtractorMetadata = serde_json::from_slice(&output.stdout)
            .context("Failed to parse yt-dlp metadata")?;

        tracing::debug!(
            "Extracted {} formats for {:?}",
            metadata.formats.len(),
            metadata.title
        );

        Ok(metadata)
    }

    fn name(&self) -> &'static str {
        "yt-dlp"
    }
}
