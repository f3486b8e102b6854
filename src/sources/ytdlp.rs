use async_process::Command;
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::{MediaQuery, MediaResolver, ResolvedMedia, SourceKind};
use crate::{config::Config, error::MusicError};

const AUDIO_FORMAT: &str = "bestaudio[ext=m4a]/best[ext=mp4]/best";
const OUTPUT_TEMPLATE: &str = "%(extractor)s-%(id)s-%(title)s.%(ext)s";

/// Resolver backed by the yt-dlp command line tool.
pub struct YtDlpResolver {
    binary: String,
    download_dir: PathBuf,
    // Caps concurrent yt-dlp processes
    permits: Semaphore,
}

/// Fields read from yt-dlp's `--dump-single-json` output
#[derive(Debug, Deserialize)]
struct YtDlpInfo {
    title: Option<String>,
    url: Option<String>,
    webpage_url: Option<String>,
    original_url: Option<String>,
    duration: Option<f64>,
    thumbnail: Option<String>,
    #[serde(default)]
    entries: Vec<YtDlpInfo>,
    #[serde(default)]
    requested_downloads: Vec<RequestedDownload>,
    #[serde(rename = "_filename")]
    filename: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestedDownload {
    filepath: Option<String>,
}

impl YtDlpResolver {
    pub fn new(config: &Config) -> Self {
        Self {
            binary: config.ytdlp_path.clone(),
            download_dir: config.download_dir.clone(),
            permits: Semaphore::new(config.max_concurrent_resolves),
        }
    }

    /// Checks that the binary can be executed.
    pub async fn verify(&self) -> anyhow::Result<String> {
        let output = Command::new(&self.binary).arg("--version").output().await?;
        if !output.status.success() {
            anyhow::bail!("{} --version exited with {}", self.binary, output.status);
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    fn build_args(&self, query: &MediaQuery, allow_download: bool) -> Vec<String> {
        let mut args: Vec<String> = [
            "--dump-single-json",
            "--no-playlist",
            "--no-warnings",
            "--quiet",
            "--no-check-certificates",
            "-f",
            AUDIO_FORMAT,
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        if allow_download {
            let template = self.download_dir.join(OUTPUT_TEMPLATE);
            args.extend([
                "--no-simulate".to_string(),
                "--restrict-filenames".to_string(),
                "-o".to_string(),
                template.to_string_lossy().into_owned(),
            ]);
        }

        args.push(query.to_ytdlp_target());
        args
    }
}

#[async_trait]
impl MediaResolver for YtDlpResolver {
    async fn resolve(&self, query: &str, allow_download: bool) -> Result<ResolvedMedia, MusicError> {
        let query = MediaQuery::parse(query)?;
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| MusicError::Resolution(e.to_string()))?;

        info!("🔍 Resolving {:?} (download: {})", query, allow_download);

        let output = Command::new(&self.binary)
            .args(self.build_args(&query, allow_download))
            .output()
            .await
            .map_err(|e| MusicError::Resolution(format!("could not run {}: {e}", self.binary)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let reason = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or("yt-dlp failed")
                .trim()
                .to_string();
            warn!("❌ yt-dlp failed: {}", reason);
            return Err(MusicError::Resolution(reason));
        }

        let media = parse_info(&output.stdout, allow_download)?;
        debug!("✅ Resolved {} -> {}", media.title, media.webpage_url);
        Ok(media)
    }
}

fn parse_info(stdout: &[u8], downloaded: bool) -> Result<ResolvedMedia, MusicError> {
    let info: YtDlpInfo = serde_json::from_slice(stdout)
        .map_err(|e| MusicError::Resolution(format!("unreadable yt-dlp output: {e}")))?;

    // Searches come back as a "playlist" of results
    let info = if info.entries.is_empty() {
        info
    } else {
        info.entries
            .into_iter()
            .next()
            .ok_or_else(|| MusicError::Resolution("no results found".into()))?
    };

    let stream_uri = if downloaded {
        info.requested_downloads
            .iter()
            .find_map(|d| d.filepath.clone())
            .or(info.filename.clone())
    } else {
        info.url.clone()
    }
    .ok_or_else(|| MusicError::Resolution("no playable stream found".into()))?;

    let webpage_url = info
        .webpage_url
        .or(info.original_url)
        .unwrap_or_else(|| stream_uri.clone());

    Ok(ResolvedMedia {
        title: info.title.unwrap_or_else(|| "Unknown title".to_string()),
        source_kind: SourceKind::from_url(&webpage_url),
        stream_uri,
        duration_secs: info.duration.map(|d| d.max(0.0).round() as u64).unwrap_or(0),
        thumbnail: info.thumbnail,
        webpage_url,
    })
}
