//! # Sources
//!
//! Turns a user query (URL or free text) into a playable stream. The bot only
//! talks to [`MediaResolver`]; the yt-dlp implementation lives in [`ytdlp`].

pub mod ytdlp;

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::error::MusicError;

pub use ytdlp::YtDlpResolver;

static YOUTUBE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(https?://)?(www\.|m\.|music\.)?(youtube\.com|youtu\.be)/").expect("valid regex")
});

/// Resolves queries into stream descriptors.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// `allow_download` asks the backend for a local file instead of a remote stream.
    async fn resolve(&self, query: &str, allow_download: bool) -> Result<ResolvedMedia, MusicError>;
}

/// What the resolver hands back for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedMedia {
    pub title: String,
    pub stream_uri: String,
    pub duration_secs: u64,
    pub thumbnail: Option<String>,
    pub webpage_url: String,
    pub source_kind: SourceKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    YouTube,
    DirectUrl,
}

impl SourceKind {
    pub fn from_url(url: &str) -> Self {
        if is_youtube_url(url) {
            SourceKind::YouTube
        } else {
            SourceKind::DirectUrl
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::YouTube => "YouTube",
            SourceKind::DirectUrl => "Direct link",
        }
    }
}

pub fn is_youtube_url(url: &str) -> bool {
    YOUTUBE_URL.is_match(url)
}

/// A query after classification: direct links go straight to the backend,
/// anything else goes through its search mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaQuery {
    Url(String),
    Search(String),
}

impl MediaQuery {
    pub fn parse(raw: &str) -> Result<Self, MusicError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(MusicError::EmptyQuery);
        }

        let looks_like_url = raw.starts_with("http://") || raw.starts_with("https://");
        if looks_like_url && url::Url::parse(raw).is_ok() {
            Ok(MediaQuery::Url(raw.to_string()))
        } else {
            Ok(MediaQuery::Search(raw.to_string()))
        }
    }

    /// Argument passed to yt-dlp.
    pub fn to_ytdlp_target(&self) -> String {
        match self {
            MediaQuery::Url(url) => url.clone(),
            MediaQuery::Search(terms) => format!("ytsearch:{terms}"),
        }
    }
}
