use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use serenity::model::id::UserId;
use std::collections::VecDeque;
use tracing::{debug, info};

use crate::sources::{ResolvedMedia, SourceKind};

/// A resolved, playable song. Never mutated after resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    pub title: String,
    pub source_url: String,
    pub stream_uri: String,
    pub duration_secs: u64,
    pub thumbnail: Option<String>,
    pub source_kind: SourceKind,
    pub requested_by: UserId,
    pub added_at: DateTime<Utc>,
}

impl Track {
    pub fn from_media(media: ResolvedMedia, requested_by: UserId) -> Self {
        Self {
            title: media.title,
            source_url: media.webpage_url,
            stream_uri: media.stream_uri,
            duration_secs: media.duration_secs,
            thumbnail: media.thumbnail,
            source_kind: media.source_kind,
            requested_by,
            added_at: Utc::now(),
        }
    }
}

/// Pending songs of one guild plus the one currently playing.
#[derive(Debug)]
pub struct GuildQueue {
    pending: VecDeque<Track>,
    current: Option<Track>,
    volume: f32,
}

impl GuildQueue {
    pub fn new(volume: f32) -> Self {
        Self {
            pending: VecDeque::new(),
            current: None,
            volume: volume.clamp(0.0, 1.0),
        }
    }

    /// Appends to the back (FIFO)
    pub fn enqueue(&mut self, track: Track) {
        info!("➕ Added to queue: {}", track.title);
        self.pending.push_back(track);
    }

    pub fn dequeue_next(&mut self) -> Option<Track> {
        let next = self.pending.pop_front();
        match &next {
            Some(track) => debug!("➡️ Next in queue: {}", track.title),
            None => debug!("📭 Queue is empty"),
        }
        next
    }

    /// Drops every pending track and the current one.
    pub fn clear(&mut self) {
        self.pending.clear();
        self.current = None;
        info!("🗑️ Queue cleared");
    }

    /// Uniformly permutes the pending tracks.
    ///
    /// Returns `false` without touching anything when nothing is pending.
    pub fn shuffle(&mut self) -> bool {
        if self.pending.is_empty() {
            return false;
        }
        self.pending.make_contiguous().shuffle(&mut rand::thread_rng());
        info!("🔀 Shuffled {} songs", self.pending.len());
        true
    }

    pub fn current(&self) -> Option<&Track> {
        self.current.as_ref()
    }

    pub fn set_current(&mut self, track: Track) {
        self.current = Some(track);
    }

    pub fn take_current(&mut self) -> Option<Track> {
        self.current.take()
    }

    pub fn pending(&self) -> impl Iterator<Item = &Track> {
        self.pending.iter()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) -> f32 {
        self.volume = volume.clamp(0.0, 1.0);
        self.volume
    }
}

/// Point-in-time copy of a guild's queue, handed out to readers.
#[derive(Debug, Clone, Default)]
pub struct QueueSnapshot {
    pub current: Option<Track>,
    pub pending: Vec<Track>,
    pub volume: f32,
}

impl QueueSnapshot {
    pub fn pending_duration_secs(&self) -> u64 {
        self.pending.iter().map(|t| t.duration_secs).sum()
    }

    /// One page of pending tracks (1-based)
    pub fn page(&self, page: usize, per_page: usize) -> QueuePage<'_> {
        let per_page = per_page.max(1);
        let total_pages = self.pending.len().div_ceil(per_page).max(1);
        let current_page = page.clamp(1, total_pages);
        let start = (current_page - 1) * per_page;
        let end = (start + per_page).min(self.pending.len());

        QueuePage {
            items: &self.pending[start.min(end)..end],
            first_position: start + 1,
            current_page,
            total_pages,
        }
    }
}

#[derive(Debug)]
pub struct QueuePage<'a> {
    pub items: &'a [Track],
    /// 1-based queue position of `items[0]`
    pub first_position: usize,
    pub current_page: usize,
    pub total_pages: usize,
}
