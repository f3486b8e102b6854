//! In-memory audio sink for tests. Each handle reports its completion the way
//! songbird does: asynchronously, and also when it is stopped.

use async_trait::async_trait;
use parking_lot::Mutex;
use serenity::model::id::GuildId;
use std::sync::Arc;

use super::{
    queue::Track,
    sink::{AudioSink, Completion, CompletionSender, PlaybackHandle, PlaybackOutcome, PlaybackToken},
};
use crate::error::MusicError;

#[derive(Default)]
struct SinkState {
    started: Vec<(PlaybackToken, String)>,
    calls: Vec<String>,
    failures_left: u32,
    done: Option<CompletionSender>,
}

#[derive(Default)]
pub struct FakeSink {
    state: Arc<Mutex<SinkState>>,
}

impl FakeSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// The next `n` calls to `start` fail.
    pub fn failing(n: u32) -> Arc<Self> {
        let sink = Self::default();
        sink.state.lock().failures_left = n;
        Arc::new(sink)
    }

    pub fn fail_next(&self, n: u32) {
        self.state.lock().failures_left = n;
    }

    pub fn started(&self) -> Vec<String> {
        self.state.lock().started.iter().map(|(_, t)| t.clone()).collect()
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    pub fn last_token(&self) -> PlaybackToken {
        self.state.lock().started.last().map(|(t, _)| *t).expect("nothing started")
    }

    /// Simulates the backend reporting the end of playback `token`.
    pub fn finish(&self, token: PlaybackToken, outcome: PlaybackOutcome) {
        let done = self.state.lock().done.clone().expect("nothing started");
        let _ = done.send(Completion { token, outcome });
    }
}

#[async_trait]
impl AudioSink for FakeSink {
    async fn start(
        &self,
        _guild_id: GuildId,
        track: &Track,
        volume: f32,
        token: PlaybackToken,
        done: CompletionSender,
    ) -> Result<Box<dyn PlaybackHandle>, MusicError> {
        let mut state = self.state.lock();
        state.done = Some(done.clone());
        if state.failures_left > 0 {
            state.failures_left -= 1;
            state.calls.push(format!("fail {}", track.title));
            return Err(MusicError::Playback("decoder unavailable".into()));
        }
        state.started.push((token, track.title.clone()));
        state.calls.push(format!("start {} @{volume}", track.title));

        Ok(Box::new(FakeHandle {
            token,
            title: track.title.clone(),
            state: self.state.clone(),
            done,
        }))
    }
}

struct FakeHandle {
    token: PlaybackToken,
    title: String,
    state: Arc<Mutex<SinkState>>,
    done: CompletionSender,
}

impl FakeHandle {
    fn record(&self, action: &str) {
        self.state.lock().calls.push(format!("{action} {}", self.title));
    }
}

impl PlaybackHandle for FakeHandle {
    fn pause(&self) -> Result<(), MusicError> {
        self.record("pause");
        Ok(())
    }

    fn resume(&self) -> Result<(), MusicError> {
        self.record("resume");
        Ok(())
    }

    fn stop(&self) -> Result<(), MusicError> {
        self.record("stop");
        let _ = self.done.send(Completion {
            token: self.token,
            outcome: PlaybackOutcome::Finished,
        });
        Ok(())
    }

    fn set_volume(&self, volume: f32) -> Result<(), MusicError> {
        self.record(&format!("volume@{volume}"));
        Ok(())
    }
}

/// Lets spawned tasks run until they block.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}
