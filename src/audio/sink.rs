use async_trait::async_trait;
use serenity::model::id::GuildId;
use songbird::{
    input::{File, HttpRequest, Input},
    tracks::{PlayMode, TrackHandle},
    Event, EventContext, EventHandler as VoiceEventHandler, Songbird, TrackEvent,
};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::{audio::queue::Track, error::MusicError};

/// Tags one started playback so late completions can be told apart from
/// the one currently active. Strictly increasing per guild.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlaybackToken(pub u64);

#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackOutcome {
    Finished,
    Failed(String),
}

/// Sent exactly once per started playback, from whatever thread the
/// playback backend runs on.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub token: PlaybackToken,
    pub outcome: PlaybackOutcome,
}

pub type CompletionSender = mpsc::UnboundedSender<Completion>;

/// Control over one running playback.
pub trait PlaybackHandle: Send + Sync {
    fn pause(&self) -> Result<(), MusicError>;
    fn resume(&self) -> Result<(), MusicError>;
    fn stop(&self) -> Result<(), MusicError>;
    fn set_volume(&self, volume: f32) -> Result<(), MusicError>;
}

/// Something that can turn a track into sound in a guild's voice channel.
#[async_trait]
pub trait AudioSink: Send + Sync {
    async fn start(
        &self,
        guild_id: GuildId,
        track: &Track,
        volume: f32,
        token: PlaybackToken,
        done: CompletionSender,
    ) -> Result<Box<dyn PlaybackHandle>, MusicError>;
}

/// Plays tracks through the songbird call of the guild.
pub struct SongbirdSink {
    songbird: Arc<Songbird>,
    http: reqwest::Client,
}

impl SongbirdSink {
    pub fn new(songbird: Arc<Songbird>, http: reqwest::Client) -> Self {
        Self { songbird, http }
    }

    fn input_for(&self, track: &Track) -> Input {
        if track.stream_uri.starts_with("http://") || track.stream_uri.starts_with("https://") {
            HttpRequest::new(self.http.clone(), track.stream_uri.clone()).into()
        } else {
            File::new(track.stream_uri.clone()).into()
        }
    }
}

#[async_trait]
impl AudioSink for SongbirdSink {
    async fn start(
        &self,
        guild_id: GuildId,
        track: &Track,
        volume: f32,
        token: PlaybackToken,
        done: CompletionSender,
    ) -> Result<Box<dyn PlaybackHandle>, MusicError> {
        let call = self.songbird.get(guild_id).ok_or(MusicError::NotConnected)?;
        let input = self.input_for(track);

        let handle = {
            let mut call = call.lock().await;
            call.play_input(input)
        };

        let notifier = CompletionNotifier { guild_id, token, done };
        // A track that errors out does not always emit End, so listen to both;
        // the player drops the duplicate by token.
        handle
            .add_event(Event::Track(TrackEvent::End), notifier.clone())
            .and_then(|_| handle.add_event(Event::Track(TrackEvent::Error), notifier))
            .map_err(|e| MusicError::Playback(e.to_string()))?;

        let handle = SongbirdHandle(handle);
        handle.set_volume(volume)?;

        info!("🎵 Playing in guild {}: {} ({:?})", guild_id, track.title, token);
        Ok(Box::new(handle))
    }
}

struct SongbirdHandle(TrackHandle);

impl PlaybackHandle for SongbirdHandle {
    fn pause(&self) -> Result<(), MusicError> {
        self.0.pause().map_err(|e| MusicError::Playback(e.to_string()))
    }

    fn resume(&self) -> Result<(), MusicError> {
        self.0.play().map_err(|e| MusicError::Playback(e.to_string()))
    }

    fn stop(&self) -> Result<(), MusicError> {
        self.0.stop().map_err(|e| MusicError::Playback(e.to_string()))
    }

    fn set_volume(&self, volume: f32) -> Result<(), MusicError> {
        self.0
            .set_volume(volume)
            .map_err(|e| MusicError::Playback(e.to_string()))
    }
}

/// Forwards songbird's track end/error events onto the guild player's channel.
#[derive(Clone)]
struct CompletionNotifier {
    guild_id: GuildId,
    token: PlaybackToken,
    done: CompletionSender,
}

#[async_trait]
impl VoiceEventHandler for CompletionNotifier {
    async fn act(&self, ctx: &EventContext<'_>) -> Option<Event> {
        let outcome = match ctx {
            EventContext::Track(tracks) => tracks
                .iter()
                .find_map(|(state, _)| match &state.playing {
                    PlayMode::Errored(e) => Some(PlaybackOutcome::Failed(format!("{e:?}"))),
                    _ => None,
                })
                .unwrap_or(PlaybackOutcome::Finished),
            _ => PlaybackOutcome::Finished,
        };

        if self
            .done
            .send(Completion { token: self.token, outcome })
            .is_err()
        {
            debug!("Player for guild {} is gone, dropping completion", self.guild_id);
        }

        None
    }
}
