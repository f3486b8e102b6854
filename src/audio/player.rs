use dashmap::DashMap;
use serenity::model::id::GuildId;
use std::{sync::Arc, time::Duration};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::{
    audio::{
        queue::{GuildQueue, QueueSnapshot, Track},
        sink::{AudioSink, Completion, CompletionSender, PlaybackHandle, PlaybackOutcome, PlaybackToken},
    },
    config::Config,
    error::MusicError,
};

#[derive(Debug, Clone)]
pub struct PlayerSettings {
    pub default_volume: f32,
    pub max_queue_size: usize,
    /// Extra attempts after a failed start before the track is dropped.
    pub start_retries: u32,
    pub retry_backoff: Duration,
}

impl PlayerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_volume: config.default_volume,
            max_queue_size: config.max_queue_size,
            start_retries: config.playback_start_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

impl Default for PlayerSettings {
    fn default() -> Self {
        Self {
            default_volume: 0.5,
            max_queue_size: 1000,
            start_retries: 2,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerStatus {
    Idle,
    Playing,
    Paused,
    Retrying { attempt: u32 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlayOutcome {
    Started(Track),
    /// The first start attempt failed; the track is waiting for a retry.
    Retrying(Track),
    /// `position` is 1-based
    Queued { track: Track, position: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub skipped: Track,
    pub now_playing: Option<Track>,
    /// `now_playing` failed to start and is waiting for a retry.
    pub retrying: bool,
}

#[derive(Debug, Clone)]
pub struct PlayerSnapshot {
    pub status: PlayerStatus,
    pub queue: QueueSnapshot,
}

enum PlayerCommand {
    Play {
        track: Track,
        reply: oneshot::Sender<Result<PlayOutcome, MusicError>>,
    },
    Skip {
        reply: oneshot::Sender<Result<Skipped, MusicError>>,
    },
    Pause {
        reply: oneshot::Sender<Result<(), MusicError>>,
    },
    Resume {
        reply: oneshot::Sender<Result<(), MusicError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Shuffle {
        reply: oneshot::Sender<Result<usize, MusicError>>,
    },
    SetVolume {
        volume: f32,
        reply: oneshot::Sender<Result<f32, MusicError>>,
    },
    Snapshot {
        reply: oneshot::Sender<PlayerSnapshot>,
    },
}

/// Handle to the task that owns one guild's queue and playback.
///
/// Commands and playback completions for a guild are processed one at a time
/// by that task, so nothing here needs a lock. Clones share the same task;
/// it exits once every clone is dropped.
#[derive(Clone)]
pub struct GuildPlayer {
    commands: mpsc::UnboundedSender<PlayerCommand>,
}

impl GuildPlayer {
    pub fn spawn(guild_id: GuildId, sink: Arc<dyn AudioSink>, settings: PlayerSettings) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let (retries_tx, retries_rx) = mpsc::unbounded_channel();

        let task = PlayerTask {
            guild_id,
            queue: GuildQueue::new(settings.default_volume),
            state: State::Idle,
            handle: None,
            active: None,
            last_token: 0,
            sink,
            settings,
            completions: completions_tx,
            retries: retries_tx,
        };
        tokio::spawn(task.run(commands_rx, completions_rx, retries_rx));

        Self {
            commands: commands_tx,
        }
    }

    /// Starts `track` if nothing is playing, otherwise appends it to the queue.
    pub async fn play(&self, track: Track) -> Result<PlayOutcome, MusicError> {
        self.request(|reply| PlayerCommand::Play { track, reply }).await?
    }

    pub async fn skip(&self) -> Result<Skipped, MusicError> {
        self.request(|reply| PlayerCommand::Skip { reply }).await?
    }

    pub async fn pause(&self) -> Result<(), MusicError> {
        self.request(|reply| PlayerCommand::Pause { reply }).await?
    }

    pub async fn resume(&self) -> Result<(), MusicError> {
        self.request(|reply| PlayerCommand::Resume { reply }).await?
    }

    /// Stops playback and empties the queue, whatever the current state.
    pub async fn stop(&self) -> Result<(), MusicError> {
        self.request(|reply| PlayerCommand::Stop { reply }).await
    }

    /// Returns how many pending tracks were shuffled.
    pub async fn shuffle(&self) -> Result<usize, MusicError> {
        self.request(|reply| PlayerCommand::Shuffle { reply }).await?
    }

    pub async fn set_volume(&self, volume: f32) -> Result<f32, MusicError> {
        self.request(|reply| PlayerCommand::SetVolume { volume, reply })
            .await?
    }

    pub async fn snapshot(&self) -> Result<PlayerSnapshot, MusicError> {
        self.request(|reply| PlayerCommand::Snapshot { reply }).await
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> PlayerCommand,
    ) -> Result<T, MusicError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .map_err(|_| MusicError::PlayerClosed)?;
        response.await.map_err(|_| MusicError::PlayerClosed)
    }
}

enum State {
    Idle,
    Playing,
    Paused,
    /// Waiting to start `track` again after `attempt` failed retries so far.
    Retrying { track: Track, attempt: u32 },
}

enum StartResult {
    Playing,
    Retrying,
    Failed(MusicError),
}

struct PlayerTask {
    guild_id: GuildId,
    queue: GuildQueue,
    state: State,
    handle: Option<Box<dyn PlaybackHandle>>,
    // Token of the playback (or pending retry) we currently care about.
    active: Option<PlaybackToken>,
    last_token: u64,
    sink: Arc<dyn AudioSink>,
    settings: PlayerSettings,
    completions: CompletionSender,
    retries: mpsc::UnboundedSender<PlaybackToken>,
}

impl PlayerTask {
    async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PlayerCommand>,
        mut completions: mpsc::UnboundedReceiver<Completion>,
        mut retries: mpsc::UnboundedReceiver<PlaybackToken>,
    ) {
        debug!("Player task started for guild {}", self.guild_id);

        loop {
            tokio::select! {
                biased;
                Some(done) = completions.recv() => self.on_completion(done).await,
                Some(token) = retries.recv() => self.on_retry_due(token).await,
                command = commands.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
            }
        }

        self.halt();
        debug!("Player task for guild {} finished", self.guild_id);
    }

    async fn handle(&mut self, command: PlayerCommand) {
        // A dropped receiver only means the caller stopped waiting.
        match command {
            PlayerCommand::Play { track, reply } => {
                let _ = reply.send(self.play(track).await);
            }
            PlayerCommand::Skip { reply } => {
                let _ = reply.send(self.skip().await);
            }
            PlayerCommand::Pause { reply } => {
                let _ = reply.send(self.pause());
            }
            PlayerCommand::Resume { reply } => {
                let _ = reply.send(self.resume());
            }
            PlayerCommand::Stop { reply } => {
                self.halt();
                let _ = reply.send(());
            }
            PlayerCommand::Shuffle { reply } => {
                let result = if self.queue.shuffle() {
                    Ok(self.queue.len())
                } else {
                    Err(MusicError::QueueEmpty)
                };
                let _ = reply.send(result);
            }
            PlayerCommand::SetVolume { volume, reply } => {
                let _ = reply.send(self.set_volume(volume));
            }
            PlayerCommand::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
        }
    }

    async fn play(&mut self, track: Track) -> Result<PlayOutcome, MusicError> {
        if !matches!(self.state, State::Idle) {
            if self.queue.len() >= self.settings.max_queue_size {
                return Err(MusicError::QueueFull(self.settings.max_queue_size));
            }
            self.queue.enqueue(track.clone());
            return Ok(PlayOutcome::Queued {
                track,
                position: self.queue.len(),
            });
        }

        match self.start(track.clone(), 0).await {
            StartResult::Failed(err) => Err(err),
            StartResult::Playing => Ok(PlayOutcome::Started(track)),
            StartResult::Retrying => Ok(PlayOutcome::Retrying(track)),
        }
    }

    async fn skip(&mut self) -> Result<Skipped, MusicError> {
        if matches!(self.state, State::Idle) {
            return Err(MusicError::NothingPlaying);
        }

        let skipped = self.release_current().ok_or(MusicError::NothingPlaying)?;
        info!("⏭️ Skipped {} in guild {}", skipped.title, self.guild_id);
        self.advance().await;

        let (now_playing, retrying) = match &self.state {
            State::Retrying { track, .. } => (Some(track.clone()), true),
            _ => (self.queue.current().cloned(), false),
        };
        Ok(Skipped {
            skipped,
            now_playing,
            retrying,
        })
    }

    fn pause(&mut self) -> Result<(), MusicError> {
        match (&self.state, &self.handle) {
            (State::Playing, Some(handle)) => {
                handle.pause()?;
                self.state = State::Paused;
                info!("⏸️ Paused in guild {}", self.guild_id);
                Ok(())
            }
            _ => Err(MusicError::NothingPlaying),
        }
    }

    fn resume(&mut self) -> Result<(), MusicError> {
        match (&self.state, &self.handle) {
            (State::Paused, Some(handle)) => {
                handle.resume()?;
                self.state = State::Playing;
                info!("▶️ Resumed in guild {}", self.guild_id);
                Ok(())
            }
            _ => Err(MusicError::NothingPaused),
        }
    }

    fn set_volume(&mut self, volume: f32) -> Result<f32, MusicError> {
        let volume = self.queue.set_volume(volume);
        if let Some(handle) = &self.handle {
            handle.set_volume(volume)?;
        }
        info!("🔊 Volume set to {}% in guild {}", (volume * 100.0).round(), self.guild_id);
        Ok(volume)
    }

    fn snapshot(&self) -> PlayerSnapshot {
        let status = match &self.state {
            State::Idle => PlayerStatus::Idle,
            State::Playing => PlayerStatus::Playing,
            State::Paused => PlayerStatus::Paused,
            State::Retrying { attempt, .. } => PlayerStatus::Retrying { attempt: *attempt },
        };

        PlayerSnapshot {
            status,
            queue: QueueSnapshot {
                current: self.queue.current().cloned(),
                pending: self.queue.pending().cloned().collect(),
                volume: self.queue.volume(),
            },
        }
    }

    /// Stop everything and forget the queue.
    fn halt(&mut self) {
        self.release_current();
        self.queue.clear();
    }

    async fn on_completion(&mut self, done: Completion) {
        let is_live = self.active == Some(done.token)
            && matches!(self.state, State::Playing | State::Paused);
        if !is_live {
            debug!("Ignoring stale completion {:?} in guild {}", done.token, self.guild_id);
            return;
        }

        match &done.outcome {
            PlaybackOutcome::Finished => debug!("Track finished in guild {}", self.guild_id),
            PlaybackOutcome::Failed(reason) => {
                warn!("⚠️ Player error in guild {}: {}", self.guild_id, reason)
            }
        }

        // Already over, nothing to stop.
        self.handle = None;
        self.advance().await;
    }

    async fn on_retry_due(&mut self, token: PlaybackToken) {
        if self.active != Some(token) {
            debug!("Ignoring stale retry {:?} in guild {}", token, self.guild_id);
            return;
        }

        match std::mem::replace(&mut self.state, State::Idle) {
            State::Retrying { track, attempt } => {
                if let StartResult::Failed(_) = self.start(track, attempt).await {
                    self.advance().await;
                }
            }
            other => self.state = other,
        }
    }

    /// Drops whatever is current and starts the next pending track that
    /// can be started, or goes idle.
    async fn advance(&mut self) {
        self.release_current();

        while let Some(next) = self.queue.dequeue_next() {
            match self.start(next, 0).await {
                StartResult::Failed(_) => continue,
                StartResult::Playing | StartResult::Retrying => return,
            }
        }

        info!("📭 Queue finished in guild {}", self.guild_id);
    }

    /// Stops the active handle (if any) and returns the track it was playing
    /// or waiting to retry. Leaves the player idle.
    fn release_current(&mut self) -> Option<Track> {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.stop() {
                debug!("Stopping playback in guild {} failed: {}", self.guild_id, e);
            }
        }
        self.active = None;

        let retrying = match std::mem::replace(&mut self.state, State::Idle) {
            State::Retrying { track, .. } => Some(track),
            _ => None,
        };
        self.queue.take_current().or(retrying)
    }

    fn next_token(&mut self) -> PlaybackToken {
        self.last_token += 1;
        PlaybackToken(self.last_token)
    }

    async fn start(&mut self, track: Track, failures: u32) -> StartResult {
        let token = self.next_token();
        self.active = Some(token);

        let started = self
            .sink
            .start(
                self.guild_id,
                &track,
                self.queue.volume(),
                token,
                self.completions.clone(),
            )
            .await;

        match started {
            Ok(handle) => {
                info!(
                    "🎵 Now playing in guild {}: {} (queued {}s ago)",
                    self.guild_id,
                    track.title,
                    (chrono::Utc::now() - track.added_at).num_seconds()
                );
                self.handle = Some(handle);
                self.queue.set_current(track);
                self.state = State::Playing;
                StartResult::Playing
            }
            Err(err) => {
                let attempt = failures + 1;
                if attempt <= self.settings.start_retries {
                    warn!(
                        "🔄 Could not start {} in guild {} ({}), retry {}/{}",
                        track.title, self.guild_id, err, attempt, self.settings.start_retries
                    );
                    self.state = State::Retrying { track, attempt };

                    let retries = self.retries.clone();
                    let backoff = tokio::time::sleep(self.settings.retry_backoff);
                    tokio::spawn(async move {
                        backoff.await;
                        let _ = retries.send(token);
                    });
                    StartResult::Retrying
                } else {
                    error!(
                        "❌ Giving up on {} in guild {}: {}",
                        track.title, self.guild_id, err
                    );
                    self.active = None;
                    self.state = State::Idle;
                    StartResult::Failed(err)
                }
            }
        }
    }
}

/// Owns every guild's player. Players are created when the bot joins a voice
/// channel and evicted (stopped and cleared) when it leaves.
pub struct PlayerRegistry {
    players: DashMap<GuildId, GuildPlayer>,
    sink: Arc<dyn AudioSink>,
    settings: PlayerSettings,
}

impl PlayerRegistry {
    pub fn new(sink: Arc<dyn AudioSink>, settings: PlayerSettings) -> Self {
        Self {
            players: DashMap::new(),
            sink,
            settings,
        }
    }

    pub fn get_or_spawn(&self, guild_id: GuildId) -> GuildPlayer {
        self.players
            .entry(guild_id)
            .or_insert_with(|| {
                info!("🎛️ Creating player for guild {}", guild_id);
                GuildPlayer::spawn(guild_id, self.sink.clone(), self.settings.clone())
            })
            .clone()
    }

    pub fn get(&self, guild_id: GuildId) -> Option<GuildPlayer> {
        self.players.get(&guild_id).map(|p| p.clone())
    }

    /// Stops and forgets the guild's player. Returns `false` if there was none.
    pub async fn evict(&self, guild_id: GuildId) -> bool {
        let Some((_, player)) = self.players.remove(&guild_id) else {
            return false;
        };

        if let Err(e) = player.stop().await {
            debug!("Player for guild {} already gone: {}", guild_id, e);
        }
        info!("🗑️ Removed player for guild {} ({} left)", guild_id, self.players.len());
        true
    }

    pub async fn shutdown(&self) {
        let guilds: Vec<GuildId> = self.players.iter().map(|entry| *entry.key()).collect();
        futures::future::join_all(guilds.into_iter().map(|guild_id| self.evict(guild_id))).await;
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{
        queue::tests::track,
        testing::{settle, FakeSink},
    };
    use pretty_assertions::assert_eq;

    const GUILD: GuildId = GuildId::new(1);

    fn spawn(sink: Arc<FakeSink>) -> GuildPlayer {
        GuildPlayer::spawn(GUILD, sink, PlayerSettings::default())
    }

    async fn state(player: &GuildPlayer) -> (PlayerStatus, Option<String>, Vec<String>) {
        let snapshot = player.snapshot().await.unwrap();
        (
            snapshot.status,
            snapshot.queue.current.map(|t| t.title),
            snapshot.queue.pending.into_iter().map(|t| t.title).collect(),
        )
    }

    #[tokio::test]
    async fn test_play_when_idle_starts_track() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());

        let outcome = player.play(track("t1")).await.unwrap();

        assert!(matches!(&outcome, PlayOutcome::Started(t) if t.title == "t1"));
        assert_eq!(state(&player).await, (PlayerStatus::Playing, Some("t1".into()), vec![]));
        assert_eq!(sink.calls(), vec!["start t1 @0.5"]);
    }

    #[tokio::test]
    async fn test_play_while_playing_enqueues() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        player.play(track("t1")).await.unwrap();

        let outcome = player.play(track("t2")).await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Queued { position: 1, .. }));

        player.pause().await.unwrap();
        let outcome = player.play(track("t3")).await.unwrap();
        assert!(matches!(outcome, PlayOutcome::Queued { position: 2, .. }));

        assert_eq!(
            state(&player).await,
            (PlayerStatus::Paused, Some("t1".into()), vec!["t2".into(), "t3".into()])
        );
        assert_eq!(sink.started(), vec!["t1"]);
    }

    #[tokio::test]
    async fn test_completion_advances_queue() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        player.play(track("t1")).await.unwrap();
        player.play(track("t2")).await.unwrap();

        sink.finish(sink.last_token(), PlaybackOutcome::Finished);
        assert_eq!(state(&player).await, (PlayerStatus::Playing, Some("t2".into()), vec![]));

        sink.finish(sink.last_token(), PlaybackOutcome::Finished);
        assert_eq!(state(&player).await, (PlayerStatus::Idle, None, vec![]));
    }

    #[tokio::test]
    async fn test_failed_playback_advances_like_normal_end() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        player.play(track("t1")).await.unwrap();
        player.play(track("t2")).await.unwrap();

        sink.finish(sink.last_token(), PlaybackOutcome::Failed("stream reset".into()));

        assert_eq!(state(&player).await, (PlayerStatus::Playing, Some("t2".into()), vec![]));
    }

    #[tokio::test]
    async fn test_stale_completion_is_ignored() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        player.play(track("t1")).await.unwrap();
        let first = sink.last_token();
        player.play(track("t2")).await.unwrap();
        player.play(track("t3")).await.unwrap();

        player.skip().await.unwrap();
        sink.finish(first, PlaybackOutcome::Finished);
        sink.finish(PlaybackToken(999), PlaybackOutcome::Finished);

        assert_eq!(
            state(&player).await,
            (PlayerStatus::Playing, Some("t2".into()), vec!["t3".into()])
        );
    }

    #[tokio::test]
    async fn test_skip_does_not_double_advance() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        for name in ["t1", "t2", "t3"] {
            player.play(track(name)).await.unwrap();
        }

        let skipped = player.skip().await.unwrap();
        assert_eq!(skipped.skipped.title, "t1");
        assert_eq!(skipped.now_playing.map(|t| t.title), Some("t2".into()));
        assert!(!skipped.retrying);

        // The stopped handle reports its end after the skip already advanced.
        settle().await;
        assert_eq!(
            state(&player).await,
            (PlayerStatus::Playing, Some("t2".into()), vec!["t3".into()])
        );
        assert_eq!(sink.started(), vec!["t1", "t2"]);
    }

    #[tokio::test]
    async fn test_skip_last_track_goes_idle() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        player.play(track("t1")).await.unwrap();

        let skipped = player.skip().await.unwrap();
        assert_eq!(skipped.now_playing, None);
        assert_eq!(state(&player).await, (PlayerStatus::Idle, None, vec![]));

        assert_eq!(player.skip().await, Err(MusicError::NothingPlaying));
    }

    #[tokio::test]
    async fn test_stop_clears_everything() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        player.play(track("t1")).await.unwrap();
        player.play(track("t2")).await.unwrap();
        player.pause().await.unwrap();

        player.stop().await.unwrap();
        assert_eq!(state(&player).await, (PlayerStatus::Idle, None, vec![]));
        assert!(sink.calls().contains(&"stop t1".to_string()));

        // also fine when already idle
        player.stop().await.unwrap();
        assert_eq!(state(&player).await, (PlayerStatus::Idle, None, vec![]));
    }

    #[tokio::test]
    async fn test_pause_and_resume_preconditions() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());

        assert_eq!(player.pause().await, Err(MusicError::NothingPlaying));
        assert_eq!(player.resume().await, Err(MusicError::NothingPaused));

        player.play(track("t1")).await.unwrap();
        assert_eq!(player.resume().await, Err(MusicError::NothingPaused));

        player.pause().await.unwrap();
        assert_eq!(player.pause().await, Err(MusicError::NothingPlaying));
        assert_eq!(state(&player).await.0, PlayerStatus::Paused);

        player.resume().await.unwrap();
        assert_eq!(state(&player).await.0, PlayerStatus::Playing);
        assert_eq!(sink.calls(), vec!["start t1 @0.5", "pause t1", "resume t1"]);
    }

    #[tokio::test]
    async fn test_shuffle_reports_empty_queue() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        assert_eq!(player.shuffle().await, Err(MusicError::QueueEmpty));

        for name in ["t1", "t2", "t3"] {
            player.play(track(name)).await.unwrap();
        }
        assert_eq!(player.shuffle().await, Ok(2));

        let (_, current, mut pending) = state(&player).await;
        pending.sort();
        assert_eq!(current, Some("t1".into()));
        assert_eq!(pending, vec!["t2", "t3"]);
    }

    #[tokio::test]
    async fn test_queue_limit() {
        let sink = FakeSink::new();
        let settings = PlayerSettings {
            max_queue_size: 1,
            ..PlayerSettings::default()
        };
        let player = GuildPlayer::spawn(GUILD, sink, settings);

        player.play(track("t1")).await.unwrap();
        player.play(track("t2")).await.unwrap();
        assert_eq!(player.play(track("t3")).await, Err(MusicError::QueueFull(1)));
    }

    #[tokio::test]
    async fn test_volume_applies_to_current_and_next() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        player.play(track("t1")).await.unwrap();
        player.play(track("t2")).await.unwrap();

        assert_eq!(player.set_volume(1.7).await, Ok(1.0));
        assert_eq!(player.set_volume(0.25).await, Ok(0.25));
        player.skip().await.unwrap();

        assert_eq!(
            sink.calls(),
            vec![
                "start t1 @0.5",
                "volume@1 t1",
                "volume@0.25 t1",
                "stop t1",
                "start t2 @0.25",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_is_retried() {
        let sink = FakeSink::failing(1);
        let player = spawn(sink.clone());

        let outcome = player.play(track("t1")).await.unwrap();
        assert!(matches!(&outcome, PlayOutcome::Retrying(t) if t.title == "t1"));
        assert_eq!(state(&player).await, (PlayerStatus::Retrying { attempt: 1 }, None, vec![]));

        // enqueues while a retry is pending
        player.play(track("t2")).await.unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;

        assert_eq!(
            state(&player).await,
            (PlayerStatus::Playing, Some("t1".into()), vec!["t2".into()])
        );
        assert_eq!(sink.calls(), vec!["fail t1", "start t1 @0.5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_are_bounded() {
        let sink = FakeSink::failing(3);
        let player = spawn(sink.clone());

        player.play(track("t1")).await.unwrap();
        player.play(track("t2")).await.unwrap();

        for _ in 0..2 {
            tokio::time::advance(Duration::from_secs(1)).await;
            settle().await;
        }

        // t1 failed once plus two retries; t2 then starts normally
        assert_eq!(
            state(&player).await,
            (PlayerStatus::Playing, Some("t2".into()), vec![])
        );
        assert_eq!(sink.calls(), vec!["fail t1", "fail t1", "fail t1", "start t2 @0.5"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_skip_reports_next_track_waiting_for_retry() {
        let sink = FakeSink::new();
        let player = spawn(sink.clone());
        player.play(track("t1")).await.unwrap();
        player.play(track("t2")).await.unwrap();

        sink.fail_next(1);
        let skipped = player.skip().await.unwrap();
        assert_eq!(skipped.skipped.title, "t1");
        assert_eq!(skipped.now_playing.map(|t| t.title), Some("t2".into()));
        assert!(skipped.retrying);
        assert_eq!(state(&player).await.0, PlayerStatus::Retrying { attempt: 1 });

        tokio::time::advance(Duration::from_secs(1)).await;
        settle().await;
        assert_eq!(state(&player).await, (PlayerStatus::Playing, Some("t2".into()), vec![]));
    }

    #[tokio::test]
    async fn test_start_failure_without_retries_is_reported() {
        let sink = FakeSink::failing(1);
        let settings = PlayerSettings {
            start_retries: 0,
            ..PlayerSettings::default()
        };
        let player = GuildPlayer::spawn(GUILD, sink, settings);

        assert!(matches!(player.play(track("t1")).await, Err(MusicError::Playback(_))));
        assert_eq!(state(&player).await, (PlayerStatus::Idle, None, vec![]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_retry() {
        let sink = FakeSink::failing(1);
        let player = spawn(sink.clone());

        player.play(track("t1")).await.unwrap();
        player.stop().await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        settle().await;

        assert_eq!(state(&player).await, (PlayerStatus::Idle, None, vec![]));
        assert!(sink.started().is_empty());
    }

    #[tokio::test]
    async fn test_registry_evict_clears_player() {
        let sink = FakeSink::new();
        let registry = PlayerRegistry::new(sink.clone(), PlayerSettings::default());

        let player = registry.get_or_spawn(GUILD);
        player.play(track("t1")).await.unwrap();
        assert_eq!(registry.len(), 1);

        assert!(registry.evict(GUILD).await);
        assert!(!registry.evict(GUILD).await);
        assert!(registry.get(GUILD).is_none());
        assert!(sink.calls().contains(&"stop t1".to_string()));

        // a fresh player starts empty
        let player = registry.get_or_spawn(GUILD);
        assert_eq!(state(&player).await, (PlayerStatus::Idle, None, vec![]));
    }
}
