use serenity::model::id::{ChannelId, GuildId, UserId};
use std::sync::Arc;
use tracing::{info, warn};

use crate::{
    audio::{
        player::{PlayOutcome, PlayerRegistry, PlayerStatus, Skipped},
        queue::{QueueSnapshot, Track},
        voice::{Connection, VoiceSessionManager},
    },
    error::MusicError,
    sources::{MediaQuery, MediaResolver},
};

/// Who issued a command and from where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Requester {
    pub guild_id: GuildId,
    pub user_id: UserId,
    /// Voice channel the user sits in, if any.
    pub voice_channel: Option<ChannelId>,
}

/// Result of a command that connects the bot first.
#[derive(Debug, Clone, PartialEq)]
pub struct Connected<T> {
    pub connection: Connection,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NowPlaying {
    pub track: Track,
    pub paused: bool,
    pub pending: usize,
}

/// Every user-facing music operation. Holds no per-guild state itself:
/// queues live in the [`PlayerRegistry`] and connections in the
/// [`VoiceSessionManager`].
pub struct MusicService {
    voice: VoiceSessionManager,
    players: Arc<PlayerRegistry>,
    resolver: Arc<dyn MediaResolver>,
    allow_download: bool,
}

impl MusicService {
    pub fn new(
        voice: VoiceSessionManager,
        players: Arc<PlayerRegistry>,
        resolver: Arc<dyn MediaResolver>,
        allow_download: bool,
    ) -> Self {
        Self {
            voice,
            players,
            resolver,
            allow_download,
        }
    }

    pub async fn join(&self, requester: &Requester) -> Result<Connection, MusicError> {
        self.voice
            .ensure_connected(requester.guild_id, requester.voice_channel)
            .await
    }

    pub async fn leave(&self, guild_id: GuildId) -> Result<ChannelId, MusicError> {
        self.voice.leave(guild_id).await
    }

    pub async fn play(
        &self,
        requester: &Requester,
        query: &str,
    ) -> Result<Connected<PlayOutcome>, MusicError> {
        // Reject empty queries before joining
        MediaQuery::parse(query)?;

        let connection = self.join(requester).await?;
        let media = self.resolver.resolve(query, self.allow_download).await?;
        let track = Track::from_media(media, requester.user_id);

        info!(
            "🎶 {} requested {} in guild {}",
            requester.user_id, track.title, requester.guild_id
        );

        let value = self.players.get_or_spawn(requester.guild_id).play(track).await?;
        Ok(Connected { connection, value })
    }

    pub async fn skip(&self, requester: &Requester) -> Result<Connected<Skipped>, MusicError> {
        let connection = self.join(requester).await?;
        let value = self.players.get_or_spawn(requester.guild_id).skip().await?;
        Ok(Connected { connection, value })
    }

    pub async fn pause(&self, requester: &Requester) -> Result<Connected<()>, MusicError> {
        let connection = self.join(requester).await?;
        let value = self.players.get_or_spawn(requester.guild_id).pause().await?;
        Ok(Connected { connection, value })
    }

    pub async fn resume(&self, requester: &Requester) -> Result<Connected<()>, MusicError> {
        let connection = self.join(requester).await?;
        let value = self.players.get_or_spawn(requester.guild_id).resume().await?;
        Ok(Connected { connection, value })
    }

    /// Stops playback and clears the queue but stays in the channel.
    pub async fn stop(&self, requester: &Requester) -> Result<Connected<()>, MusicError> {
        let connection = self.join(requester).await?;
        let value = self.players.get_or_spawn(requester.guild_id).stop().await?;
        Ok(Connected { connection, value })
    }

    /// An unknown guild simply has an empty queue.
    pub async fn show_queue(&self, guild_id: GuildId) -> Result<QueueSnapshot, MusicError> {
        match self.players.get(guild_id) {
            Some(player) => Ok(player.snapshot().await?.queue),
            None => Ok(QueueSnapshot::default()),
        }
    }

    pub async fn show_now_playing(&self, guild_id: GuildId) -> Result<NowPlaying, MusicError> {
        let player = self.players.get(guild_id).ok_or(MusicError::NothingPlaying)?;
        let snapshot = player.snapshot().await?;
        let pending = snapshot.queue.pending.len();
        let track = snapshot.queue.current.ok_or(MusicError::NothingPlaying)?;

        Ok(NowPlaying {
            track,
            paused: snapshot.status == PlayerStatus::Paused,
            pending,
        })
    }

    /// Returns how many pending tracks were shuffled.
    pub async fn shuffle(&self, guild_id: GuildId) -> Result<usize, MusicError> {
        let player = self.players.get(guild_id).ok_or(MusicError::QueueEmpty)?;
        player.shuffle().await
    }

    /// Sets the volume when `level` is given (0.0 - 1.0) and returns the
    /// volume in effect.
    pub async fn volume(&self, guild_id: GuildId, level: Option<f32>) -> Result<f32, MusicError> {
        let player = self.players.get(guild_id).ok_or(MusicError::NotConnected)?;
        match level {
            Some(level) => player.set_volume(level).await,
            None => Ok(player.snapshot().await?.queue.volume),
        }
    }

    pub fn on_roster_changed(&self, guild_id: GuildId, channel_id: ChannelId, member_count: usize) {
        self.voice.on_roster_changed(guild_id, channel_id, member_count);
    }

    /// The bot's own voice state changed. `None` means it is no longer in
    /// any channel.
    pub async fn on_bot_voice_update(&self, guild_id: GuildId, channel_id: Option<ChannelId>) {
        match channel_id {
            Some(channel_id) => self.voice.follow_move(guild_id, channel_id),
            None => {
                if self.voice.is_connected(guild_id) {
                    warn!("🔌 Removed from voice in guild {}", guild_id);
                }
                self.voice.forget(guild_id).await;
            }
        }
    }

    pub fn connected_channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.voice.channel(guild_id)
    }

    pub async fn shutdown(&self) {
        info!("🛑 Stopping every player");
        self.voice.leave_all().await;
        self.players.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        audio::{
            player::PlayerSettings,
            testing::FakeSink,
            voice::MockVoiceGateway,
        },
        sources::{MockMediaResolver, ResolvedMedia, SourceKind},
    };
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    const GUILD: GuildId = GuildId::new(5);
    const LOBBY: ChannelId = ChannelId::new(50);

    fn requester(voice_channel: Option<ChannelId>) -> Requester {
        Requester {
            guild_id: GUILD,
            user_id: UserId::new(9),
            voice_channel,
        }
    }

    fn media(title: &str) -> ResolvedMedia {
        ResolvedMedia {
            title: title.to_string(),
            stream_uri: format!("https://cdn.example/{title}"),
            duration_secs: 200,
            thumbnail: None,
            webpage_url: format!("https://www.youtube.com/watch?v={title}"),
            source_kind: SourceKind::YouTube,
        }
    }

    fn echo_resolver() -> MockMediaResolver {
        let mut resolver = MockMediaResolver::new();
        resolver
            .expect_resolve()
            .returning(|query, _| Ok(media(query)));
        resolver
    }

    fn gateway_ok() -> MockVoiceGateway {
        let mut gateway = MockVoiceGateway::new();
        gateway.expect_join().returning(|_, _| Ok(()));
        gateway.expect_leave().returning(|_| Ok(()));
        gateway
    }

    fn service(resolver: MockMediaResolver, gateway: MockVoiceGateway) -> (MusicService, Arc<FakeSink>) {
        let sink = FakeSink::new();
        let players = Arc::new(PlayerRegistry::new(sink.clone(), PlayerSettings::default()));
        let voice = VoiceSessionManager::new(Arc::new(gateway), players.clone(), Duration::from_secs(30));
        (MusicService::new(voice, players, Arc::new(resolver), false), sink)
    }

    #[tokio::test]
    async fn test_play_joins_then_queues() {
        let (service, sink) = service(echo_resolver(), gateway_ok());
        let user = requester(Some(LOBBY));

        let first = service.play(&user, "one").await.unwrap();
        assert_eq!(first.connection, Connection::Joined(LOBBY));
        assert!(matches!(first.value, PlayOutcome::Started(ref t) if t.title == "one"));

        let second = service.play(&user, "two").await.unwrap();
        assert_eq!(second.connection, Connection::AlreadyConnected(LOBBY));
        assert!(matches!(second.value, PlayOutcome::Queued { position: 1, .. }));

        let queue = service.show_queue(GUILD).await.unwrap();
        assert_eq!(queue.current.map(|t| t.title), Some("one".into()));
        assert_eq!(queue.pending.len(), 1);
        assert_eq!(sink.started(), vec!["one"]);
    }

    #[tokio::test]
    async fn test_play_with_empty_query_does_nothing() {
        let mut resolver = MockMediaResolver::new();
        resolver.expect_resolve().never();
        let mut gateway = MockVoiceGateway::new();
        gateway.expect_join().never();
        let (service, _sink) = service(resolver, gateway);

        let result = service.play(&requester(Some(LOBBY)), "   ").await;
        assert_eq!(result, Err(MusicError::EmptyQuery));
        assert!(service.connected_channel(GUILD).is_none());
    }

    #[tokio::test]
    async fn test_play_outside_voice_is_rejected() {
        let mut resolver = MockMediaResolver::new();
        resolver.expect_resolve().never();
        let (service, _sink) = service(resolver, gateway_ok());

        let result = service.play(&requester(None), "song").await;
        assert_eq!(result, Err(MusicError::NotInVoiceChannel));
    }

    #[tokio::test]
    async fn test_resolution_failure_leaves_queue_alone() {
        let mut resolver = MockMediaResolver::new();
        resolver
            .expect_resolve()
            .returning(|_, _| Err(MusicError::Resolution("Video unavailable".into())));
        let (service, sink) = service(resolver, gateway_ok());

        let result = service.play(&requester(Some(LOBBY)), "gone").await;
        assert_eq!(result, Err(MusicError::Resolution("Video unavailable".into())));

        let queue = service.show_queue(GUILD).await.unwrap();
        assert!(queue.current.is_none());
        assert!(queue.pending.is_empty());
        assert!(sink.started().is_empty());
    }

    #[tokio::test]
    async fn test_search_terms_reach_resolver_untouched() {
        let mut resolver = MockMediaResolver::new();
        resolver
            .expect_resolve()
            .withf(|query, allow_download| query == "never gonna give you up" && !allow_download)
            .times(1)
            .returning(|_, _| Ok(media("rick")));
        let (service, _sink) = service(resolver, gateway_ok());

        service
            .play(&requester(Some(LOBBY)), "never gonna give you up")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_transport_failure_is_reported() {
        let mut gateway = MockVoiceGateway::new();
        gateway
            .expect_join()
            .returning(|_, _| Err(MusicError::Transport("timed out".into())));
        let mut resolver = MockMediaResolver::new();
        resolver.expect_resolve().never();
        let (service, _sink) = service(resolver, gateway);

        let result = service.skip(&requester(Some(LOBBY))).await;
        assert_eq!(result, Err(MusicError::Transport("timed out".into())));
    }

    #[tokio::test]
    async fn test_playback_controls() {
        let (service, _sink) = service(echo_resolver(), gateway_ok());
        let user = requester(Some(LOBBY));

        assert_eq!(service.pause(&user).await, Err(MusicError::NothingPlaying));

        for name in ["a", "b", "c"] {
            service.play(&user, name).await.unwrap();
        }
        service.pause(&user).await.unwrap();
        assert!(service.show_now_playing(GUILD).await.unwrap().paused);
        service.resume(&user).await.unwrap();

        let skipped = service.skip(&user).await.unwrap().value;
        assert_eq!(skipped.skipped.title, "a");

        let now = service.show_now_playing(GUILD).await.unwrap();
        assert_eq!(now.track.title, "b");
        assert_eq!(now.pending, 1);
        assert!(!now.paused);

        service.stop(&user).await.unwrap();
        assert_eq!(service.show_now_playing(GUILD).await, Err(MusicError::NothingPlaying));
        // stop keeps the connection
        assert_eq!(service.connected_channel(GUILD), Some(LOBBY));
    }

    #[tokio::test]
    async fn test_shuffle_and_volume_need_a_player() {
        let (service, sink) = service(echo_resolver(), gateway_ok());
        assert_eq!(service.shuffle(GUILD).await, Err(MusicError::QueueEmpty));
        assert_eq!(service.volume(GUILD, None).await, Err(MusicError::NotConnected));

        let user = requester(Some(LOBBY));
        service.play(&user, "a").await.unwrap();
        assert_eq!(service.shuffle(GUILD).await, Err(MusicError::QueueEmpty));
        service.play(&user, "b").await.unwrap();
        service.play(&user, "c").await.unwrap();
        assert_eq!(service.shuffle(GUILD).await, Ok(2));

        assert_eq!(service.volume(GUILD, None).await, Ok(0.5));
        assert_eq!(service.volume(GUILD, Some(0.3)).await, Ok(0.3));
        assert!(sink.calls().contains(&"volume@0.3 a".to_string()));
    }

    #[tokio::test]
    async fn test_leave_and_forced_disconnect() {
        let (service, _sink) = service(echo_resolver(), gateway_ok());
        let user = requester(Some(LOBBY));

        assert_eq!(service.leave(GUILD).await, Err(MusicError::NotConnected));

        service.play(&user, "a").await.unwrap();
        assert_eq!(service.leave(GUILD).await, Ok(LOBBY));
        assert!(service.show_queue(GUILD).await.unwrap().current.is_none());

        service.play(&user, "b").await.unwrap();
        service.on_bot_voice_update(GUILD, None).await;
        assert!(service.connected_channel(GUILD).is_none());
        assert!(service.show_queue(GUILD).await.unwrap().current.is_none());
    }

    #[tokio::test]
    async fn test_bot_moved_by_someone_else() {
        let (service, _sink) = service(echo_resolver(), gateway_ok());
        service.play(&requester(Some(LOBBY)), "a").await.unwrap();

        let elsewhere = ChannelId::new(51);
        service.on_bot_voice_update(GUILD, Some(elsewhere)).await;
        assert_eq!(service.connected_channel(GUILD), Some(elsewhere));
        assert_eq!(service.show_now_playing(GUILD).await.unwrap().track.title, "a");
    }

    #[tokio::test]
    async fn test_shutdown_clears_everything() {
        let (service, sink) = service(echo_resolver(), gateway_ok());
        service.play(&requester(Some(LOBBY)), "a").await.unwrap();

        service.shutdown().await;

        assert!(service.connected_channel(GUILD).is_none());
        assert!(service.show_queue(GUILD).await.unwrap().current.is_none());
        assert!(sink.calls().contains(&"stop a".to_string()));
    }
}
