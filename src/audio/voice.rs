use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serenity::model::id::{ChannelId, GuildId};
use songbird::Songbird;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::OwnedMutexGuard;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{audio::player::PlayerRegistry, error::MusicError};

/// Joins and leaves voice channels. `join` on an already connected guild
/// moves the connection.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VoiceGateway: Send + Sync {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), MusicError>;
    async fn leave(&self, guild_id: GuildId) -> Result<(), MusicError>;
}

pub struct SongbirdGateway {
    songbird: Arc<Songbird>,
}

impl SongbirdGateway {
    pub fn new(songbird: Arc<Songbird>) -> Self {
        Self { songbird }
    }
}

#[async_trait]
impl VoiceGateway for SongbirdGateway {
    async fn join(&self, guild_id: GuildId, channel_id: ChannelId) -> Result<(), MusicError> {
        let call = self
            .songbird
            .join(guild_id, channel_id)
            .await
            .map_err(|e| MusicError::Transport(e.to_string()))?;

        // The bot never listens to anyone
        if let Err(e) = call.lock().await.deafen(true).await {
            warn!("Could not self-deafen in guild {}: {}", guild_id, e);
        }
        Ok(())
    }

    async fn leave(&self, guild_id: GuildId) -> Result<(), MusicError> {
        self.songbird
            .remove(guild_id)
            .await
            .map_err(|e| MusicError::Transport(e.to_string()))
    }
}

/// Result of [`VoiceSessionManager::ensure_connected`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connection {
    Joined(ChannelId),
    Moved(ChannelId),
    AlreadyConnected(ChannelId),
}

impl Connection {
    pub fn channel_id(&self) -> ChannelId {
        match self {
            Connection::Joined(c) | Connection::Moved(c) | Connection::AlreadyConnected(c) => *c,
        }
    }
}

#[derive(Debug)]
struct VoiceSession {
    channel_id: ChannelId,
    connected_at: DateTime<Utc>,
    /// Last roster size reported for `channel_id`, bot included.
    member_count: Option<usize>,
    last_solo_since: Option<DateTime<Utc>>,
    idle_leave: Option<CancellationToken>,
}

impl VoiceSession {
    fn new(channel_id: ChannelId) -> Self {
        Self {
            channel_id,
            connected_at: Utc::now(),
            member_count: None,
            last_solo_since: None,
            idle_leave: None,
        }
    }

    fn cancel_idle_leave(&mut self) -> bool {
        self.last_solo_since = None;
        match self.idle_leave.take() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// Tracks which voice channel the bot is in for each guild and leaves
/// channels where it has been alone for too long.
///
/// Cheap to clone; clones share state. Joins, leaves and idle expiry for a
/// guild run one at a time, so the session map and the transport agree.
#[derive(Clone)]
pub struct VoiceSessionManager {
    sessions: Arc<Mutex<HashMap<GuildId, VoiceSession>>>,
    transitions: Arc<DashMap<GuildId, Arc<tokio::sync::Mutex<()>>>>,
    gateway: Arc<dyn VoiceGateway>,
    players: Arc<PlayerRegistry>,
    idle_timeout: Duration,
}

impl VoiceSessionManager {
    pub fn new(gateway: Arc<dyn VoiceGateway>, players: Arc<PlayerRegistry>, idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(Mutex::new(HashMap::new())),
            transitions: Arc::new(DashMap::new()),
            gateway,
            players,
            idle_timeout,
        }
    }

    async fn lock_guild(&self, guild_id: GuildId) -> OwnedMutexGuard<()> {
        let lock = self.transitions.entry(guild_id).or_default().clone();
        lock.lock_owned().await
    }

    pub fn channel(&self, guild_id: GuildId) -> Option<ChannelId> {
        self.sessions.lock().get(&guild_id).map(|s| s.channel_id)
    }

    pub fn is_connected(&self, guild_id: GuildId) -> bool {
        self.sessions.lock().contains_key(&guild_id)
    }

    /// Moment the bot was left alone, while an idle leave is pending.
    pub fn solo_since(&self, guild_id: GuildId) -> Option<DateTime<Utc>> {
        self.sessions.lock().get(&guild_id).and_then(|s| s.last_solo_since)
    }

    /// Makes sure the bot sits in `requester_channel`, joining or moving as
    /// needed. Nothing changes when the requester is not in voice or the
    /// transport fails.
    pub async fn ensure_connected(
        &self,
        guild_id: GuildId,
        requester_channel: Option<ChannelId>,
    ) -> Result<Connection, MusicError> {
        let channel_id = requester_channel.ok_or(MusicError::NotInVoiceChannel)?;
        let _guard = self.lock_guild(guild_id).await;
        let current = self.channel(guild_id);

        if current == Some(channel_id) {
            return Ok(Connection::AlreadyConnected(channel_id));
        }

        if let Err(e) = self.gateway.join(guild_id, channel_id).await {
            error!("❌ Voice connection to {} failed in guild {}: {}", channel_id, guild_id, e);
            return Err(e);
        }

        {
            let mut sessions = self.sessions.lock();
            match sessions.get_mut(&guild_id) {
                Some(session) => {
                    session.cancel_idle_leave();
                    session.channel_id = channel_id;
                    session.member_count = None;
                }
                None => {
                    sessions.insert(guild_id, VoiceSession::new(channel_id));
                }
            }
        }

        self.players.get_or_spawn(guild_id);

        Ok(match current {
            Some(_) => {
                info!("🔀 Moved to channel {} in guild {}", channel_id, guild_id);
                Connection::Moved(channel_id)
            }
            None => {
                info!("🔊 Joined channel {} in guild {}", channel_id, guild_id);
                Connection::Joined(channel_id)
            }
        })
    }

    /// Disconnects and clears the guild's queue.
    ///
    /// The session and queue are gone once this returns, even when the
    /// transport fails to disconnect; that failure is only logged.
    pub async fn leave(&self, guild_id: GuildId) -> Result<ChannelId, MusicError> {
        let _guard = self.lock_guild(guild_id).await;
        let session = self.sessions.lock().remove(&guild_id);
        let Some(mut session) = session else {
            return Err(MusicError::NotConnected);
        };
        session.cancel_idle_leave();

        self.players.evict(guild_id).await;
        if let Err(e) = self.gateway.leave(guild_id).await {
            error!("❌ Voice disconnect failed in guild {}: {}", guild_id, e);
        }

        info!(
            "👋 Left channel {} in guild {} after {} min",
            session.channel_id,
            guild_id,
            (Utc::now() - session.connected_at).num_minutes()
        );
        Ok(session.channel_id)
    }

    /// The bot was disconnected by someone else: drop the session and queue
    /// without touching the transport.
    pub async fn forget(&self, guild_id: GuildId) {
        let _guard = self.lock_guild(guild_id).await;
        let removed = self.sessions.lock().remove(&guild_id);
        if let Some(mut session) = removed {
            session.cancel_idle_leave();
            info!("🔌 Disconnected externally from guild {}", guild_id);
        }
        self.players.evict(guild_id).await;
    }

    /// The bot was moved to another channel by someone else.
    pub fn follow_move(&self, guild_id: GuildId, channel_id: ChannelId) {
        if let Some(session) = self.sessions.lock().get_mut(&guild_id) {
            if session.channel_id != channel_id {
                session.cancel_idle_leave();
                session.channel_id = channel_id;
                session.member_count = None;
                info!("🔀 Moved externally to channel {} in guild {}", channel_id, guild_id);
            }
        }
    }

    /// Reacts to a roster change in `channel_id`. `member_count` includes the
    /// bot itself, so `1` means the bot is alone.
    pub fn on_roster_changed(&self, guild_id: GuildId, channel_id: ChannelId, member_count: usize) {
        let mut sessions = self.sessions.lock();
        let Some(session) = sessions.get_mut(&guild_id) else {
            return;
        };
        if session.channel_id != channel_id {
            return;
        }
        session.member_count = Some(member_count);

        if member_count > 1 {
            if session.cancel_idle_leave() {
                info!("🙌 Someone joined channel {} in guild {}, staying", channel_id, guild_id);
            }
            return;
        }

        if session.idle_leave.is_some() {
            return;
        }

        info!(
            "🚪 Alone in channel {} in guild {}, leaving in {:?} unless someone joins",
            channel_id, guild_id, self.idle_timeout
        );
        let token = CancellationToken::new();
        session.idle_leave = Some(token.clone());
        session.last_solo_since = Some(Utc::now());
        drop(sessions);

        let manager = self.clone();
        let deadline = tokio::time::sleep(self.idle_timeout);
        let aborted = token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = aborted.cancelled() => {
                    debug!("Idle leave aborted for guild {}", guild_id);
                }
                _ = deadline => {
                    manager.expire_idle(guild_id, channel_id, token).await;
                }
            }
        });
    }

    async fn expire_idle(&self, guild_id: GuildId, channel_id: ChannelId, token: CancellationToken) {
        let _guard = self.lock_guild(guild_id).await;
        let alone_since = self.solo_since(guild_id);
        let still_alone = {
            let mut sessions = self.sessions.lock();
            let alone = sessions.get(&guild_id).is_some_and(|s| {
                s.channel_id == channel_id
                    && !token.is_cancelled()
                    && s.member_count.is_some_and(|count| count <= 1)
            });
            if alone {
                sessions.remove(&guild_id)
            } else {
                None
            }
        };

        if still_alone.is_none() {
            debug!("Idle leave for guild {} no longer applies", guild_id);
            return;
        }

        info!(
            "💤 Leaving channel {} in guild {}, alone since {:?}",
            channel_id, guild_id, alone_since
        );
        self.players.evict(guild_id).await;
        if let Err(e) = self.gateway.leave(guild_id).await {
            error!("❌ Idle disconnect failed in guild {}: {}", guild_id, e);
        }
    }

    /// Leaves every channel; used on shutdown.
    pub async fn leave_all(&self) {
        let guilds: Vec<GuildId> = self.sessions.lock().keys().copied().collect();
        for guild_id in guilds {
            if let Err(e) = self.leave(guild_id).await {
                warn!("Could not leave guild {} on shutdown: {}", guild_id, e);
            }
        }
    }
}
