//! # Bot Module
//!
//! Discord side of the bot: command registration, slash and prefixed
//! commands, and voice state tracking.
//!
//! ## Architecture
//!
//! [`MusicBot`] implements Serenity's [`EventHandler`] and forwards everything
//! to a shared [`MusicService`], which owns no Discord types of its own:
//!
//! - [`commands`] - slash command definitions and the [`commands::MusicCommand`] parser
//! - [`prefix`] - `!`-style text commands and their aliases
//! - [`handlers`] - runs a command and sends the rendered reply
//! - [`service`] - the music operations themselves

use anyhow::Result;
use serenity::{
    all::{ChannelId, Context, EventHandler, GuildId, Interaction, Message, Ready, VoiceState},
    async_trait,
};
use std::sync::Arc;
use tracing::{error, info, warn};

pub mod commands;
pub mod handlers;
pub mod prefix;
pub mod service;

use crate::config::Config;
use service::MusicService;

/// Main Discord event handler.
pub struct MusicBot {
    /// Bot configuration loaded from environment variables
    config: Arc<Config>,
    service: Arc<MusicService>,
}

impl MusicBot {
    pub fn new(config: Arc<Config>, service: Arc<MusicService>) -> Self {
        Self { config, service }
    }

    pub fn service(&self) -> &MusicService {
        &self.service
    }

    pub fn prefix(&self) -> &str {
        &self.config.command_prefix
    }

    /// Registers slash commands with Discord.
    ///
    /// Commands go to a single guild when `GUILD_ID` is set (updates show up
    /// almost immediately, handy in development) and globally otherwise.
    async fn register_commands(&self, ctx: &Context) -> Result<()> {
        info!("📝 Registering slash commands...");

        match self.config.guild_id {
            Some(guild_id) => {
                let guild_id = GuildId::new(guild_id);

                // The bot must already be in that guild
                if !ctx.cache.guilds().contains(&guild_id) {
                    warn!("⚠️ The bot is not in the configured guild: {}", guild_id);
                    return Ok(());
                }

                commands::register_guild_commands(ctx, guild_id)
                    .await
                    .map_err(|e| {
                        error!("❌ Guild command registration failed: {:?}", e);
                        anyhow::anyhow!(
                            "Could not register guild commands. Check that the bot has the 'applications.commands' scope in the guild."
                        )
                    })?;
                info!("✅ Guild commands registered for {}", guild_id);
            }
            None => {
                commands::register_global_commands(ctx).await.map_err(|e| {
                    error!("❌ Global command registration failed: {:?}", e);
                    anyhow::anyhow!(
                        "Could not register global commands. Check that the bot has the 'applications.commands' scope."
                    )
                })?;
                info!("✅ Global commands registered");
            }
        }

        Ok(())
    }

    /// Number of users (the bot included) in `channel_id`, from the cache.
    fn channel_member_count(ctx: &Context, guild_id: GuildId, channel_id: ChannelId) -> Option<usize> {
        let guild = ctx.cache.guild(guild_id)?;
        Some(
            guild
                .voice_states
                .values()
                .filter(|state| state.channel_id == Some(channel_id))
                .count(),
        )
    }
}

#[async_trait]
impl EventHandler for MusicBot {
    async fn ready(&self, ctx: Context, ready: Ready) {
        info!("🤖 {} is online!", ready.user.name);
        info!("📊 Connected to {} guilds", ready.guilds.len());

        if let Err(e) = self.register_commands(&ctx).await {
            error!("Error registering commands: {:?}", e);
        }
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command_interaction) = interaction {
            if let Err(e) = handlers::handle_command(&ctx, command_interaction, self).await {
                error!("Error handling command: {:?}", e);
            }
        }
    }

    async fn message(&self, ctx: Context, msg: Message) {
        if let Err(e) = handlers::handle_message(&ctx, &msg, self).await {
            error!("Error handling message command: {:?}", e);
        }
    }

    /// Tracks the bot being disconnected or moved by someone else, and
    /// reports roster changes of the bot's channel so it can leave when
    /// left alone.
    async fn voice_state_update(&self, ctx: Context, old: Option<VoiceState>, new: VoiceState) {
        let Some(guild_id) = new.guild_id else {
            return;
        };

        let bot_id = ctx.cache.current_user().id;
        if new.user_id == bot_id {
            self.service.on_bot_voice_update(guild_id, new.channel_id).await;
        }

        let Some(bot_channel) = self.service.connected_channel(guild_id) else {
            return;
        };

        let touched = old.and_then(|s| s.channel_id) == Some(bot_channel) || new.channel_id == Some(bot_channel);
        if !touched {
            return;
        }

        if let Some(count) = Self::channel_member_count(&ctx, guild_id, bot_channel) {
            self.service.on_roster_changed(guild_id, bot_channel, count);
        }
    }
}
