use anyhow::Result;
use serenity::{
    builder::{
        CreateEmbed, CreateInteractionResponse, CreateInteractionResponseMessage, CreateMessage,
        EditInteractionResponse,
    },
    model::{
        application::CommandInteraction,
        channel::Message,
        id::{ChannelId, GuildId, UserId},
    },
    prelude::Context,
};
use tracing::{debug, info, warn};

use crate::{
    bot::{
        commands::MusicCommand,
        prefix,
        service::{MusicService, Requester},
        MusicBot,
    },
    error::MusicError,
    ui::embeds,
};

/// Handles slash commands
pub async fn handle_command(ctx: &Context, command: CommandInteraction, bot: &MusicBot) -> Result<()> {
    let Some(guild_id) = command.guild_id else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Music commands only work inside a server")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    info!(
        "📝 Command /{} used by {} in guild {}",
        command.data.name, command.user.name, guild_id
    );

    let Some(music_command) = MusicCommand::from_interaction(&command) else {
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new()
                        .content("❌ Unknown command")
                        .ephemeral(true),
                ),
            )
            .await?;
        return Ok(());
    };

    let requester = requester(ctx, guild_id, command.user.id);

    if music_command.is_slow() {
        // Resolving can outlast the interaction deadline
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Defer(CreateInteractionResponseMessage::new()),
            )
            .await?;

        let embed = execute(bot.service(), &requester, music_command, bot.prefix()).await;
        command
            .edit_response(&ctx.http, EditInteractionResponse::new().embed(embed))
            .await?;
    } else {
        let embed = execute(bot.service(), &requester, music_command, bot.prefix()).await;
        command
            .create_response(
                &ctx.http,
                CreateInteractionResponse::Message(
                    CreateInteractionResponseMessage::new().embed(embed),
                ),
            )
            .await?;
    }

    Ok(())
}

/// Handles prefixed text commands
pub async fn handle_message(ctx: &Context, msg: &Message, bot: &MusicBot) -> Result<()> {
    if msg.author.bot {
        return Ok(());
    }
    let Some(guild_id) = msg.guild_id else {
        return Ok(());
    };
    let Some(music_command) = prefix::parse_prefixed(&msg.content, bot.prefix()) else {
        return Ok(());
    };

    info!(
        "📝 Command {}{} used by {} in guild {}",
        bot.prefix(),
        music_command.name(),
        msg.author.name,
        guild_id
    );

    if music_command.is_slow() {
        if let Err(e) = msg.channel_id.broadcast_typing(&ctx.http).await {
            debug!("Could not show typing in {}: {}", msg.channel_id, e);
        }
    }

    let requester = requester(ctx, guild_id, msg.author.id);
    let embed = execute(bot.service(), &requester, music_command, bot.prefix()).await;

    msg.channel_id
        .send_message(&ctx.http, CreateMessage::new().embed(embed))
        .await?;

    Ok(())
}

fn requester(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Requester {
    Requester {
        guild_id,
        user_id,
        voice_channel: get_user_voice_channel(ctx, guild_id, user_id),
    }
}

/// Runs `command` and renders the reply. Failures become error embeds.
pub async fn execute(
    service: &MusicService,
    requester: &Requester,
    command: MusicCommand,
    prefix: &str,
) -> CreateEmbed {
    let name = command.name();
    match run(service, requester, command, prefix).await {
        Ok(embed) => embed,
        Err(e) => {
            warn!(
                "⚠️ Command {} failed in guild {}: {}",
                name, requester.guild_id, e
            );
            embeds::error_embed(&e)
        }
    }
}

async fn run(
    service: &MusicService,
    requester: &Requester,
    command: MusicCommand,
    prefix: &str,
) -> Result<CreateEmbed, MusicError> {
    let guild_id = requester.guild_id;

    let embed = match command {
        MusicCommand::Join => embeds::connection_embed(service.join(requester).await?),
        MusicCommand::Leave => embeds::left_embed(service.leave(guild_id).await?),
        MusicCommand::Play { query } => {
            let reply = service.play(requester, &query).await?;
            embeds::with_connection(embeds::play_embed(&reply.value), reply.connection)
        }
        MusicCommand::Skip => {
            let reply = service.skip(requester).await?;
            embeds::with_connection(embeds::skipped_embed(&reply.value), reply.connection)
        }
        MusicCommand::Pause => {
            let reply = service.pause(requester).await?;
            embeds::with_connection(embeds::paused_embed(), reply.connection)
        }
        MusicCommand::Resume => {
            let reply = service.resume(requester).await?;
            embeds::with_connection(embeds::resumed_embed(), reply.connection)
        }
        MusicCommand::Stop => {
            let reply = service.stop(requester).await?;
            embeds::with_connection(embeds::stopped_embed(), reply.connection)
        }
        MusicCommand::Queue { page } => embeds::queue_embed(&service.show_queue(guild_id).await?, page),
        MusicCommand::NowPlaying => embeds::now_playing_embed(&service.show_now_playing(guild_id).await?),
        MusicCommand::Shuffle => embeds::shuffled_embed(service.shuffle(guild_id).await?),
        MusicCommand::Volume { level } => {
            let volume = service
                .volume(guild_id, level.map(|l| f32::from(l) / 100.0))
                .await?;
            embeds::volume_embed(volume, level.is_some())
        }
        MusicCommand::Help => embeds::help_embed(prefix),
    };

    Ok(embed)
}

// Helpers

fn get_user_voice_channel(ctx: &Context, guild_id: GuildId, user_id: UserId) -> Option<ChannelId> {
    let guild = guild_id.to_guild_cached(&ctx.cache)?;
    guild
        .voice_states
        .get(&user_id)
        .and_then(|voice_state| voice_state.channel_id)
}
