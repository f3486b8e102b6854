use anyhow::Result;
use serenity::{model::gateway::GatewayIntents, Client};
use songbird::{SerenityInit, Songbird};
use std::sync::Arc;
use tracing::{error, info};

mod audio;
mod bot;
mod config;
mod error;
mod sources;
mod ui;

use crate::audio::player::{PlayerRegistry, PlayerSettings};
use crate::audio::sink::SongbirdSink;
use crate::audio::voice::{SongbirdGateway, VoiceSessionManager};
use crate::bot::{service::MusicService, MusicBot};
use crate::config::Config;
use crate::sources::YtDlpResolver;

#[tokio::main]
async fn main() -> Result<()> {
    // Logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("tunequeue=debug".parse()?)
                .add_directive("serenity=info".parse()?)
                .add_directive("songbird=info".parse()?),
        )
        .init();

    info!("🎵 Starting TuneQueue v{}", env!("CARGO_PKG_VERSION"));

    if std::env::args().any(|arg| arg == "--health-check") {
        let resolver = YtDlpResolver::new(&Config::load_for_health_check());
        return health_check(&resolver).await;
    }

    let config = Config::load()?;
    let resolver = Arc::new(YtDlpResolver::new(&config));

    info!("{}", config.summary());
    config.prepare_dirs()?;

    // Only the intents the bot needs
    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_VOICE_STATES
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT;

    let songbird = Songbird::serenity();
    let sink = Arc::new(SongbirdSink::new(songbird.clone(), reqwest::Client::new()));
    let players = Arc::new(PlayerRegistry::new(sink, PlayerSettings::from_config(&config)));
    let voice = VoiceSessionManager::new(
        Arc::new(SongbirdGateway::new(songbird.clone())),
        players.clone(),
        config.idle_timeout(),
    );
    let service = Arc::new(MusicService::new(
        voice,
        players,
        resolver,
        config.allow_download,
    ));

    let config = Arc::new(config);
    let handler = MusicBot::new(config.clone(), service.clone());

    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .register_songbird_with(songbird)
        .await?;

    // Graceful shutdown
    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Could not listen for Ctrl+C: {:?}", e);
            return;
        }
        info!("⚠️ Shutdown signal received, closing...");
        service.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    info!("🚀 Bot started");
    if let Err(why) = client.start().await {
        error!("Client error: {:?}", why);
    }

    Ok(())
}

async fn health_check(resolver: &YtDlpResolver) -> Result<()> {
    match resolver.verify().await {
        Ok(version) => {
            println!("OK (yt-dlp {version})");
            Ok(())
        }
        Err(e) => anyhow::bail!("yt-dlp is not usable: {e}"),
    }
}
