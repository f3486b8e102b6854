use anyhow::Result;
use serenity::{
    builder::{CreateCommand, CreateCommandOption},
    model::{
        application::{Command, CommandDataOptionValue, CommandInteraction, CommandOptionType},
        id::GuildId,
    },
    prelude::Context,
};

/// A user command, whether it came in as a slash command or as a prefixed
/// message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MusicCommand {
    Join,
    Leave,
    Play { query: String },
    Skip,
    Pause,
    Resume,
    Stop,
    Queue { page: usize },
    NowPlaying,
    Shuffle,
    /// `level` is a percentage, 0-100
    Volume { level: Option<u8> },
    Help,
}

impl MusicCommand {
    /// Parses a command name (or alias) and its raw argument text.
    /// Unknown names yield `None`.
    pub fn parse(name: &str, arg: &str) -> Option<Self> {
        let arg = arg.trim();

        let command = match name.to_lowercase().as_str() {
            "join" => MusicCommand::Join,
            "leave" | "disconnect" => MusicCommand::Leave,
            "play" | "p" => MusicCommand::Play {
                query: arg.to_string(),
            },
            "skip" | "s" => MusicCommand::Skip,
            "pause" => MusicCommand::Pause,
            "resume" | "unpause" => MusicCommand::Resume,
            "stop" => MusicCommand::Stop,
            "queue" | "q" => MusicCommand::Queue {
                page: arg.parse::<usize>().unwrap_or(1).max(1),
            },
            "nowplaying" | "np" => MusicCommand::NowPlaying,
            "shuffle" => MusicCommand::Shuffle,
            "volume" | "vol" => MusicCommand::Volume {
                level: arg.parse::<i64>().ok().map(|v| v.clamp(0, 100) as u8),
            },
            "help" => MusicCommand::Help,
            _ => return None,
        };

        Some(command)
    }

    /// Builds a command from a slash interaction. Every command takes at
    /// most one option, so its value is treated as the argument text.
    pub fn from_interaction(command: &CommandInteraction) -> Option<Self> {
        let arg = command
            .data
            .options
            .first()
            .map(|opt| match &opt.value {
                CommandDataOptionValue::String(s) => s.clone(),
                CommandDataOptionValue::Integer(i) => i.to_string(),
                _ => String::new(),
            })
            .unwrap_or_default();

        Self::parse(&command.data.name, &arg)
    }

    pub fn name(&self) -> &'static str {
        match self {
            MusicCommand::Join => "join",
            MusicCommand::Leave => "leave",
            MusicCommand::Play { .. } => "play",
            MusicCommand::Skip => "skip",
            MusicCommand::Pause => "pause",
            MusicCommand::Resume => "resume",
            MusicCommand::Stop => "stop",
            MusicCommand::Queue { .. } => "queue",
            MusicCommand::NowPlaying => "nowplaying",
            MusicCommand::Shuffle => "shuffle",
            MusicCommand::Volume { .. } => "volume",
            MusicCommand::Help => "help",
        }
    }

    /// Commands that may take longer than the interaction deadline.
    pub fn is_slow(&self) -> bool {
        matches!(self, MusicCommand::Play { .. })
    }
}

/// Registers the commands globally
pub async fn register_global_commands(ctx: &Context) -> Result<()> {
    Command::set_global_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

/// Registers the commands for one guild (development)
pub async fn register_guild_commands(ctx: &Context, guild_id: GuildId) -> Result<()> {
    guild_id.set_commands(&ctx.http, all_commands()).await?;
    Ok(())
}

fn all_commands() -> Vec<CreateCommand> {
    vec![
        play_command(),
        pause_command(),
        resume_command(),
        skip_command(),
        stop_command(),
        queue_command(),
        nowplaying_command(),
        shuffle_command(),
        volume_command(),
        join_command(),
        leave_command(),
        help_command(),
    ]
}

// Playback

fn play_command() -> CreateCommand {
    CreateCommand::new("play")
        .description("Play a song from YouTube, a link, or a search")
        .add_option(
            CreateCommandOption::new(CommandOptionType::String, "query", "URL or search terms")
                .required(true),
        )
}

// Controls

fn pause_command() -> CreateCommand {
    CreateCommand::new("pause").description("Pause the current song")
}

fn resume_command() -> CreateCommand {
    CreateCommand::new("resume").description("Resume the paused song")
}

fn skip_command() -> CreateCommand {
    CreateCommand::new("skip").description("Skip the current song")
}

fn stop_command() -> CreateCommand {
    CreateCommand::new("stop").description("Stop playing and clear the queue")
}

// Queue

fn queue_command() -> CreateCommand {
    CreateCommand::new("queue")
        .description("Show the music queue")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "page", "Page number")
                .min_int_value(1),
        )
}

fn nowplaying_command() -> CreateCommand {
    CreateCommand::new("nowplaying").description("Show the song currently playing")
}

fn shuffle_command() -> CreateCommand {
    CreateCommand::new("shuffle").description("Shuffle the pending songs")
}

fn volume_command() -> CreateCommand {
    CreateCommand::new("volume")
        .description("Show or change the playback volume")
        .add_option(
            CreateCommandOption::new(CommandOptionType::Integer, "level", "Volume (0-100)")
                .min_int_value(0)
                .max_int_value(100),
        )
}

// Connection

fn join_command() -> CreateCommand {
    CreateCommand::new("join").description("Join your voice channel")
}

fn leave_command() -> CreateCommand {
    CreateCommand::new("leave").description("Leave the voice channel and clear the queue")
}

fn help_command() -> CreateCommand {
    CreateCommand::new("help").description("List the available commands")
}
