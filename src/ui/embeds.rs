use serenity::{
    all::{ChannelId, Colour, Mentionable, Timestamp},
    builder::{CreateEmbed, CreateEmbedFooter},
};

use crate::{
    audio::{
        player::{PlayOutcome, Skipped},
        queue::{QueueSnapshot, Track},
        voice::Connection,
    },
    bot::service::NowPlaying,
    error::{ErrorKind, MusicError},
};

/// Colors shared by every embed
pub mod colors {
    use serenity::all::Colour;

    pub const SUCCESS_GREEN: Colour = Colour::new(0x51cf66);
    pub const ERROR_RED: Colour = Colour::new(0xff6b6b);
    pub const WARNING_ORANGE: Colour = Colour::new(0xff8787);
    pub const PAUSE_YELLOW: Colour = Colour::new(0xffd43b);
    pub const INFO_BLUE: Colour = Colour::new(0x339af0);
    pub const LEAVE_ORANGE: Colour = Colour::new(0xffa94d);
    pub const ACCENT_CYAN: Colour = Colour::new(0x4ecdc4);
}

pub const QUEUE_PAGE_SIZE: usize = 10;
const TITLE_LIMIT: usize = 40;
const STANDARD_FOOTER: &str = "🎵 TuneQueue";

fn base(title: &str, color: Colour) -> CreateEmbed {
    CreateEmbed::default()
        .title(title)
        .color(color)
        .timestamp(Timestamp::now())
}

fn requested_by(track: &Track) -> String {
    format!("<@{}>", track.requested_by)
}

/// Error reply, colored by how the command failed.
pub fn error_embed(error: &MusicError) -> CreateEmbed {
    let color = match error.kind() {
        ErrorKind::Precondition => colors::WARNING_ORANGE,
        ErrorKind::Transport | ErrorKind::Resolution | ErrorKind::Playback => colors::ERROR_RED,
    };
    base(error.title(), color).description(error.to_string())
}

pub fn connection_embed(connection: Connection) -> CreateEmbed {
    match connection {
        Connection::AlreadyConnected(_) => base("Already Connected", colors::ACCENT_CYAN)
            .description("I'm already in your voice channel!"),
        Connection::Joined(channel) | Connection::Moved(channel) => {
            base("Voice Channel Joined", colors::SUCCESS_GREEN)
                .description(format!("Successfully connected to {}", channel.mention()))
        }
    }
}

/// Adds a note about the connection when a command had to join or move first.
pub fn with_connection(embed: CreateEmbed, connection: Connection) -> CreateEmbed {
    match connection {
        Connection::AlreadyConnected(_) => embed,
        Connection::Joined(channel) => embed.field("🔊 Joined", channel.mention().to_string(), true),
        Connection::Moved(channel) => embed.field("🔀 Moved to", channel.mention().to_string(), true),
    }
}

pub fn left_embed(channel: ChannelId) -> CreateEmbed {
    base("Voice Channel Left", colors::LEAVE_ORANGE)
        .description(format!("Successfully disconnected from {}", channel.mention()))
}

pub fn play_embed(outcome: &PlayOutcome) -> CreateEmbed {
    match outcome {
        PlayOutcome::Started(track) => track_embed("Now Playing", track, None),
        PlayOutcome::Retrying(track) => base("Starting Song", colors::PAUSE_YELLOW).description(format!(
            "**{}** could not start yet, trying again shortly",
            track.title
        )),
        PlayOutcome::Queued { track, position } => {
            let mut embed = base("Song Added to Queue", colors::SUCCESS_GREEN)
                .description(format!("**{}**", track.title))
                .field("Position in Queue", format!("#{position}"), true)
                .field("Requested by", requested_by(track), true);
            if let Some(thumbnail) = &track.thumbnail {
                embed = embed.thumbnail(thumbnail);
            }
            embed
        }
    }
}

pub fn now_playing_embed(now: &NowPlaying) -> CreateEmbed {
    let title = if now.paused { "Paused" } else { "Now Playing" };
    track_embed(title, &now.track, Some(now.pending))
}

fn track_embed(title: &str, track: &Track, pending: Option<usize>) -> CreateEmbed {
    let mut embed = base(title, colors::INFO_BLUE)
        .field("Title", format!("**[{}]({})**", track.title, track.source_url), false)
        .field("Requested by", requested_by(track), true);

    if track.duration_secs > 0 {
        embed = embed.field("Duration", format_duration(track.duration_secs), true);
    }

    embed = embed.field("Source", track.source_kind.as_str(), true);

    if let Some(pending) = pending.filter(|p| *p > 0) {
        embed = embed.field("Songs in Queue", pending.to_string(), true);
    }

    if let Some(thumbnail) = &track.thumbnail {
        embed = embed.thumbnail(thumbnail);
    }

    embed.url(&track.source_url)
}

pub fn skipped_embed(skipped: &Skipped) -> CreateEmbed {
    let next = match &skipped.now_playing {
        Some(track) if skipped.retrying => format!("Starting **{}**, retrying shortly", track.title),
        Some(track) => format!("Up now: **{}**", track.title),
        None => "The queue is finished".to_string(),
    };
    base("Song Skipped", colors::SUCCESS_GREEN)
        .description(format!("Skipped **{}**\n{}", skipped.skipped.title, next))
}

pub fn paused_embed() -> CreateEmbed {
    base("Music Paused", colors::PAUSE_YELLOW).description("Playback has been paused")
}

pub fn resumed_embed() -> CreateEmbed {
    base("Music Resumed", colors::SUCCESS_GREEN).description("Playback has been resumed")
}

pub fn stopped_embed() -> CreateEmbed {
    base("Music Stopped", colors::ERROR_RED).description("Playback stopped and queue cleared")
}

pub fn shuffled_embed(count: usize) -> CreateEmbed {
    base("Queue Shuffled", colors::SUCCESS_GREEN)
        .description(format!("Successfully shuffled **{count}** songs in the queue"))
}

/// One page of the queue, or a notice when it is empty.
pub fn queue_embed(snapshot: &QueueSnapshot, page: usize) -> CreateEmbed {
    if snapshot.current.is_none() && snapshot.pending.is_empty() {
        return base("Queue Empty", colors::WARNING_ORANGE)
            .description("The music queue is currently empty!");
    }

    let mut embed = base("Music Queue", colors::INFO_BLUE);

    if let Some(current) = &snapshot.current {
        embed = embed.field(
            "Now Playing",
            format!(
                "**[{}]({})**\nRequested by: {}",
                current.title,
                current.source_url,
                requested_by(current)
            ),
            false,
        );
    }

    match queue_listing(snapshot, page) {
        Some((listing, footer)) => embed
            .field("Up Next", listing, false)
            .footer(CreateEmbedFooter::new(footer)),
        None => embed
            .field("Up Next", "Queue is empty", false)
            .footer(CreateEmbedFooter::new(STANDARD_FOOTER)),
    }
}

/// Text of the "Up Next" field and the footer, or `None` when nothing is pending.
fn queue_listing(snapshot: &QueueSnapshot, page: usize) -> Option<(String, String)> {
    if snapshot.pending.is_empty() {
        return None;
    }

    let queue_page = snapshot.page(page, QUEUE_PAGE_SIZE);
    let mut listing = String::new();

    for (i, track) in queue_page.items.iter().enumerate() {
        let duration = if track.duration_secs > 0 {
            format_duration(track.duration_secs)
        } else {
            "Unknown".to_string()
        };
        listing.push_str(&format!(
            "`{}.` **{}** `[{}]`\n",
            queue_page.first_position + i,
            truncate_title(&track.title, TITLE_LIMIT),
            duration
        ));
    }

    let shown_through = queue_page.first_position - 1 + queue_page.items.len();
    let remaining = snapshot.pending.len() - shown_through;
    if remaining > 0 {
        listing.push_str(&format!("... and **{remaining}** more songs"));
    }

    let mut footer = format!(
        "Total songs in queue: {} | Total duration: {}",
        snapshot.pending.len(),
        format_long_duration(snapshot.pending_duration_secs())
    );
    if queue_page.total_pages > 1 {
        footer.push_str(&format!(
            " | Page {} of {}",
            queue_page.current_page, queue_page.total_pages
        ));
    }

    Some((listing, footer))
}

pub fn volume_embed(volume: f32, changed: bool) -> CreateEmbed {
    let percent = (volume * 100.0).round() as u32;
    let emoji = match percent {
        0 => "🔈",
        1..=50 => "🔉",
        _ => "🔊",
    };
    let title = if changed { "Volume Changed" } else { "Current Volume" };

    base(&format!("{emoji} {title}"), colors::INFO_BLUE)
        .description(format!("**{percent}%**"))
        .field("Level", volume_bar(volume), false)
}

fn volume_bar(volume: f32) -> String {
    let segments = 20;
    let filled = ((volume.clamp(0.0, 1.0) * segments as f32).round() as usize).min(segments);
    format!("`[{}{}]`", "█".repeat(filled), "▒".repeat(segments - filled))
}

/// Command overview.
pub fn help_embed(prefix: &str) -> CreateEmbed {
    base("Music Bot Commands", colors::INFO_BLUE)
        .description("Every command also works as a slash command")
        .field(
            ">> Voice Commands",
            format!(
                "`{p}join` - Join your voice channel\n\
                `{p}leave` or `{p}disconnect` - Leave voice channel",
                p = prefix
            ),
            false,
        )
        .field(
            ">> Music Commands (Auto-joins your channel)",
            format!(
                "`{p}play <query>` or `{p}p <query>` - Play a song from YouTube or a link\n\
                `{p}pause` - Pause current song\n\
                `{p}resume` or `{p}unpause` - Resume paused song\n\
                `{p}skip` or `{p}s` - Skip current song\n\
                `{p}stop` - Stop playing and clear queue\n\
                `{p}volume [0-100]` - Show or change the volume",
                p = prefix
            ),
            false,
        )
        .field(
            ">> Queue Management",
            format!(
                "`{p}queue [page]` or `{p}q [page]` - Show current music queue\n\
                `{p}nowplaying` or `{p}np` - Show currently playing song\n\
                `{p}shuffle` - Shuffle the current queue",
                p = prefix
            ),
            false,
        )
        .field(
            ">> Additional Information",
            "**Music Sources:** YouTube links, direct links or search terms\n\
            **Auto-Features:** Auto-join voice channels, auto-leave when alone",
            false,
        )
        .footer(CreateEmbedFooter::new(format!(
            "Use the {prefix} prefix for all commands"
        )))
}

/// `m:ss`, or `h:mm:ss` past the hour.
pub fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{}:{:02}", minutes, seconds)
    }
}

fn format_long_duration(secs: u64) -> String {
    format!("{}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

/// Cuts `title` to `limit` characters, marking the cut with `...`.
pub fn truncate_title(title: &str, limit: usize) -> String {
    match title.char_indices().nth(limit) {
        Some((end, _)) => format!("{}...", &title[..end]),
        None => title.to_string(),
    }
}
