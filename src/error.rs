use thiserror::Error;

/// Failure reasons returned by the music core.
///
/// Every variant is local to one guild and one command: none of them stop the
/// bot or touch another guild's state.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum MusicError {
    #[error("You need to be in a voice channel to use music commands!")]
    NotInVoiceChannel,

    #[error("I'm not currently in a voice channel!")]
    NotConnected,

    #[error("There's nothing currently playing!")]
    NothingPlaying,

    #[error("There's nothing currently paused to resume!")]
    NothingPaused,

    #[error("The music queue is currently empty!")]
    QueueEmpty,

    #[error("The queue is full (max {0} songs)")]
    QueueFull(usize),

    #[error("Please provide a song name or URL to play!")]
    EmptyQuery,

    #[error("Couldn't connect to the voice channel: {0}")]
    Transport(String),

    #[error("Failed to load song: {0}")]
    Resolution(String),

    #[error("Failed to start playing: {0}")]
    Playback(String),

    #[error("The player for this server has shut down")]
    PlayerClosed,
}

/// Failure classes; they decide how a failure is reported, never whether it is retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Precondition,
    Transport,
    Resolution,
    Playback,
}

impl MusicError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MusicError::Transport(_) => ErrorKind::Transport,
            MusicError::Resolution(_) => ErrorKind::Resolution,
            MusicError::Playback(_) | MusicError::PlayerClosed => ErrorKind::Playback,
            _ => ErrorKind::Precondition,
        }
    }

    /// Short heading used when the error is rendered to users.
    pub fn title(&self) -> &'static str {
        match self {
            MusicError::NotInVoiceChannel => "Voice Channel Required",
            MusicError::NotConnected => "Not Connected",
            MusicError::NothingPlaying => "Nothing Playing",
            MusicError::NothingPaused => "Nothing Paused",
            MusicError::QueueEmpty => "Queue Empty",
            MusicError::QueueFull(_) => "Queue Full",
            MusicError::EmptyQuery => "Search Required",
            MusicError::Transport(_) => "Connection Failed",
            MusicError::Resolution(_) => "Song Load Error",
            MusicError::Playback(_) | MusicError::PlayerClosed => "Playback Error",
        }
    }
}
