//! # Audio Module
//!
//! Per-guild playback for the bot.
//!
//! ## Architecture
//!
//! ### [`queue`] - Queue Management
//! - FIFO of pending tracks plus the track currently playing
//! - Shuffle, clear and paged snapshots for the queue view
//!
//! ### [`player`] - Guild Players
//! - One task per guild owns its queue and playback state
//! - Track completions are tagged with a [`sink::PlaybackToken`] so a skip
//!   can never advance the queue twice
//! - Failed starts are retried a bounded number of times
//!
//! ### [`sink`] - Playback Backend
//! - Hands tracks to songbird and reports back when they end
//!
//! ### [`voice`] - Voice Sessions
//! - Joins, moves and leaves voice channels
//! - Leaves a channel after the bot has been alone in it for a while

pub mod player;
pub mod queue;
pub mod sink;
pub mod voice;

#[cfg(test)]
pub(crate) mod testing;
