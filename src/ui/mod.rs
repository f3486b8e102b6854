//! Discord-facing rendering of command results.

pub mod embeds;
