use anyhow::{Context, Result};
use std::{path::PathBuf, str::FromStr, time::Duration};

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub owner_id: Option<u64>,
    pub guild_id: Option<u64>, // Development guild for slash commands
    pub command_prefix: String,

    // Audio
    pub default_volume: f32,
    pub max_queue_size: usize,
    pub playback_start_retries: u32,
    pub retry_backoff_ms: u64,

    // Voice
    pub idle_timeout_secs: u64,

    // yt-dlp
    pub ytdlp_path: String,
    pub allow_download: bool,
    pub download_dir: PathBuf,
    pub max_concurrent_resolves: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Configuration for `--health-check`. Only the tool paths are read, so
    /// it works without a Discord token.
    pub fn load_for_health_check() -> Self {
        dotenvy::dotenv().ok();
        Self::tools_from_lookup(|key| std::env::var(key).ok())
    }

    fn tools_from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        Self {
            ytdlp_path: lookup("YTDLP_PATH")
                .filter(|v| !v.trim().is_empty())
                .unwrap_or(defaults.ytdlp_path.clone()),
            ..defaults
        }
    }

    /// Builds the configuration from any key lookup, falling back to the
    /// defaults for keys that are missing or blank.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();

        let config = Self {
            // Discord
            discord_token: get("DISCORD_TOKEN").context("DISCORD_TOKEN is not set")?,
            owner_id: parse_optional(&get, "OWNER_ID")?,
            guild_id: parse_optional(&get, "GUILD_ID")?,
            command_prefix: get("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            // Audio
            default_volume: parse_or(&get, "DEFAULT_VOLUME", defaults.default_volume)?,
            max_queue_size: parse_or(&get, "MAX_QUEUE_SIZE", defaults.max_queue_size)?,
            playback_start_retries: parse_or(
                &get,
                "PLAYBACK_START_RETRIES",
                defaults.playback_start_retries,
            )?,
            retry_backoff_ms: parse_or(&get, "RETRY_BACKOFF_MS", defaults.retry_backoff_ms)?,

            idle_timeout_secs: parse_or(&get, "IDLE_TIMEOUT_SECS", defaults.idle_timeout_secs)?,

            // yt-dlp
            ytdlp_path: get("YTDLP_PATH").unwrap_or(defaults.ytdlp_path),
            allow_download: parse_or(&get, "ALLOW_DOWNLOAD", defaults.allow_download)?,
            download_dir: get("DOWNLOAD_DIR").map(PathBuf::from).unwrap_or(defaults.download_dir),
            max_concurrent_resolves: parse_or(
                &get,
                "MAX_CONCURRENT_RESOLVES",
                defaults.max_concurrent_resolves,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates configuration values for correctness.
    ///
    /// - Volume must be between 0.0 and 1.0
    /// - Queue size, resolver concurrency and the idle timeout must be greater than 0
    /// - The command prefix must not be empty
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 1.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        if self.max_concurrent_resolves == 0 {
            anyhow::bail!("Max concurrent resolves must be greater than 0");
        }

        if self.idle_timeout_secs == 0 {
            anyhow::bail!("Idle timeout must be greater than 0 seconds");
        }

        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("Command prefix cannot be empty");
        }

        Ok(())
    }

    /// Creates the download directory when downloads are enabled.
    pub fn prepare_dirs(&self) -> Result<()> {
        if self.allow_download {
            std::fs::create_dir_all(&self.download_dir)
                .with_context(|| format!("cannot create {}", self.download_dir.display()))?;
        }
        Ok(())
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Returns a summary of the current configuration for logging. The token
    /// is never included.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: prefix '{}' (commands: {}, owner: {})\n  \
            Audio: {}% vol, {} queue, {} start retries every {}ms\n  \
            Voice: leave after {}s alone\n  \
            yt-dlp: '{}' (download: {}, {} concurrent)",
            self.command_prefix,
            self.guild_id.map_or("global".to_string(), |id| format!("guild {id}")),
            self.owner_id.map_or("none".to_string(), |id| id.to_string()),
            (self.default_volume * 100.0).round() as u32,
            self.max_queue_size,
            self.playback_start_retries,
            self.retry_backoff_ms,
            self.idle_timeout_secs,
            self.ytdlp_path,
            self.allow_download,
            self.max_concurrent_resolves,
        )
    }
}

fn parse_or<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {key}: {raw:?}")),
        None => Ok(default),
    }
}

fn parse_optional<T>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    get(key)
        .map(|raw| {
            raw.trim()
                .parse()
                .with_context(|| format!("invalid value for {key}: {raw:?}"))
        })
        .transpose()
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (token has no default - must be provided)
            discord_token: String::new(),
            owner_id: None,
            guild_id: None,
            command_prefix: "!".to_string(),

            default_volume: 0.5,
            max_queue_size: 1000,
            playback_start_retries: 2,
            retry_backoff_ms: 1000,

            idle_timeout_secs: 30,

            ytdlp_path: "yt-dlp".to_string(),
            allow_download: false,
            download_dir: "./downloads".into(),
            max_concurrent_resolves: 3,
        }
    }
}
