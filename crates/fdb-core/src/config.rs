use std::{
    env, fmt, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use clap::Parser;

use crate::{
    classifier::DEFAULT_MARKER,
    domain::{GuildId, StartPosition},
    errors::Error,
    relay::RelayConfig,
    Result,
};

pub const DEFAULT_TAG: &str = "[Factorio]";
pub const DEFAULT_CHANNEL: &str = "general";

/// Command line. Every flag can also come from the environment (or `.env`).
#[derive(Parser, Clone, Debug)]
#[command(
    name = "fdb",
    version,
    about = "Relay Factorio server chat into a Discord channel"
)]
pub struct Cli {
    /// Discord bot token.
    #[arg(short = 't', long = "token", env = "DISCORD_TOKEN", hide_env_values = true)]
    pub token: String,

    /// Factorio console log to follow.
    #[arg(short = 'l', long = "logfile", env = "FDB_LOGFILE")]
    pub logfile: PathBuf,

    /// Discord guild whose channels are searched for the destination.
    #[arg(short = 'g', long = "guild", env = "DISCORD_GUILD_ID")]
    pub guild: String,

    /// Name of the channel chat is relayed to.
    #[arg(short = 'c', long = "channel", env = "FDB_CHANNEL", default_value = DEFAULT_CHANNEL)]
    pub channel: String,

    /// Substring that marks a chat line in the log.
    #[arg(long, env = "FDB_MARKER", default_value = DEFAULT_MARKER)]
    pub marker: String,

    /// Prefix put in front of every relayed line.
    #[arg(long, env = "FDB_TAG", default_value = DEFAULT_TAG)]
    pub tag: String,

    /// Where to start reading: `start`, `end`, or a byte offset. An offset
    /// inside a line starts at the next line.
    #[arg(long, env = "FDB_START", default_value = "end")]
    pub start: String,

    /// How often the follower checks the file for new data.
    #[arg(long = "poll-ms", env = "FDB_POLL_MS", default_value_t = 250)]
    pub poll_ms: u64,

    /// Delay before retrying a failed relay send.
    #[arg(long = "retry-backoff-ms", env = "FDB_RETRY_BACKOFF_MS", default_value_t = 1000)]
    pub retry_backoff_ms: u64,

    /// How long shutdown waits for the relay loop before aborting it.
    #[arg(
        long = "shutdown-timeout-secs",
        env = "FDB_SHUTDOWN_TIMEOUT_SECS",
        default_value_t = 5
    )]
    pub shutdown_timeout_secs: u64,
}

/// Typed configuration, built once at startup and passed down.
#[derive(Clone)]
pub struct Config {
    pub discord_token: String,
    pub log_file: PathBuf,
    pub guild_id: GuildId,
    pub channel_name: String,
    pub marker: String,
    pub tag: String,
    pub start: StartPosition,
    pub poll_interval: Duration,
    pub retry_backoff: Duration,
    pub shutdown_timeout: Duration,
}

impl Config {
    /// Load `.env` (if present), parse the command line and validate.
    ///
    /// Command line errors exit the process with clap's usage message.
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_cli(Cli::parse())
    }

    pub fn from_cli(cli: Cli) -> Result<Self> {
        let discord_token = cli.token.trim().to_string();
        if discord_token.is_empty() {
            return Err(Error::Config("Discord bot token is required".to_string()));
        }

        let guild_id = cli
            .guild
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|id| *id != 0)
            .map(GuildId)
            .ok_or_else(|| {
                Error::Config(format!("invalid guild id {:?}", cli.guild))
            })?;

        if cli.logfile.as_os_str().is_empty() {
            return Err(Error::Config("log file path is required".to_string()));
        }
        if cli.channel.trim().is_empty() {
            return Err(Error::Config("channel name must not be empty".to_string()));
        }
        if cli.marker.is_empty() {
            return Err(Error::Config("marker must not be empty".to_string()));
        }
        if cli.poll_ms == 0 {
            return Err(Error::Config("poll interval must be positive".to_string()));
        }

        Ok(Self {
            discord_token,
            log_file: cli.logfile,
            guild_id,
            channel_name: cli.channel.trim().to_string(),
            marker: cli.marker,
            tag: cli.tag,
            start: cli.start.parse()?,
            poll_interval: Duration::from_millis(cli.poll_ms),
            retry_backoff: Duration::from_millis(cli.retry_backoff_ms),
            shutdown_timeout: Duration::from_secs(cli.shutdown_timeout_secs),
        })
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            marker: self.marker.clone(),
            tag: self.tag.clone(),
            retry_backoff: self.retry_backoff,
        }
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"<redacted>")
            .field("log_file", &self.log_file)
            .field("guild_id", &self.guild_id)
            .field("channel_name", &self.channel_name)
            .field("marker", &self.marker)
            .field("tag", &self.tag)
            .field("start", &self.start)
            .field("poll_interval", &self.poll_interval)
            .field("retry_backoff", &self.retry_backoff)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish()
    }
}

/// Export `KEY=value` pairs from `path` into the environment. Existing
/// variables win.
pub fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let line = line.strip_prefix("export ").unwrap_or(line);
        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() || env::var_os(key).is_some() {
            continue;
        }

        let mut val = v.trim().to_string();
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}
