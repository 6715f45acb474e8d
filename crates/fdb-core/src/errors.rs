use crate::session::SessionState;

/// Core error type for the bridge.
///
/// Adapter crates map their specific errors into this type so startup can tell
/// fatal failures (auth, connection, config) apart from per-line noise.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("channel #{name} not found in guild {guild}")]
    ChannelNotFound { name: String, guild: u64 },

    #[error("invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition {
        from: SessionState,
        to: SessionState,
    },

    #[error("external error: {0}")]
    External(String),
}

pub type Result<T> = std::result::Result<T, Error>;
