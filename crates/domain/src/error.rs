/// Shared error type used across all herald crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config: {0}")]
    Config(String),

    #[error("transport: {0}")]
    Transport(String),

    #[error("store: {0}")]
    Store(String),

    #[error("identity: {0}")]
    Identity(String),

    #[error("plugin {plugin}: {message}")]
    Plugin { plugin: String, message: String },

    #[error("scheduler: {0}")]
    Scheduler(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("not connected")]
    NotConnected,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error is a transport-level decryption failure.
    ///
    /// Such errors are expected noise on a multi-device network (stale
    /// sender keys, replayed frames) and are logged at warning level
    /// instead of being escalated.
    pub fn is_decrypt_noise(&self) -> bool {
        let msg = self.to_string();
        msg.contains("Bad MAC") || msg.contains("Failed to decrypt")
    }
}

pub type Result<T> = std::result::Result<T, Error>;
