pub mod config;
pub mod error;
pub mod jid;

pub use config::{BotMode, Config, ConfigIssue, ConfigSeverity};
pub use error::{Error, Result};
pub use jid::Jid;
