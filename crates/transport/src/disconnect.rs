//! Classified disconnect causes.
//!
//! The library reports a numeric status code when the socket closes; the
//! supervisor only ever sees the classified form.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DisconnectReason {
    BadSession,
    ConnectionClosed,
    ConnectionLost,
    ConnectionReplaced,
    LoggedOut,
    RestartRequired,
    TimedOut,
    Unknown,
}

impl DisconnectReason {
    /// Map the library's close status code to a cause.
    pub fn from_status_code(code: u16) -> Self {
        match code {
            500 => Self::BadSession,
            428 => Self::ConnectionClosed,
            408 => Self::ConnectionLost,
            440 => Self::ConnectionReplaced,
            401 => Self::LoggedOut,
            515 => Self::RestartRequired,
            503 => Self::TimedOut,
            _ => Self::Unknown,
        }
    }

    /// Whether this cause invalidates the stored credentials.
    pub fn requires_credential_wipe(&self) -> bool {
        matches!(self, Self::BadSession | Self::LoggedOut)
    }
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::BadSession => "badSession",
            Self::ConnectionClosed => "connectionClosed",
            Self::ConnectionLost => "connectionLost",
            Self::ConnectionReplaced => "connectionReplaced",
            Self::LoggedOut => "loggedOut",
            Self::RestartRequired => "restartRequired",
            Self::TimedOut => "timedOut",
            Self::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_code_mapping() {
        assert_eq!(DisconnectReason::from_status_code(401), DisconnectReason::LoggedOut);
        assert_eq!(DisconnectReason::from_status_code(440), DisconnectReason::ConnectionReplaced);
        assert_eq!(DisconnectReason::from_status_code(999), DisconnectReason::Unknown);
    }

    #[test]
    fn wipe_policy() {
        assert!(DisconnectReason::BadSession.requires_credential_wipe());
        assert!(DisconnectReason::LoggedOut.requires_credential_wipe());
        assert!(!DisconnectReason::ConnectionLost.requires_credential_wipe());
        assert!(!DisconnectReason::Unknown.requires_credential_wipe());
    }
}
