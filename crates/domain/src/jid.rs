//! Canonical identity type for network endpoints.
//!
//! Every identity on the wire is `local@server`, optionally carrying a
//! device suffix (`local:device@server`) or arriving as an opaque
//! surrogate (`NNN@lid`). The canonical individual form — a purely
//! numeric local part on the individual server — is the only form
//! written to the store or used for comparisons.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Individual-endpoint domain suffix.
pub const SERVER_USER: &str = "s.whatsapp.net";
/// Group-endpoint domain suffix.
pub const SERVER_GROUP: &str = "g.us";
/// Surrogate-key domain used by the transport for group members.
pub const SERVER_LID: &str = "lid";
/// The status-broadcast pseudo endpoint.
pub const SERVER_BROADCAST: &str = "broadcast";

/// A parsed network identity.
///
/// Value equality is over `(local, device, server)`; two identities that
/// differ only in device suffix are *not* equal — strip the suffix via
/// [`Jid::to_canonical`] before comparing stored identities.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Jid {
    local: String,
    device: Option<u16>,
    server: String,
}

impl Jid {
    /// Build an individual-endpoint identity from a bare phone number.
    /// Non-digit characters are stripped.
    pub fn from_digits(digits: &str) -> Self {
        let local: String = digits.chars().filter(|c| c.is_ascii_digit()).collect();
        Self {
            local,
            device: None,
            server: SERVER_USER.to_string(),
        }
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn device(&self) -> Option<u16> {
        self.device
    }

    pub fn is_user(&self) -> bool {
        self.server == SERVER_USER
    }

    pub fn is_group(&self) -> bool {
        self.server == SERVER_GROUP
    }

    /// Surrogate group-member identity that still needs resolution.
    pub fn is_surrogate(&self) -> bool {
        self.server == SERVER_LID
    }

    pub fn is_status_broadcast(&self) -> bool {
        self.server == SERVER_BROADCAST && self.local == "status"
    }

    /// Strip any device suffix. Identity of the result equals identity of
    /// the sending account.
    pub fn to_canonical(&self) -> Jid {
        Jid {
            local: self.local.clone(),
            device: None,
            server: self.server.clone(),
        }
    }

    /// Whether this is the canonical individual form: individual server,
    /// purely numeric local part, no device suffix.
    pub fn is_canonical_user(&self) -> bool {
        self.is_user()
            && self.device.is_none()
            && !self.local.is_empty()
            && self.local.chars().all(|c| c.is_ascii_digit())
    }
}

impl FromStr for Jid {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (local_part, server) = s
            .rsplit_once('@')
            .ok_or_else(|| Error::Identity(format!("missing server suffix: {s:?}")))?;
        if local_part.is_empty() || server.is_empty() {
            return Err(Error::Identity(format!("empty component: {s:?}")));
        }
        let (local, device) = match local_part.split_once(':') {
            Some((l, d)) => {
                let dev = d
                    .parse::<u16>()
                    .map_err(|_| Error::Identity(format!("bad device suffix: {s:?}")))?;
                (l.to_string(), Some(dev))
            }
            None => (local_part.to_string(), None),
        };
        Ok(Jid {
            local,
            device,
            server: server.to_string(),
        })
    }
}

impl fmt::Display for Jid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.device {
            Some(d) => write!(f, "{}:{}@{}", self.local, d, self.server),
            None => write!(f, "{}@{}", self.local, self.server),
        }
    }
}

impl TryFrom<String> for Jid {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Jid> for String {
    fn from(jid: Jid) -> String {
        jid.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_plain_user() {
        let jid: Jid = "2348012345678@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.local(), "2348012345678");
        assert!(jid.is_user());
        assert!(jid.is_canonical_user());
        assert!(!jid.is_group());
    }

    #[test]
    fn parse_device_suffix() {
        let jid: Jid = "2348012345678:12@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.device(), Some(12));
        assert!(!jid.is_canonical_user());
        let canonical = jid.to_canonical();
        assert!(canonical.is_canonical_user());
        assert_eq!(canonical.to_string(), "2348012345678@s.whatsapp.net");
    }

    #[test]
    fn parse_group() {
        let jid: Jid = "120363041234567890@g.us".parse().unwrap();
        assert!(jid.is_group());
        assert!(!jid.is_user());
    }

    #[test]
    fn parse_surrogate() {
        let jid: Jid = "98765432101@lid".parse().unwrap();
        assert!(jid.is_surrogate());
        assert!(!jid.is_canonical_user());
    }

    #[test]
    fn status_broadcast() {
        let jid: Jid = "status@broadcast".parse().unwrap();
        assert!(jid.is_status_broadcast());
    }

    #[test]
    fn from_digits_strips_nondigits() {
        let jid = Jid::from_digits("+234 801 234-5678");
        assert_eq!(jid.to_string(), "2348012345678@s.whatsapp.net");
        assert!(jid.is_canonical_user());
    }

    #[test]
    fn reject_malformed() {
        assert!("no-at-sign".parse::<Jid>().is_err());
        assert!("@s.whatsapp.net".parse::<Jid>().is_err());
        assert!("123@".parse::<Jid>().is_err());
        assert!("123:x@s.whatsapp.net".parse::<Jid>().is_err());
    }

    #[test]
    fn serde_roundtrip() {
        let jid: Jid = "2348012345678@s.whatsapp.net".parse().unwrap();
        let json = serde_json::to_string(&jid).unwrap();
        assert_eq!(json, "\"2348012345678@s.whatsapp.net\"");
        let back: Jid = serde_json::from_str(&json).unwrap();
        assert_eq!(back, jid);
    }

    #[test]
    fn canonical_is_idempotent() {
        let jid: Jid = "2348012345678:3@s.whatsapp.net".parse().unwrap();
        assert_eq!(jid.to_canonical(), jid.to_canonical().to_canonical());
    }
}
