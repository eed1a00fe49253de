//! Runtime configuration, derived from environment variables.
//!
//! Deployment targets for this bot are container platforms where env vars
//! are the only configuration surface, so there is no config file: every
//! knob is a variable, read once at startup. `Config::validate` returns
//! issues with a severity; any `Error`-severity issue is fatal.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Bot mode
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Who may invoke commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BotMode {
    /// Any user.
    Public,
    /// Owner and admins only.
    Private,
}

impl BotMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "public" => Some(Self::Public),
            "private" => Some(Self::Private),
            _ => None,
        }
    }
}

impl fmt::Display for BotMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Private => write!(f, "private"),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Bootstrap blob `label~base64(json)` for non-interactive auth.
    pub session_blob: Option<String>,
    /// Command prefix. Strict prefix match, no leading whitespace.
    pub prefix: String,
    pub bot_name: String,
    /// Owner's canonical local part (digits only).
    pub owner_number: String,
    /// Admin local parts from `ADMIN_NUMBERS` (comma separated).
    pub admin_numbers: Vec<String>,
    pub mode: BotMode,
    pub auto_bio: bool,
    pub auto_read: bool,
    pub auto_react: bool,
    pub auto_status_seen: bool,
    pub welcome: bool,
    pub antilink: bool,
    pub reject_call: bool,
    /// Control-plane HTTP port.
    pub port: u16,
    /// IANA timezone used for scheduled jobs and message templates.
    pub timezone: String,
    pub mongodb_uri: String,
    pub database_name: String,
    /// Directory of plugin manifests.
    pub plugin_dir: PathBuf,
    /// Directory holding the transport's credential files.
    pub state_dir: PathBuf,
    /// Fallback avatar for welcome/goodbye cards when a member has no
    /// profile picture.
    pub default_avatar_url: String,

    /// Parse-time problems (bad MODE value, etc.) surfaced by `validate`.
    #[serde(skip)]
    parse_issues: Vec<ConfigIssue>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            session_blob: None,
            prefix: ".".into(),
            bot_name: "Herald".into(),
            owner_number: String::new(),
            admin_numbers: Vec::new(),
            mode: BotMode::Public,
            auto_bio: false,
            auto_read: false,
            auto_react: false,
            auto_status_seen: false,
            welcome: true,
            antilink: false,
            reject_call: false,
            port: 3000,
            timezone: "Africa/Lagos".into(),
            mongodb_uri: "mongodb://localhost:27017".into(),
            database_name: "herald".into(),
            plugin_dir: PathBuf::from("plugins"),
            state_dir: PathBuf::from("state"),
            default_avatar_url: "https://i.ibb.co/3Fh9V6p/avatar.jpg".into(),
            parse_issues: Vec::new(),
        }
    }
}

impl Config {
    /// Read configuration from the process environment.
    pub fn from_env() -> Self {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Build from an explicit variable map (testable form of `from_env`).
    pub fn from_vars(vars: &HashMap<String, String>) -> Self {
        let get = |key: &str| vars.get(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let flag = |key: &str, default: bool| {
            get(key).map(|v| parse_bool(&v)).unwrap_or(default)
        };
        let defaults = Config::default();

        let mut parse_issues = Vec::new();
        if let Some(raw) = get("MODE") {
            if BotMode::parse(&raw).is_none() {
                parse_issues.push(ConfigIssue::error("MODE must be \"public\" or \"private\""));
            }
        }
        if let Some(raw) = get("PORT") {
            if raw.parse::<u16>().is_err() {
                parse_issues.push(ConfigIssue::error("PORT must be between 1 and 65535"));
            }
        }

        Self {
            session_blob: get("SESSION_ID"),
            prefix: get("PREFIX").unwrap_or(defaults.prefix),
            bot_name: get("BOT_NAME").unwrap_or(defaults.bot_name),
            owner_number: get("OWNER_NUMBER")
                .map(|v| digits_only(&v))
                .unwrap_or_default(),
            admin_numbers: get("ADMIN_NUMBERS")
                .map(|v| {
                    v.split(',')
                        .map(|s| digits_only(s.trim()))
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            mode: get("MODE")
                .and_then(|v| BotMode::parse(&v))
                .unwrap_or(defaults.mode),
            auto_bio: flag("AUTO_BIO", defaults.auto_bio),
            auto_read: flag("AUTO_READ", defaults.auto_read),
            auto_react: flag("AUTO_REACT", defaults.auto_react),
            auto_status_seen: flag("AUTO_STATUS_SEEN", defaults.auto_status_seen),
            welcome: flag("WELCOME", defaults.welcome),
            antilink: flag("ANTILINK", defaults.antilink),
            reject_call: flag("REJECT_CALL", defaults.reject_call),
            port: get("PORT")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.port),
            timezone: get("TIMEZONE").unwrap_or(defaults.timezone),
            mongodb_uri: get("MONGODB_URI").unwrap_or(defaults.mongodb_uri),
            database_name: get("DATABASE_NAME").unwrap_or(defaults.database_name),
            plugin_dir: get("PLUGIN_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.plugin_dir),
            state_dir: get("STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            default_avatar_url: get("DEFAULT_AVATAR_URL").unwrap_or(defaults.default_avatar_url),
            parse_issues,
        }
    }

    /// Validate the configuration. `Error`-severity issues are fatal.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = self.parse_issues.clone();

        if self.owner_number.is_empty() {
            issues.push(ConfigIssue::error(
                "OWNER_NUMBER is required (digits only, e.g. 2348012345678)",
            ));
        }

        // PORT parses into u16 already; zero is the one in-range value
        // that cannot be bound deliberately.
        if self.port == 0 {
            issues.push(ConfigIssue::error("PORT must be between 1 and 65535"));
        }

        if self.prefix.is_empty() {
            issues.push(ConfigIssue::warning("PREFIX is empty; every message parses as a command"));
        }
        if self.mongodb_uri.is_empty() {
            issues.push(ConfigIssue::warning(
                "MONGODB_URI not set; store-backed features will degrade",
            ));
        }

        issues
    }

    /// Owner identity in canonical individual form (`digits@server`).
    pub fn owner_jid(&self) -> crate::Jid {
        crate::Jid::from_digits(&self.owner_number)
    }
}

fn parse_bool(s: &str) -> bool {
    matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

fn digits_only(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    fn error(message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }

    fn warning(message: &str) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_applied() {
        let cfg = Config::from_vars(&vars(&[("OWNER_NUMBER", "111")]));
        assert_eq!(cfg.prefix, ".");
        assert_eq!(cfg.port, 3000);
        assert_eq!(cfg.timezone, "Africa/Lagos");
        assert_eq!(cfg.mode, BotMode::Public);
        assert!(cfg.welcome);
        assert!(!cfg.antilink);
    }

    #[test]
    fn owner_required() {
        let cfg = Config::from_vars(&vars(&[]));
        let issues = cfg.validate();
        assert!(issues
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("OWNER_NUMBER")));
    }

    #[test]
    fn owner_number_strips_formatting() {
        let cfg = Config::from_vars(&vars(&[("OWNER_NUMBER", "+234 801-234-5678")]));
        assert_eq!(cfg.owner_number, "2348012345678");
        assert!(cfg
            .validate()
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn admin_numbers_split_and_trimmed() {
        let cfg = Config::from_vars(&vars(&[
            ("OWNER_NUMBER", "111"),
            ("ADMIN_NUMBERS", " 222 , 333,, +44 4 "),
        ]));
        assert_eq!(cfg.admin_numbers, vec!["222", "333", "444"]);
    }

    #[test]
    fn bool_parsing() {
        let cfg = Config::from_vars(&vars(&[
            ("OWNER_NUMBER", "111"),
            ("AUTO_READ", "yes"),
            ("ANTILINK", "1"),
            ("WELCOME", "off"),
        ]));
        assert!(cfg.auto_read);
        assert!(cfg.antilink);
        assert!(!cfg.welcome);
    }

    #[test]
    fn invalid_port_falls_back_then_zero_rejected() {
        let cfg = Config::from_vars(&vars(&[("OWNER_NUMBER", "111"), ("PORT", "not-a-port")]));
        assert_eq!(cfg.port, 3000);

        let mut cfg = cfg;
        cfg.port = 0;
        assert!(cfg
            .validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error && i.message.contains("PORT")));
    }

    #[test]
    fn mode_parsing() {
        let cfg = Config::from_vars(&vars(&[("OWNER_NUMBER", "111"), ("MODE", "Private")]));
        assert_eq!(cfg.mode, BotMode::Private);
    }

    #[test]
    fn owner_jid_is_canonical() {
        let cfg = Config::from_vars(&vars(&[("OWNER_NUMBER", "111")]));
        assert!(cfg.owner_jid().is_canonical_user());
        assert_eq!(cfg.owner_jid().to_string(), "111@s.whatsapp.net");
    }
}
