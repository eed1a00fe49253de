//! Document-store access.
//!
//! Four unique-indexed collections back the bot's durable state:
//! `admins` and `bans` (one document per canonical identity), `settings`
//! (keyed documents, currently just the bot mode), and `jobs` (durable
//! scheduled-job records written by plugins). Everything else the bot
//! keeps is in-process.

mod db;
mod records;

pub use db::Store;
pub use records::{JobRecord, SettingDoc};
