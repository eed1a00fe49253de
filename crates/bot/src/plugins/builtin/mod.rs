//! Compiled-in plugin units.
//!
//! `all()` is the build-time registration list the registry discovers
//! against. Order matters: it is the registration order used for
//! duplicate resolution and lifecycle hooks.

mod hello;
mod help;
mod manage;
mod ping;

use std::sync::Arc;

use super::Plugin;

pub fn all() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(help::HelpPlugin),
        Arc::new(ping::PingPlugin),
        Arc::new(manage::ManagePlugin),
        // The sample unit ships last; its duplicate `help` command is
        // rejected by first-registered-wins.
        Arc::new(hello::HelloPlugin),
    ]
}
