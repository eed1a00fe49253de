//! Transport backend selection.
//!
//! The wire protocol itself lives in an external library; a deployment
//! links its adapter in through this seam. The `memory` backend is a
//! loopback for local development: it authenticates instantly against an
//! in-memory transport so the control plane, scheduler, and plugin
//! lifecycle can be exercised without network access.

use std::sync::Arc;

use herald_domain::{Config, Error, Result};
use herald_transport::mock::{MockConnector, MockTransport};
use herald_transport::{Connector, TransportEvent};

const BACKEND_ENV: &str = "HERALD_BACKEND";

pub fn connector(config: &Config) -> Result<Arc<dyn Connector>> {
    let backend = std::env::var(BACKEND_ENV).unwrap_or_default();
    match backend.as_str() {
        "memory" => {
            tracing::warn!("memory transport backend selected: no network traffic will flow");
            Ok(memory_backend(config))
        }
        "" => Err(Error::Config(format!(
            "no transport backend selected; set {BACKEND_ENV} (e.g. {BACKEND_ENV}=memory for a \
             local loopback) or build with a wire-protocol adapter"
        ))),
        other => Err(Error::Config(format!(
            "unknown transport backend {other:?}"
        ))),
    }
}

/// A loopback session that opens immediately and syncs an empty chat
/// list. Events injected later (none, in production use) would flow the
/// same way real ones do.
fn memory_backend(config: &Config) -> Arc<dyn Connector> {
    let transport = MockTransport::new();
    transport.set_user(config.owner_jid());
    let (connector, handle) = MockConnector::new(transport);
    tokio::spawn(async move {
        // Complete the open handshake for every (re)connect.
        let mut opened_for = 0;
        loop {
            tokio::time::sleep(std::time::Duration::from_millis(200)).await;
            let connects = handle.connect_count();
            if connects > opened_for && handle.emit(TransportEvent::Open).await {
                let _ = handle.emit(TransportEvent::ChatsSynced).await;
                opened_for = connects;
            }
        }
    });
    Arc::new(connector)
}
