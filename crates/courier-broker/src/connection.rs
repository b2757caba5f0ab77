//! Broker connection helpers.
//!
//! Each pipeline component owns its own connection; connections are never
//! shared across concurrency domains.

use lapin::{Connection, ConnectionProperties};
use tracing::debug;

use courier_common::{CourierError, CourierResult};

/// Open a connection to the broker.
pub async fn connect(url: &str) -> CourierResult<Connection> {
    let connection = Connection::connect(url, ConnectionProperties::default())
        .await
        .map_err(|e| CourierError::BrokerUnavailable(e.to_string()))?;
    debug!("broker connection established");
    Ok(connection)
}

/// Close a connection, logging failures instead of surfacing them.
pub async fn close(connection: &Connection) {
    if let Err(err) = connection.close(200, "shutdown").await {
        tracing::warn!(error = %err, "failed to close broker connection");
    }
}
