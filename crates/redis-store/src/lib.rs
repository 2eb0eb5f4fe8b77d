//! Redis driver for the loadgen client facade.
//!
//! Each [`RedisStoreClient`] handle owns a small pool of synchronous
//! connections so worker threads sharing the handle never block on each
//! other's round trips.

mod client;
mod connection;
mod error;

use std::sync::Arc;
use std::time::{Duration, Instant};

use loadgen_core::{ClientError, ConnectionConfig, ConnectionEvents, Reply, StoreClient};

pub use client::{RedisClientFactory, RedisStoreClient, RedisSubscription};
pub use connection::{connection_url, redacted_url};
pub use error::map_error;

/// Result of a connectivity check.
#[derive(Debug, Clone)]
pub struct ServerProbe {
    pub url: String,
    pub ping: Duration,
    pub server_version: Option<String>,
}

struct NoEvents;

impl ConnectionEvents for NoEvents {
    fn on_connect(&self, _success: bool) {}

    fn on_reconnect(&self, _duration: Duration) {}
}

/// Connect once, PING and read the server version from `INFO server`.
pub fn probe(config: &ConnectionConfig) -> Result<ServerProbe, ClientError> {
    let client = RedisStoreClient::connect(config, Arc::new(NoEvents))?;

    let start = Instant::now();
    client.ping()?;
    let ping = start.elapsed();

    let info = client.execute(&loadgen_core::Command::new(
        "INFO",
        vec![bytes::Bytes::from_static(b"server")],
    ))?;
    client.close()?;

    Ok(ServerProbe {
        url: redacted_url(config),
        ping,
        server_version: server_version(&info),
    })
}

fn server_version(info: &Reply) -> Option<String> {
    let text = match info {
        Reply::Data(data) => std::str::from_utf8(data).ok()?,
        Reply::Status(status) => status.as_str(),
        _ => return None,
    };
    text.lines()
        .find_map(|line| line.strip_prefix("redis_version:"))
        .map(|v| v.trim().to_string())
}
