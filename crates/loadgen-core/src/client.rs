//! Client access facade.
//!
//! The engine only talks to the store through these traits. Drivers own
//! connection establishment, retries and the wire protocol; a handle must be
//! safe to share between worker threads.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::ClientError;

/// A single keyed command: name plus raw arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub name: &'static str,
    pub args: Vec<Bytes>,
}

impl Command {
    pub fn new(name: &'static str, args: Vec<Bytes>) -> Self {
        Self { name, args }
    }

    /// Liveness probe.
    pub fn ping() -> Self {
        Self::new("PING", Vec::new())
    }
}

/// Store reply, reduced to what the engine needs to see.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Nil,
    Status(String),
    Int(i64),
    Data(Bytes),
    Array(Vec<Reply>),
}

/// A message delivered to a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub channel: String,
    pub payload: Bytes,
}

/// Shared handle to a store. Implementations must tolerate concurrent calls.
pub trait StoreClient: Send + Sync {
    fn execute(&self, command: &Command) -> Result<Reply, ClientError>;

    /// Start a batch. `transactional` wraps it in MULTI/EXEC.
    fn open_batch(&self, transactional: bool) -> Box<dyn Batch + '_>;

    /// Publish a payload; returns the number of receivers.
    fn publish(&self, channel: &str, payload: Bytes) -> Result<u64, ClientError>;

    fn subscribe(&self, channels: &[String]) -> Result<Box<dyn Subscription>, ClientError>;

    /// Release driver resources. Further calls fail with `ClientErrorKind::Closed`.
    fn close(&self) -> Result<(), ClientError>;

    fn ping(&self) -> Result<(), ClientError> {
        self.execute(&Command::ping()).map(|_| ())
    }
}

/// Commands queued for one round trip.
pub trait Batch {
    fn add(&mut self, command: Command);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn execute(self: Box<Self>) -> Result<Vec<Reply>, ClientError>;
}

/// A live subscription owned by one subscriber thread.
pub trait Subscription: Send {
    /// Wait up to `timeout` for the next message.
    fn poll(&mut self, timeout: Duration) -> Result<Option<Message>, ClientError>;

    fn close(&mut self) -> Result<(), ClientError>;
}

/// Callbacks drivers use to report connection lifecycle events.
pub trait ConnectionEvents: Send + Sync {
    fn on_connect(&self, success: bool);

    fn on_reconnect(&self, duration: Duration);
}

/// Creates client handles.
pub trait ClientFactory: Send + Sync {
    fn connect(
        &self,
        index: usize,
        events: Arc<dyn ConnectionEvents>,
    ) -> Result<Arc<dyn StoreClient>, ClientError>;

    fn name(&self) -> &'static str;
}

/// Fixed arena of client handles handed out round-robin.
pub struct ClientPool {
    clients: Vec<Arc<dyn StoreClient>>,
    next: AtomicUsize,
}

impl ClientPool {
    pub fn new(clients: Vec<Arc<dyn StoreClient>>) -> Self {
        Self {
            clients,
            next: AtomicUsize::new(0),
        }
    }

    /// Make one connection attempt per slot. Failed slots are logged, reported
    /// through `events` and skipped.
    pub fn connect_all(
        factory: &dyn ClientFactory,
        count: usize,
        events: Arc<dyn ConnectionEvents>,
    ) -> Self {
        let mut clients = Vec::with_capacity(count);
        for index in 0..count {
            match factory.connect(index, Arc::clone(&events)) {
                Ok(client) => {
                    events.on_connect(true);
                    debug!(index, driver = factory.name(), "Client handle created");
                    clients.push(client);
                }
                Err(e) => {
                    events.on_connect(false);
                    warn!(index, driver = factory.name(), error = %e, "Failed to create client handle");
                }
            }
        }
        info!(
            created = clients.len(),
            requested = count,
            driver = factory.name(),
            "Client pool ready"
        );
        Self::new(clients)
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Next handle in round-robin order.
    pub fn next(&self) -> Option<Arc<dyn StoreClient>> {
        if self.clients.is_empty() {
            return None;
        }
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        Some(Arc::clone(&self.clients[index]))
    }

    /// Close every handle; returns how many failed to close.
    pub fn close_all(&self) -> usize {
        let mut failures = 0;
        for (index, client) in self.clients.iter().enumerate() {
            if let Err(e) = client.close() {
                failures += 1;
                warn!(index, error = %e, "Error closing client handle");
            }
        }
        failures
    }
}
