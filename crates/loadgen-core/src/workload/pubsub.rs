use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::single::execute_keyed;
use super::{Generator, Workload};
use crate::client::StoreClient;
use crate::error::{ClientError, ClientErrorKind};
use crate::metrics::{MetricsCollector, OperationRecord};
use crate::operation::Operation;
use crate::shutdown::{join_with_timeout, CancellationToken};
use crate::telemetry::PubSubDirection;

const POLL_TIMEOUT: Duration = Duration::from_millis(500);
const SUBSCRIBER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// PUBLISH to a random channel, or make sure this instance's background
/// subscriber is running.
pub struct PubSubWorkload {
    channels: Arc<Vec<String>>,
    generator: Generator,
    client: Arc<dyn StoreClient>,
    metrics: Arc<MetricsCollector>,
    token: CancellationToken,
    subscriber_id: String,
    subscriber: Option<JoinHandle<()>>,
    /// Why the last subscriber exited, if it failed.
    exit_error: Arc<Mutex<Option<ClientError>>>,
    stop: Arc<AtomicBool>,
    starts: usize,
}

impl PubSubWorkload {
    pub(crate) fn new(
        channels: Vec<String>,
        generator: Generator,
        client: Arc<dyn StoreClient>,
        metrics: Arc<MetricsCollector>,
        token: CancellationToken,
    ) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        Self {
            channels: Arc::new(channels),
            generator,
            client,
            metrics,
            token,
            subscriber_id: format!("subscriber_{}", &id[..8]),
            subscriber: None,
            exit_error: Arc::new(Mutex::new(None)),
            stop: Arc::new(AtomicBool::new(false)),
            starts: 0,
        }
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// How many subscriber threads this instance has started.
    pub fn subscriber_starts(&self) -> usize {
        self.starts
    }

    fn publish(&mut self) -> u64 {
        let g = &mut self.generator;
        let channel = &self.channels[g.rng.gen_range(0..self.channels.len())];
        let payload = g.values.pick(&mut g.rng);

        let start = Instant::now();
        let result = self.client.publish(channel, payload);
        let elapsed = start.elapsed();
        match result {
            Ok(_) => {
                self.metrics.record(OperationRecord::success(Operation::Publish, elapsed));
                self.metrics
                    .record_pubsub(channel, PubSubDirection::Publish, None, true);
                1
            }
            Err(e) => {
                self.metrics
                    .record(OperationRecord::failure(Operation::Publish, elapsed, &e));
                self.metrics
                    .record_pubsub(channel, PubSubDirection::Publish, None, false);
                warn!(channel = %channel, error = %e, "Publish failed");
                0
            }
        }
    }

    /// Start the subscriber unless one is already running. A subscriber
    /// that died on an error is reported once as that error, so the worker
    /// backs off before the next pick restarts it.
    fn ensure_subscriber(&mut self) -> Result<(), ClientError> {
        if let Some(handle) = &self.subscriber {
            if !handle.is_finished() {
                return Ok(());
            }
        }
        if let Some(finished) = self.subscriber.take() {
            if finished.join().is_err() {
                warn!(subscriber_id = %self.subscriber_id, "Subscriber thread panicked");
            }
            if let Some(e) = self.exit_error.lock().take() {
                return Err(e);
            }
        }

        let subscriber = Subscriber {
            client: Arc::clone(&self.client),
            channels: Arc::clone(&self.channels),
            metrics: Arc::clone(&self.metrics),
            id: self.subscriber_id.clone(),
            exit_error: Arc::clone(&self.exit_error),
            stop: Arc::clone(&self.stop),
            token: self.token.clone(),
        };
        let handle = thread::Builder::new()
            .name(self.subscriber_id.clone())
            .spawn(move || subscriber.run())
            .map_err(|e| {
                ClientError::new(
                    ClientErrorKind::Other,
                    format!("failed to spawn subscriber thread: {}", e),
                )
            })?;
        self.subscriber = Some(handle);
        self.starts += 1;
        debug!(subscriber_id = %self.subscriber_id, "Subscriber started");
        Ok(())
    }
}

impl Workload for PubSubWorkload {
    fn execute(&mut self) -> Result<u64, ClientError> {
        let op = self.generator.selector.pick(&mut self.generator.rng);
        match op {
            Operation::Publish => Ok(self.publish()),
            Operation::Subscribe => {
                self.ensure_subscriber()?;
                Ok(1)
            }
            keyed => Ok(execute_keyed(
                keyed,
                &mut self.generator,
                self.client.as_ref(),
                &self.metrics,
            )),
        }
    }

    fn cleanup(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.subscriber.take() {
            if join_with_timeout(handle, SUBSCRIBER_JOIN_TIMEOUT).is_err() {
                warn!(
                    subscriber_id = %self.subscriber_id,
                    "Subscriber did not stop in time; detaching"
                );
            }
        }
    }

    fn name(&self) -> &'static str {
        "pubsub"
    }
}

impl Drop for PubSubWorkload {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

struct Subscriber {
    client: Arc<dyn StoreClient>,
    channels: Arc<Vec<String>>,
    metrics: Arc<MetricsCollector>,
    id: String,
    exit_error: Arc<Mutex<Option<ClientError>>>,
    stop: Arc<AtomicBool>,
    token: CancellationToken,
}

impl Subscriber {
    fn stopping(&self) -> bool {
        self.stop.load(Ordering::Acquire) || self.token.is_cancelled()
    }

    fn fallback_channel(&self) -> &str {
        self.channels.first().map(String::as_str).unwrap_or("unknown")
    }

    fn run(self) {
        let mut subscription = match self.client.subscribe(&self.channels) {
            Ok(subscription) => subscription,
            Err(e) => {
                if !self.stopping() {
                    error!(subscriber_id = %self.id, error = %e, "Subscribe failed");
                    self.metrics.record_pubsub(
                        self.fallback_channel(),
                        PubSubDirection::Receive,
                        Some(&self.id),
                        false,
                    );
                    *self.exit_error.lock() = Some(e);
                }
                return;
            }
        };

        while !self.stopping() {
            match subscription.poll(POLL_TIMEOUT) {
                Ok(Some(message)) => {
                    self.metrics.record_pubsub(
                        &message.channel,
                        PubSubDirection::Receive,
                        Some(&self.id),
                        true,
                    );
                }
                Ok(None) => {}
                Err(e) => {
                    if !self.stopping() {
                        self.metrics.record_pubsub(
                            self.fallback_channel(),
                            PubSubDirection::Receive,
                            Some(&self.id),
                            false,
                        );
                        debug!(subscriber_id = %self.id, error = %e, "Subscriber stopped on error");
                        *self.exit_error.lock() = Some(e);
                    }
                    break;
                }
            }
        }

        if let Err(e) = subscription.close() {
            debug!(subscriber_id = %self.id, error = %e, "Error closing subscription");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ValueSize, WorkloadKind, WorkloadSpec};
    use crate::memory::{MemoryClientFactory, MemoryOptions};
    use crate::shutdown::StopReason;
    use crate::telemetry::Telemetry;
    use crate::values::{KeyGenerator, ValuePool};
    use crate::workload::OperationSelector;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn workload(
        ops: Vec<Operation>,
        factory: &MemoryClientFactory,
        token: CancellationToken,
    ) -> (PubSubWorkload, Arc<MetricsCollector>) {
        let metrics = Arc::new(MetricsCollector::new(1_000, Telemetry::disabled()));
        let mut rng = StdRng::seed_from_u64(5);
        let values = Arc::new(ValuePool::build(&ValueSize::Fixed(8), 8, &mut rng));
        let generator = Generator {
            selector: OperationSelector::uniform(ops),
            keys: KeyGenerator::new("ps", 10),
            values,
            rng,
        };
        let w = PubSubWorkload::new(
            vec!["alpha".to_string(), "beta".to_string()],
            generator,
            factory.client(),
            metrics.clone(),
            token,
        );
        (w, metrics)
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    #[test]
    fn test_subscriber_id_format() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        let (w, _) = workload(vec![Operation::Subscribe], &factory, CancellationToken::new());
        let suffix = w.subscriber_id().strip_prefix("subscriber_").unwrap();
        assert_eq!(suffix.len(), 8);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_subscribe_is_idempotent() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        let (mut w, _) = workload(vec![Operation::Subscribe], &factory, CancellationToken::new());
        for _ in 0..25 {
            assert_eq!(w.execute().unwrap(), 1);
        }
        assert_eq!(w.subscriber_starts(), 1);
        assert!(wait_for(|| factory.subscriber_count() == 1));
        w.cleanup();
        assert!(wait_for(|| factory.subscriber_count() == 0));
    }

    #[test]
    fn test_failed_subscriber_is_reported_before_restart() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        factory.set_fail_commands(true);
        let (mut w, _) = workload(vec![Operation::Subscribe], &factory, CancellationToken::new());

        assert_eq!(w.execute().unwrap(), 1);
        assert!(wait_for(|| w.subscriber.as_ref().map_or(true, |h| h.is_finished())));

        // the dead subscriber surfaces its error instead of respawning
        let err = w.execute().unwrap_err();
        assert_eq!(err.kind, ClientErrorKind::Connection);
        assert_eq!(w.subscriber_starts(), 1);

        factory.set_fail_commands(false);
        assert_eq!(w.execute().unwrap(), 1);
        assert_eq!(w.subscriber_starts(), 2);
        assert!(wait_for(|| factory.subscriber_count() == 1));
        w.cleanup();
    }

    #[test]
    fn test_published_messages_are_received() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        let token = CancellationToken::new();
        let (mut subscriber, metrics) = workload(vec![Operation::Subscribe], &factory, token.clone());
        subscriber.execute().unwrap();
        assert!(wait_for(|| factory.subscriber_count() == 1));

        let (mut publisher, publisher_metrics) =
            workload(vec![Operation::Publish], &factory, token.clone());
        for _ in 0..10 {
            assert_eq!(publisher.execute().unwrap(), 1);
        }
        assert!(wait_for(|| metrics.snapshot_overall().pubsub.received == 10));

        let published = publisher_metrics.snapshot_overall();
        assert_eq!(published.pubsub.published, 10);
        assert_eq!(published.total_operations, 10);
        assert!(publisher_metrics.operation_stats(Operation::Publish).is_some());

        token.cancel(StopReason::Cancelled);
        let start = Instant::now();
        subscriber.cleanup();
        assert!(start.elapsed() < SUBSCRIBER_JOIN_TIMEOUT + Duration::from_secs(1));
    }

    #[test]
    fn test_pubsub_strategy_from_spec() {
        let spec = WorkloadSpec {
            kind: WorkloadKind::PubsubHeavy,
            ..WorkloadSpec::default()
        };
        assert_eq!(
            crate::workload::Strategy::resolve(&spec).unwrap(),
            crate::workload::Strategy::PubSub
        );
    }
}
