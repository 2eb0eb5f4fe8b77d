//! Key derivation and the shared pool of pre-generated payloads.
//!
//! Payloads are generated once per process before workers start and are
//! read without locking afterwards. Handing one out is a `Bytes` clone.

use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use rand::distributions::Alphanumeric;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info};

use crate::config::ValueSize;

/// Number of payloads in the process-wide pool.
pub const VALUE_POOL_SIZE: usize = 1000;

static GLOBAL_POOL: OnceLock<Arc<ValuePool>> = OnceLock::new();

/// Initialize the process-wide pool, or return the existing one.
///
/// Only the first call generates payloads; later calls return the same pool
/// regardless of the policy they pass.
pub fn init_global(policy: &ValueSize) -> Arc<ValuePool> {
    let pool = GLOBAL_POOL.get_or_init(|| {
        let mut rng = StdRng::from_entropy();
        let pool = ValuePool::build(policy, VALUE_POOL_SIZE, &mut rng);
        info!(
            entries = pool.len(),
            min_size = pool.min_size(),
            max_size = pool.max_size(),
            "Value pool initialized"
        );
        Arc::new(pool)
    });
    if pool.policy != *policy {
        debug!(requested = ?policy, active = ?pool.policy, "Value pool already initialized");
    }
    Arc::clone(pool)
}

/// Immutable set of random alphanumeric payloads.
#[derive(Debug)]
pub struct ValuePool {
    values: Vec<Bytes>,
    policy: ValueSize,
}

impl ValuePool {
    /// Generate `count` payloads sized according to `policy`.
    pub fn build<R: Rng + ?Sized>(policy: &ValueSize, count: usize, rng: &mut R) -> Self {
        let count = count.max(1);
        let values = (0..count)
            .map(|_| {
                let size = match *policy {
                    ValueSize::Fixed(size) => size,
                    ValueSize::Range { min, max } => rng.gen_range(min..=max),
                };
                let payload: Vec<u8> = (0..size).map(|_| rng.sample(Alphanumeric)).collect();
                Bytes::from(payload)
            })
            .collect();
        Self {
            values,
            policy: policy.clone(),
        }
    }

    /// Pick one payload uniformly at random.
    pub fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> Bytes {
        self.values[rng.gen_range(0..self.values.len())].clone()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn min_size(&self) -> usize {
        self.values.iter().map(Bytes::len).min().unwrap_or(0)
    }

    pub fn max_size(&self) -> usize {
        self.values.iter().map(Bytes::len).max().unwrap_or(0)
    }
}

/// Derives `prefix:id` keys for one workload instance.
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    prefix: String,
    key_range: u64,
    counter: u64,
}

impl KeyGenerator {
    /// `key_range == 0` switches to a strictly increasing counter, so keys
    /// never repeat within the instance.
    pub fn new(prefix: impl Into<String>, key_range: u64) -> Self {
        Self {
            prefix: prefix.into(),
            key_range,
            counter: 0,
        }
    }

    pub fn next_id<R: Rng + ?Sized>(&mut self, rng: &mut R) -> u64 {
        if self.key_range > 0 {
            rng.gen_range(0..self.key_range)
        } else {
            let id = self.counter;
            self.counter += 1;
            id
        }
    }

    pub fn next_key<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Bytes {
        let id = self.next_id(rng);
        Bytes::from(format!("{}:{}", self.prefix, id))
    }
}
