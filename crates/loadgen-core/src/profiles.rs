//! Built-in workload profiles.
//!
//! A profile is a named [`WorkloadSpec`] plus a default run length. The CLI
//! applies the profile first and then lets explicit options override it.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::config::{BatchMode, Batching, ValueSize, WorkloadKind, WorkloadSpec};
use crate::error::LoadGenError;
use crate::operation::Operation;

/// Run length every built-in profile starts from.
pub const PROFILE_DURATION_SECS: u64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkloadProfile {
    BasicRw,
    HighThroughput,
    ListOperations,
    PubsubHeavy,
    TransactionHeavy,
    AsyncMixed,
}

impl WorkloadProfile {
    pub const ALL: [WorkloadProfile; 6] = [
        WorkloadProfile::BasicRw,
        WorkloadProfile::HighThroughput,
        WorkloadProfile::ListOperations,
        WorkloadProfile::PubsubHeavy,
        WorkloadProfile::TransactionHeavy,
        WorkloadProfile::AsyncMixed,
    ];

    pub fn name(&self) -> &'static str {
        self.kind().as_str()
    }

    pub fn kind(&self) -> WorkloadKind {
        match self {
            WorkloadProfile::BasicRw => WorkloadKind::BasicRw,
            WorkloadProfile::HighThroughput => WorkloadKind::HighThroughput,
            WorkloadProfile::ListOperations => WorkloadKind::ListOperations,
            WorkloadProfile::PubsubHeavy => WorkloadKind::PubsubHeavy,
            WorkloadProfile::TransactionHeavy => WorkloadKind::TransactionHeavy,
            WorkloadProfile::AsyncMixed => WorkloadKind::AsyncMixed,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            WorkloadProfile::BasicRw => "Mixed SET/GET/DEL, one command per round trip",
            WorkloadProfile::HighThroughput => "Pipelined SET/GET in batches of 10",
            WorkloadProfile::ListOperations => "LPUSH/LRANGE/LPOP against list keys",
            WorkloadProfile::PubsubHeavy => "PUBLISH to three channels with background subscribers",
            WorkloadProfile::TransactionHeavy => "MULTI/EXEC transactions of 5 SET/GET commands",
            WorkloadProfile::AsyncMixed => "Pipelined mix of string and list commands in batches of 20",
        }
    }

    pub fn duration_secs(&self) -> u64 {
        PROFILE_DURATION_SECS
    }

    /// The workload this profile runs.
    pub fn spec(&self) -> WorkloadSpec {
        let base = WorkloadSpec {
            kind: self.kind(),
            ..WorkloadSpec::default()
        };
        match self {
            WorkloadProfile::BasicRw => WorkloadSpec {
                operations: vec![Operation::Set, Operation::Get, Operation::Del],
                operation_weights: Some(weights(&[
                    (Operation::Set, 0.4),
                    (Operation::Get, 0.5),
                    (Operation::Del, 0.1),
                ])),
                value_size: ValueSize::Fixed(100),
                ..base
            },
            WorkloadProfile::HighThroughput => WorkloadSpec {
                operations: vec![Operation::Set, Operation::Get],
                operation_weights: Some(weights(&[(Operation::Set, 0.4), (Operation::Get, 0.6)])),
                value_size: ValueSize::Fixed(50),
                key_prefix: "perf_test".to_string(),
                key_range: 50_000,
                batching: Batching {
                    mode: BatchMode::Pipeline,
                    size: Some(10),
                },
                ..base
            },
            WorkloadProfile::ListOperations => WorkloadSpec {
                operations: vec![Operation::Lpush, Operation::Lrange, Operation::Lpop],
                operation_weights: Some(weights(&[
                    (Operation::Lpush, 0.4),
                    (Operation::Lrange, 0.4),
                    (Operation::Lpop, 0.2),
                ])),
                value_size: ValueSize::Fixed(100),
                key_prefix: "list_test".to_string(),
                ..base
            },
            WorkloadProfile::PubsubHeavy => WorkloadSpec {
                operations: vec![Operation::Publish, Operation::Subscribe],
                operation_weights: Some(weights(&[
                    (Operation::Publish, 0.7),
                    (Operation::Subscribe, 0.3),
                ])),
                value_size: ValueSize::Fixed(200),
                channels: vec![
                    "channel1".to_string(),
                    "channel2".to_string(),
                    "channel3".to_string(),
                ],
                ..base
            },
            WorkloadProfile::TransactionHeavy => WorkloadSpec {
                operations: vec![Operation::Set, Operation::Get],
                value_size: ValueSize::Fixed(100),
                key_prefix: "tx_test".to_string(),
                batching: Batching {
                    mode: BatchMode::Transaction,
                    size: Some(5),
                },
                ..base
            },
            WorkloadProfile::AsyncMixed => WorkloadSpec {
                operations: vec![Operation::Set, Operation::Get, Operation::Lpush, Operation::Lrange],
                operation_weights: Some(weights(&[
                    (Operation::Set, 0.3),
                    (Operation::Get, 0.4),
                    (Operation::Lpush, 0.2),
                    (Operation::Lrange, 0.1),
                ])),
                value_size: ValueSize::Fixed(150),
                batching: Batching {
                    mode: BatchMode::Pipeline,
                    size: Some(20),
                },
                ..base
            },
        }
    }
}

fn weights(pairs: &[(Operation, f64)]) -> BTreeMap<Operation, f64> {
    pairs.iter().copied().collect()
}

impl fmt::Display for WorkloadProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for WorkloadProfile {
    type Err = LoadGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        WorkloadProfile::ALL
            .into_iter()
            .find(|p| p.name() == wanted)
            .ok_or_else(|| LoadGenError::UnknownProfile(s.to_string()))
    }
}
