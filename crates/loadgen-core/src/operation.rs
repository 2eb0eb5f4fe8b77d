//! Closed set of store operations and their mapping to facade commands.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::client::Command;
use crate::error::LoadGenError;
use crate::values::{KeyGenerator, ValuePool};

/// A logical store operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Operation {
    Set,
    Get,
    Del,
    Incr,
    Decr,
    Append,
    Strlen,
    Exists,
    Expire,
    Ttl,
    Lpush,
    Rpush,
    Lpop,
    Rpop,
    Lrange,
    Llen,
    Sadd,
    Srem,
    Smembers,
    Scard,
    Hset,
    Hget,
    Hdel,
    Hgetall,
    Publish,
    Subscribe,
}

/// Data-structure family an operation belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpFamily {
    String,
    List,
    Set,
    Hash,
    PubSub,
}

/// Shape of the arguments an operation takes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgShape {
    Key,
    KeyValue,
    KeyRange,
    KeyTtl,
    KeyField,
    KeyFieldValue,
    ChannelPayload,
    Channels,
}

/// Which facade call carries the operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    Execute,
    Publish,
    Subscribe,
}

/// One row of the operation table.
#[derive(Debug, Clone, Copy)]
pub struct OpSpec {
    pub name: &'static str,
    pub family: OpFamily,
    pub args: ArgShape,
    pub dispatch: Dispatch,
}

const fn row(name: &'static str, family: OpFamily, args: ArgShape, dispatch: Dispatch) -> OpSpec {
    OpSpec {
        name,
        family,
        args,
        dispatch,
    }
}

const HASH_FIELDS: u32 = 16;
const EXPIRE_SECS: u64 = 300;

impl Operation {
    pub const ALL: [Operation; 26] = [
        Operation::Set,
        Operation::Get,
        Operation::Del,
        Operation::Incr,
        Operation::Decr,
        Operation::Append,
        Operation::Strlen,
        Operation::Exists,
        Operation::Expire,
        Operation::Ttl,
        Operation::Lpush,
        Operation::Rpush,
        Operation::Lpop,
        Operation::Rpop,
        Operation::Lrange,
        Operation::Llen,
        Operation::Sadd,
        Operation::Srem,
        Operation::Smembers,
        Operation::Scard,
        Operation::Hset,
        Operation::Hget,
        Operation::Hdel,
        Operation::Hgetall,
        Operation::Publish,
        Operation::Subscribe,
    ];

    /// The operation table.
    pub const fn spec(self) -> OpSpec {
        use ArgShape::*;
        use Dispatch::*;
        use OpFamily as F;
        match self {
            Operation::Set => row("SET", F::String, KeyValue, Execute),
            Operation::Get => row("GET", F::String, Key, Execute),
            Operation::Del => row("DEL", F::String, Key, Execute),
            Operation::Incr => row("INCR", F::String, Key, Execute),
            Operation::Decr => row("DECR", F::String, Key, Execute),
            Operation::Append => row("APPEND", F::String, KeyValue, Execute),
            Operation::Strlen => row("STRLEN", F::String, Key, Execute),
            Operation::Exists => row("EXISTS", F::String, Key, Execute),
            Operation::Expire => row("EXPIRE", F::String, KeyTtl, Execute),
            Operation::Ttl => row("TTL", F::String, Key, Execute),
            Operation::Lpush => row("LPUSH", F::List, KeyValue, Execute),
            Operation::Rpush => row("RPUSH", F::List, KeyValue, Execute),
            Operation::Lpop => row("LPOP", F::List, Key, Execute),
            Operation::Rpop => row("RPOP", F::List, Key, Execute),
            Operation::Lrange => row("LRANGE", F::List, KeyRange, Execute),
            Operation::Llen => row("LLEN", F::List, Key, Execute),
            Operation::Sadd => row("SADD", F::Set, KeyValue, Execute),
            Operation::Srem => row("SREM", F::Set, KeyValue, Execute),
            Operation::Smembers => row("SMEMBERS", F::Set, Key, Execute),
            Operation::Scard => row("SCARD", F::Set, Key, Execute),
            Operation::Hset => row("HSET", F::Hash, KeyFieldValue, Execute),
            Operation::Hget => row("HGET", F::Hash, KeyField, Execute),
            Operation::Hdel => row("HDEL", F::Hash, KeyField, Execute),
            Operation::Hgetall => row("HGETALL", F::Hash, Key, Execute),
            Operation::Publish => row("PUBLISH", F::PubSub, ChannelPayload, Publish),
            Operation::Subscribe => row("SUBSCRIBE", F::PubSub, Channels, Subscribe),
        }
    }

    pub const fn as_str(self) -> &'static str {
        self.spec().name
    }

    pub fn family(self) -> OpFamily {
        self.spec().family
    }

    /// Keyed operations can be executed directly or placed in a batch.
    pub fn is_batchable(self) -> bool {
        matches!(self.spec().dispatch, Dispatch::Execute)
    }

    pub fn is_list(self) -> bool {
        self.family() == OpFamily::List
    }

    pub fn is_pubsub(self) -> bool {
        self.family() == OpFamily::PubSub
    }

    /// Build the command for a keyed operation. Pub/sub operations return
    /// `None`; they go through `publish`/`subscribe` on the facade instead.
    pub fn build_command<R: Rng + ?Sized>(
        self,
        keys: &mut KeyGenerator,
        values: &ValuePool,
        rng: &mut R,
    ) -> Option<Command> {
        let spec = self.spec();
        let args: Vec<Bytes> = match spec.args {
            ArgShape::Key => vec![keys.next_key(rng)],
            ArgShape::KeyValue => vec![keys.next_key(rng), values.pick(rng)],
            ArgShape::KeyRange => {
                let start: u32 = rng.gen_range(0..=10);
                let end = start + rng.gen_range(1..=20);
                vec![
                    keys.next_key(rng),
                    Bytes::from(start.to_string()),
                    Bytes::from(end.to_string()),
                ]
            }
            ArgShape::KeyTtl => vec![keys.next_key(rng), Bytes::from(EXPIRE_SECS.to_string())],
            ArgShape::KeyField => vec![keys.next_key(rng), random_field(rng)],
            ArgShape::KeyFieldValue => {
                vec![keys.next_key(rng), random_field(rng), values.pick(rng)]
            }
            ArgShape::ChannelPayload | ArgShape::Channels => return None,
        };
        Some(Command::new(spec.name, args))
    }
}

fn random_field<R: Rng + ?Sized>(rng: &mut R) -> Bytes {
    Bytes::from(format!("field:{}", rng.gen_range(0..HASH_FIELDS)))
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Operation {
    type Err = LoadGenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        // "DELETE" is what older configs and dashboards call DEL.
        if upper == "DELETE" {
            return Ok(Operation::Del);
        }
        Operation::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == upper)
            .ok_or_else(|| LoadGenError::UnknownOperation(s.to_string()))
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}
