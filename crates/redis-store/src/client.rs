//! Redis implementation of the store client facade.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use redis::{Cmd, Connection, Pipeline, PushKind, Value};
use tracing::{debug, info};

use loadgen_core::{
    Batch, ClientError, ClientFactory, Command, ConnectionConfig, ConnectionEvents, Message, Reply,
    StoreClient, Subscription,
};

use crate::connection::{open_client, redacted_url, ConnectionPool, PoolSettings};
use crate::error::map_error;

/// Lower bound for a subscription read timeout; zero disables timeouts.
const MIN_POLL_TIMEOUT: Duration = Duration::from_millis(1);

/// One shared client handle backed by a bounded connection pool.
pub struct RedisStoreClient {
    pool: ConnectionPool,
}

impl RedisStoreClient {
    /// Open a handle and verify it with PING.
    pub fn connect(
        config: &ConnectionConfig,
        events: Arc<dyn ConnectionEvents>,
    ) -> Result<Self, ClientError> {
        let client = open_client(config)?;
        let pool = ConnectionPool::new(client, PoolSettings::from_config(config), events);
        pool.run(|conn| redis::cmd("PING").query::<Value>(conn))?;
        Ok(Self { pool })
    }
}

fn to_cmd(command: &Command) -> Cmd {
    let mut cmd = redis::cmd(command.name);
    for arg in &command.args {
        cmd.arg(&arg[..]);
    }
    cmd
}

pub(crate) fn to_reply(value: Value) -> Reply {
    match value {
        Value::Nil => Reply::Nil,
        Value::Int(n) => Reply::Int(n),
        Value::BulkString(data) => Reply::Data(Bytes::from(data)),
        Value::SimpleString(status) => Reply::Status(status),
        Value::Okay => Reply::Status("OK".to_string()),
        Value::Array(items) | Value::Set(items) => {
            Reply::Array(items.into_iter().map(to_reply).collect())
        }
        Value::Map(pairs) => Reply::Array(
            pairs
                .into_iter()
                .flat_map(|(k, v)| [to_reply(k), to_reply(v)])
                .collect(),
        ),
        Value::Boolean(b) => Reply::Int(i64::from(b)),
        Value::Double(d) => Reply::Status(d.to_string()),
        Value::VerbatimString { text, .. } => Reply::Status(text),
        other => Reply::Status(format!("{:?}", other)),
    }
}

impl StoreClient for RedisStoreClient {
    fn execute(&self, command: &Command) -> Result<Reply, ClientError> {
        let cmd = to_cmd(command);
        self.pool.run(|conn| cmd.query::<Value>(conn)).map(to_reply)
    }

    fn open_batch(&self, transactional: bool) -> Box<dyn Batch + '_> {
        let mut pipe = redis::pipe();
        if transactional {
            pipe.atomic();
        }
        Box::new(RedisBatch {
            pool: &self.pool,
            pipe,
            len: 0,
        })
    }

    fn publish(&self, channel: &str, payload: Bytes) -> Result<u64, ClientError> {
        let mut cmd = redis::cmd("PUBLISH");
        cmd.arg(channel).arg(&payload[..]);
        let receivers = self.pool.run(|conn| cmd.query::<i64>(conn))?;
        Ok(receivers.max(0) as u64)
    }

    fn subscribe(&self, channels: &[String]) -> Result<Box<dyn Subscription>, ClientError> {
        let conn = self.pool.dedicated()?;
        let subscription = RedisSubscription::open(conn, channels)?;
        debug!(channels = ?channels, "Subscribed");
        Ok(Box::new(subscription))
    }

    fn close(&self) -> Result<(), ClientError> {
        let dropped = self.pool.close();
        debug!(connections = dropped, "Client handle closed");
        Ok(())
    }
}

/// Pipeline or MULTI/EXEC block sent in one round trip.
struct RedisBatch<'a> {
    pool: &'a ConnectionPool,
    pipe: Pipeline,
    len: usize,
}

impl Batch for RedisBatch<'_> {
    fn add(&mut self, command: Command) {
        self.pipe.add_command(to_cmd(&command));
        self.len += 1;
    }

    fn len(&self) -> usize {
        self.len
    }

    fn execute(self: Box<Self>) -> Result<Vec<Reply>, ClientError> {
        let RedisBatch { pool, pipe, .. } = *self;
        let replies = pool.run(|conn| pipe.query::<Vec<Value>>(conn))?;
        Ok(replies.into_iter().map(to_reply).collect())
    }
}

/// A connection in subscribe mode. Owned by one subscriber thread.
pub struct RedisSubscription {
    conn: Option<Connection>,
    channels: Vec<String>,
}

impl RedisSubscription {
    fn open(mut conn: Connection, channels: &[String]) -> Result<Self, ClientError> {
        let packed = redis::cmd("SUBSCRIBE").arg(channels).get_packed_command();
        conn.send_packed_command(&packed).map_err(|e| map_error(&e))?;
        Ok(Self {
            conn: Some(conn),
            channels: channels.to_vec(),
        })
    }
}

impl Subscription for RedisSubscription {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Message>, ClientError> {
        let Some(conn) = self.conn.as_mut() else {
            return Err(ClientError::closed());
        };
        conn.set_read_timeout(Some(timeout.max(MIN_POLL_TIMEOUT)))
            .map_err(|e| map_error(&e))?;

        let deadline = Instant::now() + timeout;
        loop {
            match conn.recv_response() {
                Ok(value) => {
                    if let Some(message) = parse_message(value) {
                        return Ok(Some(message));
                    }
                    // Subscribe confirmations and other control frames.
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                }
                Err(e) if e.is_timeout() => return Ok(None),
                Err(e) => return Err(map_error(&e)),
            }
        }
    }

    fn close(&mut self) -> Result<(), ClientError> {
        if let Some(mut conn) = self.conn.take() {
            let packed = redis::cmd("UNSUBSCRIBE").arg(&self.channels).get_packed_command();
            conn.send_packed_command(&packed).map_err(|e| map_error(&e))?;
        }
        Ok(())
    }
}

/// Extract a published message from a subscribe-mode frame.
pub(crate) fn parse_message(value: Value) -> Option<Message> {
    let (channel, payload) = match value {
        Value::Array(items) => {
            let mut items = items.into_iter();
            match (items.next(), items.next(), items.next()) {
                (Some(kind), Some(channel), Some(payload)) if is_bulk(&kind, b"message") => {
                    (channel, payload)
                }
                _ => return None,
            }
        }
        Value::Push {
            kind: PushKind::Message,
            data,
        } => {
            let mut data = data.into_iter();
            (data.next()?, data.next()?)
        }
        _ => return None,
    };
    Some(Message {
        channel: text(channel)?,
        payload: bytes(payload)?,
    })
}

fn is_bulk(value: &Value, expected: &[u8]) -> bool {
    matches!(value, Value::BulkString(data) if data.as_slice() == expected)
}

fn text(value: Value) -> Option<String> {
    match value {
        Value::BulkString(data) => String::from_utf8(data).ok(),
        Value::SimpleString(s) => Some(s),
        _ => None,
    }
}

fn bytes(value: Value) -> Option<Bytes> {
    match value {
        Value::BulkString(data) => Some(Bytes::from(data)),
        Value::SimpleString(s) => Some(Bytes::from(s)),
        _ => None,
    }
}

/// Creates [`RedisStoreClient`] handles from one connection config.
pub struct RedisClientFactory {
    config: ConnectionConfig,
}

impl RedisClientFactory {
    pub fn new(config: ConnectionConfig) -> Self {
        Self { config }
    }
}

impl ClientFactory for RedisClientFactory {
    fn connect(
        &self,
        index: usize,
        events: Arc<dyn ConnectionEvents>,
    ) -> Result<Arc<dyn StoreClient>, ClientError> {
        let start = Instant::now();
        let client = RedisStoreClient::connect(&self.config, events)?;
        info!(
            index,
            url = %redacted_url(&self.config),
            protocol = %self.config.protocol,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Connected to Redis"
        );
        Ok(Arc::new(client))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk(s: &str) -> Value {
        Value::BulkString(s.as_bytes().to_vec())
    }

    #[test]
    fn test_parse_resp2_message() {
        let frame = Value::Array(vec![bulk("message"), bulk("channel1"), bulk("hello")]);
        let message = parse_message(frame).unwrap();
        assert_eq!(message.channel, "channel1");
        assert_eq!(message.payload, Bytes::from_static(b"hello"));
    }

    #[test]
    fn test_confirmation_is_not_a_message() {
        let frame = Value::Array(vec![bulk("subscribe"), bulk("channel1"), Value::Int(1)]);
        assert!(parse_message(frame).is_none());
        assert!(parse_message(Value::Okay).is_none());
    }

    #[test]
    fn test_parse_resp3_push() {
        let frame = Value::Push {
            kind: PushKind::Message,
            data: vec![bulk("news"), bulk("payload")],
        };
        let message = parse_message(frame).unwrap();
        assert_eq!(message.channel, "news");
        assert_eq!(message.payload.len(), 7);
    }

    #[test]
    fn test_reply_conversion() {
        assert_eq!(to_reply(Value::Okay), Reply::Status("OK".to_string()));
        assert_eq!(to_reply(Value::Int(3)), Reply::Int(3));
        assert_eq!(
            to_reply(Value::Array(vec![bulk("a"), Value::Nil])),
            Reply::Array(vec![Reply::Data(Bytes::from_static(b"a")), Reply::Nil])
        );
        assert_eq!(
            to_reply(Value::Map(vec![(bulk("f"), bulk("v"))])),
            Reply::Array(vec![
                Reply::Data(Bytes::from_static(b"f")),
                Reply::Data(Bytes::from_static(b"v"))
            ])
        );
    }

    #[test]
    fn test_command_conversion() {
        let command = Command::new("SET", vec![Bytes::from_static(b"k"), Bytes::from_static(b"v")]);
        let packed = to_cmd(&command).get_packed_command();
        assert_eq!(packed, b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n".to_vec());
    }
}
