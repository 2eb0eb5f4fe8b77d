//! In-memory store driver.
//!
//! Implements the client facade over process-local maps so the engine can
//! run without a server (`--driver memory`) and so tests can inject
//! connection and command failures.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::client::{
    Batch, ClientFactory, Command, ConnectionEvents, Message, Reply, StoreClient, Subscription,
};
use crate::error::ClientError;

/// Failure injection and simulated latency.
#[derive(Debug, Clone, Default)]
pub struct MemoryOptions {
    /// Every `connect` fails.
    pub fail_connect: bool,
    /// Every round trip fails with a connection error.
    pub fail_commands: bool,
    /// Added to every round trip.
    pub latency: Option<Duration>,
}

#[derive(Default)]
struct Store {
    strings: HashMap<Bytes, Bytes>,
    lists: HashMap<Bytes, VecDeque<Bytes>>,
    sets: HashMap<Bytes, HashSet<Bytes>>,
    hashes: HashMap<Bytes, HashMap<Bytes, Bytes>>,
    ttls: HashMap<Bytes, i64>,
}

struct SubscriberSlot {
    id: u64,
    channels: HashSet<String>,
    sender: mpsc::Sender<Message>,
}

struct Shared {
    store: Mutex<Store>,
    subscribers: Mutex<Vec<SubscriberSlot>>,
    fail_connect: AtomicBool,
    fail_commands: AtomicBool,
    latency: Option<Duration>,
    round_trips: AtomicU64,
    next_subscriber: AtomicU64,
}

impl Shared {
    fn remove_subscriber(&self, id: u64) {
        self.subscribers.lock().retain(|slot| slot.id != id);
    }
}

/// Creates handles onto one shared in-memory store.
#[derive(Clone)]
pub struct MemoryClientFactory {
    shared: Arc<Shared>,
}

impl MemoryClientFactory {
    pub fn new(options: MemoryOptions) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(Store::default()),
                subscribers: Mutex::new(Vec::new()),
                fail_connect: AtomicBool::new(options.fail_connect),
                fail_commands: AtomicBool::new(options.fail_commands),
                latency: options.latency,
                round_trips: AtomicU64::new(0),
                next_subscriber: AtomicU64::new(0),
            }),
        }
    }

    /// A fresh handle, bypassing connect failure injection.
    pub fn client(&self) -> Arc<dyn StoreClient> {
        Arc::new(MemoryClient {
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        })
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.shared.fail_connect.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_commands(&self, fail: bool) {
        self.shared.fail_commands.store(fail, Ordering::Relaxed);
    }

    pub fn round_trips(&self) -> u64 {
        self.shared.round_trips.load(Ordering::Relaxed)
    }

    /// Number of open subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.lock().len()
    }

    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.shared.store.lock().strings.get(key.as_bytes()).cloned()
    }

    pub fn list_len(&self, key: &str) -> usize {
        self.shared
            .store
            .lock()
            .lists
            .get(key.as_bytes())
            .map_or(0, VecDeque::len)
    }
}

impl ClientFactory for MemoryClientFactory {
    fn connect(
        &self,
        index: usize,
        _events: Arc<dyn ConnectionEvents>,
    ) -> Result<Arc<dyn StoreClient>, ClientError> {
        if self.shared.fail_connect.load(Ordering::Relaxed) {
            return Err(ClientError::connection(format!(
                "connection refused (memory client {})",
                index
            )));
        }
        Ok(self.client())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryClient {
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MemoryClient {
    fn round_trip(&self) -> Result<(), ClientError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ClientError::closed());
        }
        self.shared.round_trips.fetch_add(1, Ordering::Relaxed);
        if let Some(latency) = self.shared.latency {
            thread::sleep(latency);
        }
        if self.shared.fail_commands.load(Ordering::Relaxed) {
            return Err(ClientError::connection("connection reset (injected)"));
        }
        Ok(())
    }
}

impl StoreClient for MemoryClient {
    fn execute(&self, command: &Command) -> Result<Reply, ClientError> {
        self.round_trip()?;
        apply(&mut self.shared.store.lock(), command)
    }

    fn open_batch(&self, transactional: bool) -> Box<dyn Batch + '_> {
        Box::new(MemoryBatch {
            client: self,
            transactional,
            commands: Vec::new(),
        })
    }

    fn publish(&self, channel: &str, payload: Bytes) -> Result<u64, ClientError> {
        self.round_trip()?;
        let subscribers = self.shared.subscribers.lock();
        let mut delivered = 0;
        for slot in subscribers.iter().filter(|s| s.channels.contains(channel)) {
            let message = Message {
                channel: channel.to_string(),
                payload: payload.clone(),
            };
            if slot.sender.send(message).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    fn subscribe(&self, channels: &[String]) -> Result<Box<dyn Subscription>, ClientError> {
        self.round_trip()?;
        let (sender, receiver) = mpsc::channel();
        let id = self.shared.next_subscriber.fetch_add(1, Ordering::Relaxed);
        self.shared.subscribers.lock().push(SubscriberSlot {
            id,
            channels: channels.iter().cloned().collect(),
            sender,
        });
        Ok(Box::new(MemorySubscription {
            shared: Arc::clone(&self.shared),
            id,
            receiver,
            closed: false,
        }))
    }

    fn close(&self) -> Result<(), ClientError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

struct MemoryBatch<'a> {
    client: &'a MemoryClient,
    transactional: bool,
    commands: Vec<Command>,
}

impl Batch for MemoryBatch<'_> {
    fn add(&mut self, command: Command) {
        self.commands.push(command);
    }

    fn len(&self) -> usize {
        self.commands.len()
    }

    fn execute(self: Box<Self>) -> Result<Vec<Reply>, ClientError> {
        self.client.round_trip()?;
        let shared = &self.client.shared;
        if self.transactional {
            // MULTI/EXEC: nothing interleaves with the queued commands.
            let mut store = shared.store.lock();
            let replies = self.commands.iter().map(|cmd| apply(&mut store, cmd)).collect();
            replies
        } else {
            self.commands
                .iter()
                .map(|cmd| apply(&mut shared.store.lock(), cmd))
                .collect()
        }
    }
}

struct MemorySubscription {
    shared: Arc<Shared>,
    id: u64,
    receiver: mpsc::Receiver<Message>,
    closed: bool,
}

impl Subscription for MemorySubscription {
    fn poll(&mut self, timeout: Duration) -> Result<Option<Message>, ClientError> {
        if self.closed {
            return Err(ClientError::closed());
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(mpsc::RecvTimeoutError::Timeout) => Ok(None),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(ClientError::closed()),
        }
    }

    fn close(&mut self) -> Result<(), ClientError> {
        if !self.closed {
            self.closed = true;
            self.shared.remove_subscriber(self.id);
        }
        Ok(())
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        if !self.closed {
            self.shared.remove_subscriber(self.id);
        }
    }
}

fn arg<'a>(command: &'a Command, index: usize) -> Result<&'a Bytes, ClientError> {
    command.args.get(index).ok_or_else(|| {
        ClientError::response(format!(
            "ERR wrong number of arguments for '{}' command",
            command.name
        ))
    })
}

fn int_arg(command: &Command, index: usize) -> Result<i64, ClientError> {
    parse_int(arg(command, index)?)
}

fn parse_int(raw: &[u8]) -> Result<i64, ClientError> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| ClientError::response("ERR value is not an integer or out of range"))
}

fn ok() -> Reply {
    Reply::Status("OK".to_string())
}

fn exists(store: &Store, key: &Bytes) -> bool {
    store.strings.contains_key(key)
        || store.lists.contains_key(key)
        || store.sets.contains_key(key)
        || store.hashes.contains_key(key)
}

/// Apply one command to the store.
fn apply(store: &mut Store, command: &Command) -> Result<Reply, ClientError> {
    let reply = match command.name {
        "PING" => Reply::Status("PONG".to_string()),

        "SET" => {
            let key = arg(command, 0)?.clone();
            store.ttls.remove(&key);
            store.strings.insert(key, arg(command, 1)?.clone());
            ok()
        }
        "GET" => store
            .strings
            .get(arg(command, 0)?)
            .cloned()
            .map_or(Reply::Nil, Reply::Data),
        "DEL" => {
            let key = arg(command, 0)?;
            let removed = store.strings.remove(key).is_some()
                | store.lists.remove(key).is_some()
                | store.sets.remove(key).is_some()
                | store.hashes.remove(key).is_some();
            store.ttls.remove(key);
            Reply::Int(removed as i64)
        }
        "INCR" | "DECR" => {
            let key = arg(command, 0)?.clone();
            let current = match store.strings.get(&key) {
                Some(raw) => parse_int(raw)?,
                None => 0,
            };
            let delta = if command.name == "INCR" { 1 } else { -1 };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| ClientError::response("ERR increment or decrement would overflow"))?;
            store.strings.insert(key, Bytes::from(next.to_string()));
            Reply::Int(next)
        }
        "APPEND" => {
            let key = arg(command, 0)?.clone();
            let mut value = store.strings.get(&key).map(|v| v.to_vec()).unwrap_or_default();
            value.extend_from_slice(arg(command, 1)?);
            let len = value.len() as i64;
            store.strings.insert(key, Bytes::from(value));
            Reply::Int(len)
        }
        "STRLEN" => Reply::Int(store.strings.get(arg(command, 0)?).map_or(0, |v| v.len() as i64)),
        "EXISTS" => Reply::Int(exists(store, arg(command, 0)?) as i64),
        "EXPIRE" => {
            let key = arg(command, 0)?.clone();
            let secs = int_arg(command, 1)?;
            if exists(store, &key) {
                store.ttls.insert(key, secs);
                Reply::Int(1)
            } else {
                Reply::Int(0)
            }
        }
        "TTL" => {
            let key = arg(command, 0)?;
            match store.ttls.get(key) {
                Some(secs) => Reply::Int(*secs),
                None if exists(store, key) => Reply::Int(-1),
                None => Reply::Int(-2),
            }
        }

        "LPUSH" | "RPUSH" => {
            let list = store.lists.entry(arg(command, 0)?.clone()).or_default();
            let value = arg(command, 1)?.clone();
            if command.name == "LPUSH" {
                list.push_front(value);
            } else {
                list.push_back(value);
            }
            Reply::Int(list.len() as i64)
        }
        "LPOP" | "RPOP" => {
            let key = arg(command, 0)?;
            let popped = store.lists.get_mut(key).and_then(|list| {
                if command.name == "LPOP" {
                    list.pop_front()
                } else {
                    list.pop_back()
                }
            });
            if store.lists.get(key).is_some_and(VecDeque::is_empty) {
                store.lists.remove(key);
            }
            popped.map_or(Reply::Nil, Reply::Data)
        }
        "LRANGE" => {
            let key = arg(command, 0)?;
            let start = int_arg(command, 1)?;
            let stop = int_arg(command, 2)?;
            let items = store
                .lists
                .get(key)
                .map(|list| list_range(list, start, stop))
                .unwrap_or_default();
            Reply::Array(items.into_iter().map(Reply::Data).collect())
        }
        "LLEN" => Reply::Int(store.lists.get(arg(command, 0)?).map_or(0, |l| l.len() as i64)),

        "SADD" => {
            let set = store.sets.entry(arg(command, 0)?.clone()).or_default();
            Reply::Int(set.insert(arg(command, 1)?.clone()) as i64)
        }
        "SREM" => {
            let member = arg(command, 1)?;
            let removed = store
                .sets
                .get_mut(arg(command, 0)?)
                .is_some_and(|set| set.remove(member));
            Reply::Int(removed as i64)
        }
        "SMEMBERS" => Reply::Array(
            store
                .sets
                .get(arg(command, 0)?)
                .map(|set| set.iter().cloned().map(Reply::Data).collect())
                .unwrap_or_default(),
        ),
        "SCARD" => Reply::Int(store.sets.get(arg(command, 0)?).map_or(0, |s| s.len() as i64)),

        "HSET" => {
            let hash = store.hashes.entry(arg(command, 0)?.clone()).or_default();
            let added = hash
                .insert(arg(command, 1)?.clone(), arg(command, 2)?.clone())
                .is_none();
            Reply::Int(added as i64)
        }
        "HGET" => {
            let field = arg(command, 1)?;
            store
                .hashes
                .get(arg(command, 0)?)
                .and_then(|h| h.get(field))
                .cloned()
                .map_or(Reply::Nil, Reply::Data)
        }
        "HDEL" => {
            let field = arg(command, 1)?.clone();
            let removed = store
                .hashes
                .get_mut(arg(command, 0)?)
                .is_some_and(|h| h.remove(&field).is_some());
            Reply::Int(removed as i64)
        }
        "HGETALL" => Reply::Array(
            store
                .hashes
                .get(arg(command, 0)?)
                .map(|h| {
                    h.iter()
                        .flat_map(|(f, v)| [Reply::Data(f.clone()), Reply::Data(v.clone())])
                        .collect()
                })
                .unwrap_or_default(),
        ),

        other => {
            return Err(ClientError::unsupported(format!(
                "memory driver does not implement {}",
                other
            )))
        }
    };
    Ok(reply)
}

/// Inclusive range with Redis-style negative indices.
fn list_range(list: &VecDeque<Bytes>, start: i64, stop: i64) -> Vec<Bytes> {
    let len = list.len() as i64;
    let norm = |i: i64| if i < 0 { len + i } else { i };
    let start = norm(start).max(0);
    let stop = norm(stop).min(len - 1);
    if start > stop || len == 0 {
        return Vec::new();
    }
    list.range(start as usize..=stop as usize).cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(name: &'static str, args: &[&str]) -> Command {
        Command::new(name, args.iter().map(|a| Bytes::from(a.to_string())).collect())
    }

    #[test]
    fn test_string_commands() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        let client = factory.client();
        assert_eq!(client.execute(&cmd("SET", &["k", "v"])).unwrap(), ok());
        assert_eq!(
            client.execute(&cmd("GET", &["k"])).unwrap(),
            Reply::Data(Bytes::from("v"))
        );
        assert_eq!(client.execute(&cmd("GET", &["missing"])).unwrap(), Reply::Nil);
        assert_eq!(client.execute(&cmd("INCR", &["n"])).unwrap(), Reply::Int(1));
        assert_eq!(client.execute(&cmd("DECR", &["n"])).unwrap(), Reply::Int(0));
        assert_eq!(client.execute(&cmd("APPEND", &["k", "w"])).unwrap(), Reply::Int(2));
        assert_eq!(client.execute(&cmd("TTL", &["k"])).unwrap(), Reply::Int(-1));
        assert_eq!(client.execute(&cmd("EXPIRE", &["k", "300"])).unwrap(), Reply::Int(1));
        assert_eq!(client.execute(&cmd("TTL", &["k"])).unwrap(), Reply::Int(300));
        assert_eq!(client.execute(&cmd("DEL", &["k"])).unwrap(), Reply::Int(1));
        assert_eq!(client.execute(&cmd("EXISTS", &["k"])).unwrap(), Reply::Int(0));

        client.execute(&cmd("SET", &["text", "abc"])).unwrap();
        let err = client.execute(&cmd("INCR", &["text"])).unwrap_err();
        assert_eq!(err.kind_tag(), "ResponseError");
    }

    #[test]
    fn test_list_set_hash_commands() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        let client = factory.client();
        for v in ["a", "b", "c"] {
            client.execute(&cmd("RPUSH", &["l", v])).unwrap();
        }
        assert_eq!(
            client.execute(&cmd("LRANGE", &["l", "1", "20"])).unwrap(),
            Reply::Array(vec![Reply::Data(Bytes::from("b")), Reply::Data(Bytes::from("c"))])
        );
        assert_eq!(
            client.execute(&cmd("LPOP", &["l"])).unwrap(),
            Reply::Data(Bytes::from("a"))
        );
        assert_eq!(client.execute(&cmd("LLEN", &["l"])).unwrap(), Reply::Int(2));

        assert_eq!(client.execute(&cmd("SADD", &["s", "x"])).unwrap(), Reply::Int(1));
        assert_eq!(client.execute(&cmd("SADD", &["s", "x"])).unwrap(), Reply::Int(0));
        assert_eq!(client.execute(&cmd("SCARD", &["s"])).unwrap(), Reply::Int(1));
        assert_eq!(client.execute(&cmd("SREM", &["s", "x"])).unwrap(), Reply::Int(1));

        assert_eq!(client.execute(&cmd("HSET", &["h", "f", "1"])).unwrap(), Reply::Int(1));
        assert_eq!(
            client.execute(&cmd("HGET", &["h", "f"])).unwrap(),
            Reply::Data(Bytes::from("1"))
        );
        assert_eq!(client.execute(&cmd("HDEL", &["h", "f"])).unwrap(), Reply::Int(1));
    }

    #[test]
    fn test_batch_is_one_round_trip() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        let client = factory.client();
        let mut batch = client.open_batch(true);
        batch.add(cmd("SET", &["a", "1"]));
        batch.add(cmd("INCR", &["a"]));
        assert_eq!(batch.len(), 2);
        let replies = batch.execute().unwrap();
        assert_eq!(replies, vec![ok(), Reply::Int(2)]);
        assert_eq!(factory.round_trips(), 1);
    }

    #[test]
    fn test_pubsub_delivery() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        let client = factory.client();
        let mut sub = client.subscribe(&["news".to_string()]).unwrap();
        assert_eq!(factory.subscriber_count(), 1);
        assert_eq!(client.publish("news", Bytes::from("hi")).unwrap(), 1);
        assert_eq!(client.publish("other", Bytes::from("x")).unwrap(), 0);

        let message = sub.poll(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(message.channel, "news");
        assert_eq!(sub.poll(Duration::from_millis(10)).unwrap(), None);

        sub.close().unwrap();
        assert_eq!(factory.subscriber_count(), 0);
        assert!(sub.poll(Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_failure_injection() {
        let factory = MemoryClientFactory::new(MemoryOptions {
            fail_connect: true,
            ..MemoryOptions::default()
        });
        struct Ignore;
        impl ConnectionEvents for Ignore {
            fn on_connect(&self, _: bool) {}
            fn on_reconnect(&self, _: Duration) {}
        }
        assert!(factory.connect(0, Arc::new(Ignore)).is_err());
        factory.set_fail_connect(false);
        let client = factory.connect(0, Arc::new(Ignore)).unwrap();
        factory.set_fail_commands(true);
        assert_eq!(client.ping().unwrap_err().kind_tag(), "ConnectionError");
    }

    #[test]
    fn test_closed_client_rejects_calls() {
        let factory = MemoryClientFactory::new(MemoryOptions::default());
        let client = factory.client();
        client.close().unwrap();
        assert_eq!(client.ping().unwrap_err().kind_tag(), "ClientClosed");
    }
}
