//! Publish/subscribe broker. Grounded on `original_source/pubsub.go`:
//! monotonic per-channel subscription ids (`atomic.AddInt64`), a
//! `sync.RWMutex`-guarded channel map (here a `DashMap`, avoiding an
//! explicit lock), and fan-out publish that evicts subscribers whose queue
//! has gone away.
//!
//! Each subscriber owns an unbounded `mpsc` queue rather than being handed
//! the broker's lock across an `.await` — `publish` only needs to push into
//! those queues, never to await while holding anything; the connection
//! task that drains a subscriber's queue does so independently.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::io::AsyncWrite;
use tokio::sync::{Mutex, mpsc};

use crate::resp::{Command, RequestWriter};

/// One message delivered to a subscriber: which channel it arrived on (the
/// subscription's own channel, or the pattern that matched it) and the
/// payload.
#[derive(Debug, Clone)]
pub struct Message {
    pub channel: String,
    pub payload: Bytes,
}

struct Subscriber {
    id: u64,
    tx: mpsc::UnboundedSender<Message>,
}

/// A single subscriber's receiving half, returned by [`PubSub::subscribe`].
/// Drop it (or let the connection end) to unsubscribe.
pub struct Subscription {
    broker: Arc<Inner>,
    channel: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.broker.unsubscribe(&self.channel, self.id);
    }
}

struct Inner {
    channels: DashMap<String, Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl Inner {
    fn unsubscribe(&self, channel: &str, id: u64) {
        if let Some(mut subs) = self.channels.get_mut(channel) {
            subs.retain(|s| s.id != id);
            if subs.is_empty() {
                drop(subs);
                self.channels.remove(channel);
            }
        }
    }
}

/// The broker shared across every connection. Cheap to clone (it's an
/// `Arc` internally).
#[derive(Clone)]
pub struct PubSub {
    inner: Arc<Inner>,
}

impl Default for PubSub {
    fn default() -> Self {
        Self::new()
    }
}

impl PubSub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                channels: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Subscribe to `channel`, returning a handle whose subscription id is
    /// unique for the lifetime of the broker (monotonically increasing,
    /// matching the original's allocation scheme).
    pub fn subscribe(&self, channel: &str) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner
            .channels
            .entry(channel.to_string())
            .or_default()
            .push(Subscriber { id, tx });
        Subscription {
            broker: self.inner.clone(),
            channel: channel.to_string(),
            id,
            rx,
        }
    }

    /// Number of distinct channels with at least one subscriber.
    pub fn channel_count(&self) -> usize {
        self.inner.channels.len()
    }

    /// Number of subscribers currently on `channel`.
    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.inner
            .channels
            .get(channel)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    /// Deliver `payload` to every current subscriber of `channel`, dropping
    /// (evicting) any whose receiver has gone away. Returns how many
    /// subscribers received it.
    pub fn publish(&self, channel: &str, payload: impl Into<Bytes>) -> usize {
        let payload = payload.into();
        let Some(mut subs) = self.inner.channels.get_mut(channel) else {
            return 0;
        };
        let msg = Message {
            channel: channel.to_string(),
            payload,
        };
        let before = subs.len();
        subs.retain(|s| s.tx.send(msg.clone()).is_ok());
        let delivered = subs.len();
        let evicted = before - delivered;
        if evicted > 0 {
            tracing::debug!(channel, evicted, "dropped subscribers with closed queues");
        }
        delivered
    }
}

/// A connection's outgoing buffer, shared between the dispatch loop and any
/// subscription drain tasks spawned for it — the lock this crate uses to
/// satisfy "at most one task writes to a given subscriber at a time" per
/// §4.5/§9 (*Shared mutable writer inside a pub/sub channel*).
pub type SharedWriter<W> = Arc<Mutex<RequestWriter<W>>>;

/// A built-in handler that needs the session's *shared* writer (rather than
/// the dispatcher's per-call `&mut` borrow) because it may spawn a task that
/// keeps writing to the connection after the handler itself returns —
/// `SUBSCRIBE` is the only such case in this crate.
#[async_trait]
pub trait PubSubHandler<W>: Send + Sync
where
    W: AsyncWrite + Unpin + Send,
{
    async fn serve(&self, writer: SharedWriter<W>, cmd: &mut Command);
}

struct SubscribeHandler {
    broker: PubSub,
}

#[async_trait]
impl<W> PubSubHandler<W> for SubscribeHandler
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn serve(&self, writer: SharedWriter<W>, cmd: &mut Command) {
        if cmd.argc() != 1 {
            let mut w = writer.lock().await;
            w.append_error(&format!(
                "ERR wrong number of arguments for '{}' command",
                String::from_utf8_lossy(cmd.name())
            ));
            return;
        }
        let channel = String::from_utf8_lossy(cmd.arg(0).unwrap()).into_owned();
        let mut subscription = self.broker.subscribe(&channel);

        let drain_writer = writer.clone();
        tokio::spawn(async move {
            while let Some(msg) = subscription.recv().await {
                let mut w = drain_writer.lock().await;
                w.append_array_len(3);
                w.append_bulk_string("message");
                w.append_bulk_string(&msg.channel);
                w.append_bulk(&msg.payload);
                if w.flush().await.is_err() {
                    return;
                }
            }
        });

        let mut w = writer.lock().await;
        w.append_array_len(3);
        w.append_bulk_string("subscribe");
        w.append_bulk_string(&channel);
        w.append_int(1);
    }
}

struct PublishHandler {
    broker: PubSub,
}

#[async_trait]
impl<W> PubSubHandler<W> for PublishHandler
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn serve(&self, writer: SharedWriter<W>, cmd: &mut Command) {
        let mut w = writer.lock().await;
        if cmd.argc() != 2 {
            w.append_error(&format!(
                "ERR wrong number of arguments for '{}' command",
                String::from_utf8_lossy(cmd.name())
            ));
            return;
        }
        let channel = String::from_utf8_lossy(cmd.arg(0).unwrap()).into_owned();
        let payload = Bytes::copy_from_slice(cmd.arg(1).unwrap());
        let n = self.broker.publish(&channel, payload);
        w.append_int(n as i64);
    }
}

/// A `SUBSCRIBE <channel>` handler backed by `broker`: registers the
/// connection and replies with the standing `["subscribe", channel, 1]`
/// acknowledgement (§4.5/§9 Open Questions — the `1` is the original's own
/// constant, not a tracked per-connection subscription count).
pub fn subscribe_handler<W>(broker: PubSub) -> Arc<dyn PubSubHandler<W>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    Arc::new(SubscribeHandler { broker })
}

/// A `PUBLISH <channel> <message>` handler backed by `broker`, replying
/// with the number of subscribers the message was delivered to.
pub fn publish_handler<W>(broker: PubSub) -> Arc<dyn PubSubHandler<W>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    Arc::new(PublishHandler { broker })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_fans_out_to_every_subscriber() {
        let broker = PubSub::new();
        let mut a = broker.subscribe("news");
        let mut b = broker.subscribe("news");

        let delivered = broker.publish("news", Bytes::from_static(b"hello"));
        assert_eq!(delivered, 2);

        let ma = a.recv().await.unwrap();
        let mb = b.recv().await.unwrap();
        assert_eq!(ma.payload, Bytes::from_static(b"hello"));
        assert_eq!(mb.payload, Bytes::from_static(b"hello"));
    }

    #[tokio::test]
    async fn publish_with_no_subscribers_delivers_nothing() {
        let broker = PubSub::new();
        assert_eq!(broker.publish("void", Bytes::from_static(b"x")), 0);
    }

    #[tokio::test]
    async fn dropping_subscription_removes_it_from_the_channel() {
        let broker = PubSub::new();
        {
            let _sub = broker.subscribe("chat");
            assert_eq!(broker.subscriber_count("chat"), 1);
        }
        assert_eq!(broker.subscriber_count("chat"), 0);
        assert_eq!(broker.channel_count(), 0);
    }

    #[tokio::test]
    async fn ids_are_monotonically_increasing() {
        let broker = PubSub::new();
        let s1 = broker.subscribe("a");
        let s2 = broker.subscribe("b");
        assert!(s2.id > s1.id);
    }

    async fn read_cmd(input: &[u8]) -> Command {
        let mut r = crate::resp::RequestReader::new(std::io::Cursor::new(input.to_vec()));
        let mut cmd = Command::new();
        r.read_cmd(&mut cmd).await.unwrap();
        cmd
    }

    #[tokio::test]
    async fn subscribe_handler_acks_and_delivers_publish() {
        let broker = PubSub::new();
        let writer: SharedWriter<Vec<u8>> = Arc::new(Mutex::new(RequestWriter::new(Vec::new())));

        let mut sub_cmd = read_cmd(b"*2\r\n$9\r\nSUBSCRIBE\r\n$4\r\nnews\r\n").await;
        subscribe_handler::<Vec<u8>>(broker.clone())
            .serve(writer.clone(), &mut sub_cmd)
            .await;
        writer.lock().await.flush().await.unwrap();
        {
            let w = writer.lock().await;
            assert_eq!(
                w.get_ref().as_slice(),
                b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n"
            );
        }

        assert_eq!(broker.publish("news", Bytes::from_static(b"hi")), 1);
        // Give the spawned drain task a chance to run.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        let w = writer.lock().await;
        assert_eq!(
            &w.get_ref()[b"*3\r\n$9\r\nsubscribe\r\n$4\r\nnews\r\n:1\r\n".len()..],
            b"*3\r\n$7\r\nmessage\r\n$4\r\nnews\r\n$2\r\nhi\r\n"
        );
    }

    #[tokio::test]
    async fn publish_handler_reports_delivered_count() {
        let broker = PubSub::new();
        let _sub = broker.subscribe("chat");
        let writer: SharedWriter<Vec<u8>> = Arc::new(Mutex::new(RequestWriter::new(Vec::new())));

        let mut pub_cmd = read_cmd(b"*3\r\n$7\r\nPUBLISH\r\n$4\r\nchat\r\n$2\r\nhi\r\n").await;
        publish_handler::<Vec<u8>>(broker)
            .serve(writer.clone(), &mut pub_cmd)
            .await;
        let mut w = writer.lock().await;
        w.flush().await.unwrap();
        assert_eq!(w.get_ref().as_slice(), b":1\r\n");
    }
}
