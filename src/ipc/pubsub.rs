//! Loopback TCP publish/subscribe.
//!
//! The publisher binds a port; any number of subscribers connect and
//! receive every subsequent message. Delivery is best-effort and
//! fire-and-forget: there is no durability, late subscribers miss earlier
//! messages, and a slow subscriber drops the oldest messages rather than
//! stalling the publisher.
//!
//! Two message shapes share the machinery:
//!
//! - **Event frames**: `<topic> <json-payload>`, the two logical parts of
//!   a bus message on one line, split at the first space.
//! - **Raw lines**: formatted log records, broadcast verbatim.

use crate::error::{AssistantError, Result};
use crate::events::BusEvent;
use serde_json::Value;
use std::net::SocketAddr;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Per-publisher fan-out buffer; slow subscribers lag past this and drop.
const FANOUT_CAPACITY: usize = 256;

/// A bound publisher socket.
pub struct Publisher {
    tx: broadcast::Sender<String>,
    local_addr: SocketAddr,
    cancel: CancellationToken,
}

impl Publisher {
    /// Bind a publisher on `127.0.0.1:port` and start accepting subscribers.
    ///
    /// Passing port 0 binds an ephemeral port (tests); the bound address is
    /// available from [`Publisher::local_addr`].
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .await
            .map_err(|e| AssistantError::Ipc(format!("cannot bind publisher port {port}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AssistantError::Ipc(format!("publisher local addr: {e}")))?;
        let (tx, _rx) = broadcast::channel(FANOUT_CAPACITY);
        let cancel = CancellationToken::new();

        let accept_tx = tx.clone();
        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!("subscriber connected from {peer}");
                                spawn_forwarder(stream, accept_tx.subscribe());
                            }
                            Err(e) => {
                                warn!("publisher accept failed: {e}");
                            }
                        }
                    }
                }
            }
        });

        info!("publisher listening on {local_addr}");
        Ok(Self {
            tx,
            local_addr,
            cancel,
        })
    }

    /// The bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Broadcast a topic + JSON payload frame.
    pub fn broadcast(&self, topic: &str, payload: &Value) {
        self.broadcast_line(format!("{topic} {payload}"));
    }

    /// Broadcast a typed bus event.
    pub fn broadcast_event(&self, event: &BusEvent) {
        self.broadcast(event.topic(), &event.payload());
    }

    /// Broadcast a raw line (log records).
    pub fn broadcast_line(&self, line: String) {
        // No subscribers is not an error.
        let _ = self.tx.send(line);
    }

    /// Stop accepting subscribers and drop existing ones.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// A cloneable broadcasting handle, safe to hand to other threads
    /// without tying them to the socket's lifetime.
    pub fn handle(&self) -> PublisherHandle {
        PublisherHandle {
            tx: self.tx.clone(),
        }
    }
}

/// Broadcast-only handle onto a [`Publisher`].
#[derive(Clone)]
pub struct PublisherHandle {
    tx: broadcast::Sender<String>,
}

impl PublisherHandle {
    /// Broadcast a topic + JSON payload frame.
    pub fn broadcast(&self, topic: &str, payload: &Value) {
        self.broadcast_line(format!("{topic} {payload}"));
    }

    /// Broadcast a typed bus event.
    pub fn broadcast_event(&self, event: &BusEvent) {
        self.broadcast(event.topic(), &event.payload());
    }

    /// Broadcast a raw line (log records).
    pub fn broadcast_line(&self, line: String) {
        let _ = self.tx.send(line);
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Copy broadcast lines onto one subscriber connection until it drops.
fn spawn_forwarder(stream: TcpStream, mut rx: broadcast::Receiver<String>) {
    tokio::spawn(async move {
        let mut stream = stream;
        loop {
            match rx.recv().await {
                Ok(line) => {
                    if stream.write_all(line.as_bytes()).await.is_err()
                        || stream.write_all(b"\n").await.is_err()
                    {
                        debug!("subscriber disconnected");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("subscriber lagged; dropped {n} messages");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

/// A connected subscriber.
pub struct Subscriber {
    reader: BufReader<TcpStream>,
    /// Topic prefix filter; empty subscribes to everything.
    prefix: String,
}

impl Subscriber {
    /// Connect to a publisher on `127.0.0.1:port`, receiving all topics.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect(port: u16) -> Result<Self> {
        Self::connect_filtered(port, "").await
    }

    /// Connect with a topic prefix filter (`"init."` receives only
    /// `init.*` frames).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails.
    pub async fn connect_filtered(port: u16, prefix: &str) -> Result<Self> {
        let stream = TcpStream::connect(("127.0.0.1", port))
            .await
            .map_err(|e| AssistantError::Ipc(format!("cannot reach publisher on {port}: {e}")))?;
        Ok(Self {
            reader: BufReader::new(stream),
            prefix: prefix.to_owned(),
        })
    }

    /// Receive the next raw line. Returns `None` when the publisher closes.
    ///
    /// # Errors
    ///
    /// Returns an error on socket failure.
    pub async fn next_line(&mut self) -> Result<Option<String>> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .map_err(|e| AssistantError::Ipc(format!("subscriber read: {e}")))?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_owned()))
    }

    /// Receive the next event frame matching the prefix filter.
    ///
    /// Unparseable frames are skipped; `None` means the publisher closed.
    ///
    /// # Errors
    ///
    /// Returns an error on socket failure.
    pub async fn next_event(&mut self) -> Result<Option<(String, Value)>> {
        loop {
            let Some(line) = self.next_line().await? else {
                return Ok(None);
            };
            let Some((topic, payload)) = split_frame(&line) else {
                debug!("skipping malformed frame: {line}");
                continue;
            };
            if !topic.starts_with(&self.prefix) {
                continue;
            }
            return Ok(Some((topic.to_owned(), payload)));
        }
    }
}

/// Split a `topic payload` frame at the first space.
fn split_frame(line: &str) -> Option<(&str, Value)> {
    let (topic, rest) = line.split_once(' ')?;
    if topic.is_empty() || !topic.is_ascii() {
        return None;
    }
    serde_json::from_str(rest).ok().map(|payload| (topic, payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[tokio::test]
    async fn subscriber_receives_event_frames() {
        let publisher = Publisher::bind(0).await.expect("bind");
        let mut subscriber = Subscriber::connect(publisher.port()).await.expect("connect");
        // Give the accept loop a beat to register the subscriber.
        tokio::time::sleep(Duration::from_millis(50)).await;

        publisher.broadcast("state.changed", &json!({ "state": "LISTENING" }));
        let (topic, payload) = tokio::time::timeout(Duration::from_secs(2), subscriber.next_event())
            .await
            .expect("no timeout")
            .expect("read")
            .expect("open");
        assert_eq!(topic, "state.changed");
        assert_eq!(payload["state"], "LISTENING");
    }

    #[tokio::test]
    async fn prefix_filter_drops_other_topics() {
        let publisher = Publisher::bind(0).await.expect("bind");
        let mut subscriber = Subscriber::connect_filtered(publisher.port(), "init.")
            .await
            .expect("connect");
        tokio::time::sleep(Duration::from_millis(50)).await;

        publisher.broadcast("state.changed", &json!({ "state": "DORMANT" }));
        publisher.broadcast("init.status_update", &json!({ "component": "llm" }));

        let (topic, _payload) = tokio::time::timeout(Duration::from_secs(2), subscriber.next_event())
            .await
            .expect("no timeout")
            .expect("read")
            .expect("open");
        assert_eq!(topic, "init.status_update");
    }

    #[tokio::test]
    async fn late_subscribers_miss_earlier_messages() {
        let publisher = Publisher::bind(0).await.expect("bind");
        publisher.broadcast("tts.started", &json!({}));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut subscriber = Subscriber::connect(publisher.port()).await.expect("connect");
        tokio::time::sleep(Duration::from_millis(50)).await;
        publisher.broadcast("tts.finished", &json!({}));

        let (topic, _payload) = tokio::time::timeout(Duration::from_secs(2), subscriber.next_event())
            .await
            .expect("no timeout")
            .expect("read")
            .expect("open");
        assert_eq!(topic, "tts.finished");
    }

    #[tokio::test]
    async fn broadcast_without_subscribers_is_fine() {
        let publisher = Publisher::bind(0).await.expect("bind");
        publisher.broadcast("vad.status_changed", &json!({ "status": "speech" }));
    }

    #[test]
    fn frame_splitting_rejects_junk() {
        assert!(split_frame("no-payload-here").is_none());
        assert!(split_frame(" {}").is_none());
        assert!(split_frame("topic not-json").is_none());
        let (topic, payload) = split_frame("a.b {\"x\":1}").expect("valid");
        assert_eq!(topic, "a.b");
        assert_eq!(payload["x"], 1);
    }
}
