//! Request-reply command channel.
//!
//! The backend binds a single port and serializes all request handling
//! through one worker; the frontend connects with bounded send/receive
//! timeouts and synthesizes a user-facing reply when the backend cannot be
//! reached, so the UI never stalls on IPC.

use crate::error::{AssistantError, Result};
use crate::ipc::protocol::{CommandRequest, DispatchResponse};
use crate::state::AssistantState;
use serde_json::{Value, json};
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long the serving worker sleeps between shutdown checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Default client send/receive timeout.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Reply sent when a request cannot be parsed or the handler is gone.
fn error_reply() -> Value {
    json!({
        "action": "COMMAND",
        "speak": "An error occurred processing your request."
    })
}

type Job = (String, tokio::sync::oneshot::Sender<String>);

/// The backend's command-channel server.
///
/// Connections are accepted concurrently, but requests funnel through a
/// single worker thread so dispatch sees one command at a time.
pub struct CommandServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl CommandServer {
    /// Bind `127.0.0.1:port` and start serving requests through `handler`.
    ///
    /// The handler receives each parsed request and returns the reply JSON.
    /// Port 0 binds an ephemeral port.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn bind<F>(port: u16, handler: F) -> Result<Self>
    where
        F: FnMut(CommandRequest) -> Value + Send + 'static,
    {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            AssistantError::Ipc(format!("cannot bind command port {port}: {e}"))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AssistantError::Ipc(format!("command server local addr: {e}")))?;
        let cancel = CancellationToken::new();

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let worker_cancel = cancel.clone();
        let worker = std::thread::Builder::new()
            .name("command-serve".to_owned())
            .spawn(move || serve_worker(job_rx, worker_cancel, handler))
            .map_err(|e| AssistantError::Ipc(format!("cannot spawn serving thread: {e}")))?;

        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!("command client connected from {peer}");
                                spawn_connection(stream, job_tx.clone(), accept_cancel.clone());
                            }
                            Err(e) => warn!("command accept failed: {e}"),
                        }
                    }
                }
            }
        });

        info!("command server listening on {local_addr}");
        Ok(Self {
            local_addr,
            cancel,
            worker: Some(worker),
        })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting and join the serving worker.
    pub fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            error!("command serving thread panicked");
        }
        info!("command server stopped");
    }
}

impl Drop for CommandServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The serial request loop: poll the queue, dispatch, reply.
fn serve_worker<F>(
    jobs: crossbeam_channel::Receiver<Job>,
    cancel: CancellationToken,
    mut handler: F,
) where
    F: FnMut(CommandRequest) -> Value,
{
    loop {
        match jobs.recv_timeout(POLL_INTERVAL) {
            Ok((raw, reply_tx)) => {
                let reply = match serde_json::from_str::<CommandRequest>(&raw) {
                    Ok(request) => handler(request),
                    Err(e) => {
                        error!("malformed command request: {e}");
                        error_reply()
                    }
                };
                let _ = reply_tx.send(reply.to_string());
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                if cancel.is_cancelled() {
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
    }
}

/// Serve one connection: read request lines, queue them, write replies.
fn spawn_connection(
    stream: tokio::net::TcpStream,
    jobs: crossbeam_channel::Sender<Job>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = tokio::io::BufReader::new(read_half);
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = reader.read_line(&mut line) => read,
            };
            match read {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    debug!("command connection read failed: {e}");
                    break;
                }
            }
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }

            let (reply_tx, reply_rx) = tokio::sync::oneshot::channel();
            let reply = if jobs.send((trimmed.to_owned(), reply_tx)).is_ok() {
                reply_rx
                    .await
                    .unwrap_or_else(|_| error_reply().to_string())
            } else {
                error_reply().to_string()
            };

            if write_half.write_all(reply.as_bytes()).await.is_err()
                || write_half.write_all(b"\n").await.is_err()
            {
                break;
            }
        }
    });
}

/// Why a client request failed.
enum SendFailure {
    Timeout,
    Unreachable,
}

/// Synchronous command-channel client used by the frontend.
///
/// Every failure path synthesizes a speakable reply so callers never see an
/// error; they always get something to act on.
pub struct CommandClient {
    port: u16,
    timeout: Duration,
    stream: Option<BufReader<TcpStream>>,
}

impl CommandClient {
    /// Create a client for `127.0.0.1:port` with the default 10 s timeout.
    pub fn new(port: u16) -> Self {
        Self::with_timeout(port, DEFAULT_CLIENT_TIMEOUT)
    }

    /// Create a client with an explicit send/receive timeout.
    pub fn with_timeout(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            stream: None,
        }
    }

    /// Send an utterance and return the backend's decision.
    ///
    /// On timeout or socket failure a synthesized [`DispatchResponse`] is
    /// returned instead.
    pub fn send_command(&mut self, text: &str, state: AssistantState) -> DispatchResponse {
        if text.is_empty() {
            return DispatchResponse::ignore();
        }
        let request = CommandRequest::command(text, state);
        match self.request(&request) {
            // A null or empty reply means "ignore".
            Ok(value) if value.is_null() => DispatchResponse::ignore(),
            Ok(value) if value.as_object().is_some_and(serde_json::Map::is_empty) => {
                DispatchResponse::ignore()
            }
            Ok(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                error!("unparseable backend reply: {e}");
                DispatchResponse::command("I've encountered an unexpected error.")
            }),
            Err(SendFailure::Timeout) => {
                error!("backend did not respond within {:?}", self.timeout);
                DispatchResponse::command("I'm taking too long to think. Please try again.")
            }
            Err(SendFailure::Unreachable) => {
                error!("cannot reach backend on port {}", self.port);
                DispatchResponse::command("I'm having trouble connecting to my brain.")
            }
        }
    }

    /// Ask the backend to re-broadcast an event on the bus.
    pub fn send_event(&mut self, event_type: &str, payload: Value) {
        let request = CommandRequest::Event {
            event_type: event_type.to_owned(),
            payload,
        };
        if self.request(&request).is_err() {
            warn!("failed to forward event '{event_type}' to backend");
        }
    }

    /// Send the clear-conversation sentinel. Returns true when acknowledged.
    pub fn clear_conversation(&mut self, state: AssistantState) -> bool {
        let request =
            CommandRequest::command(crate::ipc::protocol::CLEAR_CONVERSATION_SENTINEL, state);
        self.request(&request).is_ok()
    }

    fn request(&mut self, request: &CommandRequest) -> std::result::Result<Value, SendFailure> {
        let raw = serde_json::to_string(request).map_err(|_| SendFailure::Unreachable)?;
        match self.round_trip(&raw) {
            Ok(value) => Ok(value),
            Err(failure) => {
                // Drop the connection; the next call reconnects.
                self.stream = None;
                Err(failure)
            }
        }
    }

    fn round_trip(&mut self, raw: &str) -> std::result::Result<Value, SendFailure> {
        self.ensure_connected()?;
        let reader = self.stream.as_mut().ok_or(SendFailure::Unreachable)?;

        let stream = reader.get_mut();
        stream
            .write_all(raw.as_bytes())
            .and_then(|()| stream.write_all(b"\n"))
            .map_err(classify_io)?;

        let mut line = String::new();
        let n = reader.read_line(&mut line).map_err(classify_io)?;
        if n == 0 {
            return Err(SendFailure::Unreachable);
        }
        serde_json::from_str(line.trim()).map_err(|_| SendFailure::Unreachable)
    }

    fn ensure_connected(&mut self) -> std::result::Result<(), SendFailure> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr: SocketAddr = ([127, 0, 0, 1], self.port).into();
        let stream =
            TcpStream::connect_timeout(&addr, self.timeout).map_err(|_| SendFailure::Unreachable)?;
        stream
            .set_read_timeout(Some(self.timeout))
            .map_err(|_| SendFailure::Unreachable)?;
        stream
            .set_write_timeout(Some(self.timeout))
            .map_err(|_| SendFailure::Unreachable)?;
        stream.set_nodelay(true).ok();
        self.stream = Some(BufReader::new(stream));
        Ok(())
    }
}

fn classify_io(e: std::io::Error) -> SendFailure {
    match e.kind() {
        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut => SendFailure::Timeout,
        _ => SendFailure::Unreachable,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::protocol::Action;

    fn echo_handler(request: CommandRequest) -> Value {
        match request {
            CommandRequest::Command { payload } => {
                json!({ "action": "COMMAND", "speak": format!("heard {}", payload.text) })
            }
            CommandRequest::Event { .. } => json!({}),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn round_trip_command() {
        let server = CommandServer::bind(0, echo_handler).await.expect("bind");
        let port = server.port();

        let response = tokio::task::spawn_blocking(move || {
            let mut client = CommandClient::new(port);
            client.send_command("hello", AssistantState::Listening)
        })
        .await
        .expect("join");

        assert_eq!(response.action, Action::Command);
        assert_eq!(response.speak.as_deref(), Some("heard hello"));
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn requests_are_processed_one_at_a_time() {
        let mut seen = Vec::new();
        let server = CommandServer::bind(0, move |request| {
            if let CommandRequest::Command { payload } = &request {
                seen.push(payload.text.clone());
                // The handler owns the order; overlapping handling would
                // interleave here.
                std::thread::sleep(Duration::from_millis(20));
            }
            json!({ "action": "IGNORE" })
        })
        .await
        .expect("bind");
        let port = server.port();

        let mut joins = Vec::new();
        for i in 0..4 {
            joins.push(tokio::task::spawn_blocking(move || {
                let mut client = CommandClient::new(port);
                client.send_command(&format!("msg {i}"), AssistantState::Listening)
            }));
        }
        for join in joins {
            let response = join.await.expect("join");
            assert_eq!(response.action, Action::Ignore);
        }
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn timeout_synthesizes_slow_reply() {
        let server = CommandServer::bind(0, |_request| {
            std::thread::sleep(Duration::from_millis(500));
            json!({ "action": "IGNORE" })
        })
        .await
        .expect("bind");
        let port = server.port();

        let response = tokio::task::spawn_blocking(move || {
            let mut client = CommandClient::with_timeout(port, Duration::from_millis(100));
            client.send_command("slow", AssistantState::Listening)
        })
        .await
        .expect("join");

        assert_eq!(response.action, Action::Command);
        assert!(
            response
                .speak
                .as_deref()
                .unwrap_or_default()
                .contains("taking too long")
        );
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn unreachable_backend_synthesizes_brain_reply() {
        let response = tokio::task::spawn_blocking(|| {
            // Nothing listens on this port.
            let mut client = CommandClient::with_timeout(1, Duration::from_millis(200));
            client.send_command("anyone there", AssistantState::Dormant)
        })
        .await
        .expect("join");

        assert_eq!(response.action, Action::Command);
        assert!(
            response
                .speak
                .as_deref()
                .unwrap_or_default()
                .contains("connecting to my brain")
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn malformed_request_gets_error_reply() {
        let server = CommandServer::bind(0, echo_handler).await.expect("bind");
        let port = server.port();

        let reply = tokio::task::spawn_blocking(move || {
            let mut stream = TcpStream::connect(("127.0.0.1", port)).expect("connect");
            stream.write_all(b"this is not json\n").expect("write");
            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).expect("read");
            line
        })
        .await
        .expect("join");

        let value: Value = serde_json::from_str(reply.trim()).expect("json");
        assert_eq!(value["action"], "COMMAND");
        server.shutdown();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn empty_utterance_is_ignored_client_side() {
        let response = tokio::task::spawn_blocking(|| {
            let mut client = CommandClient::new(1);
            client.send_command("", AssistantState::Listening)
        })
        .await
        .expect("join");
        assert_eq!(response.action, Action::Ignore);
    }
}
