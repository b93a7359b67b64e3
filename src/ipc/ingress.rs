//! Typed-command ingress (push/pull).
//!
//! The frontend binds a port; the GUI and test tools connect and push
//! utterance lines, which are queued for the frontend's command loop as if
//! they had been spoken.

use crate::error::{AssistantError, Result};
use std::io::Write;
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;
use tokio::io::AsyncBufReadExt;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Receiving side of the text-command channel, bound by the frontend.
pub struct TextIngress {
    local_addr: SocketAddr,
    rx: crossbeam_channel::Receiver<String>,
    cancel: CancellationToken,
}

impl TextIngress {
    /// Bind `127.0.0.1:port` and start queuing pushed lines.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be bound.
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("127.0.0.1", port)).await.map_err(|e| {
            AssistantError::Ipc(format!("cannot bind text-command port {port}: {e}"))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| AssistantError::Ipc(format!("ingress local addr: {e}")))?;
        let (tx, rx) = crossbeam_channel::unbounded();
        let cancel = CancellationToken::new();

        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!("text-command client connected from {peer}");
                                spawn_reader(stream, tx.clone(), accept_cancel.clone());
                            }
                            Err(e) => warn!("ingress accept failed: {e}"),
                        }
                    }
                }
            }
        });

        info!("text-command ingress listening on {local_addr}");
        Ok(Self {
            local_addr,
            rx,
            cancel,
        })
    }

    /// The bound port.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Pull the next queued line, waiting up to `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<String> {
        self.rx.recv_timeout(timeout).ok()
    }

    /// Stop accepting connections.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TextIngress {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn spawn_reader(
    stream: tokio::net::TcpStream,
    tx: crossbeam_channel::Sender<String>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        let mut reader = tokio::io::BufReader::new(stream);
        let mut line = String::new();
        loop {
            line.clear();
            let read = tokio::select! {
                () = cancel.cancelled() => break,
                read = reader.read_line(&mut line) => read,
            };
            match read {
                Ok(0) | Err(_) => break,
                Ok(_) => {
                    let text = line.trim();
                    if !text.is_empty() && tx.send(text.to_owned()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

/// Push one utterance line to a frontend ingress (GUI and test tools).
///
/// # Errors
///
/// Returns an error if the frontend cannot be reached.
pub fn push_text(port: u16, text: &str) -> Result<()> {
    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(2))
        .map_err(|e| AssistantError::Ipc(format!("cannot reach frontend on {port}: {e}")))?;
    stream
        .write_all(text.as_bytes())
        .and_then(|()| stream.write_all(b"\n"))
        .map_err(|e| AssistantError::Ipc(format!("push failed: {e}")))?;
    Ok(())
}
