//! Logging setup.
//!
//! Every process writes a rotating file under the configured folder, plus
//! a console layer when enabled. The backend additionally forwards INFO+
//! records to the log-broadcast socket so the GUI can render a live
//! stream. Safe to call more than once; later calls are no-ops.

use crate::config::LoggingConfig;
use crate::error::Result;
use crate::ipc::pubsub::PublisherHandle;
use tracing::Level;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Log file name inside `logging.folder`.
const LOG_FILE_PREFIX: &str = "aist.log";

/// Keeps the background file writer alive; hold it for the process
/// lifetime.
pub struct LogGuard {
    _file_guard: tracing_appender::non_blocking::WorkerGuard,
}

/// Initialize tracing for this process.
///
/// # Errors
///
/// Returns an error when the log folder cannot be created.
pub fn init(config: &LoggingConfig, broadcast: Option<PublisherHandle>) -> Result<LogGuard> {
    std::fs::create_dir_all(&config.folder)?;

    let file_appender = tracing_appender::rolling::daily(&config.folder, LOG_FILE_PREFIX);
    let (file_writer, file_guard) = tracing_appender::non_blocking(file_appender);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false);

    let console_layer = config
        .console_enabled
        .then(|| tracing_subscriber::fmt::layer().with_target(true));

    let broadcast_layer = broadcast.map(|handle| BroadcastLayer { handle });

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // try_init keeps repeated initialization (tests, embedded use) quiet.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .with(console_layer)
        .with(broadcast_layer)
        .try_init();

    Ok(LogGuard {
        _file_guard: file_guard,
    })
}

/// Forwards formatted records onto the log-broadcast channel.
struct BroadcastLayer {
    handle: PublisherHandle,
}

impl<S: tracing::Subscriber> Layer<S> for BroadcastLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        // INFO and above only; DEBUG would flood the GUI.
        if *metadata.level() > Level::INFO {
            return;
        }
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        let line = format!(
            "{} - {:<5} - {} - {message}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            metadata.level(),
            metadata.target(),
        );
        self.handle.broadcast_line(line);
    }
}

/// Pulls the `message` field out of an event.
struct MessageVisitor<'a>(&'a mut String);

impl tracing::field::Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            use std::fmt::Write;
            let _ = write!(self.0, "{value:?}");
        }
    }
}
