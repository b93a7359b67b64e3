//! Backend executable: dispatcher, skills, memory, and the command/event
//! channels. Exit code 0 on clean shutdown, non-zero when a fatal
//! initialization step fails.

use aist::Config;
use aist::ipc::pubsub::Publisher;
use aist::runtime::backend::Backend;
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_or_default(Path::new("config.yaml"));

    // The log broadcast binds before tracing comes up so the GUI sees the
    // whole startup sequence.
    let log_publisher = Publisher::bind(config.ipc.log_broadcast_port)
        .await
        .map_err(|e| anyhow::anyhow!("log broadcast failed to start: {e}"))?;
    let _log_guard = aist::logging::init(&config.logging, Some(log_publisher.handle()))
        .map_err(|e| anyhow::anyhow!("logging failed to start: {e}"))?;

    tracing::info!("aist backend starting");

    let backend = Backend::start(&config)
        .await
        .map_err(|e| anyhow::anyhow!("backend failed to start: {e}"))?;

    backend.run_until_ctrl_c().await;
    log_publisher.shutdown();
    tracing::info!("aist backend shut down cleanly");
    Ok(())
}
