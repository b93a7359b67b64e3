//! Frontend executable: audio devices, STT/TTS, state machine, text
//! ingress, and the global quit hotkey. Exit code 0 on clean shutdown.

use aist::Config;
use std::path::Path;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load_or_default(Path::new("config.yaml"));
    let _log_guard = aist::logging::init(&config.logging, None)
        .map_err(|e| anyhow::anyhow!("logging failed to start: {e}"))?;

    tracing::info!("aist frontend starting");

    aist::runtime::frontend::run(config)
        .await
        .map_err(|e| anyhow::anyhow!("frontend failed: {e}"))?;

    tracing::info!("aist frontend shut down cleanly");
    Ok(())
}
