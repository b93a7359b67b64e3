//! Push a typed utterance to the frontend, as if it had been spoken.
//!
//! Usage: `aist-send-text <your command>`

use aist::Config;
use aist::ipc::ingress::push_text;
use std::path::Path;

fn main() -> anyhow::Result<()> {
    let text: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if text.trim().is_empty() {
        eprintln!("usage: aist-send-text <your command>");
        std::process::exit(2);
    }

    let config = Config::load_or_default(Path::new("config.yaml"));
    println!("sending command: '{text}'");
    push_text(config.ipc.text_command_port, &text)
        .map_err(|e| anyhow::anyhow!("cannot send command: {e}"))?;
    Ok(())
}
