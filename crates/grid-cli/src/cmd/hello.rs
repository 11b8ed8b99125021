//! `grid hello` — run the hello agent against a peer.

use super::{run_until_interrupted, runtime, start_or_exit};
use crate::ui;
use grid_kernel::{HelloAgent, Kernel, KernelConfig};
use std::sync::Arc;
use std::time::Duration;

pub fn cmd_hello(
    config: KernelConfig,
    name: String,
    port: Option<u16>,
    peer: Option<String>,
    interval_ms: u64,
) {
    let port = port.unwrap_or(config.listen_port);

    runtime().block_on(async {
        let kernel = Arc::new(Kernel::new(config));
        if let Some(peer) = peer {
            kernel.set_peer(peer);
        }
        let Some(peer) = kernel.peer() else {
            ui::error_with_fix(
                "The hello agent needs a peer to greet",
                "Pass --peer host:port or set `peer` in config.toml",
            );
            std::process::exit(1);
        };

        let addr = start_or_exit(&kernel, port).await;
        let agent = HelloAgent::new(name.clone(), Duration::from_millis(interval_ms.max(1)));
        if let Err(e) = kernel.add_agent(Arc::new(agent)).await {
            ui::error(&format!("Failed to start hello agent: {e}"));
            std::process::exit(1);
        }

        ui::success(&format!("{name} listening on {addr}"));
        ui::kv("Greeting", &peer);
        ui::hint("Press Ctrl+C to stop");

        run_until_interrupted(&kernel).await;
    });
}
