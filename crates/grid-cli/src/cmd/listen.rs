//! `grid listen` — run a kernel that prints one protocol's messages.

use super::{require_protocol, run_until_interrupted, runtime, start_or_exit};
use crate::ui;
use grid_kernel::{Kernel, KernelConfig};
use grid_wire::Message;

pub fn cmd_listen(config: KernelConfig, port: Option<u16>, protocol: &str) {
    let protocol = require_protocol(protocol);
    let port = port.unwrap_or(config.listen_port);

    runtime().block_on(async {
        let kernel = Kernel::new(config);
        kernel.subscribe(protocol.as_bytes(), |msg: Message| {
            println!(
                "  [{}] {}",
                hex::encode(&msg.protocol),
                String::from_utf8_lossy(&msg.payload)
            );
        });

        let addr = start_or_exit(&kernel, port).await;
        ui::success(&format!("Listening on {addr}"));
        ui::kv("Protocol", &format!("0x{protocol}"));
        ui::hint("Press Ctrl+C to stop");

        run_until_interrupted(&kernel).await;
    });
}
