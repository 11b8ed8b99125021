//! `grid publish` — send a single message.

use super::{require_protocol, runtime};
use crate::ui;
use grid_kernel::{Kernel, KernelConfig, KernelError};
use grid_wire::Message;

pub fn cmd_publish(config: KernelConfig, peer: Option<String>, protocol: &str, payload: String) {
    let protocol = require_protocol(protocol);
    let kernel = Kernel::new(config);
    if let Some(peer) = peer {
        kernel.set_peer(peer);
    }
    let msg = Message::new(protocol.into_bytes(), payload.into_bytes());

    let result = runtime().block_on(kernel.publish(&msg));
    match result {
        Ok(()) => ui::success(&format!(
            "Sent {} bytes to {}",
            msg.payload.len(),
            kernel.peer().unwrap_or_default()
        )),
        Err(KernelError::NoPeer) => {
            ui::error_with_fix(
                "No peer to publish to",
                "Pass --peer host:port or set `peer` in config.toml",
            );
            std::process::exit(1);
        }
        Err(e @ (KernelError::Dial { .. } | KernelError::Timeout { .. })) => {
            ui::error_with_fix(&e.to_string(), "Is a kernel listening at that address?");
            std::process::exit(1);
        }
        Err(e) => {
            ui::error(&format!("Publish failed: {e}"));
            std::process::exit(1);
        }
    }
}
