//! Command implementations.

pub mod hello;
pub mod listen;
pub mod mnemonic;
pub mod publish;

use crate::ui;
use grid_kernel::{Kernel, KernelError};
use grid_wire::ProtocolId;
use std::net::SocketAddr;

/// Longest label that fits in a `u64`.
const MAX_MNEMONIC_LEN: usize = 8;

/// Parse a protocol argument: `0x`-prefixed hex bytes, or a label of at most
/// eight bytes taken as its mnemonic number.
pub(crate) fn parse_protocol(arg: &str) -> Result<ProtocolId, String> {
    if arg.starts_with("0x") || arg.starts_with("0X") {
        return ProtocolId::from_hex(arg).map_err(|e| format!("Invalid hex protocol '{arg}': {e}"));
    }
    if arg.is_empty() || arg.len() > MAX_MNEMONIC_LEN {
        return Err(format!(
            "Protocol label '{arg}' must be 1 to {MAX_MNEMONIC_LEN} bytes (or use 0x hex)"
        ));
    }
    Ok(ProtocolId::from_mnemonic(arg))
}

/// Parse a protocol argument or exit with a usage error.
pub(crate) fn require_protocol(arg: &str) -> ProtocolId {
    parse_protocol(arg).unwrap_or_else(|e| {
        ui::error(&e);
        std::process::exit(2);
    })
}

pub(crate) fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        ui::error(&format!("Failed to create Tokio runtime: {e}"));
        std::process::exit(1);
    })
}

/// Start `kernel` on `port`, exiting the process if the listener cannot be
/// opened.
pub(crate) async fn start_or_exit(kernel: &Kernel, port: u16) -> SocketAddr {
    match kernel.start(port).await {
        Ok(addr) => addr,
        Err(e @ KernelError::Bind { .. }) => {
            ui::error_with_fix(
                &e.to_string(),
                "Is another process using this port? Pick one with --port",
            );
            std::process::exit(1);
        }
        Err(e) => {
            ui::error(&format!("Failed to start kernel: {e}"));
            std::process::exit(1);
        }
    }
}

/// Block until Ctrl+C, then stop the kernel.
pub(crate) async fn run_until_interrupted(kernel: &Kernel) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
    }
    println!();
    ui::section("Shutting down");
    kernel.stop().await;
    let stats = kernel.stats();
    ui::kv("Connections", &stats.connections_accepted.to_string());
    ui::kv("Dispatched", &stats.messages_dispatched.to_string());
    ui::kv("Unhandled", &stats.dispatch_misses.to_string());
    ui::kv("Bad frames", &stats.decode_errors.to_string());
    ui::kv("Dispatch failures", &stats.dispatch_failures.to_string());
}
