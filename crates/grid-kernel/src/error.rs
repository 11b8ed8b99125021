//! Kernel-specific error types.

use crate::kernel::KernelState;
use grid_wire::WireError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced to callers of the kernel.
///
/// Only [`KernelError::Bind`] is fatal to a kernel; the others are local to
/// one call.
#[derive(Error, Debug)]
pub enum KernelError {
    /// The listening socket could not be opened.
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// The operation is not valid in the kernel's current lifecycle state.
    #[error("Kernel is {current}, cannot {operation}")]
    InvalidState {
        current: KernelState,
        operation: &'static str,
    },

    /// `publish` was called before a peer was configured.
    #[error("No peer configured")]
    NoPeer,

    /// Dialing the peer failed.
    #[error("Failed to connect to peer {peer}: {source}")]
    Dial {
        peer: String,
        #[source]
        source: std::io::Error,
    },

    /// Dial plus write did not finish within the publish timeout.
    #[error("Publish to {peer} timed out after {timeout:?}")]
    Timeout { peer: String, timeout: Duration },

    /// Encoding or writing the frame failed.
    #[error(transparent)]
    Wire(#[from] WireError),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Alias for kernel results.
pub type KernelResult<T> = Result<T, KernelError>;
