//! Grid kernel — protocol-keyed message dispatch over point-to-point TCP.
//!
//! A kernel listens on one TCP port, decodes [`grid_wire::Message`] frames
//! from each inbound connection and hands every message to the handler
//! subscribed to its protocol identifier. Outbound, `publish` dials a single
//! configured peer, writes one frame and closes the connection.
//!
//! Delivery is at-most-once and best-effort: no acknowledgement, retry or
//! persistence. Messages on one connection are handled in order; nothing is
//! ordered across connections.

pub mod agent;
pub mod config;
mod connection;
pub mod error;
pub mod hello;
pub mod kernel;
pub mod registry;
pub mod stats;

pub use agent::Agent;
pub use config::{load_config, DispatchMode, KernelConfig, QueueFullPolicy};
pub use error::{KernelError, KernelResult};
pub use hello::HelloAgent;
pub use kernel::{Kernel, KernelState};
pub use registry::{Handler, SubscriptionRegistry};
pub use stats::StatsSnapshot;
