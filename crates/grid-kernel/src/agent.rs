//! Agents — long-running tasks that live alongside a kernel.

use crate::kernel::Kernel;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;

/// A task started by [`Kernel::add_agent`].
///
/// `run` receives the kernel it was added to and the kernel's shutdown
/// signal. It should return promptly once the signal flips to `true`;
/// `stop` waits a short grace period and then aborts the task.
#[async_trait]
pub trait Agent: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    async fn run(&self, kernel: Arc<Kernel>, shutdown: watch::Receiver<bool>);
}
