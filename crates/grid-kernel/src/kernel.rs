//! The kernel — listener, accept loop, dispatch and dial-per-publish.
//!
//! A [`Kernel`] owns a subscription registry, an optional TCP listener and
//! one outbound peer address. Inbound connections are served by one task
//! each (see [`crate::connection`]); every `publish` opens its own outbound
//! connection, writes one frame and closes it.
//!
//! Lifecycle: `Unstarted` → `start` → `Running` → `stop` → `Stopped`. A
//! stopped kernel cannot be started again.

use crate::agent::Agent;
use crate::config::KernelConfig;
use crate::connection::{serve_connection, DispatchContext};
use crate::error::{KernelError, KernelResult};
use crate::registry::SubscriptionRegistry;
use crate::stats::{KernelStats, StatsSnapshot};
use grid_wire::{write_message, Message, WireError};
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Pause after a failed accept before trying again.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(250);

/// How long `stop` waits for each agent to finish.
const AGENT_STOP_GRACE: Duration = Duration::from_secs(5);

/// Lifecycle state of a kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelState {
    Unstarted,
    Running,
    Stopped,
}

impl fmt::Display for KernelState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unstarted => write!(f, "unstarted"),
            Self::Running => write!(f, "running"),
            Self::Stopped => write!(f, "stopped"),
        }
    }
}

struct Lifecycle {
    state: KernelState,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
    agent_tasks: Vec<(String, JoinHandle<()>)>,
}

/// A process-local message kernel.
pub struct Kernel {
    config: KernelConfig,
    registry: SubscriptionRegistry,
    peer: RwLock<Option<String>>,
    lifecycle: Mutex<Lifecycle>,
    stats: Arc<KernelStats>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl Kernel {
    /// Create an unstarted kernel. The configured peer, if any, becomes the
    /// initial publish target.
    pub fn new(config: KernelConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            peer: RwLock::new(config.peer.clone()),
            config,
            registry: SubscriptionRegistry::new(),
            lifecycle: Mutex::new(Lifecycle {
                state: KernelState::Unstarted,
                local_addr: None,
                accept_task: None,
                agent_tasks: Vec::new(),
            }),
            stats: Arc::new(KernelStats::default()),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Set the outbound target used by every future `publish`.
    /// Reachability is not checked here.
    pub fn set_peer(&self, addr: impl Into<String>) {
        let addr = addr.into();
        info!(peer = %addr, "Peer set");
        let mut peer = self.peer.write().unwrap_or_else(|e| e.into_inner());
        *peer = Some(addr);
    }

    pub fn peer(&self) -> Option<String> {
        self.peer.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Register `handler` for `protocol`, replacing any previous handler.
    ///
    /// Handlers run synchronously on the connection task that received the
    /// message; long-running work should be handed off to a spawned task.
    pub fn subscribe<F>(&self, protocol: impl AsRef<[u8]>, handler: F)
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        let protocol = protocol.as_ref();
        let replaced = self.registry.subscribe(protocol, Arc::new(handler));
        debug!(protocol = %hex::encode(protocol), replaced, "Subscribed");
    }

    /// Remove the handler for `protocol`. No-op if none is registered.
    pub fn unsubscribe(&self, protocol: impl AsRef<[u8]>) {
        let protocol = protocol.as_ref();
        if self.registry.unsubscribe(protocol) {
            debug!(protocol = %hex::encode(protocol), "Unsubscribed");
        }
    }

    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub async fn state(&self) -> KernelState {
        self.lifecycle.lock().await.state
    }

    /// The bound listener address while running.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.lifecycle.lock().await.local_addr
    }

    /// Bind `listen_host:port` and start accepting connections.
    ///
    /// Port 0 picks an ephemeral port; the bound address is returned. If the
    /// bind fails the kernel stays unstarted.
    pub async fn start(&self, port: u16) -> KernelResult<SocketAddr> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state != KernelState::Unstarted {
            return Err(KernelError::InvalidState {
                current: lifecycle.state,
                operation: "start",
            });
        }

        let addr = format!("{}:{}", self.config.listen_host, port);
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| KernelError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| KernelError::Bind { addr, source })?;

        info!(%local_addr, "Listening");

        let ctx = DispatchContext {
            registry: self.registry.clone(),
            stats: Arc::clone(&self.stats),
            mode: self.config.dispatch,
        };
        let shutdown = self.shutdown_rx.clone();
        lifecycle.accept_task = Some(tokio::spawn(accept_loop(listener, ctx, shutdown)));
        lifecycle.local_addr = Some(local_addr);
        lifecycle.state = KernelState::Running;
        Ok(local_addr)
    }

    /// Send one message to the configured peer over a fresh connection.
    ///
    /// Dial and write share the configured publish timeout. There is no
    /// retry; the error is returned to the caller.
    pub async fn publish(&self, msg: &Message) -> KernelResult<()> {
        let state = self.state().await;
        if state == KernelState::Stopped {
            return Err(KernelError::InvalidState {
                current: state,
                operation: "publish",
            });
        }
        let peer = self.peer().ok_or(KernelError::NoPeer)?;

        match self.config.publish_timeout() {
            Some(timeout) => tokio::time::timeout(timeout, send_one(&peer, msg))
                .await
                .map_err(|_| KernelError::Timeout {
                    peer: peer.clone(),
                    timeout,
                })?,
            None => send_one(&peer, msg).await,
        }
    }

    /// Start `agent` on its own task. It receives this kernel and the
    /// kernel's shutdown signal, and is awaited by `stop`.
    pub async fn add_agent(self: &Arc<Self>, agent: Arc<dyn Agent>) -> KernelResult<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.state == KernelState::Stopped {
            return Err(KernelError::InvalidState {
                current: lifecycle.state,
                operation: "add an agent",
            });
        }
        let name = agent.name().to_string();
        info!(agent = %name, "Starting agent");
        let kernel = Arc::clone(self);
        let shutdown = self.shutdown_rx.clone();
        let task = tokio::spawn(async move { agent.run(kernel, shutdown).await });
        lifecycle.agent_tasks.push((name, task));
        Ok(())
    }

    /// Signal cancellation, close the listener and wait for agents.
    ///
    /// Connection tasks stop at their next frame boundary; a handler that is
    /// already running completes. Calling `stop` again is a no-op.
    pub async fn stop(&self) {
        let (accept_task, agent_tasks) = {
            let mut lifecycle = self.lifecycle.lock().await;
            if lifecycle.state == KernelState::Stopped {
                return;
            }
            lifecycle.state = KernelState::Stopped;
            lifecycle.local_addr = None;
            (
                lifecycle.accept_task.take(),
                std::mem::take(&mut lifecycle.agent_tasks),
            )
        };

        let _ = self.shutdown_tx.send(true);

        if let Some(task) = accept_task {
            if let Err(e) = task.await {
                error!(error = %e, "Accept loop panicked");
            }
        }
        for (name, mut task) in agent_tasks {
            match tokio::time::timeout(AGENT_STOP_GRACE, &mut task).await {
                Ok(Ok(())) => debug!(agent = %name, "Agent stopped"),
                Ok(Err(e)) => error!(agent = %name, error = %e, "Agent panicked"),
                Err(_) => {
                    warn!(agent = %name, "Agent did not stop in time, aborting");
                    task.abort();
                }
            }
        }
        info!("Kernel stopped");
    }
}

impl fmt::Debug for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("peer", &self.peer())
            .field("registry", &self.registry)
            .finish()
    }
}

/// Dial, write one frame, close.
async fn send_one(peer: &str, msg: &Message) -> KernelResult<()> {
    let mut stream = TcpStream::connect(peer)
        .await
        .map_err(|source| KernelError::Dial {
            peer: peer.to_string(),
            source,
        })?;
    write_message(&mut stream, msg).await?;
    stream.shutdown().await.map_err(WireError::from)?;
    debug!(
        %peer,
        protocol = %hex::encode(&msg.protocol),
        payload_len = msg.payload.len(),
        "Published"
    );
    Ok(())
}

/// Accept connections until shutdown, one serving task per connection.
/// The listener is dropped, and its socket closed, when the loop exits.
async fn accept_loop(
    listener: TcpListener,
    ctx: DispatchContext,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        if *shutdown.borrow() {
            break;
        }
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(%addr, "Accepted connection");
                    ctx.stats.connection_accepted();
                    tokio::spawn(serve_connection(stream, addr, ctx.clone(), shutdown.clone()));
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    if backoff(ACCEPT_BACKOFF, &mut shutdown).await {
                        break;
                    }
                }
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
    info!("Accept loop stopped");
}

/// Sleep for `delay` unless shutdown comes first. Returns true if the
/// kernel is stopping.
async fn backoff(delay: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(delay) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
