//! Hello agent — a two-node ping-pong over the hello protocol.
//!
//! Every interval the agent publishes `hello from <name>` to its kernel's
//! peer. When it receives `hello from <other>` it answers with
//! `hello back from <name> to <other>`. Replies are never answered, and an
//! agent never answers its own greeting.

use crate::agent::Agent;
use crate::kernel::Kernel;
use async_trait::async_trait;
use grid_wire::{Message, ProtocolId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Definition the hello protocol identifier is derived from.
pub const HELLO_PROTOCOL_DEFINITION: &[u8] = b"grid/hello/1";

const GREETING_PREFIX: &str = "hello from ";

/// The hello protocol identifier.
pub fn hello_protocol() -> ProtocolId {
    ProtocolId::from_definition(HELLO_PROTOCOL_DEFINITION)
}

/// Counters kept by a [`HelloAgent`].
#[derive(Debug, Default)]
pub struct HelloStats {
    pub greetings_sent: AtomicU64,
    pub received: AtomicU64,
    pub replies_sent: AtomicU64,
}

pub struct HelloAgent {
    name: String,
    protocol: ProtocolId,
    interval: Duration,
    stats: Arc<HelloStats>,
}

impl HelloAgent {
    pub fn new(name: impl Into<String>, interval: Duration) -> Self {
        Self {
            name: name.into(),
            protocol: hello_protocol(),
            interval,
            stats: Arc::new(HelloStats::default()),
        }
    }

    pub fn stats(&self) -> Arc<HelloStats> {
        Arc::clone(&self.stats)
    }

    /// The reply to `text`, if it is a greeting from someone else.
    fn reply_to(&self, text: &str) -> Option<String> {
        let sender = text.strip_prefix(GREETING_PREFIX)?;
        if sender == self.name {
            return None;
        }
        Some(format!("hello back from {} to {}", self.name, sender))
    }

    fn greeting(&self) -> Message {
        Message::new(
            self.protocol.as_bytes(),
            format!("{GREETING_PREFIX}{}", self.name),
        )
    }
}

/// Publish off the connection task; handlers must not block.
fn spawn_publish(kernel: Arc<Kernel>, msg: Message, agent: String) {
    tokio::spawn(async move {
        if let Err(e) = kernel.publish(&msg).await {
            warn!(%agent, error = %e, "Hello reply failed");
        }
    });
}

#[async_trait]
impl Agent for HelloAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, kernel: Arc<Kernel>, mut shutdown: watch::Receiver<bool>) {
        // Handlers live in the kernel's registry; a strong reference there
        // would keep the kernel alive forever.
        let weak: Weak<Kernel> = Arc::downgrade(&kernel);
        let responder = HelloAgent {
            name: self.name.clone(),
            protocol: self.protocol.clone(),
            interval: self.interval,
            stats: Arc::clone(&self.stats),
        };
        kernel.subscribe(self.protocol.as_bytes(), move |msg: Message| {
            let text = String::from_utf8_lossy(&msg.payload);
            responder.stats.received.fetch_add(1, Ordering::Relaxed);
            info!(agent = %responder.name, message = %text, "Hello received");

            let Some(reply) = responder.reply_to(&text) else {
                return;
            };
            let Some(kernel) = weak.upgrade() else {
                return;
            };
            responder.stats.replies_sent.fetch_add(1, Ordering::Relaxed);
            spawn_publish(
                kernel,
                Message::new(responder.protocol.as_bytes(), reply),
                responder.name.clone(),
            );
        });

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let greeting = self.greeting();
                    tokio::select! {
                        sent = kernel.publish(&greeting) => match sent {
                            Ok(()) => {
                                self.stats.greetings_sent.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => warn!(agent = %self.name, error = %e, "Hello publish failed"),
                        },
                        // A publish without a timeout can stall on a dead peer.
                        _ = shutdown.wait_for(|stopping| *stopping) => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        kernel.unsubscribe(self.protocol.as_bytes());
        debug!(agent = %self.name, "Hello agent stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_to_greeting() {
        let agent = HelloAgent::new("alice", Duration::from_secs(1));
        assert_eq!(
            agent.reply_to("hello from bob").as_deref(),
            Some("hello back from alice to bob")
        );
    }

    #[test]
    fn test_no_reply_to_self_or_replies() {
        let agent = HelloAgent::new("alice", Duration::from_secs(1));
        assert_eq!(agent.reply_to("hello from alice"), None);
        assert_eq!(agent.reply_to("hello back from bob to alice"), None);
        assert_eq!(agent.reply_to("something else"), None);
    }

    #[tokio::test]
    async fn test_stop_interrupts_stalled_greeting() {
        use crate::config::KernelConfig;
        use tokio::net::{TcpSocket, TcpStream};

        // A listener that never accepts; once its backlog is full further
        // connects hang.
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();
        let mut held = Vec::new();
        for _ in 0..8 {
            if let Ok(Ok(stream)) =
                tokio::time::timeout(Duration::from_millis(200), TcpStream::connect(addr)).await
            {
                held.push(stream);
            }
        }

        let kernel = Arc::new(Kernel::new(KernelConfig {
            listen_host: "127.0.0.1".to_string(),
            publish_timeout_ms: 0,
            peer: Some(addr.to_string()),
            ..KernelConfig::default()
        }));
        let agent = Arc::new(HelloAgent::new("alice", Duration::from_millis(10)));
        kernel.add_agent(agent).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        tokio::time::timeout(Duration::from_secs(2), kernel.stop())
            .await
            .expect("stop waited on a stalled greeting");
        assert!(!kernel.registry().contains(hello_protocol().as_bytes()));
        drop(held);
    }

    #[test]
    fn test_greeting_uses_hello_protocol() {
        let agent = HelloAgent::new("alice", Duration::from_secs(1));
        let msg = agent.greeting();
        assert_eq!(msg.protocol, hello_protocol().into_bytes());
        assert_eq!(msg.payload, b"hello from alice");
        assert_eq!(msg.protocol.len(), 32);
    }
}
