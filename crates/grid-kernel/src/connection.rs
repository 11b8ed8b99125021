//! Inbound connection handling — read frames and dispatch them in order.
//!
//! Each accepted connection gets one task running [`serve_connection`]. The
//! task decodes frames one after another and hands each message to its
//! handler before reading the next, so a connection's messages are handled
//! strictly in arrival order. A slow handler holds up only its own
//! connection.

use crate::config::{DispatchMode, QueueFullPolicy};
use crate::registry::SubscriptionRegistry;
use crate::stats::KernelStats;
use grid_wire::{FrameReader, Message};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

/// What a connection task shares with its kernel.
#[derive(Clone)]
pub(crate) struct DispatchContext {
    pub registry: SubscriptionRegistry,
    pub stats: Arc<KernelStats>,
    pub mode: DispatchMode,
}

impl DispatchContext {
    /// Run the subscribed handler, or drop the message if there is none.
    fn dispatch(&self, msg: Message) {
        match self.registry.lookup(&msg.protocol) {
            Some(handler) => {
                self.stats.dispatched();
                handler(msg);
            }
            None => {
                self.stats.missed();
                debug!(
                    protocol = %hex::encode(&msg.protocol),
                    "No subscriber, dropping message"
                );
            }
        }
    }
}

/// Where decoded messages go.
enum Sink {
    Inline,
    Queued {
        tx: mpsc::Sender<Message>,
        when_full: QueueFullPolicy,
    },
}

impl Sink {
    /// Hand `msg` on. Returns false once the drain task is gone and nothing
    /// sent from here will be handled.
    async fn deliver(&self, msg: Message, ctx: &DispatchContext, peer: SocketAddr) -> bool {
        match self {
            Sink::Inline => {
                ctx.dispatch(msg);
                true
            }
            Sink::Queued {
                tx,
                when_full: QueueFullPolicy::Block,
            } => tx.send(msg).await.is_ok(),
            Sink::Queued {
                tx,
                when_full: QueueFullPolicy::Drop,
            } => match tx.try_send(msg) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    ctx.stats.queue_dropped();
                    warn!(%peer, "Dispatch queue full, dropping message");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            },
        }
    }
}

/// Read and dispatch messages until the peer disconnects, a frame fails to
/// decode, the queued dispatch task dies, or the kernel stops.
///
/// Stopping is noticed between frames; a handler that is already running
/// is never interrupted. Queued messages are still handled after the
/// connection ends.
pub(crate) async fn serve_connection<R>(
    stream: R,
    peer: SocketAddr,
    ctx: DispatchContext,
    mut shutdown: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let (sink, drain) = match ctx.mode {
        DispatchMode::Inline => (Sink::Inline, None),
        DispatchMode::Queued {
            capacity,
            when_full,
        } => {
            let (tx, mut rx) = mpsc::channel::<Message>(capacity.max(1));
            let drain_ctx = ctx.clone();
            let drain = tokio::spawn(async move {
                while let Some(msg) = rx.recv().await {
                    drain_ctx.dispatch(msg);
                }
            });
            (Sink::Queued { tx, when_full }, Some(drain))
        }
    };

    let mut frames = FrameReader::new(stream);
    loop {
        if *shutdown.borrow() {
            debug!(%peer, "Kernel stopping, closing connection");
            break;
        }
        let next = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(%peer, "Kernel stopping, closing connection");
                    break;
                }
                continue;
            }
            next = frames.next_message() => next,
        };

        match next {
            Ok(Some(msg)) => {
                if !sink.deliver(msg, &ctx, peer).await {
                    ctx.stats.dispatch_failed();
                    error!(%peer, "Dispatch task is gone, closing connection");
                    break;
                }
            }
            Ok(None) => {
                debug!(%peer, "Connection closed by peer");
                break;
            }
            Err(e) if e.is_decode_error() => {
                ctx.stats.decode_error();
                warn!(%peer, error = %e, "Decode error, closing connection");
                break;
            }
            Err(e) => {
                debug!(%peer, error = %e, "Connection read failed");
                break;
            }
        }
    }

    drop(sink);
    if let Some(drain) = drain {
        if let Err(e) = drain.await {
            error!(%peer, error = %e, "Dispatch task failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_wire::encode;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:4000".parse().unwrap()
    }

    fn context(mode: DispatchMode) -> DispatchContext {
        DispatchContext {
            registry: SubscriptionRegistry::new(),
            stats: Arc::new(KernelStats::default()),
            mode,
        }
    }

    fn record_into(ctx: &DispatchContext, protocol: &[u8]) -> Arc<Mutex<Vec<Vec<u8>>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        ctx.registry.subscribe(
            protocol,
            Arc::new(move |msg: Message| sink.lock().unwrap().push(msg.payload)),
        );
        seen
    }

    async fn wait_until(cond: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn frame(protocol: &[u8], payload: &[u8]) -> Vec<u8> {
        encode(&Message::new(protocol.to_vec(), payload.to_vec())).unwrap()
    }

    #[tokio::test]
    async fn test_inline_dispatch_in_order_and_misses() {
        let ctx = context(DispatchMode::Inline);
        let seen = record_into(&ctx, b"a");
        let (_tx, shutdown) = watch::channel(false);

        let mut data = Vec::new();
        for i in 0..10u8 {
            data.extend(frame(b"a", &[i]));
            data.extend(frame(b"unknown", &[i]));
        }
        serve_connection(&data[..], test_addr(), ctx.clone(), shutdown).await;

        let expected: Vec<Vec<u8>> = (0..10u8).map(|i| vec![i]).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
        let stats = ctx.stats.snapshot();
        assert_eq!(stats.messages_dispatched, 10);
        assert_eq!(stats.dispatch_misses, 10);
        assert_eq!(stats.decode_errors, 0);
    }

    #[tokio::test]
    async fn test_decode_error_ends_connection() {
        let ctx = context(DispatchMode::Inline);
        let seen = record_into(&ctx, b"a");
        let (_tx, shutdown) = watch::channel(false);

        let mut data = frame(b"a", b"before");
        data.extend_from_slice(&[0x82, 0x40, 0x40]); // untagged array
        data.extend(frame(b"a", b"after"));
        serve_connection(&data[..], test_addr(), ctx.clone(), shutdown).await;

        assert_eq!(*seen.lock().unwrap(), vec![b"before".to_vec()]);
        assert_eq!(ctx.stats.snapshot().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_truncated_stream_counts_as_decode_error() {
        let ctx = context(DispatchMode::Inline);
        let (_tx, shutdown) = watch::channel(false);
        let data = frame(b"a", b"cut");
        serve_connection(&data[..data.len() - 1], test_addr(), ctx.clone(), shutdown).await;
        assert_eq!(ctx.stats.snapshot().decode_errors, 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_idle_connection() {
        let ctx = context(DispatchMode::Inline);
        let (tx, shutdown) = watch::channel(false);
        let (_client, server) = tokio::io::duplex(64);
        let task = tokio::spawn(serve_connection(server, test_addr(), ctx, shutdown));
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("connection task did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_queued_block_keeps_everything_in_order() {
        let ctx = context(DispatchMode::Queued {
            capacity: 1,
            when_full: QueueFullPolicy::Block,
        });
        let seen = record_into(&ctx, b"q");
        let (_tx, shutdown) = watch::channel(false);

        let mut data = Vec::new();
        for i in 0..50u8 {
            data.extend(frame(b"q", &[i]));
        }
        serve_connection(&data[..], test_addr(), ctx.clone(), shutdown).await;

        let expected: Vec<Vec<u8>> = (0..50u8).map(|i| vec![i]).collect();
        assert_eq!(*seen.lock().unwrap(), expected);
        assert_eq!(ctx.stats.snapshot().queue_drops, 0);
    }

    #[tokio::test]
    async fn test_dead_dispatch_task_closes_connection() {
        let ctx = context(DispatchMode::Queued {
            capacity: 1,
            when_full: QueueFullPolicy::Block,
        });
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let seen = Arc::clone(&seen);
            ctx.registry.subscribe(
                b"q",
                Arc::new(move |msg: Message| {
                    if msg.payload == b"boom" {
                        panic!("handler failed");
                    }
                    seen.lock().unwrap().push(msg.payload);
                }),
            );
        }
        let (_tx, shutdown) = watch::channel(false);

        let mut data = frame(b"q", b"before");
        data.extend(frame(b"q", b"boom"));
        for i in 0..5u8 {
            data.extend(frame(b"q", &[i]));
        }
        tokio::time::timeout(
            Duration::from_secs(5),
            serve_connection(&data[..], test_addr(), ctx.clone(), shutdown),
        )
        .await
        .expect("connection kept reading after its dispatch task died");

        assert_eq!(*seen.lock().unwrap(), vec![b"before".to_vec()]);
        assert_eq!(ctx.stats.snapshot().dispatch_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_queued_drop_discards_when_full() {
        let ctx = context(DispatchMode::Queued {
            capacity: 1,
            when_full: QueueFullPolicy::Drop,
        });
        let (gate_tx, gate_rx) = std::sync::mpsc::channel::<()>();
        let gate_rx = Mutex::new(gate_rx);
        let started = Arc::new(AtomicBool::new(false));
        let seen = Arc::new(Mutex::new(Vec::new()));
        {
            let started = Arc::clone(&started);
            let seen = Arc::clone(&seen);
            ctx.registry.subscribe(
                b"q",
                Arc::new(move |msg: Message| {
                    if msg.payload == b"first" {
                        started.store(true, Ordering::SeqCst);
                        gate_rx.lock().unwrap().recv().unwrap();
                    }
                    seen.lock().unwrap().push(msg.payload);
                }),
            );
        }

        let (_shutdown_tx, shutdown) = watch::channel(false);
        let (mut client, server) = tokio::io::duplex(1024);
        let task = tokio::spawn(serve_connection(server, test_addr(), ctx.clone(), shutdown));

        client.write_all(&frame(b"q", b"first")).await.unwrap();
        wait_until(|| started.load(Ordering::SeqCst)).await;

        // One slot: "second" is queued, the rest are dropped.
        for payload in [&b"second"[..], b"third", b"fourth"] {
            client.write_all(&frame(b"q", payload)).await.unwrap();
        }
        let stats = Arc::clone(&ctx.stats);
        wait_until(|| stats.snapshot().queue_drops == 2).await;

        gate_tx.send(()).unwrap();
        drop(client);
        task.await.unwrap();

        assert_eq!(
            *seen.lock().unwrap(),
            vec![b"first".to_vec(), b"second".to_vec()]
        );
    }
}
