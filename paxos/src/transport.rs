//! Message delivery between peers
//!
//! [`Transport`] is the fire-and-forget send side; inbound traffic reaches a
//! node as a `Stream<Item = Envelope>`. [`LocalNetwork`] implements both ends
//! in memory with optional loss, duplication and reordering.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::trace;

use crate::ballot::PeerId;
use crate::messages::Envelope;

/// Best-effort, non-blocking delivery.
pub trait Transport: Send + Sync + 'static {
    /// Send `envelope` to `to`. May silently drop, delay or duplicate it.
    fn send(&self, to: &PeerId, envelope: Envelope);
}

/// Faults injected by [`LocalNetwork`].
#[derive(Clone, Debug, Default)]
pub struct FaultConfig {
    /// Probability that a message is lost.
    pub drop_rate: f64,
    /// Probability that a delivered message arrives twice.
    pub duplicate_rate: f64,
    /// Upper bound of a uniformly drawn per-copy delay. Non-zero delays
    /// reorder messages.
    pub max_delay: Duration,
}

impl FaultConfig {
    #[must_use]
    pub fn reliable() -> Self {
        Self::default()
    }
}

struct Inner {
    peers: HashMap<PeerId, mpsc::UnboundedSender<Envelope>>,
    faults: FaultConfig,
    rng: StdRng,
}

impl Inner {
    fn roll(&mut self, probability: f64) -> bool {
        probability > 0.0 && self.rng.random::<f64>() < probability
    }

    fn delay(&mut self) -> Duration {
        if self.faults.max_delay.is_zero() {
            return Duration::ZERO;
        }
        let max = self.faults.max_delay.as_secs_f64();
        Duration::from_secs_f64(self.rng.random_range(0.0..=max))
    }
}

/// In-process network shared by all nodes of a test cluster.
///
/// Delayed copies are delivered from tasks spawned on the current tokio
/// runtime, so `send` must run inside one when `max_delay` is non-zero.
#[derive(Clone)]
pub struct LocalNetwork {
    inner: Arc<Mutex<Inner>>,
}

impl LocalNetwork {
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self::with_faults(seed, FaultConfig::reliable())
    }

    #[must_use]
    pub fn with_faults(seed: u64, faults: FaultConfig) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                peers: HashMap::new(),
                faults,
                rng: StdRng::seed_from_u64(seed),
            })),
        }
    }

    /// Attach `peer` and return its inbound stream. Registering again
    /// replaces the previous stream.
    pub fn register(&self, peer: PeerId) -> UnboundedReceiverStream<Envelope> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().unwrap().peers.insert(peer, tx);
        UnboundedReceiverStream::new(rx)
    }

    /// Detach `peer`: its stream ends and later sends to it are dropped.
    pub fn unregister(&self, peer: &PeerId) {
        self.inner.lock().unwrap().peers.remove(peer);
    }

    pub fn set_faults(&self, faults: FaultConfig) {
        self.inner.lock().unwrap().faults = faults;
    }
}

impl Transport for LocalNetwork {
    fn send(&self, to: &PeerId, envelope: Envelope) {
        let mut inner = self.inner.lock().unwrap();
        let Some(tx) = inner.peers.get(to).cloned() else {
            trace!(%to, "no such peer, message dropped");
            return;
        };
        let drop_rate = inner.faults.drop_rate;
        if inner.roll(drop_rate) {
            trace!(%to, from = %envelope.from, "message lost");
            return;
        }
        let duplicate_rate = inner.faults.duplicate_rate;
        let copies = if inner.roll(duplicate_rate) { 2 } else { 1 };

        for _ in 0..copies {
            let delay = inner.delay();
            if delay.is_zero() {
                // receiver gone means the peer crashed
                let _ = tx.send(envelope.clone());
                continue;
            }
            let tx = tx.clone();
            let envelope = envelope.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(envelope);
            });
        }
    }
}
