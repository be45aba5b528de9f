//! Acceptor runtime
//!
//! - [`SharedAcceptorState`]: [`AcceptorCore`] behind a mutex, plus a
//!   broadcast of every accepted value for diagnostics
//! - [`run_acceptor`]: the task answering `Prepare`/`Propose`

use std::future;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::BroadcastStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::ballot::{Ballot, PeerId};
use crate::core::{AcceptorCore, AcceptorRoundState};
use crate::messages::{Envelope, Message, Round};
use crate::transport::Transport;

/// A value this acceptor accepted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Accepted {
    pub round: Round,
    pub ballot: Ballot,
    pub value: Bytes,
}

/// Acceptor state shared between the acceptor task (the only writer) and
/// read-only observers.
#[derive(Clone)]
pub struct SharedAcceptorState {
    core: Arc<Mutex<AcceptorCore>>,
    broadcast: broadcast::Sender<Accepted>,
}

impl Default for SharedAcceptorState {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedAcceptorState {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    /// Create with the given broadcast capacity; slow subscribers skip
    /// values once it is exceeded.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity);
        Self {
            core: Arc::new(Mutex::new(AcceptorCore::new())),
            broadcast,
        }
    }

    /// Apply a proposer request and return the reply, if any.
    pub(crate) fn handle(&self, message: Message) -> Option<Message> {
        let mut core = self.core.lock().unwrap();
        let reply = core.handle(message)?;
        if let Message::Accept { round, ballot } = &reply
            && let Some((_, value)) = core.accepted(*round)
        {
            // no subscribers is fine
            let _ = self.broadcast.send(Accepted {
                round: *round,
                ballot: ballot.clone(),
                value: value.clone(),
            });
        }
        Some(reply)
    }

    #[must_use]
    pub fn round_state(&self, round: Round) -> AcceptorRoundState {
        self.core.lock().unwrap().round_state(round)
    }

    /// Stream of values accepted from now on.
    pub fn subscribe(&self) -> impl Stream<Item = Accepted> + Send + use<> {
        BroadcastStream::new(self.broadcast.subscribe())
            .filter_map(|accepted| future::ready(accepted.ok()))
    }
}

/// Answer proposer requests until cancelled or the inbox closes.
#[instrument(skip_all, name = "acceptor", fields(node_id = %id))]
pub(crate) async fn run_acceptor<T: Transport>(
    id: PeerId,
    state: SharedAcceptorState,
    transport: Arc<T>,
    mut requests: mpsc::UnboundedReceiver<Envelope>,
    cancel: CancellationToken,
) {
    debug!("acceptor started");
    loop {
        let envelope = tokio::select! {
            () = cancel.cancelled() => break,
            envelope = requests.recv() => match envelope {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let Envelope { from, message } = envelope;
        trace!(%from, ?message, "request");
        if let Some(reply) = state.handle(message) {
            trace!(%from, ?reply, "reply");
            transport.send(&from, Envelope::new(id.clone(), reply));
        }
    }
    debug!("acceptor stopped");
}
