//! A peer process: acceptor and proposer roles on tokio
//!
//! [`Node::spawn`] starts three tasks sharing one cancellation token:
//!
//! - a router splitting the inbound stream by message type
//! - the acceptor task, sole writer of [`SharedAcceptorState`]
//! - the proposer task, owner of the [`Gateway`]
//!
//! The roles share no state; each is a single sequential event loop.

use std::sync::Arc;

use bytes::Bytes;
use error_stack::{Report, ResultExt};
use futures::{Stream, StreamExt};
use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, info_span, instrument, warn};

use crate::acceptor::{Accepted, SharedAcceptorState, run_acceptor};
use crate::ballot::{BallotClock, PeerId};
use crate::config::NodeConfig;
use crate::core::{AcceptorRoundState, ProposerCore};
use crate::error::{NodeError, RequestContext};
use crate::gateway::Gateway;
use crate::membership::Membership;
use crate::messages::{ClientResult, Envelope, Request, RequestId, Round};
use crate::proposer::{Command, ProposerTask};
use crate::transport::Transport;

/// Entry point for starting a peer.
pub struct Node;

impl Node {
    /// Spawn the tasks of peer `id` on the current tokio runtime.
    ///
    /// `inbound` carries every envelope addressed to this peer; when it ends
    /// the node stops, as after a crash.
    pub fn spawn<T, M, S>(
        id: PeerId,
        membership: M,
        transport: T,
        inbound: S,
        config: NodeConfig,
    ) -> NodeHandle
    where
        T: Transport,
        M: Membership,
        S: Stream<Item = Envelope> + Send + Unpin + 'static,
    {
        if !membership.contains(&id) {
            warn!(node_id = %id, "node is not a member; its acceptor will never be asked");
        }
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        let clock = BallotClock::random(id.clone(), &mut rng);
        let proposer = ProposerCore::new(clock, membership.len(), config.threshold);

        let transport = Arc::new(transport);
        let acceptor_state = SharedAcceptorState::new();
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();

        let (requests_tx, requests_rx) = mpsc::unbounded_channel();
        let (replies_tx, replies_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (results_tx, results_rx) = mpsc::unbounded_channel();

        tracker.spawn(route(
            id.clone(),
            inbound,
            requests_tx,
            replies_tx,
            cancel.clone(),
        ));
        tracker.spawn(run_acceptor(
            id.clone(),
            acceptor_state.clone(),
            transport.clone(),
            requests_rx,
            cancel.clone(),
        ));

        let task = ProposerTask {
            id: id.clone(),
            gateway: Gateway::new(proposer),
            membership: Arc::new(membership),
            transport,
            config,
            rng,
            results: results_tx,
        };
        let span = info_span!("proposer", node_id = %id);
        tracker.spawn(
            task.run(commands_rx, replies_rx, cancel.clone())
                .instrument(span),
        );
        tracker.close();

        debug!(node_id = %id, "node started");
        NodeHandle {
            id,
            commands: commands_tx,
            results: results_rx,
            acceptor_state,
            cancel,
            tracker,
        }
    }
}

/// Split inbound traffic between the two roles.
#[instrument(skip_all, name = "router", fields(node_id = %id))]
async fn route<S>(
    id: PeerId,
    mut inbound: S,
    requests: mpsc::UnboundedSender<Envelope>,
    replies: mpsc::UnboundedSender<Envelope>,
    cancel: CancellationToken,
) where
    S: Stream<Item = Envelope> + Unpin,
{
    loop {
        let envelope = tokio::select! {
            () = cancel.cancelled() => break,
            envelope = inbound.next() => match envelope {
                Some(envelope) => envelope,
                None => {
                    debug!("inbound stream closed");
                    break;
                }
            },
        };
        let role = if envelope.message.is_request() {
            &requests
        } else {
            &replies
        };
        if role.send(envelope).is_err() {
            break;
        }
    }
    // a closed inbound stream is a crash: stop both roles
    cancel.cancel();
}

/// Client-side handle of a running node.
pub struct NodeHandle {
    id: PeerId,
    commands: mpsc::UnboundedSender<Command>,
    results: mpsc::UnboundedReceiver<ClientResult>,
    acceptor_state: SharedAcceptorState,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl NodeHandle {
    #[must_use]
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Submit a request. Returns once the node has accepted it; the result
    /// arrives through [`next_result`](Self::next_result).
    ///
    /// # Errors
    ///
    /// [`NodeError::Rejected`] if the id is already pending on this node,
    /// [`NodeError::Stopped`] if the node is no longer running.
    pub async fn submit(
        &self,
        request_id: impl Into<RequestId>,
        value: impl Into<Bytes>,
    ) -> Result<(), Report<NodeError>> {
        let request = Request::new(request_id, value);
        let context = RequestContext::new(request.id.clone());
        let (reply, accepted) = oneshot::channel();

        if self.commands.send(Command::Submit { request, reply }).is_err() {
            return Err(Report::new(NodeError::Stopped).attach(context));
        }
        match accepted.await {
            Ok(result) => result
                .change_context(NodeError::Rejected)
                .attach(context),
            Err(_) => Err(Report::new(NodeError::Stopped).attach(context)),
        }
    }

    /// Next decided result, in decision order. `None` once the node stopped.
    pub async fn next_result(&mut self) -> Option<ClientResult> {
        self.results.recv().await
    }

    /// Read-only view of one round of this node's acceptor.
    #[must_use]
    pub fn acceptor_state(&self, round: Round) -> AcceptorRoundState {
        self.acceptor_state.round_state(round)
    }

    /// Values accepted by this node's acceptor from now on.
    pub fn accepted(&self) -> impl Stream<Item = Accepted> + Send + use<> {
        self.acceptor_state.subscribe()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Stop all tasks and wait for them to finish.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        self.tracker.wait().await;
        debug!(node_id = %self.id, "node stopped");
    }
}
