//! Proposer runtime
//!
//! A single task owns the [`Gateway`] (and through it the proposer state
//! machine). It waits on client commands, acceptor replies and the phase
//! deadline, and performs the resulting outputs: broadcasts, backed-off
//! retries and client results.

use std::ops::ControlFlow;
use std::sync::Arc;

use rand::rngs::StdRng;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::ballot::PeerId;
use crate::config::NodeConfig;
use crate::gateway::{Gateway, Output, SubmitError};
use crate::membership::Membership;
use crate::messages::{ClientResult, Envelope, Message, Request};
use crate::transport::Transport;

/// Client command sent to the proposer task.
pub(crate) enum Command {
    Submit {
        request: Request,
        reply: oneshot::Sender<Result<(), SubmitError>>,
    },
}

pub(crate) struct ProposerTask<T, M> {
    pub(crate) id: PeerId,
    pub(crate) gateway: Gateway,
    pub(crate) membership: Arc<M>,
    pub(crate) transport: Arc<T>,
    pub(crate) config: NodeConfig,
    pub(crate) rng: StdRng,
    pub(crate) results: mpsc::UnboundedSender<ClientResult>,
}

/// Wait for `deadline`, or forever if there is none.
async fn deadline_elapsed(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<T: Transport, M: Membership> ProposerTask<T, M> {
    /// Run until cancelled or until either input channel closes.
    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<Command>,
        mut replies: mpsc::UnboundedReceiver<Envelope>,
        cancel: CancellationToken,
    ) {
        debug!(quorum = self.gateway.proposer().required(), "proposer started");
        let mut deadline: Option<Instant> = None;

        loop {
            let outputs = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                command = commands.recv() => {
                    let Some(Command::Submit { request, reply }) = command else {
                        break;
                    };
                    match self.gateway.submit(request) {
                        Ok(outputs) => {
                            let _ = reply.send(Ok(()));
                            outputs
                        }
                        Err(e) => {
                            let _ = reply.send(Err(e));
                            continue;
                        }
                    }
                }
                reply = replies.recv() => {
                    let Some(Envelope { from, message }) = reply else {
                        break;
                    };
                    trace!(%from, ?message, "reply");
                    self.gateway.on_reply(&from, message)
                }
                () = deadline_elapsed(deadline) => {
                    deadline = None;
                    self.gateway.on_timeout()
                }
            };

            if self.perform(outputs, &mut deadline, &cancel).await.is_break() {
                break;
            }
            if self.gateway.proposer().is_idle() {
                deadline = None;
            }
        }
        debug!("proposer stopped");
    }

    /// Carry out gateway outputs. Breaks if cancelled while backing off.
    async fn perform(
        &mut self,
        outputs: Vec<Output>,
        deadline: &mut Option<Instant>,
        cancel: &CancellationToken,
    ) -> ControlFlow<()> {
        for output in outputs {
            match output {
                Output::Broadcast(message) => {
                    self.broadcast(&message);
                    *deadline = Some(Instant::now() + self.config.phase_timeout);
                }
                Output::Retry { retries, message } => {
                    let backoff = self.config.backoff.duration(retries, &mut self.rng);
                    trace!(?backoff, retries, "backing off before retry");
                    tokio::select! {
                        () = cancel.cancelled() => return ControlFlow::Break(()),
                        () = tokio::time::sleep(backoff) => {}
                    }
                    self.broadcast(&message);
                    *deadline = Some(Instant::now() + self.config.phase_timeout);
                }
                Output::Result(result) => {
                    debug!(request = %result.request_id, round = result.round, "result");
                    // the handle may have been dropped
                    let _ = self.results.send(result);
                }
            }
        }
        ControlFlow::Continue(())
    }

    fn broadcast(&self, message: &Message) {
        trace!(?message, members = self.membership.len(), "broadcast");
        for member in self.membership.members() {
            self.transport
                .send(member, Envelope::new(self.id.clone(), message.clone()));
        }
    }
}
