//! Request/result gateway
//!
//! Maps client requests onto proposer rounds, one at a time and in
//! submission order, and turns committed decisions into [`ClientResult`]s.

use std::collections::VecDeque;
use std::fmt;

use tracing::debug;

use crate::ballot::PeerId;
use crate::core::{Action, Outcome, ProposerCore};
use crate::messages::{ClientResult, Message, Request, RequestId, Status};

/// Effect the runtime has to perform.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Output {
    Broadcast(Message),
    Retry { retries: u32, message: Message },
    Result(ClientResult),
}

/// A request could not be submitted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SubmitError {
    /// A request with this id is already queued or in flight.
    Duplicate(RequestId),
}

impl fmt::Display for SubmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubmitError::Duplicate(id) => write!(f, "request {id} is already pending"),
        }
    }
}

impl std::error::Error for SubmitError {}

/// Client-facing front of one proposer.
#[derive(Clone, Debug)]
pub struct Gateway {
    proposer: ProposerCore,
    queue: VecDeque<Request>,
}

impl Gateway {
    #[must_use]
    pub fn new(proposer: ProposerCore) -> Self {
        Self {
            proposer,
            queue: VecDeque::new(),
        }
    }

    #[must_use]
    pub fn proposer(&self) -> &ProposerCore {
        &self.proposer
    }

    /// Requests waiting behind the one in flight.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Accept a request; it starts now if the proposer is idle.
    ///
    /// # Errors
    ///
    /// Returns [`SubmitError::Duplicate`] if the id is already queued or in flight.
    pub fn submit(&mut self, request: Request) -> Result<Vec<Output>, SubmitError> {
        let duplicate = self.proposer.in_flight() == Some(&request.id)
            || self.queue.iter().any(|queued| queued.id == request.id);
        if duplicate {
            return Err(SubmitError::Duplicate(request.id));
        }

        if !self.queue.is_empty() || !self.proposer.is_idle() {
            debug!(request = %request.id, queued = self.queue.len() + 1, "request queued");
            self.queue.push_back(request);
            return Ok(Vec::new());
        }
        Ok(self.start(request))
    }

    pub fn on_reply(&mut self, from: &PeerId, message: Message) -> Vec<Output> {
        let actions = self.proposer.on_reply(from, message);
        self.translate(actions)
    }

    pub fn on_timeout(&mut self) -> Vec<Output> {
        let actions = self.proposer.on_timeout();
        self.translate(actions)
    }

    fn start(&mut self, request: Request) -> Vec<Output> {
        match self.proposer.start(request) {
            Ok(actions) => self.translate(actions),
            Err(request) => {
                self.queue.push_front(request);
                Vec::new()
            }
        }
    }

    fn translate(&mut self, actions: Vec<Action>) -> Vec<Output> {
        let mut outputs = Vec::with_capacity(actions.len());
        for action in actions {
            match action {
                Action::Broadcast(message) => outputs.push(Output::Broadcast(message)),
                Action::Retry { retries, message } => {
                    outputs.push(Output::Retry { retries, message });
                }
                Action::Decided(decision) => match decision.outcome {
                    Outcome::Committed => outputs.push(Output::Result(ClientResult {
                        request_id: decision.request_id,
                        status: Status::Success,
                        value: decision.value,
                        round: decision.round,
                    })),
                    Outcome::Superseded => {
                        debug!(
                            request = %decision.request_id,
                            round = decision.round,
                            "round went to another value"
                        );
                    }
                },
            }
        }

        if self.proposer.is_idle()
            && let Some(next) = self.queue.pop_front()
        {
            outputs.extend(self.start(next));
        }
        outputs
    }
}
