//! Wire messages exchanged between proposers and acceptors, and the
//! client-facing request/result types.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::ballot::{Ballot, PeerId};

/// One independent Paxos instance.
pub type Round = u64;

/// Client-chosen identifier of a request.
pub type RequestId = String;

/// Peer-to-peer protocol message.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Message {
    /// Phase 1a: proposer asks acceptors to promise `ballot` for `round`.
    Prepare { round: Round, ballot: Ballot },
    /// Phase 1b: acceptor promises, reporting what it already accepted.
    Promise {
        round: Round,
        ballot: Ballot,
        /// Highest-ballot value accepted for `round`, if any.
        accepted: Option<(Ballot, Bytes)>,
        /// Highest later round in which this acceptor accepted a value.
        later_accepted: Option<Round>,
    },
    /// Phase 2a: proposer asks acceptors to accept `value`.
    Propose {
        round: Round,
        ballot: Ballot,
        value: Bytes,
    },
    /// Phase 2b: acceptor accepted the proposal for `ballot`.
    Accept { round: Round, ballot: Ballot },
    /// Rejection; `ballot` is the higher ballot the acceptor is bound to.
    Nack { round: Round, ballot: Ballot },
}

impl Message {
    #[must_use]
    pub fn round(&self) -> Round {
        match self {
            Message::Prepare { round, .. }
            | Message::Promise { round, .. }
            | Message::Propose { round, .. }
            | Message::Accept { round, .. }
            | Message::Nack { round, .. } => *round,
        }
    }

    /// Whether the message is handled by the acceptor role.
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, Message::Prepare { .. } | Message::Propose { .. })
    }
}

/// A message together with the peer that sent it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Envelope {
    pub from: PeerId,
    pub message: Message,
}

impl Envelope {
    #[must_use]
    pub fn new(from: PeerId, message: Message) -> Self {
        Self { from, message }
    }
}

/// A value submitted by a client.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub value: Bytes,
}

impl Request {
    #[must_use]
    pub fn new(id: impl Into<RequestId>, value: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Success,
}

/// Delivered exactly once for every request whose value is decided.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientResult {
    pub request_id: RequestId,
    pub status: Status,
    pub value: Bytes,
    /// Round in which the value was decided.
    pub round: Round,
}
