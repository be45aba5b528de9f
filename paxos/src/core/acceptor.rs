//! Pure acceptor state machine - no I/O, no async, no synchronization
//!
//! Keeps, per round, the highest promised ballot and the accepted
//! `(ballot, value)` pair, and answers `Prepare`/`Propose` with
//! `Promise`/`Accept` or `Nack`.
//!
//! A promise also binds every later round: the ballot an acceptor honours for
//! round `r` is the highest it promised for any round `<= r`. Within a single
//! round this is the classic rule; across rounds it lets a stable leader skip
//! the prepare phase without a lower ballot sneaking a value in behind it.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::ballot::Ballot;
use crate::messages::{Message, Round};

/// Snapshot of one round of acceptor state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AcceptorRoundState {
    pub round: Round,
    pub promised: Option<Ballot>,
    pub accepted: Option<(Ballot, Bytes)>,
}

/// Pure acceptor state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct AcceptorCore {
    /// Per-round: highest promised ballot
    promised: BTreeMap<Round, Ballot>,
    /// Per-round: accepted (ballot, value)
    accepted: BTreeMap<Round, (Ballot, Bytes)>,
}

impl AcceptorCore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest ballot promised for any round up to and including `round`.
    fn effective_promise(&self, round: Round) -> Option<&Ballot> {
        self.promised
            .range(..=round)
            .map(|(_, ballot)| ballot)
            .max()
    }

    /// Returns the ballot that rejects `ballot` for `round`, if any.
    fn check(&self, round: Round, ballot: &Ballot) -> Option<Ballot> {
        self.effective_promise(round)
            .filter(|promised| *promised > ballot)
            .cloned()
    }

    /// Handle `Prepare(round, ballot)`.
    ///
    /// Re-delivering the same prepare yields the same promise.
    pub fn on_prepare(&mut self, round: Round, ballot: Ballot) -> Message {
        if let Some(promised) = self.check(round, &ballot) {
            return Message::Nack {
                round,
                ballot: promised,
            };
        }

        self.promised.insert(round, ballot.clone());
        Message::Promise {
            round,
            ballot,
            accepted: self.accepted.get(&round).cloned(),
            later_accepted: self
                .accepted
                .range(round.saturating_add(1)..)
                .next_back()
                .map(|(r, _)| *r),
        }
    }

    /// Handle `Propose(round, ballot, value)`.
    pub fn on_propose(&mut self, round: Round, ballot: Ballot, value: Bytes) -> Message {
        if let Some(promised) = self.check(round, &ballot) {
            return Message::Nack {
                round,
                ballot: promised,
            };
        }

        self.promised.insert(round, ballot.clone());
        self.accepted.insert(round, (ballot.clone(), value));
        Message::Accept { round, ballot }
    }

    /// Dispatch a proposer request. Replies are `None` for messages an
    /// acceptor does not handle.
    pub fn handle(&mut self, message: Message) -> Option<Message> {
        match message {
            Message::Prepare { round, ballot } => Some(self.on_prepare(round, ballot)),
            Message::Propose {
                round,
                ballot,
                value,
            } => Some(self.on_propose(round, ballot, value)),
            Message::Promise { .. } | Message::Accept { .. } | Message::Nack { .. } => None,
        }
    }

    #[must_use]
    pub fn round_state(&self, round: Round) -> AcceptorRoundState {
        AcceptorRoundState {
            round,
            promised: self.promised.get(&round).cloned(),
            accepted: self.accepted.get(&round).cloned(),
        }
    }

    /// Rounds in which this acceptor promised or accepted anything.
    #[must_use]
    pub fn rounds(&self) -> Vec<Round> {
        // accepted implies promised
        self.promised.keys().copied().collect()
    }

    #[must_use]
    pub fn accepted(&self, round: Round) -> Option<&(Ballot, Bytes)> {
        self.accepted.get(&round)
    }
}
