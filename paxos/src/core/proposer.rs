//! Pure proposer state machine - no I/O, no async
//!
//! Drives one round at a time through `Preparing -> Proposing -> Decided`,
//! or straight to `Proposing` while it is the stable leader. Every input
//! returns the [`Action`]s the runtime has to perform.

use std::collections::BTreeSet;

use bytes::Bytes;
use tracing::{debug, trace};

use super::quorum::{Certified, QuorumCertifier, TallyKey, Threshold, Verdict};
use crate::ballot::{Ballot, BallotClock, PeerId};
use crate::messages::{Message, Request, RequestId, Round};

/// First round a fresh proposer works on.
pub const FIRST_ROUND: Round = 1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoundPhase {
    Preparing,
    Proposing,
    Decided,
}

/// Proposer-side view of the round in flight.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProposerRoundState {
    pub round: Round,
    pub ballot: Ballot,
    pub phase: RoundPhase,
    /// Value being proposed; the client's value until a promise forces another.
    pub value: Bytes,
    /// The round skipped the prepare phase.
    pub stable: bool,
}

/// Whose value a decided round carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
    /// The request's own value was chosen; the request is complete.
    Committed,
    /// A value adopted from another proposer was chosen; the request moves on
    /// to the next round.
    Superseded,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Decision {
    pub request_id: RequestId,
    pub round: Round,
    pub ballot: Ballot,
    pub value: Bytes,
    pub outcome: Outcome,
}

/// Side effect requested by the proposer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Action {
    /// Send to every member.
    Broadcast(Message),
    /// Send to every member after backing off for the `retries`-th time.
    Retry { retries: u32, message: Message },
    /// A value was chosen for a round.
    Decided(Decision),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Vote {
    Promised {
        accepted: Option<(Ballot, Bytes)>,
        later_accepted: Option<Round>,
    },
    Accepted,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct InFlight {
    request: Request,
    state: ProposerRoundState,
    retries: u32,
    /// Ballots under which the request's own value was proposed this round.
    own_ballots: BTreeSet<Ballot>,
    /// No member of the promise quorum had accepted a value past this round.
    clear_ahead: bool,
}

/// Pure proposer state.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProposerCore {
    clock: BallotClock,
    required: usize,
    certifier: QuorumCertifier<Vote>,
    next_round: Round,
    /// Ballot reused for the fast path while stable.
    leader: Option<Ballot>,
    current: Option<InFlight>,
    last_decided: Option<ProposerRoundState>,
}

impl ProposerCore {
    /// Create a proposer for a membership of `members` acceptors.
    ///
    /// Thresholds below a strict majority are raised to one: quorums of both
    /// phases must intersect.
    #[must_use]
    pub fn new(clock: BallotClock, members: usize, threshold: Threshold) -> Self {
        let required = threshold
            .required(members)
            .max(Threshold::Majority.required(members));
        Self {
            clock,
            required,
            certifier: QuorumCertifier::new(members),
            next_round: FIRST_ROUND,
            leader: None,
            current: None,
            last_decided: None,
        }
    }

    #[must_use]
    pub fn id(&self) -> &PeerId {
        self.clock.id()
    }

    #[must_use]
    pub fn clock(&self) -> &BallotClock {
        &self.clock
    }

    #[must_use]
    pub fn required(&self) -> usize {
        self.required
    }

    /// Round the next started request will use.
    #[must_use]
    pub fn next_round(&self) -> Round {
        self.next_round
    }

    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.current.is_none()
    }

    /// Whether the next round will skip the prepare phase.
    #[must_use]
    pub fn is_stable(&self) -> bool {
        self.leader.is_some()
    }

    #[must_use]
    pub fn state(&self) -> Option<&ProposerRoundState> {
        self.current.as_ref().map(|flight| &flight.state)
    }

    #[must_use]
    pub fn in_flight(&self) -> Option<&RequestId> {
        self.current.as_ref().map(|flight| &flight.request.id)
    }

    /// Round state archived by the most recent decision.
    #[must_use]
    pub fn last_decided(&self) -> Option<&ProposerRoundState> {
        self.last_decided.as_ref()
    }

    /// Start a client request in the next round.
    ///
    /// # Errors
    ///
    /// Hands the request back if a round is already in flight.
    pub fn start(&mut self, request: Request) -> Result<Vec<Action>, Request> {
        if self.current.is_some() {
            return Err(request);
        }
        let round = self.next_round;
        Ok(self.open_round(request, round))
    }

    /// Handle a reply from an acceptor.
    pub fn on_reply(&mut self, from: &PeerId, message: Message) -> Vec<Action> {
        match message {
            Message::Promise {
                round,
                ballot,
                accepted,
                later_accepted,
            } => {
                if let Some((accepted_ballot, _)) = &accepted {
                    self.clock.observe(accepted_ballot);
                }
                if let Some(later) = later_accepted {
                    self.next_round = self.next_round.max(later.saturating_add(1));
                }
                let key = TallyKey::promise(round, ballot);
                let vote = Vote::Promised {
                    accepted,
                    later_accepted,
                };
                match self.certifier.record(&key, from.clone(), vote) {
                    Verdict::Certified(certified) => self.on_promise_quorum(certified),
                    Verdict::Unknown => {
                        trace!(%key, %from, "stale promise ignored");
                        Vec::new()
                    }
                    Verdict::Pending => Vec::new(),
                }
            }
            Message::Accept { round, ballot } => {
                let key = TallyKey::accept(round, ballot);
                match self.certifier.record(&key, from.clone(), Vote::Accepted) {
                    Verdict::Certified(_) => self.on_accept_quorum(),
                    Verdict::Unknown => {
                        trace!(%key, %from, "stale accept ignored");
                        Vec::new()
                    }
                    Verdict::Pending => Vec::new(),
                }
            }
            Message::Nack { round, ballot } => self.on_nack(from, round, &ballot),
            Message::Prepare { .. } | Message::Propose { .. } => {
                trace!(%from, "acceptor request sent to proposer ignored");
                Vec::new()
            }
        }
    }

    /// The current phase stalled: abandon the ballot and prepare again.
    pub fn on_timeout(&mut self) -> Vec<Action> {
        let Some(flight) = &self.current else {
            return Vec::new();
        };
        debug!(
            round = flight.state.round,
            ballot = %flight.state.ballot,
            phase = ?flight.state.phase,
            "phase timed out"
        );
        self.restart()
    }

    fn open_round(&mut self, request: Request, round: Round) -> Vec<Action> {
        self.next_round = self.next_round.max(round.saturating_add(1));
        let value = request.value.clone();

        if let Some(ballot) = self.leader.clone() {
            debug!(round, %ballot, request = %request.id, "stable leader, skipping prepare");
            self.certifier
                .begin(TallyKey::accept(round, ballot.clone()), self.required);
            self.current = Some(InFlight {
                request,
                state: ProposerRoundState {
                    round,
                    ballot: ballot.clone(),
                    phase: RoundPhase::Proposing,
                    value: value.clone(),
                    stable: true,
                },
                retries: 0,
                own_ballots: BTreeSet::from([ballot.clone()]),
                clear_ahead: true,
            });
            return vec![Action::Broadcast(Message::Propose {
                round,
                ballot,
                value,
            })];
        }

        let ballot = self.clock.next();
        debug!(round, %ballot, request = %request.id, "preparing");
        self.certifier
            .begin(TallyKey::promise(round, ballot.clone()), self.required);
        self.current = Some(InFlight {
            request,
            state: ProposerRoundState {
                round,
                ballot: ballot.clone(),
                phase: RoundPhase::Preparing,
                value,
                stable: false,
            },
            retries: 0,
            own_ballots: BTreeSet::new(),
            clear_ahead: false,
        });
        vec![Action::Broadcast(Message::Prepare { round, ballot })]
    }

    /// Retry the current round from `Preparing` with a fresh ballot.
    fn restart(&mut self) -> Vec<Action> {
        let Some(flight) = self.current.as_mut() else {
            return Vec::new();
        };
        let round = flight.state.round;
        self.certifier.cancel_round(round);
        self.leader = None;

        let ballot = self.clock.next();
        flight.retries += 1;
        flight.clear_ahead = false;
        flight.state = ProposerRoundState {
            round,
            ballot: ballot.clone(),
            phase: RoundPhase::Preparing,
            value: flight.request.value.clone(),
            stable: false,
        };
        self.certifier
            .begin(TallyKey::promise(round, ballot.clone()), self.required);
        debug!(round, %ballot, retries = flight.retries, "retrying round");
        vec![Action::Retry {
            retries: flight.retries,
            message: Message::Prepare { round, ballot },
        }]
    }

    fn on_nack(&mut self, from: &PeerId, round: Round, ballot: &Ballot) -> Vec<Action> {
        self.clock.observe(ballot);
        let Some(flight) = &self.current else {
            return Vec::new();
        };
        if round != flight.state.round || *ballot <= flight.state.ballot {
            trace!(%from, round, %ballot, "stale nack ignored");
            return Vec::new();
        }
        debug!(%from, round, %ballot, ours = %flight.state.ballot, "pre-empted");
        self.restart()
    }

    fn on_promise_quorum(&mut self, certified: Certified<Vote>) -> Vec<Action> {
        let Some(flight) = self.current.as_mut() else {
            return Vec::new();
        };
        let round = certified.key.round;
        let ballot = certified.key.ballot;

        let mut highest: Option<(Ballot, Bytes)> = None;
        let mut clear_ahead = true;
        for (_, vote) in certified.payloads {
            if let Vote::Promised {
                accepted,
                later_accepted,
            } = vote
            {
                clear_ahead &= later_accepted.is_none();
                if let Some(candidate) = accepted
                    && highest.as_ref().is_none_or(|(best, _)| candidate.0 > *best)
                {
                    highest = Some(candidate);
                }
            }
        }

        // a value accepted under an earlier ballot must be proposed again
        let (value, own) = match highest {
            Some((accepted_ballot, value)) => {
                let own = flight.own_ballots.contains(&accepted_ballot);
                if !own {
                    debug!(round, from = %accepted_ballot, "adopting previously accepted value");
                }
                (value, own)
            }
            None => (flight.request.value.clone(), true),
        };
        if own {
            flight.own_ballots.insert(ballot.clone());
        }
        flight.clear_ahead = clear_ahead;
        flight.state.phase = RoundPhase::Proposing;
        flight.state.value = value.clone();

        debug!(round, %ballot, clear_ahead, "promise quorum reached, proposing");
        self.certifier
            .begin(TallyKey::accept(round, ballot.clone()), self.required);
        vec![Action::Broadcast(Message::Propose {
            round,
            ballot,
            value,
        })]
    }

    fn on_accept_quorum(&mut self) -> Vec<Action> {
        let Some(flight) = self.current.take() else {
            return Vec::new();
        };
        let InFlight {
            request,
            mut state,
            own_ballots,
            clear_ahead,
            ..
        } = flight;

        let outcome = if own_ballots.contains(&state.ballot) {
            Outcome::Committed
        } else {
            Outcome::Superseded
        };
        self.leader = clear_ahead.then(|| state.ballot.clone());
        self.next_round = self.next_round.max(state.round.saturating_add(1));
        state.phase = RoundPhase::Decided;

        let decision = Decision {
            request_id: request.id.clone(),
            round: state.round,
            ballot: state.ballot.clone(),
            value: state.value.clone(),
            outcome,
        };
        debug!(
            round = state.round,
            ballot = %state.ballot,
            request = %request.id,
            ?outcome,
            stable = self.leader.is_some(),
            "decided"
        );
        self.last_decided = Some(state);

        let mut actions = vec![Action::Decided(decision)];
        if outcome == Outcome::Superseded {
            let round = self.next_round;
            actions.extend(self.open_round(request, round));
        }
        actions
    }
}
