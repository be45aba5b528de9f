//! Pure quorum certification - distinct-peer tallies keyed by phase instance
//!
//! Used by the proposer for both the promise and the accept phase. A tally is
//! keyed by the full `(round, ballot, phase)` tuple so replies for an abandoned
//! ballot can never satisfy the tally of its successor.

use std::collections::BTreeMap;
use std::fmt;

use tracing::trace;

use crate::ballot::{Ballot, PeerId};
use crate::messages::Round;

/// Which reply a tally is collecting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Phase {
    Promise,
    Accept,
}

/// Identifies one phase instance.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TallyKey {
    pub round: Round,
    pub ballot: Ballot,
    pub phase: Phase,
}

impl TallyKey {
    #[must_use]
    pub fn promise(round: Round, ballot: Ballot) -> Self {
        Self {
            round,
            ballot,
            phase: Phase::Promise,
        }
    }

    #[must_use]
    pub fn accept(round: Round, ballot: Ballot) -> Self {
        Self {
            round,
            ballot,
            phase: Phase::Accept,
        }
    }
}

impl fmt::Display for TallyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{:?}", self.round, self.ballot, self.phase)
    }
}

/// How many of `N` members must answer before a tally is certified.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum Threshold {
    /// `⌊N/2⌋ + 1`
    #[default]
    Majority,
    /// All `N` members.
    Unanimous,
    /// `⌈ratio · N⌉`, clamped to `1..=N`.
    Ratio(f64),
}

impl Threshold {
    /// Required count for a membership of `members` peers.
    #[must_use]
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_precision_loss,
        clippy::cast_sign_loss
    )]
    pub fn required(self, members: usize) -> usize {
        let members = members.max(1);
        match self {
            Threshold::Majority => members / 2 + 1,
            Threshold::Unanimous => members,
            Threshold::Ratio(ratio) => {
                let needed = (ratio * members as f64).ceil();
                if needed.is_nan() || needed < 1.0 {
                    1
                } else {
                    (needed as usize).min(members)
                }
            }
        }
    }
}

/// Aggregated replies of a satisfied tally, one entry per peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Certified<P> {
    pub key: TallyKey,
    pub payloads: Vec<(PeerId, P)>,
}

/// Outcome of feeding one observation into the certifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Verdict<P> {
    /// Still waiting for more distinct peers.
    Pending,
    /// The tally just reached its required count; it has been removed.
    Certified(Certified<P>),
    /// No open tally for this key (never begun, already certified or cancelled).
    Unknown,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct Tally<P> {
    required: usize,
    votes: BTreeMap<PeerId, P>,
}

/// Set of open tallies.
///
/// Every vote is counted once per distinct peer. Rejections never reach a
/// tally: a `Nack` pre-empts the whole round instead.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QuorumCertifier<P> {
    members: usize,
    tallies: BTreeMap<TallyKey, Tally<P>>,
}

impl<P> QuorumCertifier<P> {
    /// Create a certifier for a membership of `members` peers.
    #[must_use]
    pub fn new(members: usize) -> Self {
        Self {
            members,
            tallies: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn members(&self) -> usize {
        self.members
    }

    /// Register a tally. Returns `false` (keeping the existing tally) if one is
    /// already open for `key`.
    pub fn begin(&mut self, key: TallyKey, required: usize) -> bool {
        if self.tallies.contains_key(&key) {
            return false;
        }
        self.tallies.insert(
            key,
            Tally {
                required: required.max(1),
                votes: BTreeMap::new(),
            },
        );
        true
    }

    /// Record a positive reply from `from`.
    pub fn record(&mut self, key: &TallyKey, from: PeerId, payload: P) -> Verdict<P> {
        let Some(tally) = self.tallies.get_mut(key) else {
            return Verdict::Unknown;
        };
        if tally.votes.contains_key(&from) {
            trace!(%key, %from, "duplicate reply ignored");
            return Verdict::Pending;
        }
        tally.votes.insert(from, payload);
        if tally.votes.len() < tally.required {
            return Verdict::Pending;
        }

        match self.tallies.remove(key) {
            Some(tally) => Verdict::Certified(Certified {
                key: key.clone(),
                payloads: tally.votes.into_iter().collect(),
            }),
            None => Verdict::Unknown,
        }
    }

    /// Discard a tally. Returns whether one was open.
    pub fn cancel(&mut self, key: &TallyKey) -> bool {
        self.tallies.remove(key).is_some()
    }

    /// Discard every tally of `round`.
    pub fn cancel_round(&mut self, round: Round) {
        self.tallies.retain(|key, _| key.round != round);
    }

    #[must_use]
    pub fn is_open(&self, key: &TallyKey) -> bool {
        self.tallies.contains_key(key)
    }

    /// Number of distinct peers that voted for an open tally.
    #[must_use]
    pub fn votes(&self, key: &TallyKey) -> usize {
        self.tallies.get(key).map_or(0, |tally| tally.votes.len())
    }

    #[must_use]
    pub fn open_tallies(&self) -> usize {
        self.tallies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(counter: u64) -> TallyKey {
        TallyKey::promise(1, Ballot::new(counter, "p"))
    }

    fn peer(name: &str) -> PeerId {
        PeerId::new(name)
    }

    #[test]
    fn test_threshold_required() {
        assert_eq!(Threshold::Majority.required(5), 3);
        assert_eq!(Threshold::Majority.required(4), 3);
        assert_eq!(Threshold::Majority.required(1), 1);
        assert_eq!(Threshold::Unanimous.required(5), 5);
        assert_eq!(Threshold::Ratio(0.5).required(5), 3);
        assert_eq!(Threshold::Ratio(0.66).required(3), 2);
        assert_eq!(Threshold::Ratio(2.0).required(3), 3);
        assert_eq!(Threshold::Ratio(0.0).required(3), 1);
        assert_eq!(Threshold::Ratio(f64::NAN).required(3), 1);
    }

    #[test]
    fn test_duplicates_count_once() {
        let mut certifier = QuorumCertifier::new(5);
        assert!(certifier.begin(key(1), 3));

        assert_eq!(certifier.record(&key(1), peer("a"), ()), Verdict::Pending);
        assert_eq!(certifier.record(&key(1), peer("a"), ()), Verdict::Pending);
        assert_eq!(certifier.record(&key(1), peer("b"), ()), Verdict::Pending);
        assert_eq!(certifier.record(&key(1), peer("b"), ()), Verdict::Pending);
        assert_eq!(certifier.votes(&key(1)), 2);

        let Verdict::Certified(certified) = certifier.record(&key(1), peer("c"), ()) else {
            panic!("third distinct peer should certify");
        };
        assert_eq!(certified.key, key(1));
        assert_eq!(
            certified.payloads.iter().map(|(p, ())| p.as_str()).collect::<Vec<_>>(),
            ["a", "b", "c"]
        );
    }

    #[test]
    fn test_certified_exactly_once() {
        let mut certifier = QuorumCertifier::new(3);
        certifier.begin(key(1), 2);
        certifier.record(&key(1), peer("a"), 1);
        assert!(matches!(
            certifier.record(&key(1), peer("b"), 2),
            Verdict::Certified(_)
        ));
        assert_eq!(certifier.record(&key(1), peer("c"), 3), Verdict::Unknown);
        assert!(!certifier.is_open(&key(1)));
    }

    #[test]
    fn test_payloads_aggregated_per_peer() {
        let mut certifier = QuorumCertifier::new(3);
        certifier.begin(key(4), 2);
        certifier.record(&key(4), peer("b"), "second");
        let Verdict::Certified(certified) = certifier.record(&key(4), peer("a"), "first") else {
            panic!("expected certification");
        };
        assert_eq!(
            certified.payloads,
            vec![(peer("a"), "first"), (peer("b"), "second")]
        );
    }

    #[test]
    fn test_stale_ballot_does_not_satisfy_new_tally() {
        let mut certifier = QuorumCertifier::new(3);
        certifier.begin(key(1), 2);
        certifier.record(&key(1), peer("a"), ());
        certifier.cancel(&key(1));
        certifier.begin(key(2), 2);

        assert_eq!(certifier.record(&key(1), peer("b"), ()), Verdict::Unknown);
        assert_eq!(certifier.votes(&key(2)), 0);
        assert_eq!(certifier.record(&key(2), peer("b"), ()), Verdict::Pending);
    }

    #[test]
    fn test_phases_are_separate_tallies() {
        let mut certifier = QuorumCertifier::new(3);
        let ballot = Ballot::new(1, "p");
        certifier.begin(TallyKey::promise(1, ballot.clone()), 2);
        certifier.begin(TallyKey::accept(1, ballot.clone()), 2);
        certifier.record(&TallyKey::promise(1, ballot.clone()), peer("a"), ());
        assert_eq!(certifier.votes(&TallyKey::accept(1, ballot)), 0);
    }

    #[test]
    fn test_begin_keeps_existing() {
        let mut certifier = QuorumCertifier::new(3);
        assert!(certifier.begin(key(1), 2));
        certifier.record(&key(1), peer("a"), ());
        assert!(!certifier.begin(key(1), 2));
        assert_eq!(certifier.votes(&key(1)), 1);
    }

    #[test]
    fn test_cancel_round() {
        let mut certifier: QuorumCertifier<()> = QuorumCertifier::new(3);
        certifier.begin(TallyKey::promise(1, Ballot::new(1, "p")), 2);
        certifier.begin(TallyKey::accept(1, Ballot::new(1, "p")), 2);
        certifier.begin(TallyKey::promise(2, Ballot::new(1, "p")), 2);
        certifier.cancel_round(1);
        assert_eq!(certifier.open_tallies(), 1);
    }
}
