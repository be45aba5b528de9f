//! Ballot numbering
//!
//! A [`Ballot`] totally orders competing proposals: counters are compared
//! first and the proposer id breaks ties, so two proposers can never issue
//! equal ballots.

use std::fmt;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Spread of the randomized bootstrap counter.
const BOOTSTRAP_SPREAD: u64 = 100_000;

/// Address of a peer in the static membership.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PeerId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for PeerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A proposal number: `(counter, proposer)` ordered lexicographically.
///
/// Field order matters: the derived `Ord` compares `counter` first.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Ballot {
    pub counter: u64,
    pub proposer: PeerId,
}

impl Ballot {
    #[must_use]
    pub fn new(counter: u64, proposer: impl Into<PeerId>) -> Self {
        Self {
            counter,
            proposer: proposer.into(),
        }
    }
}

impl fmt::Display for Ballot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.counter, self.proposer)
    }
}

/// Issues strictly increasing ballots for one proposer.
///
/// The clock only ever moves forward: [`observe`](Self::observe) fast-forwards
/// it past ballots seen in acceptor replies so that the next ballot dominates
/// whatever pre-empted us.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BallotClock {
    id: PeerId,
    counter: u64,
}

impl BallotClock {
    /// Start from a random counter in `[0, 100_000)`.
    ///
    /// Proposers that restart with identical state then rarely collide on
    /// their first ballots.
    pub fn random(id: PeerId, rng: &mut impl Rng) -> Self {
        Self::starting_at(id, rng.random_range(0..BOOTSTRAP_SPREAD))
    }

    /// Start from a fixed counter; the first ballot is `counter + 1`.
    #[must_use]
    pub fn starting_at(id: PeerId, counter: u64) -> Self {
        Self { id, counter }
    }

    #[must_use]
    pub fn id(&self) -> &PeerId {
        &self.id
    }

    /// Highest counter issued or observed so far.
    #[must_use]
    pub fn counter(&self) -> u64 {
        self.counter
    }

    /// Draw a fresh ballot, strictly greater than every ballot issued or observed.
    pub fn next(&mut self) -> Ballot {
        self.counter += 1;
        Ballot {
            counter: self.counter,
            proposer: self.id.clone(),
        }
    }

    /// Fast-forward past a ballot seen from another peer.
    pub fn observe(&mut self, ballot: &Ballot) {
        self.counter = self.counter.max(ballot.counter);
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;

    #[test]
    fn test_ballot_order_counter_first() {
        assert!(Ballot::new(2, "a") > Ballot::new(1, "z"));
        assert!(Ballot::new(1, "b") > Ballot::new(1, "a"));
        assert_eq!(Ballot::new(3, "p"), Ballot::new(3, "p"));
    }

    #[test]
    fn test_next_is_strictly_increasing() {
        let mut clock = BallotClock::starting_at(PeerId::new("p1"), 7);
        let first = clock.next();
        let second = clock.next();
        assert_eq!(first, Ballot::new(8, "p1"));
        assert!(second > first);
    }

    #[test]
    fn test_observe_dominates_higher_ballot() {
        let mut clock = BallotClock::starting_at(PeerId::new("a"), 1);
        let seen = Ballot::new(40, "z");
        clock.observe(&seen);
        let next = clock.next();
        assert!(next > seen, "{next} must beat {seen}");
    }

    #[test]
    fn test_observe_lower_keeps_counter() {
        let mut clock = BallotClock::starting_at(PeerId::new("a"), 50);
        clock.observe(&Ballot::new(10, "b"));
        assert_eq!(clock.counter(), 50);
        assert_eq!(clock.next().counter, 51);
    }

    #[test]
    fn test_random_bootstrap_in_range() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..100 {
            let clock = BallotClock::random(PeerId::new("p"), &mut rng);
            assert!(clock.counter() < BOOTSTRAP_SPREAD);
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Ballot::new(12, "node-1").to_string(), "12.node-1");
    }
}
