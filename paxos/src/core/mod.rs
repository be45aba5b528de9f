//! Pure state machine core for Paxos - no I/O, no async
//!
//! This module contains the state transition logic that is shared between:
//! - The tokio runtime in [`crate::node`]
//! - The deterministic simulation and Stateright model checker tests
//!
//! Keeping it free of I/O means the tests exercise the exact same
//! transitions as production code.
//!
//! # Modules
//!
//! - [`acceptor`]: Acceptor state machine (`AcceptorCore`)
//! - [`proposer`]: Proposer state machine (`ProposerCore`)
//! - [`quorum`]: Quorum certification (`QuorumCertifier`)

pub mod acceptor;
pub mod proposer;
pub mod quorum;

pub use acceptor::{AcceptorCore, AcceptorRoundState};
pub use proposer::{
    Action, Decision, FIRST_ROUND, Outcome, ProposerCore, ProposerRoundState, RoundPhase,
};
pub use quorum::{Certified, Phase, QuorumCertifier, TallyKey, Threshold, Verdict};
