//! Multi-Paxos consensus library
//!
//! A set of peers agrees on a sequence of client-submitted values despite
//! message loss, duplication, reordering and crash-stop failures. Each round
//! is an independent Paxos instance; a proposer that wins a round becomes the
//! stable leader and skips the prepare phase until it is pre-empted.
//!
//! # Architecture
//!
//! - [`core`]: pure state machines (acceptor, proposer, quorum certifier),
//!   shared by the runtime and the model checker
//! - [`gateway`]: client requests in, results out, one round at a time
//! - [`node`]: tokio runtime running the acceptor and proposer roles of a peer
//! - [`transport`] and [`codec`]: message delivery and wire framing
//!
//! # Quick Start
//!
//! ```ignore
//! use multipaxos::{LocalNetwork, Node, NodeConfig, PeerId, StaticMembership};
//!
//! let network = LocalNetwork::new(0);
//! let members: StaticMembership = ["a", "b", "c"].into_iter().collect();
//! let mut nodes: Vec<_> = ["a", "b", "c"]
//!     .into_iter()
//!     .map(|id| {
//!         let inbound = network.register(PeerId::new(id));
//!         Node::spawn(
//!             PeerId::new(id),
//!             members.clone(),
//!             network.clone(),
//!             inbound,
//!             NodeConfig::default(),
//!         )
//!     })
//!     .collect();
//!
//! nodes[0].submit("req-1", "hello").await?;
//! let result = nodes[0].next_result().await;
//! ```

#![warn(clippy::pedantic)]

pub mod acceptor;
pub mod ballot;
pub mod codec;
pub mod config;
pub mod core;
pub mod error;
pub mod gateway;
pub mod membership;
mod messages;
pub mod node;
mod proposer;
pub mod transport;

pub use ballot::{Ballot, BallotClock, PeerId};
pub use config::{BackoffConfig, NodeConfig};
pub use error::NodeError;
pub use gateway::{Gateway, Output, SubmitError};
pub use membership::{Membership, StaticMembership};
pub use messages::{ClientResult, Envelope, Message, Request, RequestId, Round, Status};
pub use node::{Node, NodeHandle};
pub use transport::{FaultConfig, LocalNetwork, Transport};
