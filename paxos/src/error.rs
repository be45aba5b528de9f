//! Error types and structured `error_stack` context types.

use std::fmt;

use crate::messages::RequestId;

/// A node operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeError {
    /// The node's tasks have stopped.
    Stopped,
    /// The request was refused by the gateway.
    Rejected,
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeError::Stopped => f.write_str("node has stopped"),
            NodeError::Rejected => f.write_str("request rejected"),
        }
    }
}

impl std::error::Error for NodeError {}

/// Error context: request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: RequestId,
}

impl RequestContext {
    #[must_use]
    pub fn new(request_id: RequestId) -> Self {
        Self { request_id }
    }
}

impl fmt::Display for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request: {}", self.request_id)
    }
}
