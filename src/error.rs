//! Request-level errors.
//!
//! [`DriverError`] is the taxonomy every attempt failure is classified into. A request that
//! fails resolves to a [`RequestError`]: the final [`DriverError`] plus, when the error kind
//! supports it, the [`ExecutionInfo`] gathered while executing.
use std::{sync::Arc, time::Duration};

use thiserror::Error;
use uuid::Uuid;

use crate::{
    channel::{ChannelError, WriteError},
    codec::CodecError,
    node::Node,
    protocol::ErrorCode,
};

/// How many node errors an [`DriverError::AllNodesFailed`] message spells out.
const MAX_ERRORS_IN_MESSAGE: usize = 3;

#[derive(Debug, Clone, Error)]
pub enum DriverError {
    #[error("{0}")]
    Throttling(String),

    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Session is closed")]
    SessionClosed,

    #[error("no channel available")]
    NoChannel,

    #[error("failed to write request: {0}")]
    WriteFailed(WriteError),

    #[error("frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLong { size: usize, max: usize },

    #[error("[{node}] {message}")]
    Server {
        node: Arc<Node>,
        code: ErrorCode,
        message: String,
    },

    #[error("request aborted: {0}")]
    RequestAborted(ChannelError),

    #[error("{}", all_nodes_failed(.0))]
    AllNodesFailed(Vec<(Arc<Node>, DriverError)>),

    #[error("Unexpected response {0}")]
    UnexpectedResponse(String),

    #[error("{0}")]
    IllegalState(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("request was cancelled")]
    Cancelled,

    #[error(transparent)]
    Codec(#[from] CodecError),
}

fn all_nodes_failed(errors: &[(Arc<Node>, DriverError)]) -> String {
    if errors.is_empty() {
        return "No node was available to execute the query".to_string();
    }
    let shown = errors
        .iter()
        .take(MAX_ERRORS_IN_MESSAGE)
        .map(|(node, error)| format!("{node}: {error}"))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "All {} node(s) tried for the query failed (showing first {}): {shown}",
        errors.len(),
        errors.len().min(MAX_ERRORS_IN_MESSAGE)
    )
}

impl DriverError {
    pub(crate) fn server(node: &Arc<Node>, code: ErrorCode, message: impl Into<String>) -> Self {
        DriverError::Server {
            node: Arc::clone(node),
            code,
            message: message.into(),
        }
    }

    /// Internal invariant violations carry no execution info.
    pub fn supports_execution_info(&self) -> bool {
        !matches!(
            self,
            DriverError::UnexpectedResponse(_)
                | DriverError::IllegalState(_)
                | DriverError::InvalidArgument(_)
                | DriverError::Codec(_)
        )
    }

    /// The server error code, for errors reported by a coordinator.
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            DriverError::Server { code, .. } => Some(code),
            _ => None,
        }
    }

    /// Whether the client gave up waiting, as opposed to a coordinator reporting a timeout.
    pub fn is_client_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout(_))
    }
}

impl From<WriteError> for DriverError {
    fn from(error: WriteError) -> Self {
        match error {
            WriteError::FrameTooLong { size, max } => DriverError::FrameTooLong { size, max },
            other => DriverError::WriteFailed(other),
        }
    }
}

impl From<ChannelError> for DriverError {
    fn from(error: ChannelError) -> Self {
        match error {
            ChannelError::FrameTooLong { size, max } => DriverError::FrameTooLong { size, max },
            other => DriverError::RequestAborted(other),
        }
    }
}

/// Details of how a request was executed.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInfo {
    /// The node that produced the final outcome, if any.
    pub coordinator: Option<Arc<Node>>,
    /// Speculative executions started, excluding the initial one.
    pub speculative_execution_count: usize,
    /// Index of the execution that produced the final outcome.
    pub successful_execution_index: Option<usize>,
    /// Every attempt that failed before the outcome, in order.
    pub errors: Vec<(Arc<Node>, DriverError)>,
    pub paging_state: Option<Vec<u8>>,
    pub tracing_id: Option<Uuid>,
    pub warnings: Vec<String>,
    pub schema_in_agreement: bool,
}

/// The failure a request resolves to.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct RequestError {
    #[source]
    error: DriverError,
    execution_info: Option<Box<ExecutionInfo>>,
}

impl RequestError {
    pub fn new(error: DriverError, execution_info: Option<ExecutionInfo>) -> Self {
        Self {
            error,
            execution_info: execution_info.map(Box::new),
        }
    }

    pub fn error(&self) -> &DriverError {
        &self.error
    }

    pub fn execution_info(&self) -> Option<&ExecutionInfo> {
        self.execution_info.as_deref()
    }

    pub fn into_inner(self) -> DriverError {
        self.error
    }
}

impl From<DriverError> for RequestError {
    fn from(error: DriverError) -> Self {
        RequestError::new(error, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(port: u16) -> Arc<Node> {
        Arc::new(Node::new(([127, 0, 0, 1], port).into()))
    }

    #[test]
    fn all_nodes_failed_message() {
        assert_eq!(
            DriverError::AllNodesFailed(vec![]).to_string(),
            "No node was available to execute the query"
        );

        let errors = (1..=4)
            .map(|port| (node(port), DriverError::NoChannel))
            .collect::<Vec<_>>();
        let message = DriverError::AllNodesFailed(errors).to_string();
        assert!(message.starts_with("All 4 node(s) tried for the query failed (showing first 3)"));
        assert!(message.contains("127.0.0.1:3: no channel available"));
        assert!(!message.contains("127.0.0.1:4"));
    }

    #[test]
    fn internal_errors_carry_no_execution_info() {
        assert!(DriverError::Timeout(Duration::from_secs(1)).supports_execution_info());
        assert!(DriverError::AllNodesFailed(vec![]).supports_execution_info());
        assert!(!DriverError::IllegalState("x".into()).supports_execution_info());
        assert!(!DriverError::UnexpectedResponse("x".into()).supports_execution_info());
    }

    #[test]
    fn oversized_frames_keep_their_own_kind() {
        let write: DriverError = WriteError::FrameTooLong { size: 9, max: 8 }.into();
        let abort: DriverError = ChannelError::FrameTooLong { size: 9, max: 8 }.into();
        assert!(matches!(write, DriverError::FrameTooLong { size: 9, max: 8 }));
        assert!(matches!(abort, DriverError::FrameTooLong { .. }));

        let closed: DriverError = ChannelError::Closed.into();
        assert!(matches!(closed, DriverError::RequestAborted(ChannelError::Closed)));
    }

    #[test]
    fn timeout_message() {
        let error = DriverError::Timeout(Duration::from_millis(1500));
        assert_eq!(error.to_string(), "Query timed out after 1.5s");
        assert!(error.is_client_timeout());
    }
}
