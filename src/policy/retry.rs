use std::fmt;

use log::trace;

use crate::{
    channel::ChannelError,
    error::DriverError,
    protocol::{ConsistencyLevel, ErrorCode, WriteType},
    statement::Statement,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetrySame,
    RetryNext,
    Rethrow,
    /// Complete the request with an empty result.
    Ignore,
}

impl fmt::Display for RetryDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RetryDecision::RetrySame => "RETRY_SAME",
            RetryDecision::RetryNext => "RETRY_NEXT",
            RetryDecision::Rethrow => "RETHROW",
            RetryDecision::Ignore => "IGNORE",
        };
        f.write_str(name)
    }
}

/// Decides what to do after a failed attempt.
///
/// `retry_count` is how many times the policy already asked to retry within the current
/// execution.
pub trait RetryPolicy: Send + Sync {
    fn on_read_timeout(
        &self,
        statement: &Statement,
        consistency: ConsistencyLevel,
        block_for: i32,
        received: i32,
        data_present: bool,
        retry_count: u32,
    ) -> RetryDecision;

    fn on_write_timeout(
        &self,
        statement: &Statement,
        consistency: ConsistencyLevel,
        write_type: WriteType,
        block_for: i32,
        received: i32,
        retry_count: u32,
    ) -> RetryDecision;

    fn on_unavailable(
        &self,
        statement: &Statement,
        consistency: ConsistencyLevel,
        required: i32,
        alive: i32,
        retry_count: u32,
    ) -> RetryDecision;

    /// The channel failed after the request was written.
    fn on_request_aborted(
        &self,
        statement: &Statement,
        error: &DriverError,
        retry_count: u32,
    ) -> RetryDecision;

    /// Any other server error that is not handled internally.
    fn on_error_response(
        &self,
        statement: &Statement,
        error: &DriverError,
        retry_count: u32,
    ) -> RetryDecision;
}

/// Retries at most once, and only where a retry is likely to help.
#[derive(Debug, Default)]
pub struct DefaultRetryPolicy {
    log_prefix: String,
}

impl DefaultRetryPolicy {
    pub fn new(log_prefix: impl Into<String>) -> Self {
        Self {
            log_prefix: log_prefix.into(),
        }
    }
}

impl RetryPolicy for DefaultRetryPolicy {
    fn on_read_timeout(
        &self,
        _statement: &Statement,
        consistency: ConsistencyLevel,
        block_for: i32,
        received: i32,
        data_present: bool,
        retry_count: u32,
    ) -> RetryDecision {
        // Enough replicas answered but the one holding the data did not: it is probably alive.
        let decision = if retry_count == 0 && received >= block_for && !data_present {
            RetryDecision::RetrySame
        } else {
            RetryDecision::Rethrow
        };
        trace!(
            "[{}] Read timeout at {consistency} ({received}/{block_for}, data present: {data_present}, retries: {retry_count}), {decision}",
            self.log_prefix
        );
        decision
    }

    fn on_write_timeout(
        &self,
        _statement: &Statement,
        consistency: ConsistencyLevel,
        write_type: WriteType,
        block_for: i32,
        received: i32,
        retry_count: u32,
    ) -> RetryDecision {
        let decision = if retry_count == 0 && write_type == WriteType::BatchLog {
            RetryDecision::RetrySame
        } else {
            RetryDecision::Rethrow
        };
        trace!(
            "[{}] Write timeout at {consistency} ({write_type:?}, {received}/{block_for}, retries: {retry_count}), {decision}",
            self.log_prefix
        );
        decision
    }

    fn on_unavailable(
        &self,
        _statement: &Statement,
        consistency: ConsistencyLevel,
        required: i32,
        alive: i32,
        retry_count: u32,
    ) -> RetryDecision {
        // Another coordinator may have a different view of the cluster.
        let decision = if retry_count == 0 {
            RetryDecision::RetryNext
        } else {
            RetryDecision::Rethrow
        };
        trace!(
            "[{}] Unavailable at {consistency} ({alive}/{required}, retries: {retry_count}), {decision}",
            self.log_prefix
        );
        decision
    }

    fn on_request_aborted(
        &self,
        _statement: &Statement,
        error: &DriverError,
        retry_count: u32,
    ) -> RetryDecision {
        let decision = match error {
            DriverError::RequestAborted(ChannelError::Closed | ChannelError::HeartbeatFailed) => {
                RetryDecision::RetryNext
            }
            _ => RetryDecision::Rethrow,
        };
        trace!(
            "[{}] Request aborted ({error}, retries: {retry_count}), {decision}",
            self.log_prefix
        );
        decision
    }

    fn on_error_response(
        &self,
        _statement: &Statement,
        error: &DriverError,
        retry_count: u32,
    ) -> RetryDecision {
        let decision = match error.code() {
            Some(ErrorCode::ReadFailure | ErrorCode::WriteFailure) => RetryDecision::Rethrow,
            _ => RetryDecision::RetryNext,
        };
        trace!(
            "[{}] Error response ({error}, retries: {retry_count}), {decision}",
            self.log_prefix
        );
        decision
    }
}
