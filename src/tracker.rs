//! Per-request observability hooks.
use std::time::Duration;

use log::{info, warn};

use crate::{config::ExecutionProfile, error::DriverError, node::Node, statement::Statement};

pub trait RequestTracker: Send + Sync {
    fn on_success(
        &self,
        statement: &Statement,
        latency: Duration,
        profile: &ExecutionProfile,
        node: &Node,
        log_prefix: &str,
    );

    /// `node` is absent when the request failed before reaching any node.
    fn on_error(
        &self,
        statement: &Statement,
        error: &DriverError,
        latency: Duration,
        profile: &ExecutionProfile,
        node: Option<&Node>,
        log_prefix: &str,
    );

    fn on_node_success(
        &self,
        statement: &Statement,
        latency: Duration,
        profile: &ExecutionProfile,
        node: &Node,
        log_prefix: &str,
    );

    fn on_node_error(
        &self,
        statement: &Statement,
        error: &DriverError,
        latency: Duration,
        profile: &ExecutionProfile,
        node: &Node,
        log_prefix: &str,
    );

    /// Trackers that do nothing let the engine skip taking timestamps.
    fn is_noop(&self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct NoopRequestTracker;

impl RequestTracker for NoopRequestTracker {
    fn on_success(&self, _: &Statement, _: Duration, _: &ExecutionProfile, _: &Node, _: &str) {}

    fn on_error(
        &self,
        _: &Statement,
        _: &DriverError,
        _: Duration,
        _: &ExecutionProfile,
        _: Option<&Node>,
        _: &str,
    ) {
    }

    fn on_node_success(&self, _: &Statement, _: Duration, _: &ExecutionProfile, _: &Node, _: &str) {
    }

    fn on_node_error(
        &self,
        _: &Statement,
        _: &DriverError,
        _: Duration,
        _: &ExecutionProfile,
        _: &Node,
        _: &str,
    ) {
    }

    fn is_noop(&self) -> bool {
        true
    }
}

/// Logs slow requests and failed requests.
#[derive(Debug)]
pub struct RequestLogger {
    slow_threshold: Duration,
}

impl RequestLogger {
    pub fn new(slow_threshold: Duration) -> Self {
        Self { slow_threshold }
    }

    fn truncated(query: &str, max: usize) -> String {
        match query.char_indices().nth(max) {
            Some((end, _)) => format!("{}...<truncated>", &query[..end]),
            None => query.to_string(),
        }
    }
}

impl RequestTracker for RequestLogger {
    fn on_success(
        &self,
        statement: &Statement,
        latency: Duration,
        profile: &ExecutionProfile,
        node: &Node,
        log_prefix: &str,
    ) {
        if latency > self.slow_threshold {
            warn!(
                "[{log_prefix}][{node}] Query too slow, took {latency:?}: {}",
                Self::truncated(statement.query(), profile.logger_max_query_length)
            );
        }
    }

    fn on_error(
        &self,
        statement: &Statement,
        error: &DriverError,
        latency: Duration,
        profile: &ExecutionProfile,
        node: Option<&Node>,
        log_prefix: &str,
    ) {
        let node = node.map_or_else(|| "no node".to_string(), Node::to_string);
        info!(
            "[{log_prefix}][{node}] Query failed after {latency:?} ({error}): {}",
            Self::truncated(statement.query(), profile.logger_max_query_length)
        );
    }

    fn on_node_success(&self, _: &Statement, _: Duration, _: &ExecutionProfile, _: &Node, _: &str) {
    }

    fn on_node_error(
        &self,
        _: &Statement,
        _: &DriverError,
        _: Duration,
        _: &ExecutionProfile,
        _: &Node,
        _: &str,
    ) {
    }
}
