//! Session and node metrics.
use std::time::Duration;

use dashmap::DashMap;

use crate::node::Node;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionMetric {
    CqlRequests,
    ThrottlingDelay,
    ThrottlingErrors,
    CqlClientTimeouts,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeMetric {
    CqlMessages,
    UnsentRequests,
    AbortedRequests,
    SpeculativeExecutions,
    ReadTimeouts,
    WriteTimeouts,
    Unavailables,
    OtherErrors,
    Retries,
    RetriesOnAborted,
    RetriesOnReadTimeout,
    RetriesOnWriteTimeout,
    RetriesOnUnavailable,
    RetriesOnOtherError,
    Ignores,
    IgnoresOnAborted,
    IgnoresOnReadTimeout,
    IgnoresOnWriteTimeout,
    IgnoresOnUnavailable,
    IgnoresOnOtherError,
}

/// Where a metric is recorded: the whole session, or one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricScope<'a> {
    Session(SessionMetric),
    Node(&'a Node, NodeMetric),
}

/// Sink for counters and timers. Metrics are recorded per execution profile.
pub trait MetricUpdater: Send + Sync {
    /// Lets callers skip measuring what nobody records.
    fn is_enabled(&self, metric: MetricScope<'_>, profile: &str) -> bool;

    fn increment(&self, metric: MetricScope<'_>, profile: &str);

    fn update_timer(&self, metric: MetricScope<'_>, profile: &str, elapsed: Duration);
}

#[derive(Debug, Default)]
pub struct NoopMetricUpdater;

impl MetricUpdater for NoopMetricUpdater {
    fn is_enabled(&self, _: MetricScope<'_>, _: &str) -> bool {
        false
    }

    fn increment(&self, _: MetricScope<'_>, _: &str) {}

    fn update_timer(&self, _: MetricScope<'_>, _: &str, _: Duration) {}
}

type NodeKey = (std::net::SocketAddr, NodeMetric, String);

/// Keeps every metric in memory. Timers record a sample count and the total time.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    session_counters: DashMap<(SessionMetric, String), u64>,
    session_timers: DashMap<(SessionMetric, String), (u64, Duration)>,
    node_counters: DashMap<NodeKey, u64>,
    node_timers: DashMap<NodeKey, (u64, Duration)>,
}

impl InMemoryMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self, metric: SessionMetric, profile: &str) -> u64 {
        self.session_counters
            .get(&(metric, profile.to_string()))
            .map_or(0, |count| *count)
    }

    /// Number of samples recorded by a session timer.
    pub fn session_samples(&self, metric: SessionMetric, profile: &str) -> u64 {
        self.session_timers
            .get(&(metric, profile.to_string()))
            .map_or(0, |timer| timer.0)
    }

    pub fn node_count(&self, node: &Node, metric: NodeMetric, profile: &str) -> u64 {
        self.node_counters
            .get(&(node.address(), metric, profile.to_string()))
            .map_or(0, |count| *count)
    }

    pub fn node_samples(&self, node: &Node, metric: NodeMetric, profile: &str) -> u64 {
        self.node_timers
            .get(&(node.address(), metric, profile.to_string()))
            .map_or(0, |timer| timer.0)
    }
}

impl MetricUpdater for InMemoryMetrics {
    fn is_enabled(&self, _: MetricScope<'_>, _: &str) -> bool {
        true
    }

    fn increment(&self, metric: MetricScope<'_>, profile: &str) {
        match metric {
            MetricScope::Session(metric) => {
                *self
                    .session_counters
                    .entry((metric, profile.to_string()))
                    .or_default() += 1;
            }
            MetricScope::Node(node, metric) => {
                *self
                    .node_counters
                    .entry((node.address(), metric, profile.to_string()))
                    .or_default() += 1;
            }
        }
    }

    fn update_timer(&self, metric: MetricScope<'_>, profile: &str, elapsed: Duration) {
        fn record(timer: &mut (u64, Duration), elapsed: Duration) {
            timer.0 += 1;
            timer.1 += elapsed;
        }
        match metric {
            MetricScope::Session(metric) => record(
                &mut self
                    .session_timers
                    .entry((metric, profile.to_string()))
                    .or_default(),
                elapsed,
            ),
            MetricScope::Node(node, metric) => record(
                &mut self
                    .node_timers
                    .entry((node.address(), metric, profile.to_string()))
                    .or_default(),
                elapsed,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_are_scoped_by_profile_and_node() {
        let metrics = InMemoryMetrics::new();
        let a = Node::new(([127, 0, 0, 1], 1).into());
        let b = Node::new(([127, 0, 0, 1], 2).into());

        metrics.increment(MetricScope::Node(&a, NodeMetric::Retries), "default");
        metrics.increment(MetricScope::Node(&a, NodeMetric::Retries), "default");
        metrics.increment(MetricScope::Node(&b, NodeMetric::Retries), "olap");
        metrics.increment(MetricScope::Session(SessionMetric::ThrottlingErrors), "default");

        assert_eq!(metrics.node_count(&a, NodeMetric::Retries, "default"), 2);
        assert_eq!(metrics.node_count(&b, NodeMetric::Retries, "default"), 0);
        assert_eq!(metrics.node_count(&b, NodeMetric::Retries, "olap"), 1);
        assert_eq!(
            metrics.session_count(SessionMetric::ThrottlingErrors, "default"),
            1
        );
    }

    #[test]
    fn timers_count_samples() {
        let metrics = InMemoryMetrics::new();
        let scope = MetricScope::Session(SessionMetric::CqlRequests);
        metrics.update_timer(scope, "default", Duration::from_millis(3));
        metrics.update_timer(scope, "default", Duration::from_millis(4));
        assert_eq!(metrics.session_samples(SessionMetric::CqlRequests, "default"), 2);
        assert!(!NoopMetricUpdater.is_enabled(scope, "default"));
    }
}
