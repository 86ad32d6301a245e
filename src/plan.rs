//! Query plans and the load-balancing seam that produces them.
use std::{
    collections::VecDeque,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
};

use parking_lot::Mutex;

use crate::{node::Node, statement::Statement};

/// Ordered candidate coordinators for one request.
///
/// Shared by every execution of the request; each [`poll`](QueryPlan::poll) hands a node to
/// exactly one caller.
#[derive(Debug, Default)]
pub struct QueryPlan {
    nodes: Mutex<VecDeque<Arc<Node>>>,
}

impl QueryPlan {
    pub fn new(nodes: impl IntoIterator<Item = Arc<Node>>) -> Self {
        Self {
            nodes: Mutex::new(nodes.into_iter().collect()),
        }
    }

    pub fn single(node: Arc<Node>) -> Self {
        Self::new([node])
    }

    pub fn poll(&self) -> Option<Arc<Node>> {
        self.nodes.lock().pop_front()
    }

    pub fn remaining(&self) -> usize {
        self.nodes.lock().len()
    }
}

pub trait LoadBalancingPolicy: Send + Sync {
    fn new_query_plan(&self, statement: &Statement, keyspace: Option<&str>) -> QueryPlan;
}

/// Cycles through a fixed node list, starting one further along for each plan.
#[derive(Debug)]
pub struct RoundRobinPolicy {
    nodes: Vec<Arc<Node>>,
    index: AtomicUsize,
}

impl RoundRobinPolicy {
    pub fn new(nodes: Vec<Arc<Node>>) -> Self {
        Self {
            nodes,
            index: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancingPolicy for RoundRobinPolicy {
    fn new_query_plan(&self, _statement: &Statement, _keyspace: Option<&str>) -> QueryPlan {
        if self.nodes.is_empty() {
            return QueryPlan::default();
        }
        let start = self.index.fetch_add(1, Ordering::Relaxed) % self.nodes.len();
        QueryPlan::new(
            self.nodes[start..]
                .iter()
                .chain(&self.nodes[..start])
                .cloned(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nodes(count: u16) -> Vec<Arc<Node>> {
        (1..=count)
            .map(|port| Arc::new(Node::new(([10, 0, 0, 1], port).into())))
            .collect()
    }

    #[test]
    fn plan_is_single_pass() {
        let plan = QueryPlan::new(nodes(2));
        assert_eq!(plan.poll().unwrap().address().port(), 1);
        assert_eq!(plan.poll().unwrap().address().port(), 2);
        assert!(plan.poll().is_none());
        assert_eq!(plan.remaining(), 0);
    }

    #[test]
    fn round_robin_rotates() {
        let policy = RoundRobinPolicy::new(nodes(3));
        let statement = Statement::new("SELECT 1");

        let first = policy.new_query_plan(&statement, None);
        let second = policy.new_query_plan(&statement, None);
        assert_eq!(first.poll().unwrap().address().port(), 1);
        assert_eq!(second.poll().unwrap().address().port(), 2);
        assert_eq!(second.remaining(), 2);
    }

    #[test]
    fn empty_policy_yields_empty_plan() {
        let policy = RoundRobinPolicy::new(vec![]);
        assert!(policy.new_query_plan(&Statement::new("x"), None).poll().is_none());
    }

    #[test]
    fn concurrent_polls_never_share_a_node() {
        let plan = QueryPlan::new(nodes(64));
        let claimed = Mutex::new(Vec::new());
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while let Some(node) = plan.poll() {
                        claimed.lock().push(node.address().port());
                    }
                });
            }
        });
        let mut claimed = claimed.into_inner();
        claimed.sort_unstable();
        claimed.dedup();
        assert_eq!(claimed.len(), 64);
    }
}
