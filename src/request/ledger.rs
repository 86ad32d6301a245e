use std::sync::Arc;

use parking_lot::Mutex;

use crate::{error::DriverError, node::Node};

/// Append-only list of the errors met on each node tried.
///
/// A node appears once per failed attempt against it.
#[derive(Debug, Default)]
pub(crate) struct ErrorLedger {
    errors: Mutex<Vec<(Arc<Node>, DriverError)>>,
}

impl ErrorLedger {
    pub fn record(&self, node: &Arc<Node>, error: DriverError) {
        self.errors.lock().push((Arc::clone(node), error));
    }

    pub fn snapshot(&self) -> Vec<(Arc<Node>, DriverError)> {
        self.errors.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.errors.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_repeated_nodes_in_order() {
        let ledger = ErrorLedger::default();
        let node = Arc::new(Node::new(([127, 0, 0, 1], 9042).into()));
        ledger.record(&node, DriverError::NoChannel);
        ledger.record(&node, DriverError::Cancelled);

        let errors = ledger.snapshot();
        assert_eq!(ledger.len(), 2);
        assert!(matches!(errors[0].1, DriverError::NoChannel));
        assert!(matches!(errors[1].1, DriverError::Cancelled));
    }

    #[test]
    fn concurrent_appends_are_kept() {
        let ledger = ErrorLedger::default();
        let node = Arc::new(Node::new(([127, 0, 0, 1], 9042).into()));
        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..100 {
                        ledger.record(&node, DriverError::NoChannel);
                    }
                });
            }
        });
        assert_eq!(ledger.len(), 400);
    }
}
