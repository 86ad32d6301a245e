use crate::{error::DriverError, node::Node, statement::Statement};

/// Decides when to start another execution of an idempotent request.
pub trait SpeculativeExecutionPolicy: Send + Sync {
    /// Delay in milliseconds before starting execution `running_executions`, or a negative
    /// value to start no more executions.
    fn next_execution(
        &self,
        node: &Node,
        keyspace: Option<&str>,
        statement: &Statement,
        running_executions: usize,
    ) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoSpeculativeExecutionPolicy;

impl SpeculativeExecutionPolicy for NoSpeculativeExecutionPolicy {
    fn next_execution(&self, _: &Node, _: Option<&str>, _: &Statement, _: usize) -> i64 {
        -1
    }
}

/// Starts executions at a fixed interval, up to `max_executions` including the first one.
#[derive(Debug, Clone, Copy)]
pub struct ConstantSpeculativeExecutionPolicy {
    max_executions: usize,
    delay_ms: i64,
}

impl ConstantSpeculativeExecutionPolicy {
    pub fn new(max_executions: usize, delay_ms: i64) -> Result<Self, DriverError> {
        if max_executions < 1 {
            return Err(DriverError::InvalidArgument(format!(
                "Max executions must be at least 1, got {max_executions}"
            )));
        }
        if delay_ms < 0 {
            return Err(DriverError::InvalidArgument(format!(
                "Delay must be positive or 0, got {delay_ms}"
            )));
        }
        Ok(Self {
            max_executions,
            delay_ms,
        })
    }
}

impl SpeculativeExecutionPolicy for ConstantSpeculativeExecutionPolicy {
    fn next_execution(
        &self,
        _node: &Node,
        _keyspace: Option<&str>,
        _statement: &Statement,
        running_executions: usize,
    ) -> i64 {
        if running_executions < self.max_executions {
            self.delay_ms
        } else {
            -1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_policy_stops_at_max() {
        let node = Node::new(([127, 0, 0, 1], 9042).into());
        let statement = Statement::new("SELECT 1");
        let policy = ConstantSpeculativeExecutionPolicy::new(3, 100).unwrap();

        assert_eq!(policy.next_execution(&node, None, &statement, 1), 100);
        assert_eq!(policy.next_execution(&node, None, &statement, 2), 100);
        assert_eq!(policy.next_execution(&node, None, &statement, 3), -1);
        assert_eq!(
            NoSpeculativeExecutionPolicy.next_execution(&node, None, &statement, 1),
            -1
        );
    }

    #[test]
    #[should_panic(expected = "InvalidArgument")]
    fn rejects_negative_delay() {
        ConstantSpeculativeExecutionPolicy::new(2, -5).unwrap();
    }
}
