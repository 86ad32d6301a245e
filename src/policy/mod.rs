//! Pluggable decisions the execution engine defers to.
mod retry;
mod speculative;

pub use retry::{DefaultRetryPolicy, RetryDecision, RetryPolicy};
pub use speculative::{
    ConstantSpeculativeExecutionPolicy, NoSpeculativeExecutionPolicy, SpeculativeExecutionPolicy,
};
