//! Request execution.
//!
//! A [`RequestHandler`] drives one statement from admission to its single outcome. It pulls
//! nodes off a shared [`QueryPlan`](crate::plan::QueryPlan), runs one [`NodeAttempt`] per
//! write and read against a node, and lets the retry and speculative execution policies pick
//! the next step.
//!
//! # Key Components
//!
//! - [`ResultFuture`]: the caller's handle on the outcome, with cancellation.
//! - [`CompletionSlot`]: first-writer-wins result cell shared by all executions.
//! - [`ErrorLedger`]: every failed attempt, in order, for the final report.
//! - [`NodeAttempt`]: the state machine of one attempt.
//! - [`AdminRequest`]: a throttled exchange on a given channel, used to (re)prepare.
//! - [`RequestLogFormatter`]: renders a statement for log lines.
mod admin;
mod attempt;
mod completion;
mod format;
mod handler;
mod ledger;

pub(crate) use admin::AdminRequest;
pub use attempt::AttemptState;
pub(crate) use attempt::NodeAttempt;
pub(crate) use completion::CompletionSlot;
pub use completion::ResultFuture;
pub use format::RequestLogFormatter;
pub(crate) use handler::RequestHandler;
pub(crate) use ledger::ErrorLedger;
