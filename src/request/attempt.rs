use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    time::Instant,
};

use log::trace;

use crate::{channel::Channel, node::Node, plan::QueryPlan};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AttemptState {
    /// Written to the channel, flush not yet confirmed.
    Dispatched = 0,
    AwaitingResponse = 1,
    /// A response or failure arrived and is being handled.
    Completing = 2,
    Cancelled = 3,
}

impl AttemptState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => AttemptState::Dispatched,
            1 => AttemptState::AwaitingResponse,
            2 => AttemptState::Completing,
            _ => AttemptState::Cancelled,
        }
    }
}

/// One write and read against one node, within one execution.
#[derive(Debug)]
pub(crate) struct NodeAttempt {
    pub node: Arc<Node>,
    pub channel: Arc<dyn Channel>,
    pub plan: Arc<QueryPlan>,
    pub stream_id: i16,
    /// 0 for the initial execution, then one per speculative execution.
    pub execution: usize,
    /// Retries the policy asked for within this execution.
    pub retry_count: u32,
    pub schedule_next: bool,
    pub start: Instant,
    pub log_prefix: String,
    state: AtomicU8,
}

impl NodeAttempt {
    pub fn new(
        node: Arc<Node>,
        channel: Arc<dyn Channel>,
        plan: Arc<QueryPlan>,
        stream_id: i16,
        execution: usize,
        retry_count: u32,
        schedule_next: bool,
        request_log_prefix: &str,
    ) -> Self {
        Self {
            node,
            channel,
            plan,
            stream_id,
            execution,
            retry_count,
            schedule_next,
            start: Instant::now(),
            log_prefix: format!("{request_log_prefix}|{execution}"),
            state: AtomicU8::new(AttemptState::Dispatched as u8),
        }
    }

    pub fn state(&self) -> AttemptState {
        AttemptState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: AttemptState, to: AttemptState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The write was flushed. Fails if the attempt was cancelled meanwhile.
    pub fn mark_written(&self) -> bool {
        self.transition(AttemptState::Dispatched, AttemptState::AwaitingResponse)
    }

    /// A response or failure arrived. Fails if the attempt was cancelled meanwhile.
    pub fn begin_completing(&self) -> bool {
        self.transition(AttemptState::AwaitingResponse, AttemptState::Completing)
    }

    /// Moves to `Cancelled` and abandons the outstanding exchange if there is one.
    pub fn cancel(&self) {
        let previous = AttemptState::from_u8(
            self.state
                .swap(AttemptState::Cancelled as u8, Ordering::AcqRel),
        );
        if matches!(
            previous,
            AttemptState::Dispatched | AttemptState::AwaitingResponse
        ) && !self.channel.is_closed()
        {
            trace!("[{}] Abandoning stream {}", self.log_prefix, self.stream_id);
            self.channel.abandon(self.stream_id);
        }
    }
}
