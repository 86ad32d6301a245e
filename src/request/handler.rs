use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use futures::future;
use log::{Level, debug, log_enabled, trace, warn};
use parking_lot::Mutex;
use tokio::sync::oneshot;
use uuid::Uuid;

use super::{
    CompletionSlot, ErrorLedger, NodeAttempt, ResultFuture,
    admin::AdminRequest,
    completion::RequestOutcome,
};
use crate::{
    channel::{Channel, ChannelError, ChannelRequest, Exchange, WriteError, wait_response, wait_written},
    config::ExecutionProfile,
    error::{DriverError, ExecutionInfo, RequestError},
    metrics::{MetricScope, NodeMetric, SessionMetric},
    node::Node,
    plan::QueryPlan,
    policy::RetryDecision,
    protocol::{ErrorCode, ErrorMessage, Frame, Message, Response, ResultMessage},
    result::AsyncResultSet,
    session::SessionInner,
    statement::Statement,
    throttle::Throttled,
    timer::{Timeout, TimerError},
};

type ExchangeHalves = (
    oneshot::Receiver<Result<(), WriteError>>,
    oneshot::Receiver<Result<Frame, ChannelError>>,
);

/// Drives one statement from admission to its single outcome.
///
/// Every execution shares the handler: the query plan, the completion slot, the error ledger
/// and the bookkeeping needed to cancel whatever is still running once an outcome is set.
pub(crate) struct RequestHandler {
    id: u64,
    start: Instant,
    log_prefix: String,
    statement: Statement,
    session: Arc<SessionInner>,
    keyspace: Option<String>,
    profile: Arc<ExecutionProfile>,
    idempotent: bool,
    message: Message,
    timeout: Duration,
    slot: CompletionSlot<RequestOutcome>,
    /// Executions that may still produce an outcome. The last one to run out of nodes fails
    /// the request.
    active_executions: AtomicUsize,
    started_speculative: AtomicUsize,
    scheduled_timeout: Mutex<Option<Timeout>>,
    scheduled_executions: Mutex<Vec<Timeout>>,
    in_flight: Mutex<Vec<Arc<NodeAttempt>>>,
    errors: ErrorLedger,
}

impl RequestHandler {
    pub fn start(statement: Statement, session: Arc<SessionInner>) -> ResultFuture {
        let context = session.context();
        let id = session.next_request_id();
        let log_prefix = format!("{}|{id}", session.log_prefix());
        trace!("[{log_prefix}] Creating new handler for request {}", statement.query());

        let profile = match statement.profile() {
            Some(name) => match context.config.profile(name) {
                Some(profile) => profile,
                None => {
                    return ResultFuture::failed(
                        DriverError::InvalidArgument(format!("Unknown execution profile '{name}'"))
                            .into(),
                    );
                }
            },
            None => context.config.default_profile(),
        };
        let message = match statement.to_message(&profile, context.codec_registry.as_ref()) {
            Ok(message) => message,
            Err(error) => return ResultFuture::failed(error.into()),
        };

        let (sender, receiver) = oneshot::channel();
        let handler = Arc::new(RequestHandler {
            id,
            start: Instant::now(),
            keyspace: session.keyspace(),
            idempotent: statement
                .idempotent()
                .unwrap_or(profile.default_idempotence),
            timeout: statement.timeout().unwrap_or(profile.request_timeout),
            log_prefix,
            statement,
            profile,
            message,
            slot: CompletionSlot::new(sender),
            active_executions: AtomicUsize::new(1),
            started_speculative: AtomicUsize::new(0),
            scheduled_timeout: Mutex::new(None),
            scheduled_executions: Mutex::new(Vec::new()),
            in_flight: Mutex::new(Vec::new()),
            errors: ErrorLedger::default(),
            session: Arc::clone(&session),
        });

        match handler.schedule_timeout() {
            Ok(timeout) => *handler.scheduled_timeout.lock() = timeout,
            Err(TimerError::Stopped) => {
                // Never admitted, so the throttler is left alone.
                debug!("[{}] Session is closed, rejecting request", handler.log_prefix);
                handler
                    .slot
                    .complete(Err(RequestError::new(DriverError::SessionClosed, None)));
                return ResultFuture::new(receiver, handler);
            }
        }
        session.track_request(id, &handler);
        if context.timer.is_stopped() {
            // The session closed while this request was being set up.
            handler.close();
            return ResultFuture::new(receiver, handler);
        }
        context.throttler.register(handler.clone());
        ResultFuture::new(receiver, handler)
    }

    fn schedule_timeout(self: &Arc<Self>) -> Result<Option<Timeout>, TimerError> {
        let timer = &self.session.context().timer;
        if self.timeout.is_zero() {
            return if timer.is_stopped() {
                Err(TimerError::Stopped)
            } else {
                Ok(None)
            };
        }
        let handler = Arc::downgrade(self);
        let timeout = self.timeout;
        timer
            .new_timeout(timeout, move || {
                if let Some(handler) = handler.upgrade() {
                    handler.set_final_error(DriverError::Timeout(timeout), None, None);
                }
            })
            .map(Some)
    }

    pub fn cancel(self: &Arc<Self>) -> bool {
        if !self.slot.cancel() {
            return false;
        }
        debug!("[{}] Request cancelled", self.log_prefix);
        self.session.untrack_request(self.id);
        self.cancel_scheduled_tasks();
        let me: Arc<dyn Throttled> = self.clone();
        self.session
            .context()
            .throttler
            .signal_error(&me, &DriverError::Cancelled);
        true
    }

    /// Fails the request because its session is closing.
    pub fn close(self: &Arc<Self>) {
        self.set_final_error(DriverError::SessionClosed, None, None);
    }

    pub fn is_cancelled(&self) -> bool {
        self.slot.is_cancelled()
    }

    fn channel_to(&self, node: Arc<Node>) -> Option<(Arc<Node>, Arc<dyn Channel>)> {
        let channel = self
            .session
            .context()
            .channels
            .channel_for(&node, &self.log_prefix)?;
        Some((node, channel))
    }

    /// Writes the request to `retried_node`, or to the next node of the plan that has a
    /// channel.
    fn send_request(
        self: &Arc<Self>,
        retried_node: Option<Arc<Node>>,
        plan: Arc<QueryPlan>,
        execution: usize,
        retry_count: u32,
        schedule_next: bool,
    ) {
        if self.slot.is_done() {
            return;
        }
        let mut target = None;
        if let Some(node) = retried_node {
            target = self.channel_to(Arc::clone(&node));
            if target.is_none() {
                self.errors.record(&node, DriverError::NoChannel);
            }
        }
        while target.is_none() && !self.slot.is_done() {
            match plan.poll() {
                Some(node) => target = self.channel_to(node),
                None => break,
            }
        }

        let Some((node, channel)) = target else {
            trace!(
                "[{}|{execution}] Query plan exhausted ({} errors so far)",
                self.log_prefix,
                self.errors.len()
            );
            if !self.slot.is_done() && self.active_executions.fetch_sub(1, Ordering::AcqRel) == 1 {
                self.set_final_error(DriverError::AllNodesFailed(self.errors.snapshot()), None, None);
            }
            return;
        };

        let mut request = ChannelRequest::new(self.message.clone());
        request.tracing = self.statement.is_tracing();
        request.custom_payload = self.statement.custom_payload().to_vec();
        let Exchange {
            stream_id,
            written,
            response,
        } = channel.write(request);
        let attempt = Arc::new(NodeAttempt::new(
            node,
            channel,
            plan,
            stream_id,
            execution,
            retry_count,
            schedule_next,
            &self.log_prefix,
        ));
        trace!(
            "[{}] Sending request to {} on stream {}",
            attempt.log_prefix, attempt.node, stream_id
        );
        let handler = Arc::clone(self);
        self.session
            .context()
            .timer
            .handle()
            .spawn(async move { handler.drive(attempt, (written, response)).await });
    }

    async fn drive(self: Arc<Self>, attempt: Arc<NodeAttempt>, exchange: ExchangeHalves) {
        let (written, response) = exchange;
        if let Err(error) = wait_written(written).await {
            self.on_write_failure(&attempt, error);
            return;
        }
        if !attempt.mark_written() {
            trace!("[{}] Written after being {:?}", attempt.log_prefix, attempt.state());
            return;
        }
        trace!("[{}] Request sent on {}", attempt.log_prefix, attempt.node);
        self.in_flight.lock().push(Arc::clone(&attempt));
        if self.slot.is_done() {
            // The outcome was set while the write was being flushed.
            attempt.cancel();
            return;
        }
        if attempt.schedule_next && self.idempotent {
            self.schedule_speculative_execution(&attempt);
        }

        let outcome = wait_response(response).await;
        self.in_flight
            .lock()
            .retain(|other| !Arc::ptr_eq(other, &attempt));
        if !attempt.begin_completing() {
            trace!("[{}] Ignoring outcome, attempt is {:?}", attempt.log_prefix, attempt.state());
            return;
        }
        match outcome {
            Ok(frame) => self.on_response(&attempt, frame).await,
            Err(error) => self.on_failure(&attempt, error),
        }
    }

    fn schedule_speculative_execution(self: &Arc<Self>, attempt: &NodeAttempt) {
        let context = self.session.context();
        let next_execution = attempt.execution + 1;
        let delay = context.speculative_policy.next_execution(
            &attempt.node,
            self.keyspace.as_deref(),
            &self.statement,
            next_execution,
        );
        let Ok(delay) = u64::try_from(delay) else {
            return;
        };
        trace!(
            "[{}] Scheduling speculative execution {next_execution} in {delay} ms",
            self.log_prefix
        );
        let handler = Arc::downgrade(self);
        let node = Arc::clone(&attempt.node);
        let plan = Arc::clone(&attempt.plan);
        let scheduled = context
            .timer
            .new_timeout(Duration::from_millis(delay), move || {
                let Some(handler) = handler.upgrade() else {
                    return;
                };
                if handler.slot.is_done() {
                    return;
                }
                trace!(
                    "[{}] Starting speculative execution {next_execution}",
                    handler.log_prefix
                );
                handler.active_executions.fetch_add(1, Ordering::AcqRel);
                handler.started_speculative.fetch_add(1, Ordering::AcqRel);
                handler.increment_node(&node, NodeMetric::SpeculativeExecutions);
                handler.send_request(None, plan, next_execution, 0, true);
            });
        match scheduled {
            Ok(timeout) => self.scheduled_executions.lock().push(timeout),
            Err(TimerError::Stopped) => trace!(
                "[{}] Next speculative execution not scheduled since the timer is stopped",
                self.log_prefix
            ),
        }
    }

    fn on_write_failure(self: &Arc<Self>, attempt: &NodeAttempt, error: WriteError) {
        if self.slot.is_done() {
            return;
        }
        let error = DriverError::from(error);
        trace!(
            "[{}] Failed to send request on {}: {error}",
            attempt.log_prefix, attempt.node
        );
        self.errors.record(&attempt.node, error.clone());
        self.track_node_error(&attempt.node, &error, attempt.start);
        if matches!(error, DriverError::FrameTooLong { .. }) {
            self.set_final_error(error, Some(&attempt.node), Some(attempt.execution));
            return;
        }
        self.increment_node(&attempt.node, NodeMetric::UnsentRequests);
        self.send_request(
            None,
            Arc::clone(&attempt.plan),
            attempt.execution,
            attempt.retry_count,
            attempt.schedule_next,
        );
    }

    async fn on_response(self: &Arc<Self>, attempt: &NodeAttempt, frame: Frame) {
        let context = self.session.context();
        let messages = MetricScope::Node(&attempt.node, NodeMetric::CqlMessages);
        if context.metrics.is_enabled(messages, &self.profile.name) {
            context
                .metrics
                .update_timer(messages, &self.profile.name, attempt.start.elapsed());
        }
        if self.slot.is_done() {
            return;
        }

        let Frame {
            tracing_id,
            warnings,
            response,
            ..
        } = frame;
        match response {
            Response::Result(result) => {
                let schema_in_agreement = match &result {
                    ResultMessage::SchemaChange { keyspace, .. } => {
                        self.refresh_after_schema_change(keyspace).await
                    }
                    ResultMessage::SetKeyspace { keyspace } => {
                        if let Err(error) = self.session.set_keyspace(keyspace).await {
                            warn!(
                                "[{}] Error while switching to keyspace {keyspace}: {error}",
                                attempt.log_prefix
                            );
                        }
                        true
                    }
                    _ => true,
                };
                self.set_final_result(result, tracing_id, warnings, schema_in_agreement, attempt);
            }
            Response::Error(error) => self.process_error_response(attempt, error).await,
            other => {
                let error = DriverError::UnexpectedResponse(other.to_string());
                self.track_node_error(&attempt.node, &error, attempt.start);
                self.set_final_error(error, Some(&attempt.node), Some(attempt.execution));
            }
        }
    }

    /// Returns whether the cluster agrees on the schema. Failures are logged, never surfaced.
    async fn refresh_after_schema_change(&self, keyspace: &str) -> bool {
        let context = self.session.context();
        let (agreement, refresh) = future::join(
            context.topology.check_schema_agreement(),
            context.metadata.refresh_schema(keyspace),
        )
        .await;
        if let Err(error) = refresh {
            warn!(
                "[{}] Error while refreshing schema after DDL query, keeping previous version: {error}",
                self.log_prefix
            );
        }
        agreement.unwrap_or_else(|error| {
            warn!(
                "[{}] Unexpected error while checking schema agreement, completing query anyway: {error}",
                self.log_prefix
            );
            false
        })
    }

    async fn process_error_response(self: &Arc<Self>, attempt: &NodeAttempt, error: ErrorMessage) {
        let ErrorMessage { code, message } = error;
        trace!(
            "[{}] Got error response {:#06x} from {}, processing",
            attempt.log_prefix,
            code.code(),
            attempt.node
        );
        if let ErrorCode::Unprepared { id } = code {
            self.reprepare(attempt, id).await;
            return;
        }

        let node = &attempt.node;
        let policy = &self.session.context().retry_policy;
        let error = DriverError::server(node, code.clone(), message);
        if code == ErrorCode::IsBootstrapping {
            trace!("[{}] {node} is bootstrapping, trying next node", attempt.log_prefix);
            self.errors.record(node, error.clone());
            self.track_node_error(node, &error, attempt.start);
            self.send_request(
                None,
                Arc::clone(&attempt.plan),
                attempt.execution,
                attempt.retry_count,
                false,
            );
            return;
        }
        if code.is_unrecoverable() {
            trace!("[{}] Unrecoverable error, rethrowing", attempt.log_prefix);
            self.increment_node(node, NodeMetric::OtherErrors);
            self.track_node_error(node, &error, attempt.start);
            self.set_final_error(error, Some(node), Some(attempt.execution));
            return;
        }

        let decision = match code {
            ErrorCode::ReadTimeout {
                consistency,
                received,
                block_for,
                data_present,
            } => {
                let decision = policy.on_read_timeout(
                    &self.statement,
                    consistency,
                    block_for,
                    received,
                    data_present,
                    attempt.retry_count,
                );
                self.update_error_metrics(
                    node,
                    decision,
                    NodeMetric::ReadTimeouts,
                    NodeMetric::RetriesOnReadTimeout,
                    NodeMetric::IgnoresOnReadTimeout,
                );
                decision
            }
            ErrorCode::WriteTimeout {
                consistency,
                received,
                block_for,
                write_type,
            } => {
                let decision = if self.idempotent {
                    policy.on_write_timeout(
                        &self.statement,
                        consistency,
                        write_type,
                        block_for,
                        received,
                        attempt.retry_count,
                    )
                } else {
                    RetryDecision::Rethrow
                };
                self.update_error_metrics(
                    node,
                    decision,
                    NodeMetric::WriteTimeouts,
                    NodeMetric::RetriesOnWriteTimeout,
                    NodeMetric::IgnoresOnWriteTimeout,
                );
                decision
            }
            ErrorCode::Unavailable {
                consistency,
                required,
                alive,
            } => {
                let decision = policy.on_unavailable(
                    &self.statement,
                    consistency,
                    required,
                    alive,
                    attempt.retry_count,
                );
                self.update_error_metrics(
                    node,
                    decision,
                    NodeMetric::Unavailables,
                    NodeMetric::RetriesOnUnavailable,
                    NodeMetric::IgnoresOnUnavailable,
                );
                decision
            }
            _ => {
                let decision = if self.idempotent {
                    policy.on_error_response(&self.statement, &error, attempt.retry_count)
                } else {
                    RetryDecision::Rethrow
                };
                self.update_error_metrics(
                    node,
                    decision,
                    NodeMetric::OtherErrors,
                    NodeMetric::RetriesOnOtherError,
                    NodeMetric::IgnoresOnOtherError,
                );
                decision
            }
        };
        self.process_retry_decision(decision, error, attempt);
    }

    /// Prepares the statement again on the same channel, then replays the request there.
    async fn reprepare(self: &Arc<Self>, attempt: &NodeAttempt, id: Vec<u8>) {
        let context = self.session.context();
        let node = &attempt.node;
        let Some(payload) = self.session.reprepare_payload(&id) else {
            let error = DriverError::IllegalState(format!(
                "Tried to execute unprepared query {} but we don't have the data to reprepare it",
                hex(&id)
            ));
            self.set_final_error(error, Some(node), Some(attempt.execution));
            return;
        };
        trace!(
            "[{}] Statement {} is not prepared on {node}, repreparing",
            attempt.log_prefix,
            hex(&id)
        );
        let reprepare = AdminRequest::new(
            Arc::clone(node),
            Arc::clone(&attempt.channel),
            Message::Prepare {
                query: payload.query,
                keyspace: payload.keyspace,
            },
            payload.custom_payload,
            self.timeout,
            Arc::clone(&context.throttler),
            Arc::clone(&context.metrics),
            self.profile.name.clone(),
            context.timer.handle().clone(),
            attempt.log_prefix.clone(),
            format!("Reprepare {}", hex(&id)),
        );
        match reprepare.start().await {
            Ok(_) => {
                trace!("[{}] Reprepare successful, retrying", attempt.log_prefix);
                self.send_request(
                    Some(Arc::clone(node)),
                    Arc::clone(&attempt.plan),
                    attempt.execution,
                    attempt.retry_count,
                    false,
                );
            }
            Err(error) => {
                let fatal = match &error {
                    DriverError::Server { code, .. } => code.is_unrecoverable(),
                    DriverError::Throttling(_) => true,
                    _ => false,
                };
                if fatal {
                    trace!("[{}] Unrecoverable error on reprepare, rethrowing", attempt.log_prefix);
                    self.track_node_error(node, &error, attempt.start);
                    self.set_final_error(error, Some(node), Some(attempt.execution));
                } else {
                    trace!(
                        "[{}] Failed to reprepare ({error}), trying next node",
                        attempt.log_prefix
                    );
                    self.errors.record(node, error.clone());
                    self.track_node_error(node, &error, attempt.start);
                    self.send_request(
                        None,
                        Arc::clone(&attempt.plan),
                        attempt.execution,
                        attempt.retry_count,
                        false,
                    );
                }
            }
        }
    }

    /// The channel failed after the request was written.
    fn on_failure(self: &Arc<Self>, attempt: &NodeAttempt, error: ChannelError) {
        if self.slot.is_done() {
            return;
        }
        let error = DriverError::from(error);
        trace!("[{}] Request failure, processing: {error}", attempt.log_prefix);
        let decision = if !self.idempotent || matches!(error, DriverError::FrameTooLong { .. }) {
            RetryDecision::Rethrow
        } else {
            self.session.context().retry_policy.on_request_aborted(
                &self.statement,
                &error,
                attempt.retry_count,
            )
        };
        self.update_error_metrics(
            &attempt.node,
            decision,
            NodeMetric::AbortedRequests,
            NodeMetric::RetriesOnAborted,
            NodeMetric::IgnoresOnAborted,
        );
        self.process_retry_decision(decision, error, attempt);
    }

    fn process_retry_decision(
        self: &Arc<Self>,
        decision: RetryDecision,
        error: DriverError,
        attempt: &NodeAttempt,
    ) {
        trace!("[{}] Processing retry decision {decision}", attempt.log_prefix);
        let node = &attempt.node;
        match decision {
            RetryDecision::RetrySame | RetryDecision::RetryNext => {
                self.errors.record(node, error.clone());
                self.track_node_error(node, &error, attempt.start);
                let retried_node = match decision {
                    RetryDecision::RetrySame => Some(Arc::clone(node)),
                    _ => None,
                };
                self.send_request(
                    retried_node,
                    Arc::clone(&attempt.plan),
                    attempt.execution,
                    attempt.retry_count + 1,
                    false,
                );
            }
            RetryDecision::Rethrow => {
                self.track_node_error(node, &error, attempt.start);
                self.set_final_error(error, Some(node), Some(attempt.execution));
            }
            RetryDecision::Ignore => {
                self.set_final_result(ResultMessage::Void, None, Vec::new(), true, attempt);
            }
        }
    }

    fn update_error_metrics(
        &self,
        node: &Node,
        decision: RetryDecision,
        error: NodeMetric,
        retries_on_error: NodeMetric,
        ignores_on_error: NodeMetric,
    ) {
        self.increment_node(node, error);
        match decision {
            RetryDecision::RetrySame | RetryDecision::RetryNext => {
                self.increment_node(node, NodeMetric::Retries);
                self.increment_node(node, retries_on_error);
            }
            RetryDecision::Ignore => {
                self.increment_node(node, NodeMetric::Ignores);
                self.increment_node(node, ignores_on_error);
            }
            RetryDecision::Rethrow => {}
        }
    }

    fn set_final_result(
        self: &Arc<Self>,
        result: ResultMessage,
        tracing_id: Option<u128>,
        warnings: Vec<String>,
        schema_in_agreement: bool,
        attempt: &NodeAttempt,
    ) {
        let context = self.session.context();
        let mut info = self.execution_info(Some(&attempt.node), Some(attempt.execution));
        if let ResultMessage::Rows { paging_state, .. } = &result {
            info.paging_state = paging_state.clone();
        }
        info.tracing_id = tracing_id.map(Uuid::from_u128);
        info.schema_in_agreement = schema_in_agreement;
        let logged_warnings = (!warnings.is_empty()
            && self.profile.log_warnings
            && log_enabled!(Level::Warn))
        .then(|| warnings.clone());
        info.warnings = warnings;

        if !self.slot.complete(Ok(AsyncResultSet::new(result, info))) {
            return;
        }
        self.session.untrack_request(self.id);
        self.cancel_scheduled_tasks();
        let me: Arc<dyn Throttled> = self.clone();
        context.throttler.signal_success(&me);

        if !context.tracker.is_noop() {
            let now = Instant::now();
            context.tracker.on_node_success(
                &self.statement,
                now.duration_since(attempt.start),
                &self.profile,
                &attempt.node,
                &attempt.log_prefix,
            );
            context.tracker.on_success(
                &self.statement,
                now.duration_since(self.start),
                &self.profile,
                &attempt.node,
                &self.log_prefix,
            );
        }
        let requests = MetricScope::Session(SessionMetric::CqlRequests);
        if context.metrics.is_enabled(requests, &self.profile.name) {
            context
                .metrics
                .update_timer(requests, &self.profile.name, self.start.elapsed());
        }
        if let Some(warnings) = logged_warnings {
            self.log_server_warnings(&warnings);
        }
    }

    fn log_server_warnings(&self, warnings: &[String]) {
        let profile = &self.profile;
        let mut statement = String::new();
        self.session.context().formatter.append_request(
            &self.statement,
            profile.logger_max_query_length,
            profile.logger_show_values,
            profile.logger_max_values,
            profile.logger_max_value_length,
            &mut statement,
        );
        warn!(
            "[{}] Query '{statement}' generated server side warning(s): {}",
            self.log_prefix,
            warnings.join(", ")
        );
    }

    fn set_final_error(
        self: &Arc<Self>,
        error: DriverError,
        node: Option<&Arc<Node>>,
        execution: Option<usize>,
    ) {
        let context = self.session.context();
        let info = error
            .supports_execution_info()
            .then(|| self.execution_info(node, execution));
        if !self
            .slot
            .complete(Err(RequestError::new(error.clone(), info)))
        {
            return;
        }
        debug!("[{}] Request failed: {error}", self.log_prefix);
        self.session.untrack_request(self.id);
        self.cancel_scheduled_tasks();

        if !context.tracker.is_noop() {
            context.tracker.on_error(
                &self.statement,
                &error,
                self.start.elapsed(),
                &self.profile,
                node.map(|node| &**node),
                &self.log_prefix,
            );
        }
        let me: Arc<dyn Throttled> = self.clone();
        match &error {
            DriverError::Timeout(_) => {
                context.throttler.signal_timeout(&me);
                context.metrics.increment(
                    MetricScope::Session(SessionMetric::CqlClientTimeouts),
                    &self.profile.name,
                );
            }
            // The throttler already knows it rejected this request.
            DriverError::Throttling(_) => {}
            _ => context.throttler.signal_error(&me, &error),
        }
    }

    fn execution_info(&self, node: Option<&Arc<Node>>, execution: Option<usize>) -> ExecutionInfo {
        ExecutionInfo {
            coordinator: node.cloned(),
            speculative_execution_count: self.started_speculative.load(Ordering::Acquire),
            successful_execution_index: execution,
            errors: self.errors.snapshot(),
            ..ExecutionInfo::default()
        }
    }

    fn cancel_scheduled_tasks(&self) {
        if let Some(timeout) = self.scheduled_timeout.lock().take() {
            timeout.cancel();
        }
        let executions = std::mem::take(&mut *self.scheduled_executions.lock());
        for timeout in executions {
            timeout.cancel();
        }
        let attempts = std::mem::take(&mut *self.in_flight.lock());
        for attempt in attempts {
            attempt.cancel();
        }
    }

    fn track_node_error(&self, node: &Node, error: &DriverError, start: Instant) {
        let tracker = &self.session.context().tracker;
        if !tracker.is_noop() {
            tracker.on_node_error(
                &self.statement,
                error,
                start.elapsed(),
                &self.profile,
                node,
                &self.log_prefix,
            );
        }
    }

    fn increment_node(&self, node: &Node, metric: NodeMetric) {
        self.session
            .context()
            .metrics
            .increment(MetricScope::Node(node, metric), &self.profile.name);
    }
}

impl Throttled for RequestHandler {
    fn on_throttle_ready(self: Arc<Self>, was_delayed: bool) {
        let context = self.session.context();
        let delay = MetricScope::Session(SessionMetric::ThrottlingDelay);
        if was_delayed && context.metrics.is_enabled(delay, &self.profile.name) {
            context
                .metrics
                .update_timer(delay, &self.profile.name, self.start.elapsed());
        }
        let plan = match self.statement.node() {
            Some(node) => QueryPlan::single(Arc::clone(node)),
            None => context
                .load_balancing
                .new_query_plan(&self.statement, self.keyspace.as_deref()),
        };
        self.send_request(None, Arc::new(plan), 0, 0, true);
    }

    fn on_throttle_failure(self: Arc<Self>, error: DriverError) {
        self.session.context().metrics.increment(
            MetricScope::Session(SessionMetric::ThrottlingErrors),
            &self.profile.name,
        );
        self.set_final_error(error, None, None);
    }
}

impl fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestHandler")
            .field("log_prefix", &self.log_prefix)
            .field("idempotent", &self.idempotent)
            .field("timeout", &self.timeout)
            .field(
                "active_executions",
                &self.active_executions.load(Ordering::Relaxed),
            )
            .field("done", &self.slot.is_done())
            .finish_non_exhaustive()
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use tokio::runtime::Handle;

    use super::*;
    use crate::{
        codec::{DataType, DefaultCodecRegistry, Value},
        config::{DriverConfig, ExecutionProfile},
        metrics::InMemoryMetrics,
        policy::{ConstantSpeculativeExecutionPolicy, RetryPolicy},
        protocol::{
            ColumnSpec, ConsistencyLevel, SchemaChangeTarget, SchemaChangeType, WriteType,
        },
        session::{DriverContext, DriverContextBuilder, Session},
        sim::{Reply, SimulatedCluster},
        statement::PreparedStatement,
        throttle::ConcurrencyLimitingRequestThrottler,
    };

    const PROFILE: &str = "default";

    struct Fixture {
        cluster: Arc<SimulatedCluster>,
        metrics: Arc<InMemoryMetrics>,
        session: Session,
    }

    fn fixture(
        nodes: usize,
        configure: impl FnOnce(DriverContextBuilder) -> DriverContextBuilder,
    ) -> Fixture {
        fixture_on(Arc::new(SimulatedCluster::new(Handle::current(), nodes)), configure)
    }

    fn fixture_on(
        cluster: Arc<SimulatedCluster>,
        configure: impl FnOnce(DriverContextBuilder) -> DriverContextBuilder,
    ) -> Fixture {
        let metrics = Arc::new(InMemoryMetrics::new());
        let builder = DriverContext::builder(cluster.clone(), cluster.load_balancing())
            .with_metrics(metrics.clone());
        let context = configure(builder).build().unwrap();
        Fixture {
            cluster,
            metrics,
            session: Session::new(context),
        }
    }

    fn error(code: ErrorCode) -> Reply {
        Reply::Respond(Response::Error(ErrorMessage::new(code, "boom")))
    }

    fn rows(k: i32) -> Response {
        Response::Result(ResultMessage::Rows {
            columns: vec![ColumnSpec::new("k", DataType::INT)],
            rows: vec![vec![Some(k.to_be_bytes().to_vec())]],
            paging_state: None,
        })
    }

    fn read_timeout() -> Reply {
        error(ErrorCode::ReadTimeout {
            consistency: ConsistencyLevel::LocalOne,
            received: 1,
            block_for: 1,
            data_present: false,
        })
    }

    fn first_k(result: &AsyncResultSet) -> Option<Value> {
        let registry = DefaultCodecRegistry::new("test");
        result.one().unwrap().get(0, &registry).unwrap()
    }

    fn select() -> Statement {
        Statement::new("SELECT k FROM t")
    }

    #[tokio::test]
    async fn delivers_the_first_response() {
        let f = fixture(2, |b| b);
        f.cluster.node(0).push_reply(Reply::Respond(rows(7)));

        let result = f.session.execute(select()).await.unwrap();
        assert_eq!(first_k(&result), Some(Value::Int(7)));
        let info = result.execution_info();
        assert_eq!(info.coordinator.as_deref(), Some(&**f.cluster.node(0).node()));
        assert_eq!(info.successful_execution_index, Some(0));
        assert!(info.errors.is_empty());
        assert!(info.schema_in_agreement);
        assert_eq!(f.cluster.node(1).writes(), 0);
        assert_eq!(f.metrics.session_samples(SessionMetric::CqlRequests, PROFILE), 1);
        assert_eq!(
            f.metrics
                .node_samples(f.cluster.node(0).node(), NodeMetric::CqlMessages, PROFILE),
            1
        );
    }

    #[tokio::test]
    async fn non_idempotent_request_is_not_retried() {
        let f = fixture(2, |b| b);
        f.cluster.node(0).push_reply(error(ErrorCode::Overloaded));

        let error = f.session.execute(select()).await.unwrap_err();
        assert_eq!(error.error().code(), Some(&ErrorCode::Overloaded));
        assert!(error.execution_info().unwrap().errors.is_empty());
        assert_eq!(f.cluster.node(1).writes(), 0);
        assert_eq!(
            f.metrics
                .node_count(f.cluster.node(0).node(), NodeMetric::OtherErrors, PROFILE),
            1
        );
    }

    #[tokio::test]
    async fn idempotent_request_moves_to_next_node() {
        let f = fixture(2, |b| b);
        f.cluster.node(0).push_reply(error(ErrorCode::Overloaded));
        f.cluster.node(1).push_reply(Reply::Respond(rows(2)));

        let result = f
            .session
            .execute(select().with_idempotent(true))
            .await
            .unwrap();
        assert_eq!(first_k(&result), Some(Value::Int(2)));
        let errors = &result.execution_info().errors;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].0, *f.cluster.node(0).node());
        let node = f.cluster.node(0).node();
        assert_eq!(f.metrics.node_count(node, NodeMetric::Retries, PROFILE), 1);
        assert_eq!(
            f.metrics
                .node_count(node, NodeMetric::RetriesOnOtherError, PROFILE),
            1
        );
    }

    #[tokio::test]
    async fn profile_idempotence_applies_without_override() {
        let config = DriverConfig::new("s0")
            .with_profile(ExecutionProfile::default().with_default_idempotence(true));
        let f = fixture(2, |b| b.with_config(config));
        f.cluster.node(0).push_reply(error(ErrorCode::ServerError));

        assert!(f.session.execute(select()).await.is_ok());
        assert_eq!(f.cluster.node(1).writes(), 1);
    }

    #[tokio::test]
    async fn all_nodes_unavailable() {
        let f = fixture(2, |b| b);
        f.cluster.node(0).set_available(false);
        f.cluster.node(1).set_available(false);

        let error = f.session.execute(select()).await.unwrap_err();
        match error.error() {
            DriverError::AllNodesFailed(errors) => assert!(errors.is_empty()),
            other => panic!("unexpected {other}"),
        }
        assert_eq!(error.to_string(), "No node was available to execute the query");
    }

    #[tokio::test]
    async fn write_failures_move_on_without_the_policy() {
        let f = fixture(2, |b| b);
        f.cluster
            .node(0)
            .push_reply(Reply::FailWrite(WriteError::Io("connection reset".into())));

        let result = f.session.execute(select()).await.unwrap();
        let errors = &result.execution_info().errors;
        assert_eq!(errors.len(), 1);
        assert!(matches!(errors[0].1, DriverError::WriteFailed(_)));
        assert_eq!(
            result.execution_info().coordinator.as_deref(),
            Some(&**f.cluster.node(1).node())
        );
        assert_eq!(
            f.metrics
                .node_count(f.cluster.node(0).node(), NodeMetric::UnsentRequests, PROFILE),
            1
        );
    }

    #[tokio::test]
    async fn oversized_frames_are_never_retried() {
        let cluster = Arc::new(SimulatedCluster::with_max_frame_length(
            Handle::current(),
            2,
            64,
        ));
        let f = fixture_on(cluster, |b| b);
        let statement = Statement::new(format!("SELECT * FROM t WHERE k = '{}'", "x".repeat(100)))
            .with_idempotent(true);

        let error = f.session.execute(statement).await.unwrap_err();
        assert!(matches!(error.error(), DriverError::FrameTooLong { max: 64, .. }));
        assert_eq!(error.execution_info().unwrap().errors.len(), 1);
        assert_eq!(f.cluster.node(1).writes(), 0);
    }

    #[tokio::test]
    async fn retry_count_grows_within_an_execution() {
        let f = fixture(1, |b| b);
        f.cluster.node(0).push_reply(read_timeout());
        f.cluster.node(0).push_reply(read_timeout());

        // The first timeout is retried on the same node, the second one is not.
        let error = f.session.execute(select()).await.unwrap_err();
        assert!(matches!(
            error.error().code(),
            Some(ErrorCode::ReadTimeout { .. })
        ));
        assert_eq!(error.execution_info().unwrap().errors.len(), 1);
        assert_eq!(f.cluster.node(0).writes(), 2);
    }

    struct RecordingRetryPolicy {
        counts: Mutex<Vec<u32>>,
        limit: u32,
    }

    impl RetryPolicy for RecordingRetryPolicy {
        fn on_read_timeout(
            &self,
            _statement: &Statement,
            _consistency: ConsistencyLevel,
            _block_for: i32,
            _received: i32,
            _data_present: bool,
            retry_count: u32,
        ) -> RetryDecision {
            self.counts.lock().push(retry_count);
            if retry_count < self.limit {
                RetryDecision::RetrySame
            } else {
                RetryDecision::Rethrow
            }
        }

        fn on_write_timeout(
            &self,
            _statement: &Statement,
            _consistency: ConsistencyLevel,
            _write_type: WriteType,
            _block_for: i32,
            _received: i32,
            _retry_count: u32,
        ) -> RetryDecision {
            RetryDecision::Rethrow
        }

        fn on_unavailable(
            &self,
            _statement: &Statement,
            _consistency: ConsistencyLevel,
            _required: i32,
            _alive: i32,
            _retry_count: u32,
        ) -> RetryDecision {
            RetryDecision::Rethrow
        }

        fn on_request_aborted(
            &self,
            _statement: &Statement,
            _error: &DriverError,
            _retry_count: u32,
        ) -> RetryDecision {
            RetryDecision::Rethrow
        }

        fn on_error_response(
            &self,
            _statement: &Statement,
            _error: &DriverError,
            _retry_count: u32,
        ) -> RetryDecision {
            RetryDecision::Rethrow
        }
    }

    #[tokio::test]
    async fn retry_same_stays_on_one_node() {
        let policy = Arc::new(RecordingRetryPolicy {
            counts: Mutex::new(Vec::new()),
            limit: 4,
        });
        let f = fixture(2, |b| b.with_retry_policy(policy.clone()));
        f.cluster.node(0).set_fallback(read_timeout());

        let error = f.session.execute(select()).await.unwrap_err();
        assert!(matches!(
            error.error().code(),
            Some(ErrorCode::ReadTimeout { .. })
        ));
        assert_eq!(*policy.counts.lock(), vec![0, 1, 2, 3, 4]);
        assert_eq!(f.cluster.node(0).writes(), 5);
        assert_eq!(f.cluster.node(1).writes(), 0);
    }

    #[tokio::test]
    async fn every_failed_node_is_reported() {
        let f = fixture(2, |b| b);
        f.cluster.node(0).push_reply(error(ErrorCode::Overloaded));
        f.cluster.node(1).push_reply(error(ErrorCode::Overloaded));

        let error = f
            .session
            .execute(select().with_idempotent(true))
            .await
            .unwrap_err();
        match error.error() {
            DriverError::AllNodesFailed(errors) => {
                assert_eq!(errors.len(), 2);
                assert_eq!(errors[0].0, *f.cluster.node(0).node());
                assert_eq!(errors[1].0, *f.cluster.node(1).node());
                for (_, cause) in errors {
                    assert_eq!(cause.code(), Some(&ErrorCode::Overloaded));
                }
            }
            other => panic!("unexpected {other}"),
        }
        assert_eq!(error.execution_info().unwrap().errors.len(), 2);
    }

    #[tokio::test]
    async fn write_timeouts_rethrow_unless_idempotent() {
        let f = fixture(1, |b| b);
        let batch_log_timeout = || {
            error(ErrorCode::WriteTimeout {
                consistency: ConsistencyLevel::Quorum,
                received: 0,
                block_for: 1,
                write_type: WriteType::BatchLog,
            })
        };
        f.cluster.node(0).push_reply(batch_log_timeout());
        assert!(f.session.execute(select()).await.is_err());
        assert_eq!(f.cluster.node(0).writes(), 1);

        f.cluster.node(0).push_reply(batch_log_timeout());
        assert!(
            f.session
                .execute(select().with_idempotent(true))
                .await
                .is_ok()
        );
        assert_eq!(f.cluster.node(0).writes(), 3);
    }

    #[tokio::test]
    async fn unrecoverable_errors_bypass_the_policy() {
        let f = fixture(2, |b| b);
        f.cluster.node(0).push_reply(error(ErrorCode::Syntax));

        let error = f
            .session
            .execute(select().with_idempotent(true))
            .await
            .unwrap_err();
        assert_eq!(error.error().code(), Some(&ErrorCode::Syntax));
        assert_eq!(f.cluster.node(1).writes(), 0);
    }

    #[tokio::test]
    async fn bootstrapping_node_is_skipped() {
        let f = fixture(2, |b| b);
        f.cluster.node(0).push_reply(error(ErrorCode::IsBootstrapping));

        let result = f.session.execute(select()).await.unwrap();
        assert_eq!(result.execution_info().errors.len(), 1);
        assert_eq!(f.cluster.node(1).writes(), 1);
    }

    #[tokio::test]
    async fn aborted_requests_consult_the_policy_when_idempotent() {
        let f = fixture(2, |b| b);
        f.cluster
            .node(0)
            .push_reply(Reply::Abort(ChannelError::Closed));
        let error = f.session.execute(select()).await.unwrap_err();
        assert!(matches!(
            error.error(),
            DriverError::RequestAborted(ChannelError::Closed)
        ));

        // The next plan starts at the second node.
        f.cluster
            .node(1)
            .push_reply(Reply::Abort(ChannelError::Closed));
        let result = f
            .session
            .execute(select().with_idempotent(true))
            .await
            .unwrap();
        assert_eq!(
            result.execution_info().coordinator.as_deref(),
            Some(&**f.cluster.node(0).node())
        );
        assert_eq!(
            f.metrics
                .node_count(f.cluster.node(1).node(), NodeMetric::RetriesOnAborted, PROFILE),
            1
        );
    }

    #[tokio::test]
    async fn unexpected_response_carries_no_execution_info() {
        let f = fixture(1, |b| b);
        f.cluster.node(0).push_reply(Reply::Respond(Response::Ready));

        let error = f.session.execute(select()).await.unwrap_err();
        assert_eq!(error.to_string(), "Unexpected response READY");
        assert!(error.execution_info().is_none());
    }

    #[tokio::test]
    async fn speculative_execution_wins_over_slow_node() {
        let policy = Arc::new(ConstantSpeculativeExecutionPolicy::new(2, 20).unwrap());
        let f = fixture(2, |b| b.with_speculative_execution_policy(policy));
        f.cluster
            .node(0)
            .push_reply(Reply::Delayed(Duration::from_millis(500), rows(1)));
        f.cluster.node(1).push_reply(Reply::Respond(rows(2)));

        let result = f
            .session
            .execute(select().with_idempotent(true))
            .await
            .unwrap();
        assert_eq!(first_k(&result), Some(Value::Int(2)));
        let info = result.execution_info();
        assert_eq!(info.speculative_execution_count, 1);
        assert_eq!(info.successful_execution_index, Some(1));
        assert_eq!(f.cluster.node(0).abandoned(), vec![0]);
        assert_eq!(
            f.metrics
                .node_count(f.cluster.node(0).node(), NodeMetric::SpeculativeExecutions, PROFILE),
            1
        );
    }

    #[tokio::test]
    async fn no_speculative_execution_without_idempotence_or_delay() {
        let policy = Arc::new(ConstantSpeculativeExecutionPolicy::new(2, 10).unwrap());
        let f = fixture(2, |b| b.with_speculative_execution_policy(policy));
        f.cluster
            .node(0)
            .push_reply(Reply::Delayed(Duration::from_millis(80), rows(1)));
        let result = f.session.execute(select()).await.unwrap();
        assert_eq!(result.execution_info().speculative_execution_count, 0);

        // Default policy: a negative delay, so only the initial execution runs.
        let f = fixture(2, |b| b);
        f.cluster
            .node(0)
            .push_reply(Reply::Delayed(Duration::from_millis(80), rows(1)));
        let result = f
            .session
            .execute(select().with_idempotent(true))
            .await
            .unwrap();
        assert_eq!(first_k(&result), Some(Value::Int(1)));
        assert_eq!(result.execution_info().speculative_execution_count, 0);
        assert_eq!(f.cluster.node(1).writes(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_executions_deliver_once() {
        let policy = Arc::new(ConstantSpeculativeExecutionPolicy::new(3, 0).unwrap());
        let f = fixture(3, |b| b.with_speculative_execution_policy(policy));
        for i in 0..3 {
            f.cluster
                .node(i)
                .set_fallback(Reply::Delayed(Duration::from_millis(5), rows(i as i32)));
        }
        for _ in 0..20 {
            let result = f
                .session
                .execute(select().with_idempotent(true))
                .await
                .unwrap();
            assert!(result.execution_info().speculative_execution_count <= 2);
        }
    }

    #[tokio::test]
    async fn reprepare_replays_on_the_same_node() {
        let f = fixture(1, |b| b);
        let prepared = f
            .session
            .prepare(Statement::new("SELECT k FROM t"))
            .await
            .unwrap();
        let node = f.cluster.node(0);
        node.push_reply(error(ErrorCode::Unprepared {
            id: prepared.id().to_vec(),
        }));
        // Still the first retry of this execution, so the policy retries it.
        node.push_reply(read_timeout());
        node.push_reply(Reply::Respond(rows(3)));

        let result = f.session.execute(Statement::bound(prepared)).await.unwrap();
        assert_eq!(first_k(&result), Some(Value::Int(3)));
        let opcodes: Vec<&str> = node.received().iter().map(Message::opcode).collect();
        assert_eq!(
            opcodes,
            ["PREPARE", "EXECUTE", "PREPARE", "EXECUTE", "EXECUTE"]
        );
        assert_eq!(result.execution_info().errors.len(), 1);
    }

    #[tokio::test]
    async fn unrecoverable_reprepare_failure_is_final() {
        let f = fixture(2, |b| b);
        let prepared = f
            .session
            .prepare(Statement::new("SELECT k FROM t"))
            .await
            .unwrap();
        // The second plan starts at the second node.
        let node = f.cluster.node(1);
        node.push_reply(error(ErrorCode::Unprepared {
            id: prepared.id().to_vec(),
        }));
        node.push_prepare_reply(error(ErrorCode::Syntax));

        let error = f
            .session
            .execute(Statement::bound(prepared).with_idempotent(true))
            .await
            .unwrap_err();
        assert_eq!(error.error().code(), Some(&ErrorCode::Syntax));
        assert_eq!(f.cluster.node(0).writes(), 1);
    }

    #[tokio::test]
    async fn recoverable_reprepare_failure_moves_on() {
        let f = fixture(2, |b| b);
        let prepared = f
            .session
            .prepare(Statement::new("SELECT k FROM t"))
            .await
            .unwrap();
        let node = f.cluster.node(1);
        node.push_reply(error(ErrorCode::Unprepared {
            id: prepared.id().to_vec(),
        }));
        node.push_prepare_reply(error(ErrorCode::Overloaded));

        let result = f.session.execute(Statement::bound(prepared)).await.unwrap();
        let info = result.execution_info();
        assert_eq!(info.errors.len(), 1);
        assert_eq!(info.errors[0].0, *node.node());
        assert_eq!(info.coordinator.as_deref(), Some(&**f.cluster.node(0).node()));
    }

    #[tokio::test]
    async fn reprepare_without_payload_is_an_illegal_state() {
        let f = fixture(1, |b| b);
        let prepared = Arc::new(PreparedStatement::new(
            vec![0xca, 0xfe],
            "SELECT k FROM t",
            None,
            vec![],
            vec![],
        ));
        f.cluster.node(0).push_reply(error(ErrorCode::Unprepared {
            id: vec![0xca, 0xfe],
        }));

        let error = f.session.execute(Statement::bound(prepared)).await.unwrap_err();
        assert_eq!(
            error.to_string(),
            "Tried to execute unprepared query cafe but we don't have the data to reprepare it"
        );
        assert!(error.execution_info().is_none());
    }

    #[tokio::test]
    async fn request_times_out_and_abandons_stream() {
        let f = fixture(1, |b| b);
        f.cluster.node(0).push_reply(Reply::NoResponse);

        let error = f
            .session
            .execute(select().with_timeout(Duration::from_millis(30)))
            .await
            .unwrap_err();
        assert!(error.error().is_client_timeout());
        assert!(error.execution_info().is_some());
        assert_eq!(f.cluster.node(0).abandoned(), vec![0]);
        assert_eq!(
            f.metrics
                .session_count(SessionMetric::CqlClientTimeouts, PROFILE),
            1
        );
    }

    #[tokio::test]
    async fn throttler_rejects_then_admits_after_cancel() {
        let throttler = Arc::new(ConcurrencyLimitingRequestThrottler::new("s0", 1, 0));
        let f = fixture(1, |b| b.with_throttler(throttler.clone()));
        f.cluster.node(0).push_reply(Reply::NoResponse);

        let first = f.session.execute(select().with_timeout(Duration::ZERO));
        let error = f.session.execute(select()).await.unwrap_err();
        assert_eq!(
            error.to_string(),
            "The session has reached its maximum capacity (concurrent requests: 1, queue size: 0)"
        );
        assert_eq!(
            f.metrics
                .session_count(SessionMetric::ThrottlingErrors, PROFILE),
            1
        );

        assert!(first.cancel());
        assert!(!first.cancel());
        assert!(matches!(
            first.await.unwrap_err().error(),
            DriverError::Cancelled
        ));
        assert_eq!(throttler.concurrent_requests(), 0);
        assert!(f.session.execute(select()).await.is_ok());
        assert_eq!(f.cluster.node(0).writes(), 2);
    }

    #[tokio::test]
    async fn pinned_node_bypasses_load_balancing() {
        let f = fixture(2, |b| b);
        let pinned = Arc::clone(f.cluster.node(1).node());

        assert!(
            f.session
                .execute(select().with_node(Arc::clone(&pinned)))
                .await
                .is_ok()
        );
        assert_eq!(f.cluster.node(0).writes(), 0);

        f.cluster.node(1).set_available(false);
        let error = f
            .session
            .execute(select().with_node(pinned))
            .await
            .unwrap_err();
        assert!(matches!(error.error(), DriverError::AllNodesFailed(_)));
        assert_eq!(f.cluster.node(0).writes(), 0);
    }

    #[tokio::test]
    async fn unknown_profile_fails_before_admission() {
        let f = fixture(1, |b| b);
        let error = f
            .session
            .execute(select().with_profile("olap"))
            .await
            .unwrap_err();
        assert_eq!(error.to_string(), "Unknown execution profile 'olap'");
        assert_eq!(f.cluster.node(0).writes(), 0);
    }

    #[tokio::test]
    async fn closed_session_rejects_requests() {
        let throttler = Arc::new(ConcurrencyLimitingRequestThrottler::new("s0", 1, 0));
        let f = fixture(1, |b| b.with_throttler(throttler.clone()));
        f.session.close();

        for timeout in [Duration::ZERO, Duration::from_secs(1)] {
            let error = f
                .session
                .execute(select().with_timeout(timeout))
                .await
                .unwrap_err();
            assert!(matches!(error.error(), DriverError::SessionClosed));
        }
        assert_eq!(throttler.concurrent_requests(), 0);
        assert_eq!(f.cluster.node(0).writes(), 0);
    }

    #[tokio::test]
    async fn closing_fails_requests_in_flight() {
        let f = fixture(1, |b| b);
        f.cluster.node(0).push_reply(Reply::NoResponse);

        let pending = f
            .session
            .execute(select().with_timeout(Duration::from_millis(50)));
        tokio::time::sleep(Duration::from_millis(10)).await;
        f.session.close();

        let error = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap_err();
        assert!(matches!(error.error(), DriverError::SessionClosed));
        assert_eq!(f.cluster.node(0).abandoned(), vec![0]);
    }

    #[tokio::test]
    async fn keyspace_and_schema_changes() {
        let f = fixture(1, |b| b);
        f.cluster
            .node(0)
            .push_reply(Reply::Respond(Response::Result(ResultMessage::SetKeyspace {
                keyspace: "ks".into(),
            })));
        f.session.execute(Statement::new("USE ks")).await.unwrap();
        assert_eq!(f.session.keyspace().as_deref(), Some("ks"));
        assert_eq!(f.cluster.keyspace().as_deref(), Some("ks"));

        f.cluster
            .node(0)
            .push_reply(Reply::Respond(Response::Result(ResultMessage::SchemaChange {
                change: SchemaChangeType::Created,
                target: SchemaChangeTarget::Table,
                keyspace: "ks".into(),
                name: Some("t".into()),
            })));
        let result = f
            .session
            .execute(Statement::new("CREATE TABLE t (k int PRIMARY KEY)"))
            .await
            .unwrap();
        assert!(result.execution_info().schema_in_agreement);
        assert!(result.rows().is_empty());
    }

    #[tokio::test]
    async fn warnings_and_tracing_id_reach_execution_info() {
        let f = fixture(1, |b| b);
        let mut frame = Frame::new(0, rows(1));
        frame.tracing_id = Some(42);
        frame.warnings = vec!["Aggregation query used without partition key".into()];
        f.cluster.node(0).push_reply(Reply::Frame(frame));

        let result = f.session.execute(select()).await.unwrap();
        let info = result.execution_info();
        assert_eq!(info.tracing_id, Some(Uuid::from_u128(42)));
        assert_eq!(info.warnings.len(), 1);
    }
}
