use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use log::trace;
use tokio::{runtime::Handle, sync::oneshot};

use super::CompletionSlot;
use crate::{
    channel::{Channel, ChannelRequest, Exchange, wait_response, wait_written},
    error::DriverError,
    metrics::{MetricScope, MetricUpdater, SessionMetric},
    node::Node,
    protocol::{Message, Response, ResultMessage},
    throttle::{RequestThrottler, Throttled},
};

/// A single exchange on a given channel, admitted by the throttler and bounded by a
/// timeout. Used to prepare and reprepare statements.
pub(crate) struct AdminRequest {
    node: Arc<Node>,
    channel: Arc<dyn Channel>,
    message: Message,
    custom_payload: Vec<(String, Vec<u8>)>,
    timeout: Duration,
    throttler: Arc<dyn RequestThrottler>,
    metrics: Arc<dyn MetricUpdater>,
    profile: String,
    runtime: Handle,
    log_prefix: String,
    debug_string: String,
}

struct AdminTask {
    request: AdminRequest,
    start: Instant,
    slot: CompletionSlot<Result<ResultMessage, DriverError>>,
}

impl AdminRequest {
    pub fn new(
        node: Arc<Node>,
        channel: Arc<dyn Channel>,
        message: Message,
        custom_payload: Vec<(String, Vec<u8>)>,
        timeout: Duration,
        throttler: Arc<dyn RequestThrottler>,
        metrics: Arc<dyn MetricUpdater>,
        profile: impl Into<String>,
        runtime: Handle,
        log_prefix: impl Into<String>,
        debug_string: impl Into<String>,
    ) -> Self {
        Self {
            node,
            channel,
            message,
            custom_payload,
            timeout,
            throttler,
            metrics,
            profile: profile.into(),
            runtime,
            log_prefix: log_prefix.into(),
            debug_string: debug_string.into(),
        }
    }

    pub async fn start(self) -> Result<ResultMessage, DriverError> {
        trace!("[{}] Starting {}", self.log_prefix, self.debug_string);
        let (sender, receiver) = oneshot::channel();
        let throttler = Arc::clone(&self.throttler);
        let task = Arc::new(AdminTask {
            request: self,
            start: Instant::now(),
            slot: CompletionSlot::new(sender),
        });
        throttler.register(task);
        receiver.await.unwrap_or_else(|_| {
            Err(DriverError::IllegalState(
                "admin request dropped without completing".to_string(),
            ))
        })
    }
}

impl AdminTask {
    async fn exchange(&self) -> Result<ResultMessage, DriverError> {
        let request = &self.request;
        let mut channel_request = ChannelRequest::new(request.message.clone());
        channel_request.custom_payload = request.custom_payload.clone();
        let Exchange {
            stream_id,
            written,
            response,
        } = request.channel.write(channel_request);

        let round_trip = async {
            wait_written(written).await?;
            let frame = wait_response(response).await?;
            Ok::<_, DriverError>(frame)
        };
        let frame = if request.timeout.is_zero() {
            round_trip.await?
        } else {
            match tokio::time::timeout(request.timeout, round_trip).await {
                Ok(frame) => frame?,
                Err(_) => {
                    request.channel.abandon(stream_id);
                    return Err(DriverError::Timeout(request.timeout));
                }
            }
        };

        match frame.response {
            Response::Result(result) => Ok(result),
            Response::Error(error) => Err(DriverError::server(&request.node, error.code, error.message)),
            other => Err(DriverError::UnexpectedResponse(other.to_string())),
        }
    }

    fn complete(self: &Arc<Self>, outcome: Result<ResultMessage, DriverError>) {
        let request = &self.request;
        let me: Arc<dyn Throttled> = self.clone();
        match &outcome {
            Ok(_) => request.throttler.signal_success(&me),
            Err(DriverError::Timeout(_)) => request.throttler.signal_timeout(&me),
            Err(DriverError::Throttling(_)) => {}
            Err(error) => request.throttler.signal_error(&me, error),
        }
        trace!(
            "[{}] {} completed ({})",
            request.log_prefix,
            request.debug_string,
            if outcome.is_ok() { "success" } else { "failure" }
        );
        self.slot.complete(outcome);
    }
}

impl Throttled for AdminTask {
    fn on_throttle_ready(self: Arc<Self>, was_delayed: bool) {
        let request = &self.request;
        let delay = MetricScope::Session(SessionMetric::ThrottlingDelay);
        if was_delayed && request.metrics.is_enabled(delay, &request.profile) {
            request
                .metrics
                .update_timer(delay, &request.profile, self.start.elapsed());
        }
        let runtime = request.runtime.clone();
        runtime.spawn(async move {
            let outcome = self.exchange().await;
            self.complete(outcome);
        });
    }

    fn on_throttle_failure(self: Arc<Self>, error: DriverError) {
        let request = &self.request;
        request.metrics.increment(
            MetricScope::Session(SessionMetric::ThrottlingErrors),
            &request.profile,
        );
        self.complete(Err(error));
    }
}
