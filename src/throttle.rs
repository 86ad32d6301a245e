//! Admission control for requests.
//!
//! Every request registers with the session's [`RequestThrottler`] before it contacts any
//! node, and signals the throttler once when it completes.
use std::{collections::VecDeque, sync::Arc};

use log::{debug, trace};
use parking_lot::Mutex;

use crate::error::DriverError;

/// Something waiting for admission.
pub trait Throttled: Send + Sync {
    /// Admitted. `was_delayed` is set when the request waited in a queue first.
    fn on_throttle_ready(self: Arc<Self>, was_delayed: bool);

    /// Rejected; the error is always [`DriverError::Throttling`].
    fn on_throttle_failure(self: Arc<Self>, error: DriverError);
}

pub trait RequestThrottler: Send + Sync {
    fn register(&self, request: Arc<dyn Throttled>);

    fn signal_success(&self, request: &Arc<dyn Throttled>);

    fn signal_error(&self, request: &Arc<dyn Throttled>, error: &DriverError);

    fn signal_timeout(&self, request: &Arc<dyn Throttled>);

    /// Rejects everything still queued and everything registered afterwards.
    fn close(&self);
}

fn same_request(a: &Arc<dyn Throttled>, b: &Arc<dyn Throttled>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Admits every request immediately.
#[derive(Debug, Default)]
pub struct PassThroughRequestThrottler;

impl RequestThrottler for PassThroughRequestThrottler {
    fn register(&self, request: Arc<dyn Throttled>) {
        request.on_throttle_ready(false);
    }

    fn signal_success(&self, _request: &Arc<dyn Throttled>) {}

    fn signal_error(&self, _request: &Arc<dyn Throttled>, _error: &DriverError) {}

    fn signal_timeout(&self, _request: &Arc<dyn Throttled>) {}

    fn close(&self) {}
}

#[derive(Default)]
struct LimiterState {
    concurrent: usize,
    queue: VecDeque<Arc<dyn Throttled>>,
    closed: bool,
}

enum Admission {
    Ready(Arc<dyn Throttled>, bool),
    Rejected(Arc<dyn Throttled>, DriverError),
}

impl Admission {
    fn deliver(self) {
        match self {
            Admission::Ready(request, was_delayed) => request.on_throttle_ready(was_delayed),
            Admission::Rejected(request, error) => request.on_throttle_failure(error),
        }
    }
}

/// Caps the number of concurrent requests and queues the overflow.
///
/// Callbacks run after the internal lock is released, so a request may re-enter the
/// throttler from inside them.
pub struct ConcurrencyLimitingRequestThrottler {
    log_prefix: String,
    max_concurrent_requests: usize,
    max_queue_size: usize,
    state: Mutex<LimiterState>,
}

impl ConcurrencyLimitingRequestThrottler {
    pub fn new(
        log_prefix: impl Into<String>,
        max_concurrent_requests: usize,
        max_queue_size: usize,
    ) -> Self {
        let log_prefix = log_prefix.into();
        debug!(
            "[{log_prefix}] Initializing with max_concurrent_requests = {max_concurrent_requests}, max_queue_size = {max_queue_size}"
        );
        Self {
            log_prefix,
            max_concurrent_requests,
            max_queue_size,
            state: Mutex::new(LimiterState::default()),
        }
    }

    pub fn concurrent_requests(&self) -> usize {
        self.state.lock().concurrent
    }

    pub fn queue_size(&self) -> usize {
        self.state.lock().queue.len()
    }

    fn shutting_down() -> DriverError {
        DriverError::Throttling("The session is shutting down".to_string())
    }

    /// Releases one permit and admits the next queued request, if any.
    fn on_request_done(&self, state: &mut LimiterState) -> Option<Admission> {
        if state.closed {
            return None;
        }
        state.concurrent = state.concurrent.saturating_sub(1);
        let next = state.queue.pop_front()?;
        state.concurrent += 1;
        trace!("[{}] Starting dequeued request", self.log_prefix);
        Some(Admission::Ready(next, true))
    }

    /// Drops `request` from the queue if it is still waiting there, otherwise releases its
    /// permit.
    fn remove_or_release(&self, request: &Arc<dyn Throttled>) {
        let admission = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            let queued = state.queue.iter().position(|r| same_request(r, request));
            match queued {
                Some(index) => {
                    trace!("[{}] Removing request from the queue", self.log_prefix);
                    state.queue.remove(index);
                    None
                }
                None => self.on_request_done(&mut state),
            }
        };
        if let Some(admission) = admission {
            admission.deliver();
        }
    }
}

impl RequestThrottler for ConcurrencyLimitingRequestThrottler {
    fn register(&self, request: Arc<dyn Throttled>) {
        let admission = {
            let mut state = self.state.lock();
            if state.closed {
                trace!("[{}] Rejecting request after shutdown", self.log_prefix);
                Admission::Rejected(request, Self::shutting_down())
            } else if state.queue.is_empty() && state.concurrent < self.max_concurrent_requests {
                state.concurrent += 1;
                trace!(
                    "[{}] Starting newly registered request ({} active)",
                    self.log_prefix, state.concurrent
                );
                Admission::Ready(request, false)
            } else if state.queue.len() < self.max_queue_size {
                state.queue.push_back(request);
                trace!(
                    "[{}] Enqueuing request ({} queued)",
                    self.log_prefix,
                    state.queue.len()
                );
                return;
            } else {
                trace!("[{}] Rejecting request because of full queue", self.log_prefix);
                let error = DriverError::Throttling(format!(
                    "The session has reached its maximum capacity (concurrent requests: {}, queue size: {})",
                    self.max_concurrent_requests, self.max_queue_size
                ));
                Admission::Rejected(request, error)
            }
        };
        admission.deliver();
    }

    fn signal_success(&self, _request: &Arc<dyn Throttled>) {
        let admission = {
            let mut state = self.state.lock();
            self.on_request_done(&mut state)
        };
        if let Some(admission) = admission {
            admission.deliver();
        }
    }

    fn signal_error(&self, request: &Arc<dyn Throttled>, _error: &DriverError) {
        self.remove_or_release(request);
    }

    fn signal_timeout(&self, request: &Arc<dyn Throttled>) {
        self.remove_or_release(request);
    }

    fn close(&self) {
        let drained = {
            let mut state = self.state.lock();
            state.closed = true;
            std::mem::take(&mut state.queue)
        };
        debug!(
            "[{}] Closing, rejecting {} queued request(s)",
            self.log_prefix,
            drained.len()
        );
        for request in drained {
            request.on_throttle_failure(Self::shutting_down());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        outcomes: Mutex<Vec<Result<bool, String>>>,
    }

    impl Recorder {
        fn outcomes(&self) -> Vec<Result<bool, String>> {
            self.outcomes.lock().clone()
        }
    }

    impl Throttled for Recorder {
        fn on_throttle_ready(self: Arc<Self>, was_delayed: bool) {
            self.outcomes.lock().push(Ok(was_delayed));
        }

        fn on_throttle_failure(self: Arc<Self>, error: DriverError) {
            self.outcomes.lock().push(Err(error.to_string()));
        }
    }

    fn request() -> (Arc<Recorder>, Arc<dyn Throttled>) {
        let recorder = Arc::new(Recorder::default());
        let throttled: Arc<dyn Throttled> = recorder.clone();
        (recorder, throttled)
    }

    #[test]
    fn pass_through_admits_immediately() {
        let (recorder, throttled) = request();
        PassThroughRequestThrottler.register(throttled);
        assert_eq!(recorder.outcomes(), vec![Ok(false)]);
    }

    #[test]
    fn queues_then_rejects() {
        let throttler = ConcurrencyLimitingRequestThrottler::new("test", 1, 1);
        let (first, first_ref) = request();
        let (second, second_ref) = request();
        let (third, third_ref) = request();

        throttler.register(first_ref.clone());
        throttler.register(second_ref);
        throttler.register(third_ref);

        assert_eq!(first.outcomes(), vec![Ok(false)]);
        assert!(second.outcomes().is_empty());
        assert_eq!(
            third.outcomes(),
            vec![Err(
                "The session has reached its maximum capacity (concurrent requests: 1, queue size: 1)"
                    .to_string()
            )]
        );

        throttler.signal_success(&first_ref);
        assert_eq!(second.outcomes(), vec![Ok(true)]);
        assert_eq!(throttler.concurrent_requests(), 1);
        assert_eq!(throttler.queue_size(), 0);
    }

    #[test]
    fn timeout_of_queued_request_keeps_permit() {
        let throttler = ConcurrencyLimitingRequestThrottler::new("test", 1, 4);
        let (_, active) = request();
        let (queued, queued_ref) = request();
        throttler.register(active);
        throttler.register(queued_ref.clone());

        throttler.signal_timeout(&queued_ref);
        assert_eq!(throttler.queue_size(), 0);
        assert_eq!(throttler.concurrent_requests(), 1);
        assert!(queued.outcomes().is_empty());
    }

    #[test]
    fn error_releases_permit() {
        let throttler = ConcurrencyLimitingRequestThrottler::new("test", 1, 4);
        let (_, active) = request();
        let (queued, queued_ref) = request();
        throttler.register(active.clone());
        throttler.register(queued_ref);

        throttler.signal_error(&active, &DriverError::Cancelled);
        assert_eq!(queued.outcomes(), vec![Ok(true)]);
        assert_eq!(throttler.concurrent_requests(), 1);
    }

    #[test]
    fn close_rejects_queued_and_future_requests() {
        let throttler = ConcurrencyLimitingRequestThrottler::new("test", 1, 4);
        let (_, active) = request();
        let (queued, queued_ref) = request();
        throttler.register(active);
        throttler.register(queued_ref);

        throttler.close();
        let (late, late_ref) = request();
        throttler.register(late_ref);

        let shutdown = Err("The session is shutting down".to_string());
        assert_eq!(queued.outcomes(), vec![shutdown.clone()]);
        assert_eq!(late.outcomes(), vec![shutdown]);
    }

    /// A request completing from inside its admission callback must not deadlock.
    #[test]
    fn callbacks_may_reenter() {
        struct Reentrant {
            throttler: Arc<ConcurrencyLimitingRequestThrottler>,
            ready: Mutex<bool>,
        }

        impl Throttled for Reentrant {
            fn on_throttle_ready(self: Arc<Self>, _was_delayed: bool) {
                *self.ready.lock() = true;
                let me: Arc<dyn Throttled> = self.clone();
                self.throttler.signal_success(&me);
            }

            fn on_throttle_failure(self: Arc<Self>, _error: DriverError) {}
        }

        let throttler = Arc::new(ConcurrencyLimitingRequestThrottler::new("test", 1, 1));
        let request = Arc::new(Reentrant {
            throttler: Arc::clone(&throttler),
            ready: Mutex::new(false),
        });
        throttler.register(request.clone());
        assert!(*request.ready.lock());
        assert_eq!(throttler.concurrent_requests(), 0);
    }
}
