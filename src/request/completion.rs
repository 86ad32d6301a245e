use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
    task::{Context, Poll},
};

use parking_lot::Mutex;
use tokio::sync::oneshot;

use super::RequestHandler;
use crate::{
    error::{DriverError, RequestError},
    result::AsyncResultSet,
};

const PENDING: u8 = 0;
const COMPLETED: u8 = 1;
const CANCELLED: u8 = 2;

/// Single-assignment result cell. The first `complete` or `cancel` wins; later calls are
/// no-ops.
#[derive(Debug)]
pub(crate) struct CompletionSlot<T> {
    state: AtomicU8,
    sender: Mutex<Option<oneshot::Sender<T>>>,
}

impl<T> CompletionSlot<T> {
    pub fn new(sender: oneshot::Sender<T>) -> Self {
        Self {
            state: AtomicU8::new(PENDING),
            sender: Mutex::new(Some(sender)),
        }
    }

    fn transition(&self, to: u8) -> bool {
        self.state
            .compare_exchange(PENDING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Returns whether this call set the value.
    pub fn complete(&self, value: T) -> bool {
        if !self.transition(COMPLETED) {
            return false;
        }
        if let Some(sender) = self.sender.lock().take() {
            // The receiver may be gone already; the outcome still counts as delivered.
            let _ = sender.send(value);
        }
        true
    }

    /// Drops the sender so the receiving side observes cancellation.
    pub fn cancel(&self) -> bool {
        if !self.transition(CANCELLED) {
            return false;
        }
        self.sender.lock().take();
        true
    }

    pub fn is_done(&self) -> bool {
        self.state.load(Ordering::Acquire) != PENDING
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }
}

pub(crate) type RequestOutcome = Result<AsyncResultSet, RequestError>;

/// Resolves to the outcome of one request.
///
/// Dropping the future does not stop the request; [`cancel`](ResultFuture::cancel) does.
#[derive(Debug)]
pub struct ResultFuture {
    receiver: oneshot::Receiver<RequestOutcome>,
    handler: Option<Arc<RequestHandler>>,
}

impl ResultFuture {
    pub(crate) fn new(
        receiver: oneshot::Receiver<RequestOutcome>,
        handler: Arc<RequestHandler>,
    ) -> Self {
        Self {
            receiver,
            handler: Some(handler),
        }
    }

    /// A future that is already failed, for requests rejected before they started.
    pub(crate) fn failed(error: RequestError) -> Self {
        let (sender, receiver) = oneshot::channel();
        let _ = sender.send(Err(error));
        Self {
            receiver,
            handler: None,
        }
    }

    /// Cancels the request. Returns false if it had already completed.
    pub fn cancel(&self) -> bool {
        self.handler
            .as_ref()
            .is_some_and(|handler| handler.cancel())
    }
}

impl Future for ResultFuture {
    type Output = RequestOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let cancelled = self
            .handler
            .as_ref()
            .is_some_and(|handler| handler.is_cancelled());
        Pin::new(&mut self.receiver).poll(cx).map(|outcome| {
            outcome.unwrap_or_else(|_| {
                let error = if cancelled {
                    DriverError::Cancelled
                } else {
                    DriverError::IllegalState("request handler dropped without completing".into())
                };
                Err(RequestError::from(error))
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_writer_wins() {
        let (sender, mut receiver) = oneshot::channel();
        let slot = CompletionSlot::new(sender);

        assert!(slot.complete(1));
        assert!(!slot.complete(2));
        assert!(!slot.cancel());
        assert!(slot.is_done());
        assert!(!slot.is_cancelled());
        assert_eq!(receiver.try_recv().unwrap(), 1);
    }

    #[test]
    fn cancel_drops_the_sender() {
        let (sender, mut receiver) = oneshot::channel::<u8>();
        let slot = CompletionSlot::new(sender);

        assert!(slot.cancel());
        assert!(!slot.complete(3));
        assert!(slot.is_cancelled());
        assert!(receiver.try_recv().is_err());
    }

    #[test]
    fn racing_completions_deliver_once() {
        let (sender, mut receiver) = oneshot::channel();
        let slot = CompletionSlot::new(sender);
        let wins = std::sync::atomic::AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for i in 0..8 {
                let slot = &slot;
                let wins = &wins;
                scope.spawn(move || {
                    if slot.complete(i) {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });
        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert!(receiver.try_recv().is_ok());
    }

    #[tokio::test]
    async fn failed_future_resolves_immediately() {
        let future = ResultFuture::failed(DriverError::SessionClosed.into());
        assert!(!future.cancel());
        let error = future.await.unwrap_err();
        assert!(matches!(error.error(), DriverError::SessionClosed));
    }
}
