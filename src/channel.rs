//! Connection seam between the execution engine and the network.
//!
//! A [`Channel`] accepts a request and hands back an [`Exchange`]: one signal for the write
//! completing and one for the response frame. Whoever implements the channel keeps the
//! matching [`ExchangeSender`] and fires both halves. Dropping a sender without firing it
//! reads as the channel closing.
use std::{fmt, sync::Arc};

use futures::future::BoxFuture;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::{error::DriverError, node::Node, protocol::Frame, protocol::Message};

/// Failure to put a request on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WriteError {
    #[error("frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLong { size: usize, max: usize },
    #[error("channel is closed")]
    Closed,
    #[error("{0}")]
    Io(String),
}

/// Failure reported by the channel after the request was written.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("channel was closed")]
    Closed,
    #[error("heartbeat query failed")]
    HeartbeatFailed,
    #[error("frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLong { size: usize, max: usize },
    #[error("{0}")]
    Other(String),
}

/// What gets written to a channel.
#[derive(Debug, Clone)]
pub struct ChannelRequest {
    pub message: Message,
    pub tracing: bool,
    pub custom_payload: Vec<(String, Vec<u8>)>,
}

impl ChannelRequest {
    pub fn new(message: Message) -> Self {
        Self {
            message,
            tracing: false,
            custom_payload: Vec::new(),
        }
    }
}

/// The caller's half of one outstanding write and read.
#[derive(Debug)]
pub struct Exchange {
    pub stream_id: i16,
    pub written: oneshot::Receiver<Result<(), WriteError>>,
    pub response: oneshot::Receiver<Result<Frame, ChannelError>>,
}

/// The channel's half of an [`Exchange`].
#[derive(Debug)]
pub struct ExchangeSender {
    pub stream_id: i16,
    pub written: oneshot::Sender<Result<(), WriteError>>,
    pub response: oneshot::Sender<Result<Frame, ChannelError>>,
}

impl Exchange {
    pub fn pair(stream_id: i16) -> (Exchange, ExchangeSender) {
        let (written_tx, written_rx) = oneshot::channel();
        let (response_tx, response_rx) = oneshot::channel();
        (
            Exchange {
                stream_id,
                written: written_rx,
                response: response_rx,
            },
            ExchangeSender {
                stream_id,
                written: written_tx,
                response: response_tx,
            },
        )
    }

    /// An exchange whose write has already failed.
    pub fn failed(stream_id: i16, error: WriteError) -> Exchange {
        let (exchange, sender) = Exchange::pair(stream_id);
        let _ = sender.written.send(Err(error));
        exchange
    }
}

/// Waits for the write half. A dropped sender reads as a closed channel.
pub(crate) async fn wait_written(
    written: oneshot::Receiver<Result<(), WriteError>>,
) -> Result<(), WriteError> {
    written.await.unwrap_or(Err(WriteError::Closed))
}

/// Waits for the response half. A dropped sender reads as a closed channel.
pub(crate) async fn wait_response(
    response: oneshot::Receiver<Result<Frame, ChannelError>>,
) -> Result<Frame, ChannelError> {
    response.await.unwrap_or(Err(ChannelError::Closed))
}

pub trait Channel: Send + Sync + fmt::Debug {
    fn write(&self, request: ChannelRequest) -> Exchange;

    /// Stops waiting for the response on `stream_id`. Unknown ids are ignored.
    fn abandon(&self, stream_id: i16);

    fn is_closed(&self) -> bool;
}

/// Hands out channels to nodes.
pub trait ChannelProvider: Send + Sync {
    /// `None` when the node currently has no usable connection.
    fn channel_for(&self, node: &Node, log_prefix: &str) -> Option<Arc<dyn Channel>>;

    /// Switches every connection to `keyspace`.
    fn set_keyspace(&self, _keyspace: &str) -> BoxFuture<'static, Result<(), DriverError>> {
        Box::pin(async { Ok(()) })
    }
}
