//! An in-process cluster whose nodes answer from a script.
//!
//! Every write goes through the real [`FrameCodec`] in both directions, so frame length limits
//! and the wire encoding are exercised the same way a socket-backed channel would.
use std::{
    collections::{HashMap, VecDeque, hash_map::DefaultHasher},
    hash::{Hash, Hasher},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicI16, AtomicUsize, Ordering},
    },
    time::Duration,
};

use futures::future::BoxFuture;
use log::trace;
use parking_lot::Mutex;
use tokio::{runtime::Handle, sync::oneshot};

use crate::{
    channel::{
        Channel, ChannelError, ChannelProvider, ChannelRequest, Exchange, ExchangeSender,
        WriteError,
    },
    error::DriverError,
    node::Node,
    plan::RoundRobinPolicy,
    protocol::{
        DEFAULT_MAX_FRAME_LENGTH, Frame, FrameCodec, Message, RequestFrame, Response,
        ResultMessage, TransportError,
    },
};

const FIRST_PORT: u16 = 9042;

/// How a node answers one request.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(Response),
    /// A full frame, to carry warnings or a tracing id. Its stream id is replaced.
    Frame(Frame),
    Delayed(Duration, Response),
    FailWrite(WriteError),
    /// The channel fails after the write.
    Abort(ChannelError),
    /// Written, but never answered.
    NoResponse,
}

type PendingResponses = Arc<Mutex<HashMap<i16, oneshot::Sender<Result<Frame, ChannelError>>>>>;

/// One scripted node.
#[derive(Debug)]
pub struct SimulatedNode {
    node: Arc<Node>,
    available: AtomicBool,
    script: Mutex<VecDeque<Reply>>,
    prepare_script: Mutex<VecDeque<Reply>>,
    fallback: Mutex<Reply>,
    writes: AtomicUsize,
    received: Mutex<Vec<Message>>,
    abandoned: Mutex<Vec<i16>>,
}

impl SimulatedNode {
    fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            available: AtomicBool::new(true),
            script: Mutex::new(VecDeque::new()),
            prepare_script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(Reply::Respond(Response::Result(ResultMessage::Void))),
            writes: AtomicUsize::new(0),
            received: Mutex::new(Vec::new()),
            abandoned: Mutex::new(Vec::new()),
        }
    }

    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }

    /// An unavailable node has no channel, and its open channel reads as closed.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Release);
    }

    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Queues the answer to the next QUERY or EXECUTE.
    pub fn push_reply(&self, reply: Reply) {
        self.script.lock().push_back(reply);
    }

    /// Queues the answer to the next PREPARE. Unscripted prepares succeed.
    pub fn push_prepare_reply(&self, reply: Reply) {
        self.prepare_script.lock().push_back(reply);
    }

    /// The answer once the script is exhausted.
    pub fn set_fallback(&self, reply: Reply) {
        *self.fallback.lock() = reply;
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::Acquire)
    }

    pub fn received(&self) -> Vec<Message> {
        self.received.lock().clone()
    }

    pub fn abandoned(&self) -> Vec<i16> {
        self.abandoned.lock().clone()
    }

    fn next_reply(&self, message: &Message) -> Reply {
        if let Message::Prepare { query, .. } = message {
            return self.prepare_script.lock().pop_front().unwrap_or_else(|| {
                Reply::Respond(Response::Result(ResultMessage::Prepared {
                    id: prepared_id(query),
                    variables: Vec::new(),
                    columns: Vec::new(),
                }))
            });
        }
        self.script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().clone())
    }
}

/// Id the simulated nodes give to a prepared query.
pub fn prepared_id(query: &str) -> Vec<u8> {
    let mut hasher = DefaultHasher::new();
    query.hash(&mut hasher);
    hasher.finish().to_be_bytes().to_vec()
}

#[derive(Debug)]
pub struct SimulatedChannel {
    state: Arc<SimulatedNode>,
    codec: FrameCodec,
    runtime: Handle,
    next_stream_id: AtomicI16,
    pending: PendingResponses,
}

impl SimulatedChannel {
    fn round_trip(codec: &FrameCodec, stream_id: i16, mut frame: Frame) -> Result<Frame, ChannelError> {
        frame.stream_id = stream_id;
        let bytes = codec.encode_response(&frame).map_err(channel_error)?;
        codec.decode_response(&bytes).map_err(channel_error)
    }
}

fn channel_error(error: TransportError) -> ChannelError {
    match error {
        TransportError::FrameTooLong { size, max } => ChannelError::FrameTooLong { size, max },
        other => ChannelError::Other(other.to_string()),
    }
}

impl Channel for SimulatedChannel {
    fn write(&self, request: ChannelRequest) -> Exchange {
        let stream_id = self.next_stream_id.fetch_add(1, Ordering::AcqRel);
        self.state.writes.fetch_add(1, Ordering::AcqRel);
        let frame = RequestFrame {
            stream_id,
            tracing: request.tracing,
            custom_payload: request.custom_payload,
            message: request.message,
        };
        let decoded = self
            .codec
            .encode_request(&frame)
            .and_then(|bytes| self.codec.decode_request(&bytes));
        let frame = match decoded {
            Ok(frame) => frame,
            Err(TransportError::FrameTooLong { size, max }) => {
                return Exchange::failed(stream_id, WriteError::FrameTooLong { size, max });
            }
            Err(error) => return Exchange::failed(stream_id, WriteError::Io(error.to_string())),
        };
        trace!(
            "[{}] {} on stream {stream_id}",
            self.state.node,
            frame.message.opcode()
        );
        let reply = self.state.next_reply(&frame.message);
        self.state.received.lock().push(frame.message);

        let (exchange, sender) = Exchange::pair(stream_id);
        let ExchangeSender {
            written, response, ..
        } = sender;
        if let Reply::FailWrite(error) = reply {
            let _ = written.send(Err(error));
            return exchange;
        }
        let _ = written.send(Ok(()));
        match reply {
            Reply::Respond(reply) => {
                let _ = response.send(Self::round_trip(
                    &self.codec,
                    stream_id,
                    Frame::new(stream_id, reply),
                ));
            }
            Reply::Frame(frame) => {
                let _ = response.send(Self::round_trip(&self.codec, stream_id, frame));
            }
            Reply::Delayed(delay, reply) => {
                self.pending.lock().insert(stream_id, response);
                let pending = Arc::clone(&self.pending);
                let codec = self.codec;
                self.runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    let sender = pending.lock().remove(&stream_id);
                    if let Some(sender) = sender {
                        let _ = sender.send(Self::round_trip(
                            &codec,
                            stream_id,
                            Frame::new(stream_id, reply),
                        ));
                    }
                });
            }
            Reply::Abort(error) => {
                let _ = response.send(Err(error));
            }
            Reply::NoResponse | Reply::FailWrite(_) => {
                self.pending.lock().insert(stream_id, response);
            }
        }
        exchange
    }

    fn abandon(&self, stream_id: i16) {
        self.pending.lock().remove(&stream_id);
        self.state.abandoned.lock().push(stream_id);
    }

    fn is_closed(&self) -> bool {
        !self.state.is_available()
    }
}

/// A set of scripted nodes on consecutive local ports, with one channel each.
#[derive(Debug)]
pub struct SimulatedCluster {
    nodes: Vec<Arc<SimulatedNode>>,
    channels: Vec<Arc<SimulatedChannel>>,
    keyspace: Mutex<Option<String>>,
}

impl SimulatedCluster {
    pub fn new(runtime: Handle, count: usize) -> Self {
        Self::with_max_frame_length(runtime, count, DEFAULT_MAX_FRAME_LENGTH)
    }

    pub fn with_max_frame_length(runtime: Handle, count: usize, max_frame_length: usize) -> Self {
        let nodes: Vec<Arc<SimulatedNode>> = (0..count)
            .map(|i| {
                let port = FIRST_PORT + i as u16;
                Arc::new(SimulatedNode::new(Arc::new(Node::new(
                    ([127, 0, 0, 1], port).into(),
                ))))
            })
            .collect();
        let channels = nodes
            .iter()
            .map(|state| {
                Arc::new(SimulatedChannel {
                    state: Arc::clone(state),
                    codec: FrameCodec::new(max_frame_length),
                    runtime: runtime.clone(),
                    next_stream_id: AtomicI16::new(0),
                    pending: Arc::default(),
                })
            })
            .collect();
        Self {
            nodes,
            channels,
            keyspace: Mutex::new(None),
        }
    }

    pub fn node(&self, index: usize) -> &Arc<SimulatedNode> {
        &self.nodes[index]
    }

    pub fn nodes(&self) -> Vec<Arc<Node>> {
        self.nodes.iter().map(|state| Arc::clone(&state.node)).collect()
    }

    pub fn load_balancing(&self) -> Arc<RoundRobinPolicy> {
        Arc::new(RoundRobinPolicy::new(self.nodes()))
    }

    /// The last keyspace the session switched to.
    pub fn keyspace(&self) -> Option<String> {
        self.keyspace.lock().clone()
    }
}

impl ChannelProvider for SimulatedCluster {
    fn channel_for(&self, node: &Node, _log_prefix: &str) -> Option<Arc<dyn Channel>> {
        let index = self.nodes.iter().position(|state| *state.node == *node)?;
        if !self.nodes[index].is_available() {
            return None;
        }
        let channel: Arc<dyn Channel> = self.channels[index].clone();
        Some(channel)
    }

    fn set_keyspace(&self, keyspace: &str) -> BoxFuture<'static, Result<(), DriverError>> {
        *self.keyspace.lock() = Some(keyspace.to_string());
        Box::pin(async { Ok(()) })
    }
}
