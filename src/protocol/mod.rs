//! Client-server wire protocol.
//!
//! This module defines the messages exchanged between the driver and coordinator nodes and
//! the frame codec that turns them into bytes. The execution engine only pattern-matches
//! these shapes; connection handling lives behind [`Channel`](crate::channel::Channel).
//!
//! # Key Components
//!
//! - [`Message`]: a request sent to a coordinator (query, execute, prepare).
//! - [`Response`]: what a coordinator answers, either a [`ResultMessage`] or an
//!   [`ErrorMessage`] carrying an [`ErrorCode`].
//! - [`RequestFrame`] / [`Frame`]: a message plus its envelope (stream id, tracing, custom
//!   payload, server warnings).
//! - [`FrameCodec`]: bincode encoder with a maximum frame length.
//!
//! # Binary Format
//!
//! Frames are bincode-encoded with big-endian, fixed-width integers. A frame longer than the
//! codec's maximum is rejected with [`TransportError::FrameTooLong`] on both the encoding and
//! the decoding side.
mod request;
mod response;
mod transport;

use std::fmt;

use bincode::{Decode, Encode};

pub use request::{Message, QueryOptions, RequestFrame};
pub use response::{
    ColumnSpec, ErrorCode, ErrorMessage, Frame, Response, ResultMessage, SchemaChangeTarget,
    SchemaChangeType,
};
pub use transport::{DEFAULT_MAX_FRAME_LENGTH, FrameCodec, TransportError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum ConsistencyLevel {
    Any,
    One,
    Two,
    Three,
    Quorum,
    All,
    LocalQuorum,
    EachQuorum,
    Serial,
    LocalSerial,
    LocalOne,
}

impl fmt::Display for ConsistencyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConsistencyLevel::Any => "ANY",
            ConsistencyLevel::One => "ONE",
            ConsistencyLevel::Two => "TWO",
            ConsistencyLevel::Three => "THREE",
            ConsistencyLevel::Quorum => "QUORUM",
            ConsistencyLevel::All => "ALL",
            ConsistencyLevel::LocalQuorum => "LOCAL_QUORUM",
            ConsistencyLevel::EachQuorum => "EACH_QUORUM",
            ConsistencyLevel::Serial => "SERIAL",
            ConsistencyLevel::LocalSerial => "LOCAL_SERIAL",
            ConsistencyLevel::LocalOne => "LOCAL_ONE",
        };
        f.write_str(name)
    }
}

/// Kind of write that timed out on the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
pub enum WriteType {
    Simple,
    Batch,
    UnloggedBatch,
    Counter,
    BatchLog,
    Cas,
    View,
    Cdc,
}
