use std::fmt;

use bincode::{
    Decode, Encode,
    config::{BigEndian, Configuration, Fixint},
    decode_from_slice, encode_to_vec,
};
use thiserror::Error;

use super::{Frame, RequestFrame};

/// 256 MiB.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 256 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to encode message: {0}")]
    Serialize(#[from] bincode::error::EncodeError),
    #[error("failed to decode message: {0}")]
    Deserialize(#[from] bincode::error::DecodeError),
    #[error("frame of {size} bytes exceeds the maximum of {max} bytes")]
    FrameTooLong { size: usize, max: usize },
}

/// Encodes and decodes frames, enforcing a maximum frame length.
#[derive(Clone, Copy)]
pub struct FrameCodec {
    config: Configuration<BigEndian, Fixint>,
    max_frame_length: usize,
}

impl fmt::Debug for FrameCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameCodec")
            .field("max_frame_length", &self.max_frame_length)
            .finish_non_exhaustive()
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl FrameCodec {
    pub fn new(max_frame_length: usize) -> Self {
        let config = bincode::config::standard()
            .with_big_endian()
            .with_fixed_int_encoding();
        Self {
            config,
            max_frame_length,
        }
    }

    pub fn max_frame_length(&self) -> usize {
        self.max_frame_length
    }

    fn check_length(&self, size: usize) -> Result<(), TransportError> {
        if size > self.max_frame_length {
            return Err(TransportError::FrameTooLong {
                size,
                max: self.max_frame_length,
            });
        }
        Ok(())
    }

    fn encode<T: Encode>(&self, frame: T) -> Result<Vec<u8>, TransportError> {
        let bytes = encode_to_vec(frame, self.config)?;
        self.check_length(bytes.len())?;
        Ok(bytes)
    }

    fn decode<T: Decode<()>>(&self, bytes: &[u8]) -> Result<T, TransportError> {
        self.check_length(bytes.len())?;
        let (frame, _) = decode_from_slice(bytes, self.config)?;
        Ok(frame)
    }

    pub fn encode_request(&self, frame: &RequestFrame) -> Result<Vec<u8>, TransportError> {
        self.encode(frame)
    }

    pub fn decode_request(&self, bytes: &[u8]) -> Result<RequestFrame, TransportError> {
        self.decode(bytes)
    }

    pub fn encode_response(&self, frame: &Frame) -> Result<Vec<u8>, TransportError> {
        self.encode(frame)
    }

    pub fn decode_response(&self, bytes: &[u8]) -> Result<Frame, TransportError> {
        self.decode(bytes)
    }
}
