//! Type codecs and codec resolution.
//!
//! A [`TypeCodec`] converts between one wire type ([`DataType`]) and one host type
//! ([`GenericType`]). The [`DefaultCodecRegistry`] resolves codecs for any combination of
//! wire type, host type and host value, composing collection, tuple and user-defined type
//! codecs on demand.
//!
//! # Key Components
//!
//! - [`DataType`]: wire type descriptor, a closed set of shapes.
//! - [`GenericType`] / [`HostClass`]: host type descriptor and its raw class.
//! - [`Value`]: a dynamically shaped host value.
//! - [`CodecRegistry`]: the six lookup variants, all following the same precedence order:
//!   built-in primitives, then user codecs, then cached or synthesized composites.
//!
//! # Binary Format
//!
//! Values use the native protocol v4 encodings. Collections are an `i32` element count
//! followed by `i32`-length-prefixed elements; tuples and UDTs are `i32`-length-prefixed
//! components where `-1` marks a null.
mod collection;
mod generic;
mod primitive;
mod registry;
mod structured;
mod types;
mod value;

use std::{fmt, sync::Arc};

pub use collection::{ListCodec, MapCodec, SetCodec};
pub use generic::{GenericType, HostClass};
pub use primitive::PrimitiveCodec;
pub use registry::{CodecRegistry, DefaultCodecRegistry};
pub use structured::{CustomCodec, TupleCodec, UdtCodec};
pub use types::{DataType, NativeType, UserDefinedType, code};
pub use value::{CqlDuration, Decimal, TupleValue, UdtValue, Value, Varint};

pub mod error {
    use thiserror::Error;

    use super::{DataType, GenericType};

    fn or_any<T: ToString>(t: &Option<T>) -> String {
        t.as_ref().map_or_else(|| "ANY".to_string(), T::to_string)
    }

    #[derive(Debug, Clone, PartialEq, Error)]
    pub enum CodecError {
        #[error("Codec not found for requested operation: [{} <-> {}]", or_any(.cql_type), or_any(.host_type))]
        CodecNotFound {
            cql_type: Option<DataType>,
            host_type: Option<GenericType>,
        },

        #[error("invalid value for {cql_type}: {reason}")]
        InvalidValue { cql_type: DataType, reason: String },

        #[error("malformed {cql_type} bytes: {reason}")]
        Malformed { cql_type: DataType, reason: String },
    }
}

pub use error::CodecError;

pub type CodecRef = Arc<dyn TypeCodec>;

/// Bidirectional converter between one wire type and one host type.
pub trait TypeCodec: Send + Sync + fmt::Debug {
    fn cql_type(&self) -> &DataType;

    fn host_type(&self) -> &GenericType;

    fn accepts_cql_type(&self, cql_type: &DataType) -> bool {
        self.cql_type() == cql_type
    }

    fn accepts_host_type(&self, host_type: &GenericType) -> bool {
        self.host_type() == host_type
    }

    fn accepts_class(&self, class: HostClass) -> bool {
        self.host_type().raw_class() == class
    }

    fn accepts_value(&self, value: &Value) -> bool;

    /// Codecs this one delegates to, in wire order. Empty for scalars.
    fn inner_codecs(&self) -> &[CodecRef] {
        &[]
    }

    /// `None` encodes a null.
    fn encode(&self, value: Option<&Value>) -> Result<Option<Vec<u8>>, CodecError>;

    fn decode(&self, bytes: Option<&[u8]>) -> Result<Option<Value>, CodecError>;
}

/// Helpers shared by the composite codecs.
pub(crate) mod wire {
    use super::{CodecError, DataType};

    pub fn write_sized(out: &mut Vec<u8>, bytes: Option<&[u8]>) {
        match bytes {
            Some(bytes) => {
                out.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                out.extend_from_slice(bytes);
            }
            None => out.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }

    pub struct Reader<'a> {
        bytes: &'a [u8],
        cql_type: &'a DataType,
    }

    impl<'a> Reader<'a> {
        pub fn new(bytes: &'a [u8], cql_type: &'a DataType) -> Self {
            Self { bytes, cql_type }
        }

        pub fn is_empty(&self) -> bool {
            self.bytes.is_empty()
        }

        fn malformed(&self, reason: &str) -> CodecError {
            CodecError::Malformed {
                cql_type: self.cql_type.clone(),
                reason: reason.to_string(),
            }
        }

        pub fn read_i32(&mut self) -> Result<i32, CodecError> {
            if self.bytes.len() < 4 {
                return Err(self.malformed("not enough bytes for a size"));
            }
            let (head, rest) = self.bytes.split_at(4);
            self.bytes = rest;
            Ok(i32::from_be_bytes([head[0], head[1], head[2], head[3]]))
        }

        /// Reads one length-prefixed element; a negative length is a null.
        pub fn read_sized(&mut self) -> Result<Option<&'a [u8]>, CodecError> {
            let len = self.read_i32()?;
            if len < 0 {
                return Ok(None);
            }
            let len = len as usize;
            if self.bytes.len() < len {
                return Err(self.malformed("element length exceeds remaining bytes"));
            }
            let (head, rest) = self.bytes.split_at(len);
            self.bytes = rest;
            Ok(Some(head))
        }

        pub fn finish(&self) -> Result<(), CodecError> {
            if self.bytes.is_empty() {
                Ok(())
            } else {
                Err(self.malformed("unexpected trailing bytes"))
            }
        }
    }
}
