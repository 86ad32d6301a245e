use std::fmt;

use bincode::{Decode, Encode};

use super::{ConsistencyLevel, WriteType};
use crate::codec::DataType;

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct ColumnSpec {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub enum SchemaChangeType {
    Created,
    Updated,
    Dropped,
}

#[derive(Debug, Clone, Copy, Encode, Decode, PartialEq, Eq)]
pub enum SchemaChangeTarget {
    Keyspace,
    Table,
    Type,
    Function,
    Aggregate,
}

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub enum ResultMessage {
    Void,
    Rows {
        columns: Vec<ColumnSpec>,
        rows: Vec<Vec<Option<Vec<u8>>>>,
        paging_state: Option<Vec<u8>>,
    },
    SetKeyspace {
        keyspace: String,
    },
    Prepared {
        id: Vec<u8>,
        variables: Vec<ColumnSpec>,
        columns: Vec<ColumnSpec>,
    },
    SchemaChange {
        change: SchemaChangeType,
        target: SchemaChangeTarget,
        keyspace: String,
        name: Option<String>,
    },
}

/// Error codes a coordinator may answer with, with their code-specific details.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub enum ErrorCode {
    ServerError,
    ProtocolError,
    AuthError,
    Unavailable {
        consistency: ConsistencyLevel,
        required: i32,
        alive: i32,
    },
    Overloaded,
    IsBootstrapping,
    Truncate,
    WriteTimeout {
        consistency: ConsistencyLevel,
        received: i32,
        block_for: i32,
        write_type: WriteType,
    },
    ReadTimeout {
        consistency: ConsistencyLevel,
        received: i32,
        block_for: i32,
        data_present: bool,
    },
    ReadFailure,
    FunctionFailure,
    WriteFailure,
    Syntax,
    Unauthorized,
    Invalid,
    Config,
    AlreadyExists,
    Unprepared {
        id: Vec<u8>,
    },
}

impl ErrorCode {
    /// Errors that retrying cannot fix: query validation errors, function failures and
    /// protocol errors.
    pub fn is_unrecoverable(&self) -> bool {
        self.is_query_validation()
            || matches!(self, ErrorCode::FunctionFailure | ErrorCode::ProtocolError)
    }

    pub fn is_query_validation(&self) -> bool {
        matches!(
            self,
            ErrorCode::Syntax
                | ErrorCode::Invalid
                | ErrorCode::Unauthorized
                | ErrorCode::AlreadyExists
                | ErrorCode::Config
        )
    }

    /// Protocol value of the code.
    pub fn code(&self) -> i32 {
        match self {
            ErrorCode::ServerError => 0x0000,
            ErrorCode::ProtocolError => 0x000A,
            ErrorCode::AuthError => 0x0100,
            ErrorCode::Unavailable { .. } => 0x1000,
            ErrorCode::Overloaded => 0x1001,
            ErrorCode::IsBootstrapping => 0x1002,
            ErrorCode::Truncate => 0x1003,
            ErrorCode::WriteTimeout { .. } => 0x1100,
            ErrorCode::ReadTimeout { .. } => 0x1200,
            ErrorCode::ReadFailure => 0x1300,
            ErrorCode::FunctionFailure => 0x1400,
            ErrorCode::WriteFailure => 0x1500,
            ErrorCode::Syntax => 0x2000,
            ErrorCode::Unauthorized => 0x2100,
            ErrorCode::Invalid => 0x2200,
            ErrorCode::Config => 0x2300,
            ErrorCode::AlreadyExists => 0x2400,
            ErrorCode::Unprepared { .. } => 0x2500,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct ErrorMessage {
    pub code: ErrorCode,
    pub message: String,
}

impl ErrorMessage {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub enum Response {
    Result(ResultMessage),
    Error(ErrorMessage),
    Ready,
    Supported { options: Vec<(String, Vec<String>)> },
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Result(ResultMessage::Void) => write!(f, "RESULT VOID"),
            Response::Result(ResultMessage::Rows { rows, .. }) => {
                write!(f, "RESULT ROWS ({} rows)", rows.len())
            }
            Response::Result(ResultMessage::SetKeyspace { keyspace }) => {
                write!(f, "RESULT SET_KEYSPACE({keyspace})")
            }
            Response::Result(ResultMessage::Prepared { .. }) => write!(f, "RESULT PREPARED"),
            Response::Result(ResultMessage::SchemaChange { keyspace, .. }) => {
                write!(f, "RESULT SCHEMA_CHANGE({keyspace})")
            }
            Response::Error(error) => write!(f, "ERROR {:#06x} {}", error.code.code(), error.message),
            Response::Ready => write!(f, "READY"),
            Response::Supported { .. } => write!(f, "SUPPORTED"),
        }
    }
}

/// A response message and its envelope.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct Frame {
    pub stream_id: i16,
    pub tracing_id: Option<u128>,
    pub warnings: Vec<String>,
    pub response: Response,
}

impl Frame {
    pub fn new(stream_id: i16, response: Response) -> Self {
        Self {
            stream_id,
            tracing_id: None,
            warnings: Vec::new(),
            response,
        }
    }
}
