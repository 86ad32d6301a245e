use bincode::{Decode, Encode};

use super::ConsistencyLevel;

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct QueryOptions {
    pub consistency: ConsistencyLevel,
    /// Encoded bound values; `None` is a null.
    pub values: Vec<Option<Vec<u8>>>,
    pub paging_state: Option<Vec<u8>>,
}

impl QueryOptions {
    pub fn new(consistency: ConsistencyLevel) -> Self {
        Self {
            consistency,
            values: Vec::new(),
            paging_state: None,
        }
    }
}

#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub enum Message {
    Query {
        query: String,
        options: QueryOptions,
    },
    Execute {
        id: Vec<u8>,
        options: QueryOptions,
    },
    Prepare {
        query: String,
        keyspace: Option<String>,
    },
}

impl Message {
    /// Short name used in logs.
    pub fn opcode(&self) -> &'static str {
        match self {
            Message::Query { .. } => "QUERY",
            Message::Execute { .. } => "EXECUTE",
            Message::Prepare { .. } => "PREPARE",
        }
    }
}

/// A request message and its envelope.
#[derive(Debug, Clone, Encode, Decode, PartialEq, Eq)]
pub struct RequestFrame {
    pub stream_id: i16,
    pub tracing: bool,
    pub custom_payload: Vec<(String, Vec<u8>)>,
    pub message: Message,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcodes() {
        let query = Message::Query {
            query: "SELECT * FROM t".into(),
            options: QueryOptions::new(ConsistencyLevel::One),
        };
        let prepare = Message::Prepare {
            query: "SELECT * FROM t".into(),
            keyspace: None,
        };
        assert_eq!(query.opcode(), "QUERY");
        assert_eq!(prepare.opcode(), "PREPARE");
    }

    #[test]
    fn options_default_to_no_values() {
        let options = QueryOptions::new(ConsistencyLevel::Quorum);
        assert!(options.values.is_empty());
        assert_eq!(options.paging_state, None);
    }
}
