use std::{sync::Arc, time::Duration};

use crate::{
    codec::{CodecRegistry, Value},
    config::ExecutionProfile,
    error::DriverError,
    node::Node,
    protocol::{ColumnSpec, ConsistencyLevel, Message, QueryOptions},
};

/// A statement prepared on the cluster.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStatement {
    id: Vec<u8>,
    query: String,
    keyspace: Option<String>,
    variables: Vec<ColumnSpec>,
    columns: Vec<ColumnSpec>,
}

impl PreparedStatement {
    pub fn new(
        id: Vec<u8>,
        query: impl Into<String>,
        keyspace: Option<String>,
        variables: Vec<ColumnSpec>,
        columns: Vec<ColumnSpec>,
    ) -> Self {
        Self {
            id,
            query: query.into(),
            keyspace,
            variables,
            columns,
        }
    }

    pub fn id(&self) -> &[u8] {
        &self.id
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    pub fn keyspace(&self) -> Option<&str> {
        self.keyspace.as_deref()
    }

    pub fn variables(&self) -> &[ColumnSpec] {
        &self.variables
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StatementKind {
    Simple { query: String },
    Bound { prepared: Arc<PreparedStatement> },
}

/// One logical operation to run against the cluster.
///
/// Options left unset fall back to the execution profile.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    kind: StatementKind,
    values: Vec<Option<Value>>,
    idempotent: Option<bool>,
    timeout: Option<Duration>,
    node: Option<Arc<Node>>,
    tracing: bool,
    custom_payload: Vec<(String, Vec<u8>)>,
    profile: Option<String>,
    consistency: Option<ConsistencyLevel>,
    paging_state: Option<Vec<u8>>,
}

impl Statement {
    pub fn new(query: impl Into<String>) -> Self {
        Self::with_kind(StatementKind::Simple {
            query: query.into(),
        })
    }

    pub fn bound(prepared: Arc<PreparedStatement>) -> Self {
        Self::with_kind(StatementKind::Bound { prepared })
    }

    fn with_kind(kind: StatementKind) -> Self {
        Self {
            kind,
            values: Vec::new(),
            idempotent: None,
            timeout: None,
            node: None,
            tracing: false,
            custom_payload: Vec::new(),
            profile: None,
            consistency: None,
            paging_state: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.values.push(Some(value));
        self
    }

    pub fn with_null(mut self) -> Self {
        self.values.push(None);
        self
    }

    pub fn with_values(mut self, values: Vec<Option<Value>>) -> Self {
        self.values = values;
        self
    }

    pub fn with_idempotent(mut self, idempotent: bool) -> Self {
        self.idempotent = Some(idempotent);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sends the statement to `node` only, bypassing load balancing.
    pub fn with_node(mut self, node: Arc<Node>) -> Self {
        self.node = Some(node);
        self
    }

    pub fn with_tracing(mut self, tracing: bool) -> Self {
        self.tracing = tracing;
        self
    }

    pub fn with_custom_payload(mut self, key: impl Into<String>, value: Vec<u8>) -> Self {
        self.custom_payload.push((key.into(), value));
        self
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn with_consistency(mut self, consistency: ConsistencyLevel) -> Self {
        self.consistency = Some(consistency);
        self
    }

    pub fn with_paging_state(mut self, paging_state: Vec<u8>) -> Self {
        self.paging_state = Some(paging_state);
        self
    }

    pub fn kind(&self) -> &StatementKind {
        &self.kind
    }

    pub fn query(&self) -> &str {
        match &self.kind {
            StatementKind::Simple { query } => query,
            StatementKind::Bound { prepared } => prepared.query(),
        }
    }

    pub fn values(&self) -> &[Option<Value>] {
        &self.values
    }

    pub fn idempotent(&self) -> Option<bool> {
        self.idempotent
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn node(&self) -> Option<&Arc<Node>> {
        self.node.as_ref()
    }

    pub fn is_tracing(&self) -> bool {
        self.tracing
    }

    pub fn custom_payload(&self) -> &[(String, Vec<u8>)] {
        &self.custom_payload
    }

    pub fn profile(&self) -> Option<&str> {
        self.profile.as_deref()
    }

    pub fn consistency(&self) -> Option<ConsistencyLevel> {
        self.consistency
    }

    /// Converts to the wire message, encoding bound values through `registry`.
    pub fn to_message(
        &self,
        profile: &ExecutionProfile,
        registry: &dyn CodecRegistry,
    ) -> Result<Message, DriverError> {
        let mut options = QueryOptions::new(self.consistency.unwrap_or(profile.consistency));
        options.paging_state = self.paging_state.clone();

        match &self.kind {
            StatementKind::Simple { query } => {
                for value in &self.values {
                    let encoded = match value {
                        Some(value) => registry.codec_for_value(value)?.encode(Some(value))?,
                        None => None,
                    };
                    options.values.push(encoded);
                }
                Ok(Message::Query {
                    query: query.clone(),
                    options,
                })
            }
            StatementKind::Bound { prepared } => {
                let variables = prepared.variables();
                if self.values.len() > variables.len() {
                    return Err(DriverError::InvalidArgument(format!(
                        "Too many values for prepared statement: {} values for {} variables",
                        self.values.len(),
                        variables.len()
                    )));
                }
                for (value, variable) in self.values.iter().zip(variables) {
                    let encoded = match value {
                        Some(value) => registry
                            .codec_for_cql_value(&variable.data_type, value)?
                            .encode(Some(value))?,
                        None => None,
                    };
                    options.values.push(encoded);
                }
                Ok(Message::Execute {
                    id: prepared.id.clone(),
                    options,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DataType, DefaultCodecRegistry};

    fn prepared() -> Arc<PreparedStatement> {
        Arc::new(PreparedStatement::new(
            vec![0xca, 0xfe],
            "INSERT INTO t (k, v) VALUES (?, ?)",
            Some("ks".to_string()),
            vec![
                ColumnSpec::new("k", DataType::INT),
                ColumnSpec::new("v", DataType::list_of(DataType::TEXT)),
            ],
            vec![],
        ))
    }

    #[test]
    fn simple_statement_encodes_values_by_inspection() {
        let registry = DefaultCodecRegistry::new("test");
        let statement = Statement::new("SELECT * FROM t WHERE k = ?")
            .with_value(Value::Int(7))
            .with_null();

        let message = statement
            .to_message(&ExecutionProfile::default(), &registry)
            .unwrap();
        let Message::Query { query, options } = message else {
            panic!("expected a query message");
        };
        assert_eq!(query, "SELECT * FROM t WHERE k = ?");
        assert_eq!(options.consistency, ConsistencyLevel::LocalOne);
        assert_eq!(options.values, vec![Some(vec![0, 0, 0, 7]), None]);
    }

    #[test]
    fn bound_statement_uses_variable_types() {
        let registry = DefaultCodecRegistry::new("test");
        let statement = Statement::bound(prepared())
            .with_value(Value::Int(1))
            .with_value(Value::List(vec![]))
            .with_consistency(ConsistencyLevel::Quorum);

        let message = statement
            .to_message(&ExecutionProfile::default(), &registry)
            .unwrap();
        let Message::Execute { id, options } = message else {
            panic!("expected an execute message");
        };
        assert_eq!(id, vec![0xca, 0xfe]);
        assert_eq!(options.consistency, ConsistencyLevel::Quorum);
        assert_eq!(options.values[1], Some(vec![0, 0, 0, 0]));
    }

    #[test]
    #[should_panic(expected = "InvalidArgument")]
    fn too_many_bound_values() {
        let registry = DefaultCodecRegistry::new("test");
        Statement::bound(prepared())
            .with_value(Value::Int(1))
            .with_null()
            .with_null()
            .to_message(&ExecutionProfile::default(), &registry)
            .unwrap();
    }

    #[test]
    #[should_panic(expected = "CodecNotFound")]
    fn mismatched_bound_value_has_no_codec() {
        let registry = DefaultCodecRegistry::new("test");
        Statement::bound(prepared())
            .with_value(Value::Int(1))
            .with_value(Value::List(vec![Value::Int(2)]))
            .to_message(&ExecutionProfile::default(), &registry)
            .unwrap();
    }

    #[test]
    fn bound_query_text_comes_from_prepared() {
        let statement = Statement::bound(prepared()).with_idempotent(true);
        assert_eq!(statement.query(), "INSERT INTO t (k, v) VALUES (?, ?)");
        assert_eq!(statement.idempotent(), Some(true));
    }
}
