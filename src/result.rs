use std::sync::Arc;

use crate::{
    codec::{CodecRegistry, Value},
    error::{DriverError, ExecutionInfo},
    protocol::{ColumnSpec, ResultMessage},
};

/// One row of a result, still in wire form. Columns decode on access.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[ColumnSpec]>,
    values: Vec<Option<Vec<u8>>>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn raw(&self, index: usize) -> Option<&[u8]> {
        self.values.get(index).and_then(|value| value.as_deref())
    }

    /// Decodes column `index` with the codec its wire type resolves to.
    pub fn get(
        &self,
        index: usize,
        registry: &dyn CodecRegistry,
    ) -> Result<Option<Value>, DriverError> {
        let column = self.columns.get(index).ok_or_else(|| {
            DriverError::InvalidArgument(format!(
                "Column index {index} out of range (row has {} columns)",
                self.columns.len()
            ))
        })?;
        let bytes = self.values.get(index).and_then(|value| value.as_deref());
        let codec = registry.codec_for_cql(&column.data_type)?;
        Ok(codec.decode(bytes)?)
    }

    pub fn get_by_name(
        &self,
        name: &str,
        registry: &dyn CodecRegistry,
    ) -> Result<Option<Value>, DriverError> {
        let index = self
            .columns
            .iter()
            .position(|column| column.name == name)
            .ok_or_else(|| DriverError::InvalidArgument(format!("{name} is not a column in this row")))?;
        self.get(index, registry)
    }
}

/// The outcome of a successful request: rows for a SELECT, nothing for other statements.
#[derive(Debug, Clone)]
pub struct AsyncResultSet {
    columns: Arc<[ColumnSpec]>,
    rows: Vec<Row>,
    execution_info: ExecutionInfo,
}

impl AsyncResultSet {
    pub(crate) fn new(result: ResultMessage, execution_info: ExecutionInfo) -> Self {
        match result {
            ResultMessage::Rows { columns, rows, .. } => {
                let columns: Arc<[ColumnSpec]> = columns.into();
                let rows = rows
                    .into_iter()
                    .map(|values| Row {
                        columns: Arc::clone(&columns),
                        values,
                    })
                    .collect();
                Self {
                    columns,
                    rows,
                    execution_info,
                }
            }
            _ => Self {
                columns: Arc::from(Vec::new()),
                rows: Vec::new(),
                execution_info,
            },
        }
    }

    pub fn column_specs(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    /// The first row, if any.
    pub fn one(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn execution_info(&self) -> &ExecutionInfo {
        &self.execution_info
    }

    pub fn has_more_pages(&self) -> bool {
        self.execution_info.paging_state.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{DataType, DefaultCodecRegistry};

    fn result_set() -> AsyncResultSet {
        let rows = ResultMessage::Rows {
            columns: vec![
                ColumnSpec::new("k", DataType::INT),
                ColumnSpec::new("tags", DataType::set_of(DataType::TEXT)),
            ],
            rows: vec![vec![
                Some(vec![0, 0, 0, 42]),
                Some(vec![0, 0, 0, 1, 0, 0, 0, 1, b'a']),
            ]],
            paging_state: None,
        };
        AsyncResultSet::new(rows, ExecutionInfo::default())
    }

    #[test]
    fn typed_column_access() {
        let registry = DefaultCodecRegistry::new("test");
        let results = result_set();
        let row = results.one().unwrap();

        assert_eq!(row.get(0, &registry).unwrap(), Some(Value::Int(42)));
        assert_eq!(
            row.get_by_name("tags", &registry).unwrap(),
            Some(Value::Set(vec![Value::String("a".into())]))
        );
        assert!(!results.has_more_pages());
    }

    #[test]
    #[should_panic(expected = "not a column")]
    fn unknown_column_name() {
        let registry = DefaultCodecRegistry::new("test");
        result_set()
            .one()
            .unwrap()
            .get_by_name("missing", &registry)
            .unwrap();
    }

    #[test]
    fn non_row_results_are_empty() {
        let results = AsyncResultSet::new(ResultMessage::Void, ExecutionInfo::default());
        assert!(results.rows().is_empty());
        assert!(results.column_specs().is_empty());
        assert!(results.one().is_none());
    }
}
