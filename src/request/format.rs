use std::fmt::Write;

use crate::statement::{Statement, StatementKind};

const TRUNCATED: &str = "...<truncated>";
const FURTHER_VALUES_TRUNCATED: &str = "...<further values truncated>";
const NULL_VALUE: &str = "NULL";

/// Renders statements for log lines, within configurable limits.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestLogFormatter;

impl RequestLogFormatter {
    /// Appends `[N values] QUERY [name=value, ...]` to `out`.
    pub fn append_request(
        &self,
        statement: &Statement,
        max_query_length: usize,
        show_values: bool,
        max_values: usize,
        max_value_length: usize,
        out: &mut String,
    ) {
        let values = statement.values();
        let _ = write!(out, "[{} values] ", values.len());
        Self::append_truncated(statement.query(), max_query_length, out);

        if !show_values || values.is_empty() {
            return;
        }
        let names: Vec<String> = match statement.kind() {
            StatementKind::Bound { prepared } => prepared
                .variables()
                .iter()
                .map(|variable| variable.name.clone())
                .collect(),
            StatementKind::Simple { .. } => Vec::new(),
        };

        out.push_str(" [");
        for (i, value) in values.iter().enumerate() {
            if i == max_values {
                out.push_str(FURTHER_VALUES_TRUNCATED);
                break;
            }
            if i > 0 {
                out.push_str(", ");
            }
            match names.get(i) {
                Some(name) => out.push_str(name),
                None => {
                    let _ = write!(out, "v{i}");
                }
            }
            out.push('=');
            match value {
                Some(value) => Self::append_truncated(&value.to_string(), max_value_length, out),
                None => out.push_str(NULL_VALUE),
            }
        }
        out.push(']');
    }

    fn append_truncated(text: &str, max_length: usize, out: &mut String) {
        match text.char_indices().nth(max_length) {
            Some((end, _)) => {
                out.push_str(&text[..end]);
                out.push_str(TRUNCATED);
            }
            None => out.push_str(text),
        }
    }
}
