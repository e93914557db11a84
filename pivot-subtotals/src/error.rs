//! FILENAME: pivot-subtotals/src/error.rs

use thiserror::Error;

use crate::definition::AggregationType;

/// Which axis of a table an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisKind {
    Rows,
    Columns,
}

impl std::fmt::Display for AxisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AxisKind::Rows => f.write_str("rows"),
            AxisKind::Columns => f.write_str("columns"),
        }
    }
}

#[derive(Error, Debug)]
pub enum PivotError {
    #[error("Record {record} has no value for attribute '{attribute}'")]
    MissingAttribute { record: usize, attribute: String },

    #[error("Record {record}: value '{value}' of attribute '{attribute}' collides with the subtotal label")]
    SentinelCollision {
        record: usize,
        attribute: String,
        value: String,
    },

    #[error("Attribute '{0}' appears more than once in the pivot layout")]
    DuplicateField(String),

    #[error("Pivot fields must have a non-empty name")]
    EmptyFieldName,

    #[error("Aggregation {0:?} is not additive-composable; its values cannot be aggregated again")]
    UnsafeAggregation(AggregationType),

    #[error("{count} long-form records map to the same cell ({row} / {col})")]
    DuplicateCell {
        row: String,
        col: String,
        count: usize,
    },

    #[error("Synthetic root level on {0} did not collapse to a single value")]
    RootNotCollapsed(AxisKind),

    #[error("Field index {index} is out of range for a table with {field_count} fields")]
    FieldIndexOutOfRange { index: usize, field_count: usize },
}

pub type Result<T> = std::result::Result<T, PivotError>;
