//! FILENAME: pivot-subtotals/src/definition.rs
//! Pivot Definition - The serializable configuration.
//!
//! This module contains all the types needed to DESCRIBE a subtotaled pivot.
//! These structures are designed to be:
//! - Serializable (for saving alongside reports, or loading from JSON)
//! - Cheap to clone and pass around
//! - Immutable snapshots of user intent

use serde::{Deserialize, Serialize};
use rustc_hash::FxHashSet;

use crate::error::{PivotError, Result};

/// Index of a field within a table's field list (row fields first, then column fields).
pub type FieldIndex = usize;

/// Value of one finished pivot cell; `None` is the missing marker.
pub type PivotValue = Option<f64>;

// ============================================================================
// AGGREGATION
// ============================================================================

/// Supported aggregation functions for the measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum AggregationType {
    /// Missing-skipping sum. Sum of nothing is missing, not zero.
    #[default]
    Sum,
    /// Number of records in the group, including records whose measure is missing.
    Count,
    /// Number of records in the group with a present measure.
    CountNumbers,
    Average,
    Min,
    Max,
    Product,
    StdDev,
    StdDevP,
    Var,
    VarP,
}

impl AggregationType {
    /// True when aggregating already-aggregated values gives the same answer as
    /// aggregating the raw measures (f(f(a), f(b)) == f(a ∪ b)).
    pub fn is_additive_composable(self) -> bool {
        matches!(
            self,
            AggregationType::Sum
                | AggregationType::Min
                | AggregationType::Max
                | AggregationType::Product
        )
    }

    /// Result of the aggregation over a group with no records at all.
    pub fn empty_result(self) -> PivotValue {
        match self {
            AggregationType::Count | AggregationType::CountNumbers => Some(0.0),
            _ => None,
        }
    }
}

// ============================================================================
// FIELD DEFINITIONS
// ============================================================================

/// Sort order for a field's items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortOrder {
    #[default]
    Ascending,
    Descending,
    /// Order of first appearance in the source records.
    DataSourceOrder,
}

/// One level of a row or column hierarchy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotField {
    /// Attribute name looked up on every source record.
    pub name: String,

    /// Sort order for this field's items.
    #[serde(default)]
    pub sort_order: SortOrder,

    /// Whether to show the subtotal that collapses the levels finer than this one.
    /// Ignored on the innermost field, which has nothing finer to collapse.
    #[serde(default = "default_true")]
    pub show_subtotals: bool,
}

impl PivotField {
    pub fn new(name: impl Into<String>) -> Self {
        PivotField {
            name: name.into(),
            sort_order: SortOrder::Ascending,
            show_subtotals: true,
        }
    }

    pub fn with_sort_order(mut self, sort_order: SortOrder) -> Self {
        self.sort_order = sort_order;
        self
    }

    pub fn without_subtotals(mut self) -> Self {
        self.show_subtotals = false;
        self
    }
}

impl From<&str> for PivotField {
    fn from(name: &str) -> Self {
        PivotField::new(name)
    }
}

fn default_true() -> bool {
    true
}

fn default_subtotal_label() -> String {
    "All".to_string()
}

// ============================================================================
// OPTIONS
// ============================================================================

/// How the two-axis composition derives its subtotals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CompositionStrategy {
    /// Expand rows, reshape, expand columns over the row-expanded table,
    /// carrying mergeable accumulator state between the passes.
    #[default]
    MergeStates,
    /// Derive every (row level, column level) block directly from the source records.
    Recompute,
}

/// Calculation switches for a pivot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotOptions {
    #[serde(default)]
    pub aggregation: AggregationType,

    /// Value for row × column combinations that no record contributes to.
    #[serde(default)]
    pub fill_value: PivotValue,

    /// Emit the all-subtotal row and column.
    #[serde(default = "default_true")]
    pub grand_total: bool,

    /// Emit intermediate subtotal rows.
    #[serde(default = "default_true")]
    pub subtotal_rows: bool,

    /// Emit intermediate subtotal columns.
    #[serde(default = "default_true")]
    pub subtotal_cols: bool,

    /// Text used when a subtotal slot is rendered. No text category may equal it.
    #[serde(default = "default_subtotal_label")]
    pub subtotal_label: String,

    #[serde(default)]
    pub strategy: CompositionStrategy,
}

impl Default for PivotOptions {
    fn default() -> Self {
        PivotOptions {
            aggregation: AggregationType::Sum,
            fill_value: None,
            grand_total: true,
            subtotal_rows: true,
            subtotal_cols: true,
            subtotal_label: default_subtotal_label(),
            strategy: CompositionStrategy::MergeStates,
        }
    }
}

// ============================================================================
// MAIN DEFINITION STRUCT
// ============================================================================

/// The complete, serializable definition of a subtotaled pivot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PivotDefinition {
    /// Fields governing rows (ordered from outer to inner).
    pub row_fields: Vec<PivotField>,

    /// Fields governing columns (ordered from outer to inner).
    pub column_fields: Vec<PivotField>,

    #[serde(default)]
    pub options: PivotOptions,
}

impl PivotDefinition {
    pub fn new(row_fields: Vec<PivotField>, column_fields: Vec<PivotField>) -> Self {
        PivotDefinition {
            row_fields,
            column_fields,
            options: PivotOptions::default(),
        }
    }

    /// Shorthand for a definition whose fields use default settings.
    pub fn from_names(row_fields: &[&str], column_fields: &[&str]) -> Self {
        PivotDefinition::new(
            row_fields.iter().map(|&name| PivotField::from(name)).collect(),
            column_fields.iter().map(|&name| PivotField::from(name)).collect(),
        )
    }

    pub fn with_options(mut self, options: PivotOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_aggregation(mut self, aggregation: AggregationType) -> Self {
        self.options.aggregation = aggregation;
        self
    }

    /// Checks the layout itself, before any record is looked at.
    pub fn validate(&self) -> Result<()> {
        let mut seen = FxHashSet::default();
        for field in self.row_fields.iter().chain(self.column_fields.iter()) {
            if field.name.is_empty() {
                return Err(PivotError::EmptyFieldName);
            }
            if !seen.insert(field.name.as_str()) {
                return Err(PivotError::DuplicateField(field.name.clone()));
            }
        }
        Ok(())
    }
}
