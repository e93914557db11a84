//! FILENAME: pivot-subtotals/src/lib.rs
//! Hierarchical subtotals for two-axis pivot tables.
//!
//! Records with categorical attributes and one numeric measure are grouped by
//! a row hierarchy and a column hierarchy. Every prefix of either hierarchy
//! gets its own subtotal row or column, addressed by a typed SUBTOTAL key
//! slot, with the grand total at the all-SUBTOTAL corner.
//!
//! Layers:
//! - `definition`: Serializable configuration (what the pivot IS)
//! - `record` / `cache`: Source records and their interned form
//! - `aggregate`: Flat group-by over two field subsets
//! - `expand`: Single-axis subtotal expansion (axis agnostic)
//! - `reshape`: Wide/long conversions and transpose
//! - `engine`: Two-axis composition (HOW we calculate)
//! - `view`: The composite-keyed output grid (WHAT we return)

pub mod aggregate;
pub mod cache;
pub mod definition;
pub mod engine;
pub mod error;
pub mod expand;
pub mod record;
pub mod reshape;
pub mod view;

pub use aggregate::{aggregate, aggregate_with, FlatAggregation};
pub use cache::{
    AggregateAccumulator, CategoryValue, CompositeKey, FieldCache, KeySlot, PivotCache, ValueId,
};
pub use definition::*;
pub use engine::{calculate_from_cache, calculate_pivot, PivotComposer};
pub use error::{AxisKind, PivotError, Result};
pub use expand::{expand_hierarchy, LevelPlan};
pub use record::{Record, SourceRecord};
pub use reshape::{LongRecord, LongTable};
pub use view::{Axis, FlatRow, KeyLabel, PivotTable};
