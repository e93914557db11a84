//! FILENAME: pivot-subtotals/src/aggregate.rs
//! Flat Aggregator - group a long table by two field subsets and fold each group.
//!
//! This is the only place records are grouped. The hierarchy expander calls it
//! once per level, the composer's recompute strategy once per level pair, and
//! long-to-wide reshaping once with a pick fold.

use std::collections::BTreeSet;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::cache::{AggregateAccumulator, CompositeKey, FieldCache};
use crate::definition::FieldIndex;
use crate::error::Result;
use crate::reshape::LongTable;
use crate::view::{Axis, PivotTable};

/// Groups observed by one aggregation, keyed by (reduced row key, reduced column key).
/// Combinations no record reached are absent.
#[derive(Debug, Clone)]
pub struct FlatAggregation<A> {
    row_fields: Vec<Arc<FieldCache>>,
    col_fields: Vec<Arc<FieldCache>>,
    row_keys: BTreeSet<CompositeKey>,
    col_keys: BTreeSet<CompositeKey>,
    groups: FxHashMap<(CompositeKey, CompositeKey), A>,
}

impl<A> FlatAggregation<A> {
    pub fn row_fields(&self) -> &[Arc<FieldCache>] {
        &self.row_fields
    }

    pub fn col_fields(&self) -> &[Arc<FieldCache>] {
        &self.col_fields
    }

    /// Distinct row keys in sorted order.
    pub fn row_keys(&self) -> impl Iterator<Item = &CompositeKey> {
        self.row_keys.iter()
    }

    /// Distinct column keys in sorted order.
    pub fn col_keys(&self) -> impl Iterator<Item = &CompositeKey> {
        self.col_keys.iter()
    }

    pub fn get(&self, row: &CompositeKey, col: &CompositeKey) -> Option<&A> {
        self.groups.get(&(row.clone(), col.clone()))
    }

    /// Number of observed groups.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn groups(&self) -> impl Iterator<Item = (&CompositeKey, &CompositeKey, &A)> {
        self.groups.iter().map(|((row, col), value)| (row, col, value))
    }

    /// Re-labels the groups as full-depth keys of the given hierarchies,
    /// filling the collapsed finer levels with SUBTOTAL.
    pub fn pad_to(self, row_fields: &[Arc<FieldCache>], col_fields: &[Arc<FieldCache>]) -> Self {
        let row_depth = row_fields.len();
        let col_depth = col_fields.len();
        FlatAggregation {
            row_fields: row_fields.to_vec(),
            col_fields: col_fields.to_vec(),
            row_keys: self.row_keys.into_iter().map(|k| k.padded(row_depth)).collect(),
            col_keys: self.col_keys.into_iter().map(|k| k.padded(col_depth)).collect(),
            groups: self
                .groups
                .into_iter()
                .map(|((row, col), value)| ((row.padded(row_depth), col.padded(col_depth)), value))
                .collect(),
        }
    }

    pub fn map<B>(self, mut f: impl FnMut(A) -> B) -> FlatAggregation<B> {
        FlatAggregation {
            row_fields: self.row_fields,
            col_fields: self.col_fields,
            row_keys: self.row_keys,
            col_keys: self.col_keys,
            groups: self.groups.into_iter().map(|(key, value)| (key, f(value))).collect(),
        }
    }
}

impl<A: Clone> FlatAggregation<A> {
    /// Full cross product of every observed row key × every observed column key,
    /// with `fill` substituted for combinations no record reached.
    pub fn into_table(self, fill: A) -> PivotTable<A> {
        let row_fields = self.row_fields.clone();
        let col_fields = self.col_fields.clone();
        merge_into_table(row_fields, col_fields, vec![self], fill)
    }
}

/// Unions several aggregations over the same full-depth fields into one dense table.
pub fn merge_into_table<A: Clone>(
    row_fields: Vec<Arc<FieldCache>>,
    col_fields: Vec<Arc<FieldCache>>,
    parts: Vec<FlatAggregation<A>>,
    fill: A,
) -> PivotTable<A> {
    let mut row_keys = BTreeSet::new();
    let mut col_keys = BTreeSet::new();
    let mut groups = FxHashMap::default();
    for part in parts {
        row_keys.extend(part.row_keys);
        col_keys.extend(part.col_keys);
        groups.extend(part.groups);
    }

    let rows = Axis::new(row_fields, row_keys);
    let cols = Axis::new(col_fields, col_keys);
    PivotTable::from_fn(rows, cols, |row, col| {
        groups
            .remove(&(row.clone(), col.clone()))
            .unwrap_or_else(|| fill.clone())
    })
}

/// Groups `table` by `row_fields` × `col_fields`, folding each member's value
/// into a group state that starts from `init()`.
///
/// The fold must be associative and commutative so input order never matters.
pub fn aggregate_with<V, A>(
    table: &LongTable<V>,
    row_fields: &[FieldIndex],
    col_fields: &[FieldIndex],
    init: impl Fn() -> A,
    mut fold: impl FnMut(&mut A, &V),
) -> Result<FlatAggregation<A>> {
    table.check_fields(row_fields)?;
    table.check_fields(col_fields)?;

    let mut row_keys = BTreeSet::new();
    let mut col_keys = BTreeSet::new();
    let mut groups: FxHashMap<(CompositeKey, CompositeKey), A> = FxHashMap::default();

    for record in table.records() {
        let row = CompositeKey::new(row_fields.iter().map(|&f| table.slot(record, f)));
        let col = CompositeKey::new(col_fields.iter().map(|&f| table.slot(record, f)));

        if !row_keys.contains(&row) {
            row_keys.insert(row.clone());
        }
        if !col_keys.contains(&col) {
            col_keys.insert(col.clone());
        }
        let state = groups.entry((row, col)).or_insert_with(&init);
        fold(state, &record.value);
    }

    Ok(FlatAggregation {
        row_fields: row_fields.iter().map(|&f| table.field(f).clone()).collect(),
        col_fields: col_fields.iter().map(|&f| table.field(f).clone()).collect(),
        row_keys,
        col_keys,
        groups,
    })
}

/// Accumulator aggregation: group states merge member states.
pub fn aggregate(
    table: &LongTable<AggregateAccumulator>,
    row_fields: &[FieldIndex],
    col_fields: &[FieldIndex],
) -> Result<FlatAggregation<AggregateAccumulator>> {
    aggregate_with(table, row_fields, col_fields, AggregateAccumulator::new, |acc, value| {
        acc.merge(value)
    })
}
