//! FILENAME: pivot-subtotals/src/view.rs
//! Pivot View - The composite-keyed output grid.
//!
//! A `PivotTable` is dense: every row key × column key combination holds a
//! value. Keys on both axes are kept sorted, which places each subtotal key
//! right after the sibling group it collapses and the grand total last.
//! Tables are immutable; every operation returns a new one.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cache::{CategoryValue, CompositeKey, FieldCache, KeySlot};
use crate::definition::{AggregationType, PivotValue};
use crate::error::{AxisKind, PivotError, Result};
use crate::record::Record;

// ============================================================================
// LABELS
// ============================================================================

/// A resolved key slot: a real category, the synthetic root, or the subtotal marker.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyLabel {
    Value(CategoryValue),
    Root,
    Subtotal,
}

impl KeyLabel {
    pub fn is_subtotal(&self) -> bool {
        matches!(self, KeyLabel::Subtotal)
    }

    /// Display text, with subtotal slots shown as `subtotal_label`.
    pub fn render(&self, subtotal_label: &str) -> String {
        match self {
            KeyLabel::Value(value) => value.to_string(),
            KeyLabel::Root => "(root)".to_string(),
            KeyLabel::Subtotal => subtotal_label.to_string(),
        }
    }
}

impl From<&str> for KeyLabel {
    fn from(value: &str) -> Self {
        KeyLabel::Value(value.into())
    }
}

impl From<CategoryValue> for KeyLabel {
    fn from(value: CategoryValue) -> Self {
        KeyLabel::Value(value)
    }
}

/// Joins the labels of a key for messages.
pub(crate) fn render_key(fields: &[Arc<FieldCache>], key: &CompositeKey, subtotal_label: &str) -> String {
    fields
        .iter()
        .zip(key.slots())
        .map(|(field, &slot)| field.label(slot).render(subtotal_label))
        .collect::<Vec<_>>()
        .join(" / ")
}

/// One cell of the flattened record stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRow {
    pub row: Vec<KeyLabel>,
    pub col: Vec<KeyLabel>,
    pub value: PivotValue,
}

// ============================================================================
// AXIS
// ============================================================================

/// The ordered, distinct keys of one table axis plus the dictionaries to read them.
#[derive(Debug, Clone)]
pub struct Axis {
    fields: Vec<Arc<FieldCache>>,
    keys: Vec<CompositeKey>,
    index: FxHashMap<CompositeKey, usize>,
}

impl Axis {
    /// Sorts and deduplicates `keys`.
    pub(crate) fn new(fields: Vec<Arc<FieldCache>>, keys: impl IntoIterator<Item = CompositeKey>) -> Self {
        let mut keys: Vec<CompositeKey> = keys.into_iter().collect();
        keys.sort();
        keys.dedup();
        let index = keys.iter().enumerate().map(|(i, key)| (key.clone(), i)).collect();
        Axis { fields, keys, index }
    }

    pub fn fields(&self) -> &[Arc<FieldCache>] {
        &self.fields
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }

    pub fn keys(&self) -> &[CompositeKey] {
        &self.keys
    }

    pub fn depth(&self) -> usize {
        self.fields.len()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn position(&self, key: &CompositeKey) -> Option<usize> {
        self.index.get(key).copied()
    }

    /// Labels of every slot of `key`.
    pub fn labels(&self, key: &CompositeKey) -> Vec<KeyLabel> {
        self.fields
            .iter()
            .zip(key.slots())
            .map(|(field, &slot)| field.label(slot))
            .collect()
    }

    /// Finds the key addressed by one label per level.
    pub fn resolve(&self, labels: &[KeyLabel]) -> Option<CompositeKey> {
        if labels.len() != self.fields.len() {
            return None;
        }
        let slots = self
            .fields
            .iter()
            .zip(labels)
            .map(|(field, label)| field.resolve(label))
            .collect::<Option<Vec<KeySlot>>>()?;
        let key = CompositeKey::new(slots);
        self.index.contains_key(&key).then_some(key)
    }

    /// Removes the synthetic root level once every key holds the root there.
    fn without_root(self, axis: AxisKind) -> Result<Self> {
        let collapsed = self.fields.first().map_or(false, |f| f.is_synthetic())
            && self.keys.iter().all(|key| key.get(0) == Some(KeySlot::Root));
        if !collapsed {
            return Err(PivotError::RootNotCollapsed(axis));
        }
        let fields = self.fields[1..].to_vec();
        Ok(Axis::new(fields, self.keys.iter().map(CompositeKey::without_first)))
    }
}

// ============================================================================
// PIVOT TABLE
// ============================================================================

/// Composite-keyed grid of values.
#[derive(Debug, Clone)]
pub struct PivotTable<V = PivotValue> {
    rows: Axis,
    cols: Axis,
    /// Row-major, `rows.len() * cols.len()` entries.
    cells: Vec<V>,
    /// The aggregation that produced finished values, if any.
    aggregation: Option<AggregationType>,
}

impl<V> PivotTable<V> {
    /// Builds a table by asking `cell` for every row × column combination.
    pub(crate) fn from_fn(
        rows: Axis,
        cols: Axis,
        mut cell: impl FnMut(&CompositeKey, &CompositeKey) -> V,
    ) -> Self {
        let mut cells = Vec::with_capacity(rows.len() * cols.len());
        for row in rows.keys() {
            for col in cols.keys() {
                cells.push(cell(row, col));
            }
        }
        PivotTable {
            rows,
            cols,
            cells,
            aggregation: None,
        }
    }

    pub(crate) fn with_aggregation(mut self, aggregation: Option<AggregationType>) -> Self {
        self.aggregation = aggregation;
        self
    }

    pub fn rows(&self) -> &Axis {
        &self.rows
    }

    pub fn cols(&self) -> &Axis {
        &self.cols
    }

    pub fn row_keys(&self) -> &[CompositeKey] {
        self.rows.keys()
    }

    pub fn col_keys(&self) -> &[CompositeKey] {
        self.cols.keys()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn col_count(&self) -> usize {
        self.cols.len()
    }

    pub fn aggregation(&self) -> Option<AggregationType> {
        self.aggregation
    }

    /// Value at row position `row`, column position `col`.
    pub fn at(&self, row: usize, col: usize) -> Option<&V> {
        if row >= self.rows.len() || col >= self.cols.len() {
            return None;
        }
        self.cells.get(row * self.cols.len() + col)
    }

    pub fn get(&self, row: &CompositeKey, col: &CompositeKey) -> Option<&V> {
        let r = self.rows.position(row)?;
        let c = self.cols.position(col)?;
        self.at(r, c)
    }

    /// Looks a cell up by labels, e.g. `&["Bars".into(), KeyLabel::Subtotal]`.
    pub fn cell(&self, row: &[KeyLabel], col: &[KeyLabel]) -> Option<&V> {
        let row = self.rows.resolve(row)?;
        let col = self.cols.resolve(col)?;
        self.get(&row, &col)
    }

    /// Labels of the row at position `row`.
    pub fn row_labels(&self, row: usize) -> Option<Vec<KeyLabel>> {
        self.rows.keys().get(row).map(|key| self.rows.labels(key))
    }

    /// Labels of the column at position `col`.
    pub fn col_labels(&self, col: usize) -> Option<Vec<KeyLabel>> {
        self.cols.keys().get(col).map(|key| self.cols.labels(key))
    }

    /// The (all-SUBTOTAL, all-SUBTOTAL) cell.
    pub fn grand_total(&self) -> Option<&V> {
        self.get(
            &CompositeKey::grand_total(self.rows.depth()),
            &CompositeKey::grand_total(self.cols.depth()),
        )
    }

    /// Iterates over (row key, column key, value) in row-major order.
    pub fn iter(&self) -> impl Iterator<Item = (&CompositeKey, &CompositeKey, &V)> + '_ {
        let width = self.cols.len();
        self.cells.iter().enumerate().map(move |(i, value)| {
            (&self.rows.keys()[i / width], &self.cols.keys()[i % width], value)
        })
    }

    /// Applies `f` to every cell, keeping both axes.
    pub fn map<U>(&self, f: impl FnMut(&V) -> U) -> PivotTable<U> {
        PivotTable {
            rows: self.rows.clone(),
            cols: self.cols.clone(),
            cells: self.cells.iter().map(f).collect(),
            aggregation: self.aggregation,
        }
    }

    pub(crate) fn into_parts(self) -> (Axis, Axis, Vec<V>, Option<AggregationType>) {
        (self.rows, self.cols, self.cells, self.aggregation)
    }

    pub(crate) fn from_parts(rows: Axis, cols: Axis, cells: Vec<V>, aggregation: Option<AggregationType>) -> Self {
        debug_assert_eq!(cells.len(), rows.len() * cols.len());
        PivotTable {
            rows,
            cols,
            cells,
            aggregation,
        }
    }

    /// Drops the synthetic root level from both axes.
    pub(crate) fn drop_root_levels(self) -> Result<Self> {
        let rows = self.rows.without_root(AxisKind::Rows)?;
        let cols = self.cols.without_root(AxisKind::Columns)?;
        // Removing a constant slot keeps both key orders, so cells stay in place.
        Ok(PivotTable {
            rows,
            cols,
            cells: self.cells,
            aggregation: self.aggregation,
        })
    }
}

impl<V: Clone> PivotTable<V> {
    /// Sub-table of the cells whose row and column keys contain no SUBTOTAL slot.
    pub fn leaf_view(&self) -> Self {
        let rows = Axis::new(
            self.rows.fields.clone(),
            self.rows.keys().iter().filter(|k| k.is_leaf()).cloned(),
        );
        let cols = Axis::new(
            self.cols.fields.clone(),
            self.cols.keys().iter().filter(|k| k.is_leaf()).cloned(),
        );
        let row_pos: Vec<usize> = rows.keys().iter().filter_map(|k| self.rows.position(k)).collect();
        let col_pos: Vec<usize> = cols.keys().iter().filter_map(|k| self.cols.position(k)).collect();
        let width = self.cols.len();

        let mut cells = Vec::with_capacity(row_pos.len() * col_pos.len());
        for &r in &row_pos {
            for &c in &col_pos {
                cells.push(self.cells[r * width + c].clone());
            }
        }
        PivotTable::from_parts(rows, cols, cells, self.aggregation)
    }
}

impl PivotTable<PivotValue> {
    /// The table as a flat stream of (row labels, column labels, value),
    /// SUBTOTAL slots kept as `KeyLabel::Subtotal`.
    pub fn flatten(&self) -> Vec<FlatRow> {
        self.iter()
            .map(|(row, col, value)| FlatRow {
                row: self.rows.labels(row),
                col: self.cols.labels(col),
                value: *value,
            })
            .collect()
    }

    /// Leaf cells turned back into source records, one per cell.
    ///
    /// Only tables built with an additive-composable aggregation qualify:
    /// aggregating finished averages or counts again would give wrong totals.
    pub fn leaf_records(&self) -> Result<Vec<Record>> {
        if let Some(aggregation) = self.aggregation {
            if !aggregation.is_additive_composable() {
                return Err(PivotError::UnsafeAggregation(aggregation));
            }
        }

        let mut records = Vec::new();
        for (row, col, value) in self.iter() {
            if !row.is_leaf() || !col.is_leaf() {
                continue;
            }
            let mut record = Record::new(*value);
            for (field, &slot) in self.rows.fields().iter().zip(row.slots()) {
                if let KeyLabel::Value(v) = field.label(slot) {
                    record.set(field.name.clone(), v);
                }
            }
            for (field, &slot) in self.cols.fields().iter().zip(col.slots()) {
                if let KeyLabel::Value(v) = field.label(slot) {
                    record.set(field.name.clone(), v);
                }
            }
            records.push(record);
        }
        Ok(records)
    }
}
