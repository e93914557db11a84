//! FILENAME: pivot-subtotals/src/reshape.rs
//! Axis Transposer / Reshaper.
//!
//! Two law-governed conversions between the keyed grid (`PivotTable`) and the
//! flat tuple stream (`LongTable`), plus a pure relabeling transpose:
//! - `PivotTable::to_long` emits one record per cell, missing cells included
//! - `LongTable::to_wide` / `LongTable::pivot` regroup with pick semantics
//! - `to_long` then `to_wide` with the same roles reproduces every cell

use std::sync::Arc;

use crate::aggregate::aggregate_with;
use crate::cache::{CompositeKey, FieldCache, KeySlot};
use crate::definition::{AggregationType, FieldIndex};
use crate::error::{PivotError, Result};
use crate::view::{render_key, PivotTable};

/// One cell of a long table: row key, column key, value.
#[derive(Debug, Clone, PartialEq)]
pub struct LongRecord<V> {
    pub row: CompositeKey,
    pub col: CompositeKey,
    pub value: V,
}

/// Flat stream of keyed values. Fields are addressed by `FieldIndex`:
/// row fields first, then column fields.
#[derive(Debug, Clone)]
pub struct LongTable<V> {
    row_fields: Vec<Arc<FieldCache>>,
    col_fields: Vec<Arc<FieldCache>>,
    records: Vec<LongRecord<V>>,
    aggregation: Option<AggregationType>,
}

impl<V> LongTable<V> {
    /// Every record's row key must have `row_fields.len()` slots and its column
    /// key `col_fields.len()` slots.
    pub(crate) fn new(
        row_fields: Vec<Arc<FieldCache>>,
        col_fields: Vec<Arc<FieldCache>>,
        records: Vec<LongRecord<V>>,
    ) -> Self {
        debug_assert!(records
            .iter()
            .all(|r| r.row.depth() == row_fields.len() && r.col.depth() == col_fields.len()));
        LongTable {
            row_fields,
            col_fields,
            records,
            aggregation: None,
        }
    }

    pub fn row_fields(&self) -> &[Arc<FieldCache>] {
        &self.row_fields
    }

    pub fn col_fields(&self) -> &[Arc<FieldCache>] {
        &self.col_fields
    }

    pub fn records(&self) -> &[LongRecord<V>] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn aggregation(&self) -> Option<AggregationType> {
        self.aggregation
    }

    pub fn field_count(&self) -> usize {
        self.row_fields.len() + self.col_fields.len()
    }

    /// Indices of the fields that came from the row axis.
    pub fn row_field_indices(&self) -> Vec<FieldIndex> {
        (0..self.row_fields.len()).collect()
    }

    /// Indices of the fields that came from the column axis.
    pub fn col_field_indices(&self) -> Vec<FieldIndex> {
        (self.row_fields.len()..self.field_count()).collect()
    }

    /// Index of the field called `name`.
    pub fn field_index(&self, name: &str) -> Option<FieldIndex> {
        self.row_fields
            .iter()
            .chain(self.col_fields.iter())
            .position(|f| f.name == name)
    }

    /// Dictionary of a field. `field` must be in range (see `check_fields`).
    pub(crate) fn field(&self, field: FieldIndex) -> &Arc<FieldCache> {
        let split = self.row_fields.len();
        if field < split {
            &self.row_fields[field]
        } else {
            &self.col_fields[field - split]
        }
    }

    /// Slot of `record` at `field`. `field` must be in range (see `check_fields`).
    pub(crate) fn slot(&self, record: &LongRecord<V>, field: FieldIndex) -> KeySlot {
        let split = self.row_fields.len();
        if field < split {
            record.row.slots()[field]
        } else {
            record.col.slots()[field - split]
        }
    }

    pub(crate) fn check_fields(&self, fields: &[FieldIndex]) -> Result<()> {
        let field_count = self.field_count();
        match fields.iter().find(|&&f| f >= field_count) {
            Some(&index) => Err(PivotError::FieldIndexOutOfRange { index, field_count }),
            None => Ok(()),
        }
    }
}

/// Group state of the pick fold: the first value seen and how many arrived.
struct Picked<V> {
    value: Option<V>,
    count: usize,
}

impl<V: Clone> LongTable<V> {
    /// Regroups the stream with the given attribute roles. Every cell must be
    /// reached by at most one record; combinations reached by none take `fill`.
    pub fn pivot(&self, row_fields: &[FieldIndex], col_fields: &[FieldIndex], fill: V) -> Result<PivotTable<V>> {
        let picked = aggregate_with(
            self,
            row_fields,
            col_fields,
            || Picked { value: None, count: 0 },
            |picked, value| {
                picked.count += 1;
                if picked.value.is_none() {
                    picked.value = Some(value.clone());
                }
            },
        )?;

        if let Some((row, col, p)) = picked.groups().find(|(_, _, p)| p.count > 1) {
            return Err(PivotError::DuplicateCell {
                row: render_key(picked.row_fields(), row, "(subtotal)"),
                col: render_key(picked.col_fields(), col, "(subtotal)"),
                count: p.count,
            });
        }

        let table = picked
            .map(|p| p.value.unwrap_or_else(|| fill.clone()))
            .into_table(fill.clone());
        Ok(table.with_aggregation(self.aggregation))
    }

    /// Long-to-wide with the roles the stream came with.
    pub fn to_wide(&self, fill: V) -> Result<PivotTable<V>> {
        self.pivot(&self.row_field_indices(), &self.col_field_indices(), fill)
    }
}

impl<V: Clone> PivotTable<V> {
    /// Widen-to-long: one record per cell, in row-major order.
    pub fn to_long(&self) -> LongTable<V> {
        let records = self
            .iter()
            .map(|(row, col, value)| LongRecord {
                row: row.clone(),
                col: col.clone(),
                value: value.clone(),
            })
            .collect();
        let mut long = LongTable::new(self.rows().fields().to_vec(), self.cols().fields().to_vec(), records);
        long.aggregation = self.aggregation();
        long
    }

    /// Exchanges the row and column key spaces without touching any value.
    pub fn transpose(&self) -> PivotTable<V> {
        let (rows, cols, cells, aggregation) = self.clone().into_parts();
        let (height, width) = (rows.len(), cols.len());

        let mut transposed = Vec::with_capacity(cells.len());
        for c in 0..width {
            for r in 0..height {
                transposed.push(cells[r * width + c].clone());
            }
        }
        PivotTable::from_parts(cols, rows, transposed, aggregation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::AggregateAccumulator;
    use crate::definition::PivotValue;
    use crate::view::{Axis, KeyLabel};

    fn field(name: &str, values: &[&str]) -> Arc<FieldCache> {
        let mut cache = FieldCache::new(name);
        for v in values {
            cache.intern((*v).into());
        }
        Arc::new(cache)
    }

    fn table() -> PivotTable<PivotValue> {
        let rows = Axis::new(
            vec![field("Category", &["Bars", "Cookies"])],
            vec![CompositeKey::items(&[0]), CompositeKey::items(&[1]), CompositeKey::grand_total(1)],
        );
        let cols = Axis::new(
            vec![field("Region", &["East", "West"])],
            vec![CompositeKey::items(&[0]), CompositeKey::items(&[1])],
        );
        let values = [Some(10.0), Some(5.0), Some(7.0), None, Some(17.0), Some(5.0)];
        let mut it = values.into_iter();
        PivotTable::from_fn(rows, cols, |_, _| it.next().flatten())
    }

    #[test]
    fn test_round_trip_keeps_missing_cells() {
        let wide = table();
        let long = wide.to_long();
        assert_eq!(long.len(), 6);
        assert!(long.records().iter().any(|r| r.value.is_none()));

        let back = long.to_wide(Some(-1.0)).unwrap();
        assert_eq!(back.row_keys(), wide.row_keys());
        assert_eq!(back.col_keys(), wide.col_keys());
        let a: Vec<_> = wide.iter().map(|(_, _, v)| *v).collect();
        let b: Vec<_> = back.iter().map(|(_, _, v)| *v).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_long_records_split_column_fields() {
        let long = table().to_long();
        assert_eq!(long.field_count(), 2);
        assert_eq!(long.field_index("Region"), Some(1));
        assert_eq!(long.col_field_indices(), vec![1]);
        let first = &long.records()[0];
        assert_eq!(long.slot(first, 1), KeySlot::Item(0));
    }

    #[test]
    fn test_transpose_is_pure_relabeling() {
        let wide = table();
        let t = wide.transpose();

        assert_eq!(t.row_keys(), wide.col_keys());
        assert_eq!(t.col_keys(), wide.row_keys());
        for (row, col, value) in wide.iter() {
            assert_eq!(t.get(col, row), Some(value));
        }
        let twice = t.transpose();
        assert_eq!(
            twice.cell(&["Cookies".into()], &["West".into()]),
            Some(&None)
        );
        assert_eq!(
            twice.cell(&[KeyLabel::Subtotal], &["East".into()]),
            Some(&Some(17.0))
        );
    }

    #[test]
    fn test_pivot_with_swapped_roles() {
        let long = table().to_long();
        let swapped = long.pivot(&[1], &[0], None).unwrap();
        assert_eq!(swapped.rows().field_names(), vec!["Region"]);
        assert_eq!(swapped.cell(&["East".into()], &["Cookies".into()]), Some(&Some(7.0)));
    }

    #[test]
    fn test_pivot_rejects_ambiguous_roles() {
        let long = table().to_long();
        match long.pivot(&[1], &[], None) {
            Err(PivotError::DuplicateCell { count, .. }) => assert_eq!(count, 3),
            other => panic!("expected DuplicateCell, got {:?}", other.map(|t| t.row_count())),
        }
    }

    #[test]
    fn test_absent_combinations_take_fill() {
        let long = table().to_long();
        let partial = LongTable::new(
            long.row_fields().to_vec(),
            long.col_fields().to_vec(),
            long.records()[..3].to_vec(),
        );
        let wide = partial.to_wide(Some(0.0)).unwrap();
        assert_eq!(wide.cell(&["Cookies".into()], &["West".into()]), Some(&Some(0.0)));
    }

    #[test]
    fn test_accumulators_reshape_too() {
        let acc = table().map(|v| AggregateAccumulator::from_measure(*v));
        let back = acc.to_long().to_wide(AggregateAccumulator::new()).unwrap();
        let cell = back.cell(&["Bars".into()], &["East".into()]).unwrap();
        assert_eq!(cell.sum, 10.0);
    }
}
