//! FILENAME: pivot-subtotals/src/cache.rs
//! Pivot Cache - Interned internal representation.
//!
//! The cache is designed for:
//! - One O(n) scan of the source records that validates and interns them
//! - Composite keys that compare in display order without consulting a dictionary
//! - Mergeable aggregate state, so subtotals can be derived from other subtotals
//!
//! Architecture:
//! - Each unique category value is stored once per field and referenced by id
//! - After the scan every field is sealed: ids are renumbered so that id order
//!   equals the field's sort order
//! - Key slots are typed, so a subtotal or synthetic root position can never
//!   be confused with a real category

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::definition::{AggregationType, PivotDefinition, PivotField, PivotValue, SortOrder};
use crate::error::{PivotError, Result};
use crate::record::SourceRecord;
use crate::reshape::{LongRecord, LongTable};
use crate::view::KeyLabel;

// ============================================================================
// CATEGORY VALUES
// ============================================================================

/// A reference to an interned value within a field's unique value store.
pub type ValueId = u32;

/// Name of the synthetic root field injected above the row hierarchy.
pub const ROW_ROOT_FIELD: &str = "(row root)";

/// Name of the synthetic root field injected above the column hierarchy.
pub const COLUMN_ROOT_FIELD: &str = "(column root)";

/// A normalized, hashable categorical attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CategoryValue {
    Empty,
    Number(OrderedFloat),
    Text(String),
    Boolean(bool),
}

impl From<&str> for CategoryValue {
    fn from(value: &str) -> Self {
        CategoryValue::Text(value.to_string())
    }
}

impl From<String> for CategoryValue {
    fn from(value: String) -> Self {
        CategoryValue::Text(value)
    }
}

impl From<f64> for CategoryValue {
    fn from(value: f64) -> Self {
        CategoryValue::Number(OrderedFloat(value))
    }
}

impl From<i64> for CategoryValue {
    fn from(value: i64) -> Self {
        CategoryValue::Number(OrderedFloat(value as f64))
    }
}

impl From<bool> for CategoryValue {
    fn from(value: bool) -> Self {
        CategoryValue::Boolean(value)
    }
}

impl std::fmt::Display for CategoryValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CategoryValue::Empty => f.write_str("(blank)"),
            CategoryValue::Number(n) => write!(f, "{}", n.as_f64()),
            CategoryValue::Text(s) => f.write_str(s),
            CategoryValue::Boolean(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
        }
    }
}

/// Wrapper around f64 that implements Eq and Hash for use as HashMap keys.
/// NaN values are treated as equal to each other, and so are 0.0 and -0.0.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        if self.0.is_nan() && other.0.is_nan() {
            true
        } else {
            self.0 == other.0
        }
    }
}

impl Eq for OrderedFloat {}

impl std::hash::Hash for OrderedFloat {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        if self.0.is_nan() {
            // All NaN values hash to the same thing
            u64::MAX.hash(state);
        } else if self.0 == 0.0 {
            0u64.hash(state);
        } else {
            self.0.to_bits().hash(state);
        }
    }
}

impl OrderedFloat {
    pub fn as_f64(&self) -> f64 {
        self.0
    }
}

/// Ordering used when sealing a field: Empty < Number < Text < Boolean.
fn compare_category_values(a: &CategoryValue, b: &CategoryValue) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    match (a, b) {
        (CategoryValue::Empty, CategoryValue::Empty) => Ordering::Equal,
        (CategoryValue::Empty, _) => Ordering::Less,
        (_, CategoryValue::Empty) => Ordering::Greater,

        (CategoryValue::Number(na), CategoryValue::Number(nb)) => na.0.total_cmp(&nb.0),
        (CategoryValue::Number(_), _) => Ordering::Less,
        (_, CategoryValue::Number(_)) => Ordering::Greater,

        (CategoryValue::Text(ta), CategoryValue::Text(tb)) => ta.cmp(tb),
        (CategoryValue::Text(_), _) => Ordering::Less,
        (_, CategoryValue::Text(_)) => Ordering::Greater,

        (CategoryValue::Boolean(ba), CategoryValue::Boolean(bb)) => ba.cmp(bb),
    }
}

// ============================================================================
// FIELD CACHE
// ============================================================================

/// Dictionary for a single hierarchy field.
/// Stores unique values and provides O(1) lookup by ValueId.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldCache {
    /// Attribute name.
    pub name: String,

    /// Synthetic root fields hold no values; their only slot is `KeySlot::Root`.
    synthetic: bool,

    /// Map from value to its unique ID (for deduplication during build).
    value_to_id: FxHashMap<CategoryValue, ValueId>,

    /// Ordered list of unique values (indexed by ValueId).
    id_to_value: Vec<CategoryValue>,
}

impl FieldCache {
    pub fn new(name: impl Into<String>) -> Self {
        FieldCache {
            name: name.into(),
            synthetic: false,
            value_to_id: FxHashMap::default(),
            id_to_value: Vec::new(),
        }
    }

    /// Creates the dictionary of a synthetic root level.
    pub fn synthetic(name: impl Into<String>) -> Self {
        FieldCache {
            synthetic: true,
            ..FieldCache::new(name)
        }
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    /// Interns a value and returns its ValueId.
    /// If the value already exists, returns the existing ID.
    pub fn intern(&mut self, value: CategoryValue) -> ValueId {
        if let Some(&id) = self.value_to_id.get(&value) {
            return id;
        }

        let id = self.id_to_value.len() as ValueId;
        self.id_to_value.push(value.clone());
        self.value_to_id.insert(value, id);
        id
    }

    /// Gets the value for a given ID.
    pub fn get_value(&self, id: ValueId) -> Option<&CategoryValue> {
        self.id_to_value.get(id as usize)
    }

    /// Finds the id of an already interned value.
    pub fn lookup(&self, value: &CategoryValue) -> Option<ValueId> {
        self.value_to_id.get(value).copied()
    }

    /// Returns the number of unique values.
    pub fn unique_count(&self) -> usize {
        self.id_to_value.len()
    }

    /// Renumbers the dictionary so that id order follows `order`.
    /// Returns the old-id -> new-id mapping.
    pub fn seal(&mut self, order: SortOrder) -> Vec<ValueId> {
        let mut old_ids: Vec<ValueId> = (0..self.id_to_value.len() as ValueId).collect();
        match order {
            SortOrder::Ascending => old_ids.sort_by(|&a, &b| {
                compare_category_values(&self.id_to_value[a as usize], &self.id_to_value[b as usize])
            }),
            SortOrder::Descending => old_ids.sort_by(|&a, &b| {
                compare_category_values(&self.id_to_value[b as usize], &self.id_to_value[a as usize])
            }),
            // First appearance already is the id order
            SortOrder::DataSourceOrder => {}
        }

        let mut remap = vec![0; old_ids.len()];
        for (new_id, &old_id) in old_ids.iter().enumerate() {
            remap[old_id as usize] = new_id as ValueId;
        }

        self.id_to_value = old_ids
            .iter()
            .map(|&old_id| self.id_to_value[old_id as usize].clone())
            .collect();
        self.value_to_id = self
            .id_to_value
            .iter()
            .enumerate()
            .map(|(id, value)| (value.clone(), id as ValueId))
            .collect();

        remap
    }

    /// Label of a key slot of this field.
    pub fn label(&self, slot: KeySlot) -> KeyLabel {
        match slot {
            KeySlot::Item(id) => match self.get_value(id) {
                Some(value) => KeyLabel::Value(value.clone()),
                None => KeyLabel::Value(CategoryValue::Empty),
            },
            KeySlot::Root => KeyLabel::Root,
            KeySlot::Subtotal => KeyLabel::Subtotal,
        }
    }

    /// Inverse of `label`: the slot a label addresses, if the value is known.
    pub fn resolve(&self, label: &KeyLabel) -> Option<KeySlot> {
        match label {
            KeyLabel::Value(value) => self.lookup(value).map(KeySlot::Item),
            KeyLabel::Root => self.synthetic.then_some(KeySlot::Root),
            KeyLabel::Subtotal => Some(KeySlot::Subtotal),
        }
    }
}

// ============================================================================
// COMPOSITE KEYS
// ============================================================================

/// One position of a composite key.
///
/// The derived ordering places every item before the synthetic root and the
/// root before the subtotal, which keeps each subtotal key right after the
/// sibling group it collapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KeySlot {
    Item(ValueId),
    Root,
    Subtotal,
}

impl KeySlot {
    pub fn is_subtotal(self) -> bool {
        matches!(self, KeySlot::Subtotal)
    }
}

/// Ordered tuple of key slots addressing one axis position.
/// A SUBTOTAL slot is always followed by SUBTOTAL slots only.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompositeKey(SmallVec<[KeySlot; 4]>);

impl CompositeKey {
    pub fn new(slots: impl IntoIterator<Item = KeySlot>) -> Self {
        CompositeKey(slots.into_iter().collect())
    }

    /// Key of fully concrete items.
    pub fn items(ids: &[ValueId]) -> Self {
        CompositeKey::new(ids.iter().map(|&id| KeySlot::Item(id)))
    }

    /// Creates a key for the grand total (every slot is a subtotal).
    pub fn grand_total(depth: usize) -> Self {
        CompositeKey::new(std::iter::repeat(KeySlot::Subtotal).take(depth))
    }

    pub fn slots(&self) -> &[KeySlot] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    pub fn get(&self, level: usize) -> Option<KeySlot> {
        self.0.get(level).copied()
    }

    /// Number of leading slots that are not subtotals.
    pub fn concrete_depth(&self) -> usize {
        self.0.iter().take_while(|slot| !slot.is_subtotal()).count()
    }

    /// True when no slot is a subtotal.
    pub fn is_leaf(&self) -> bool {
        !self.0.iter().any(|slot| slot.is_subtotal())
    }

    /// True when every slot is a subtotal.
    pub fn is_grand_total(&self) -> bool {
        self.0.iter().all(|slot| slot.is_subtotal())
    }

    /// Checks that subtotals only ever collapse the finer end of the key.
    pub fn is_prefix_consistent(&self) -> bool {
        let concrete = self.concrete_depth();
        self.0[concrete..].iter().all(|slot| slot.is_subtotal())
    }

    /// Keeps the first `keep` slots and turns the rest into subtotals.
    pub fn subtotal_at_level(&self, keep: usize) -> Self {
        CompositeKey::new(
            self.0
                .iter()
                .enumerate()
                .map(|(i, &slot)| if i < keep { slot } else { KeySlot::Subtotal }),
        )
    }

    /// Extends the key with subtotal slots up to `depth`.
    pub fn padded(mut self, depth: usize) -> Self {
        while self.0.len() < depth {
            self.0.push(KeySlot::Subtotal);
        }
        self
    }

    /// Whether this key falls inside the group addressed by `other`'s concrete prefix.
    pub fn is_within(&self, other: &CompositeKey) -> bool {
        let prefix = other.concrete_depth();
        self.0.len() >= prefix && self.0[..prefix] == other.0[..prefix]
    }

    pub(crate) fn without_first(&self) -> Self {
        CompositeKey(self.0.iter().skip(1).copied().collect())
    }
}

// ============================================================================
// AGGREGATE ACCUMULATOR
// ============================================================================

/// Mergeable aggregation state.
///
/// Every aggregation type can be finished from it, and two states merge into
/// the state of the union of their groups, so subtotals may be built from
/// other subtotals without re-reading the source records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateAccumulator {
    pub sum: f64,
    /// Records in the group, including those with a missing measure.
    pub count: u64,
    /// Records with a present measure.
    pub count_numbers: u64,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub product: f64,
    /// For variance/stddev: sum of squared differences from mean.
    /// Using Welford's algorithm for numerical stability.
    pub m2: f64,
    pub mean: f64,
}

impl Default for AggregateAccumulator {
    fn default() -> Self {
        AggregateAccumulator::new()
    }
}

impl AggregateAccumulator {
    pub fn new() -> Self {
        AggregateAccumulator {
            sum: 0.0,
            count: 0,
            count_numbers: 0,
            min: None,
            max: None,
            product: 1.0,
            m2: 0.0,
            mean: 0.0,
        }
    }

    /// State of a single source record.
    pub fn from_measure(measure: PivotValue) -> Self {
        let mut acc = AggregateAccumulator::new();
        match measure {
            Some(value) => acc.add_number(value),
            None => acc.add_missing(),
        }
        acc
    }

    /// Adds a numeric value to the accumulator.
    pub fn add_number(&mut self, value: f64) {
        self.count += 1;
        self.count_numbers += 1;

        self.sum += value;
        self.min = Some(self.min.map_or(value, |m| m.min(value)));
        self.max = Some(self.max.map_or(value, |m| m.max(value)));
        self.product *= value;

        // Welford's algorithm for variance
        let delta = value - self.mean;
        self.mean += delta / (self.count_numbers as f64);
        let delta2 = value - self.mean;
        self.m2 += delta * delta2;
    }

    /// Counts a record whose measure is missing.
    pub fn add_missing(&mut self) {
        self.count += 1;
    }

    /// True when no record at all reached this state.
    pub fn is_absent(&self) -> bool {
        self.count == 0
    }

    /// Computes the final aggregate value. Missing when nothing numeric was seen,
    /// except for the counting aggregations.
    pub fn compute(&self, aggregation: AggregationType) -> PivotValue {
        let n = self.count_numbers as f64;
        match aggregation {
            AggregationType::Count => Some(self.count as f64),
            AggregationType::CountNumbers => Some(n),
            _ if self.count_numbers == 0 => None,
            AggregationType::Sum => Some(self.sum),
            AggregationType::Average => Some(self.sum / n),
            AggregationType::Min => self.min,
            AggregationType::Max => self.max,
            AggregationType::Product => Some(self.product),
            AggregationType::VarP => Some(self.m2.max(0.0) / n),
            AggregationType::StdDevP => Some((self.m2.max(0.0) / n).sqrt()),
            AggregationType::Var | AggregationType::StdDev if self.count_numbers < 2 => None,
            AggregationType::Var => Some(self.m2.max(0.0) / (n - 1.0)),
            AggregationType::StdDev => Some((self.m2.max(0.0) / (n - 1.0)).sqrt()),
        }
    }

    /// Merges another accumulator into this one.
    pub fn merge(&mut self, other: &AggregateAccumulator) {
        if other.count == 0 {
            return;
        }

        let combined_count = self.count_numbers + other.count_numbers;

        // Parallel Welford merge
        if self.count_numbers > 0 && other.count_numbers > 0 {
            let delta = other.mean - self.mean;
            let new_mean = self.mean + delta * (other.count_numbers as f64) / (combined_count as f64);
            self.m2 = self.m2
                + other.m2
                + delta * delta * (self.count_numbers as f64) * (other.count_numbers as f64)
                    / (combined_count as f64);
            self.mean = new_mean;
        } else if other.count_numbers > 0 {
            self.mean = other.mean;
            self.m2 = other.m2;
        }

        self.sum += other.sum;
        self.count += other.count;
        self.count_numbers = combined_count;
        self.product *= other.product;

        if let Some(other_min) = other.min {
            self.min = Some(self.min.map_or(other_min, |m| m.min(other_min)));
        }
        if let Some(other_max) = other.max {
            self.max = Some(self.max.map_or(other_max, |m| m.max(other_max)));
        }
    }
}

// ============================================================================
// MAIN CACHE STRUCT
// ============================================================================

/// A source record with every attribute interned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord {
    /// Position of the record in the source batch.
    pub source_row: usize,
    /// Concrete row-hierarchy key (no synthetic root).
    pub row: CompositeKey,
    /// Concrete column-hierarchy key (no synthetic root).
    pub col: CompositeKey,
    pub measure: PivotValue,
}

/// The validated, interned form of one batch of source records.
#[derive(Debug, Clone)]
pub struct PivotCache {
    pub row_fields: Vec<Arc<FieldCache>>,
    pub col_fields: Vec<Arc<FieldCache>>,
    pub records: Vec<CacheRecord>,
}

impl PivotCache {
    /// Validates and interns a batch of records.
    ///
    /// The whole batch is rejected if any record lacks a hierarchy attribute or
    /// carries a text category equal to the subtotal label.
    pub fn build<R: SourceRecord>(definition: &PivotDefinition, records: &[R]) -> Result<Self> {
        definition.validate()?;
        let label = definition.options.subtotal_label.as_str();

        let mut row_caches: Vec<FieldCache> =
            definition.row_fields.iter().map(|f| FieldCache::new(f.name.clone())).collect();
        let mut col_caches: Vec<FieldCache> =
            definition.column_fields.iter().map(|f| FieldCache::new(f.name.clone())).collect();

        let mut interned: Vec<(Vec<ValueId>, Vec<ValueId>, PivotValue)> = Vec::with_capacity(records.len());
        for (record_idx, record) in records.iter().enumerate() {
            let row_ids = intern_attributes(record, record_idx, &definition.row_fields, &mut row_caches, label)?;
            let col_ids = intern_attributes(record, record_idx, &definition.column_fields, &mut col_caches, label)?;
            let measure = record.measure().filter(|m| !m.is_nan());
            interned.push((row_ids, col_ids, measure));
        }

        let row_remap = seal_fields(&mut row_caches, &definition.row_fields);
        let col_remap = seal_fields(&mut col_caches, &definition.column_fields);

        let records = interned
            .into_iter()
            .enumerate()
            .map(|(source_row, (row_ids, col_ids, measure))| CacheRecord {
                source_row,
                row: remap_key(&row_ids, &row_remap),
                col: remap_key(&col_ids, &col_remap),
                measure,
            })
            .collect();

        Ok(PivotCache {
            row_fields: row_caches.into_iter().map(Arc::new).collect(),
            col_fields: col_caches.into_iter().map(Arc::new).collect(),
            records,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Returns the record count.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// The records as a long table whose row and column keys both start with a
    /// synthetic root level. Each record carries the state of its own measure.
    pub fn source_table(&self) -> LongTable<AggregateAccumulator> {
        let row_fields = with_root(ROW_ROOT_FIELD, &self.row_fields);
        let col_fields = with_root(COLUMN_ROOT_FIELD, &self.col_fields);

        let records = self
            .records
            .iter()
            .map(|record| LongRecord {
                row: rooted_key(&record.row),
                col: rooted_key(&record.col),
                value: AggregateAccumulator::from_measure(record.measure),
            })
            .collect();

        LongTable::new(row_fields, col_fields, records)
    }
}

fn intern_attributes<R: SourceRecord>(
    record: &R,
    record_idx: usize,
    fields: &[PivotField],
    caches: &mut [FieldCache],
    subtotal_label: &str,
) -> Result<Vec<ValueId>> {
    let mut ids = Vec::with_capacity(fields.len());
    for (field, cache) in fields.iter().zip(caches.iter_mut()) {
        let value = record
            .attribute(&field.name)
            .ok_or_else(|| PivotError::MissingAttribute {
                record: record_idx,
                attribute: field.name.clone(),
            })?;

        if let CategoryValue::Text(text) = value {
            if text == subtotal_label {
                return Err(PivotError::SentinelCollision {
                    record: record_idx,
                    attribute: field.name.clone(),
                    value: text.clone(),
                });
            }
        }

        ids.push(cache.intern(value.clone()));
    }
    Ok(ids)
}

fn seal_fields(caches: &mut [FieldCache], fields: &[PivotField]) -> Vec<Vec<ValueId>> {
    caches
        .iter_mut()
        .zip(fields)
        .map(|(cache, field)| cache.seal(field.sort_order))
        .collect()
}

fn remap_key(ids: &[ValueId], remap: &[Vec<ValueId>]) -> CompositeKey {
    CompositeKey::new(
        ids.iter()
            .zip(remap)
            .map(|(&id, level)| KeySlot::Item(level[id as usize])),
    )
}

fn with_root(root_name: &str, fields: &[Arc<FieldCache>]) -> Vec<Arc<FieldCache>> {
    std::iter::once(Arc::new(FieldCache::synthetic(root_name)))
        .chain(fields.iter().cloned())
        .collect()
}

fn rooted_key(key: &CompositeKey) -> CompositeKey {
    CompositeKey::new(std::iter::once(KeySlot::Root).chain(key.slots().iter().copied()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;

    fn sales(category: &str, region: &str, amount: f64) -> Record {
        Record::new(Some(amount))
            .with("Category", category)
            .with("Region", region)
    }

    #[test]
    fn test_seal_orders_ids_by_value() {
        let mut field = FieldCache::new("Region");
        let west = field.intern("West".into());
        let east = field.intern("East".into());
        let north = field.intern("North".into());

        let remap = field.seal(SortOrder::Ascending);

        assert_eq!(remap[east as usize], 0);
        assert_eq!(remap[north as usize], 1);
        assert_eq!(remap[west as usize], 2);
        assert_eq!(field.lookup(&"East".into()), Some(0));
        assert_eq!(field.get_value(2), Some(&CategoryValue::from("West")));
    }

    #[test]
    fn test_seal_descending_and_source_order() {
        let mut desc = FieldCache::new("Year");
        desc.intern(2021i64.into());
        desc.intern(2023i64.into());
        desc.intern(2022i64.into());
        desc.seal(SortOrder::Descending);
        assert_eq!(desc.get_value(0), Some(&CategoryValue::from(2023i64)));

        let mut source = FieldCache::new("Year");
        source.intern(2021i64.into());
        source.intern(2023i64.into());
        let remap = source.seal(SortOrder::DataSourceOrder);
        assert_eq!(remap, vec![0, 1]);
    }

    #[test]
    fn test_mixed_values_sort_empty_numbers_text_booleans() {
        let mut field = FieldCache::new("Mixed");
        field.intern(true.into());
        field.intern("b".into());
        field.intern(3.0.into());
        field.intern(CategoryValue::Empty);
        field.seal(SortOrder::Ascending);

        let ordered: Vec<String> = (0..4).map(|id| field.get_value(id).unwrap().to_string()).collect();
        assert_eq!(ordered, vec!["(blank)", "3", "b", "TRUE"]);
    }

    #[test]
    fn test_signed_zero_interns_once() {
        let mut field = FieldCache::new("Delta");
        let a = field.intern(0.0.into());
        let b = field.intern((-0.0).into());
        assert_eq!(a, b);
        assert_eq!(field.unique_count(), 1);
    }

    #[test]
    fn test_key_ordering_places_subtotal_after_siblings() {
        let bars_x = CompositeKey::items(&[0, 0]);
        let bars_y = CompositeKey::items(&[0, 1]);
        let bars_all = bars_x.subtotal_at_level(1);
        let cookies_z = CompositeKey::items(&[1, 2]);
        let grand = CompositeKey::grand_total(2);

        let mut keys = vec![grand.clone(), cookies_z.clone(), bars_all.clone(), bars_y.clone(), bars_x.clone()];
        keys.sort();

        assert_eq!(keys, vec![bars_x, bars_y, bars_all, cookies_z, grand]);
    }

    #[test]
    fn test_key_predicates() {
        let key = CompositeKey::new([KeySlot::Item(3), KeySlot::Subtotal, KeySlot::Subtotal]);
        assert_eq!(key.concrete_depth(), 1);
        assert!(key.is_prefix_consistent());
        assert!(!key.is_leaf());
        assert!(!key.is_grand_total());
        assert!(CompositeKey::items(&[3, 4, 5]).is_within(&key));
        assert!(!CompositeKey::items(&[2, 4, 5]).is_within(&key));

        let broken = CompositeKey::new([KeySlot::Subtotal, KeySlot::Item(1)]);
        assert!(!broken.is_prefix_consistent());

        assert!(CompositeKey::default().is_leaf());
        assert!(CompositeKey::default().is_grand_total());
        assert_eq!(CompositeKey::items(&[7]).padded(3).concrete_depth(), 1);
    }

    #[test]
    fn test_accumulator_merge_matches_sequential() {
        let values = [4.0, 8.0, 15.0, 16.0, 23.0, 42.0];

        let mut sequential = AggregateAccumulator::new();
        for v in values {
            sequential.add_number(v);
        }

        let mut left = AggregateAccumulator::new();
        let mut right = AggregateAccumulator::new();
        for v in &values[..2] {
            left.add_number(*v);
        }
        for v in &values[2..] {
            right.add_number(*v);
        }
        left.merge(&right);

        for agg in [
            AggregationType::Sum,
            AggregationType::Average,
            AggregationType::Min,
            AggregationType::Max,
            AggregationType::Count,
            AggregationType::VarP,
            AggregationType::StdDev,
        ] {
            let a = left.compute(agg).unwrap();
            let b = sequential.compute(agg).unwrap();
            assert!((a - b).abs() < 1e-9, "{:?}: {} vs {}", agg, a, b);
        }
    }

    #[test]
    fn test_accumulator_missing_measures() {
        let mut acc = AggregateAccumulator::from_measure(None);
        acc.merge(&AggregateAccumulator::from_measure(None));

        assert!(!acc.is_absent());
        assert_eq!(acc.compute(AggregationType::Sum), None);
        assert_eq!(acc.compute(AggregationType::Count), Some(2.0));
        assert_eq!(acc.compute(AggregationType::CountNumbers), Some(0.0));

        acc.merge(&AggregateAccumulator::from_measure(Some(5.0)));
        assert_eq!(acc.compute(AggregationType::Sum), Some(5.0));
        assert_eq!(acc.compute(AggregationType::Var), None);
        assert_eq!(acc.compute(AggregationType::Product), Some(5.0));
    }

    #[test]
    fn test_merging_absent_state_is_identity() {
        let mut acc = AggregateAccumulator::from_measure(Some(3.0));
        let before = acc.clone();
        acc.merge(&AggregateAccumulator::new());
        assert_eq!(acc, before);
    }

    #[test]
    fn test_build_interns_and_sorts() {
        let records = vec![
            sales("Cookies", "West", 1.0),
            sales("Bars", "East", 2.0),
            sales("Bars", "West", 3.0),
        ];
        let def = PivotDefinition::from_names(&["Category"], &["Region"]);
        let cache = PivotCache::build(&def, &records).unwrap();

        assert_eq!(cache.record_count(), 3);
        assert_eq!(cache.row_fields[0].lookup(&"Bars".into()), Some(0));
        assert_eq!(cache.records[0].row, CompositeKey::items(&[1]));
        assert_eq!(cache.records[1].col, CompositeKey::items(&[0]));

        let source = cache.source_table();
        assert_eq!(source.row_fields().len(), 2);
        assert!(source.row_fields()[0].is_synthetic());
        assert_eq!(source.records()[0].row.slots(), &[KeySlot::Root, KeySlot::Item(1)]);
    }

    #[test]
    fn test_build_rejects_missing_attribute() {
        let records = vec![
            sales("Bars", "East", 2.0),
            Record::new(Some(1.0)).with("Category", "Bars"),
        ];
        let def = PivotDefinition::from_names(&["Category"], &["Region"]);

        match PivotCache::build(&def, &records) {
            Err(PivotError::MissingAttribute { record, attribute }) => {
                assert_eq!(record, 1);
                assert_eq!(attribute, "Region");
            }
            other => panic!("expected MissingAttribute, got {:?}", other.map(|c| c.record_count())),
        }
    }

    #[test]
    fn test_build_rejects_sentinel_collision() {
        let records = vec![sales("All", "East", 2.0)];
        let def = PivotDefinition::from_names(&["Category"], &["Region"]);

        assert!(matches!(
            PivotCache::build(&def, &records),
            Err(PivotError::SentinelCollision { record: 0, .. })
        ));
    }

    #[test]
    fn test_nan_measure_is_missing() {
        let records = vec![sales("Bars", "East", f64::NAN)];
        let def = PivotDefinition::from_names(&["Category"], &["Region"]);
        let cache = PivotCache::build(&def, &records).unwrap();
        assert_eq!(cache.records[0].measure, None);
    }
}
