//! FILENAME: pivot-subtotals/src/engine.rs
//! Two-Axis Composer - the calculation core that turns records into a fully
//! subtotaled pivot table.
//!
//! Algorithm (MergeStates):
//! 1. Intern the records and prepend a synthetic root level to both axes
//! 2. Expand [rowRoot] ++ rows with the whole column tuple passing through
//! 3. Widen-to-long the row-expanded table
//! 4. Expand [colRoot] ++ columns with the whole row tuple passing through
//! 5. Transpose back and drop the root levels
//! 6. Finish every accumulator with the configured aggregation
//!
//! Cells carry `AggregateAccumulator` state until step 6, so the second pass
//! merges states instead of re-aggregating finished values.

use std::sync::Arc;

use log::debug;

use crate::aggregate::{aggregate, merge_into_table};
use crate::cache::{AggregateAccumulator, CompositeKey, FieldCache, PivotCache};
use crate::definition::{AggregationType, CompositionStrategy, FieldIndex, PivotDefinition, PivotField};
use crate::error::Result;
use crate::expand::{expand_hierarchy, map_levels, LevelPlan};
use crate::record::SourceRecord;
use crate::view::{Axis, PivotTable};

// ============================================================================
// PIVOT COMPOSER
// ============================================================================

/// Builds the subtotaled table for one definition over one cache.
pub struct PivotComposer<'a> {
    definition: &'a PivotDefinition,
    cache: &'a PivotCache,

    /// Rooted row levels to aggregate.
    row_plan: LevelPlan,

    /// Rooted column levels to aggregate.
    col_plan: LevelPlan,

    /// Indices of [rowRoot] ++ row fields in the source table.
    row_field_indices: Vec<FieldIndex>,

    /// Indices of [colRoot] ++ column fields in the source table.
    col_field_indices: Vec<FieldIndex>,
}

impl<'a> PivotComposer<'a> {
    /// Creates a new composer instance.
    pub fn new(definition: &'a PivotDefinition, cache: &'a PivotCache) -> Self {
        let options = &definition.options;
        let row_plan = LevelPlan::rooted(
            &subtotal_flags(&cache.row_fields, &definition.row_fields, options.subtotal_rows),
            options.grand_total,
        );
        let col_plan = LevelPlan::rooted(
            &subtotal_flags(&cache.col_fields, &definition.column_fields, options.subtotal_cols),
            options.grand_total,
        );

        let row_depth = cache.row_fields.len() + 1;
        let col_depth = cache.col_fields.len() + 1;

        PivotComposer {
            definition,
            cache,
            row_plan,
            col_plan,
            row_field_indices: (0..row_depth).collect(),
            col_field_indices: (row_depth..row_depth + col_depth).collect(),
        }
    }

    /// Executes the composition and returns the finished table.
    pub fn calculate(&self) -> Result<PivotTable> {
        let aggregation = self.definition.options.aggregation;

        if self.cache.is_empty() {
            debug!("compose: no records, single grand-total cell");
            return Ok(self.empty_table(aggregation));
        }

        let states = match self.definition.options.strategy {
            CompositionStrategy::MergeStates => self.compose_merged()?,
            CompositionStrategy::Recompute => self.compose_direct()?,
        };
        Ok(self.finish(&states, aggregation))
    }

    /// Accumulator table after both passes, roots already dropped.
    pub fn compose_merged(&self) -> Result<PivotTable<AggregateAccumulator>> {
        let source = self.cache.source_table();

        let rows_expanded = expand_hierarchy(
            &source,
            &self.row_field_indices,
            &self.col_field_indices,
            &self.row_plan,
        )?;
        debug!(
            "compose pass 1: {} records -> {} rows x {} columns",
            source.len(),
            rows_expanded.row_count(),
            rows_expanded.col_count()
        );

        // The long table keeps the field layout: row fields first, then column fields.
        let long = rows_expanded.to_long();
        let both_expanded = expand_hierarchy(
            &long,
            &self.col_field_indices,
            &self.row_field_indices,
            &self.col_plan,
        )?;
        debug!(
            "compose pass 2: {} long records -> {} columns x {} rows",
            long.len(),
            both_expanded.row_count(),
            both_expanded.col_count()
        );

        both_expanded.transpose().drop_root_levels()
    }

    /// Accumulator table with every (row level, column level) block aggregated
    /// straight from the source records, roots already dropped.
    pub fn compose_direct(&self) -> Result<PivotTable<AggregateAccumulator>> {
        let source = self.cache.source_table();
        let row_fields = source.row_fields().to_vec();
        let col_fields = source.col_fields().to_vec();

        let blocks: Vec<(usize, usize)> = self
            .row_plan
            .levels()
            .iter()
            .flat_map(|&r| self.col_plan.levels().iter().map(move |&c| (r, c)))
            .collect();

        let parts = map_levels(&blocks, |&(r, c)| {
            let block = aggregate(&source, &self.row_field_indices[..r], &self.col_field_indices[..c])?;
            Ok(block.pad_to(&row_fields, &col_fields))
        })?;
        debug!(
            "compose direct: {} records, {} level blocks",
            source.len(),
            blocks.len()
        );

        merge_into_table(row_fields, col_fields, parts, AggregateAccumulator::new()).drop_root_levels()
    }

    /// Absent cells take the fill value, every other cell is finished.
    fn finish(&self, states: &PivotTable<AggregateAccumulator>, aggregation: AggregationType) -> PivotTable {
        let fill = self.definition.options.fill_value;
        states
            .map(|acc| if acc.is_absent() { fill } else { acc.compute(aggregation) })
            .with_aggregation(Some(aggregation))
    }

    fn empty_table(&self, aggregation: AggregationType) -> PivotTable {
        let rows = Axis::new(
            self.cache.row_fields.clone(),
            [CompositeKey::grand_total(self.cache.row_fields.len())],
        );
        let cols = Axis::new(
            self.cache.col_fields.clone(),
            [CompositeKey::grand_total(self.cache.col_fields.len())],
        );
        PivotTable::from_fn(rows, cols, |_, _| aggregation.empty_result()).with_aggregation(Some(aggregation))
    }
}

/// Per-field subtotal switches for the cached hierarchy, all off when the
/// axis disables subtotals. Fields the definition does not name default to on.
fn subtotal_flags(cached: &[Arc<FieldCache>], fields: &[PivotField], axis_enabled: bool) -> Vec<bool> {
    cached
        .iter()
        .map(|c| {
            axis_enabled
                && fields
                    .iter()
                    .find(|f| f.name == c.name)
                    .map_or(true, |f| f.show_subtotals)
        })
        .collect()
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Builds the subtotaled pivot of `records` described by `definition`.
pub fn calculate_pivot<R: SourceRecord>(definition: &PivotDefinition, records: &[R]) -> Result<PivotTable> {
    let cache = PivotCache::build(definition, records)?;
    calculate_from_cache(definition, &cache)
}

/// Same as `calculate_pivot` over an already interned batch.
pub fn calculate_from_cache(definition: &PivotDefinition, cache: &PivotCache) -> Result<PivotTable> {
    PivotComposer::new(definition, cache).calculate()
}
