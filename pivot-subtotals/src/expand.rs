//! FILENAME: pivot-subtotals/src/expand.rs
//! Hierarchy Expander - the single-axis subtotal primitive.
//!
//! Given a group-by hierarchy of depth m and a pass-through field tuple, the
//! expander aggregates once per requested level k (the first k group-by
//! fields), pads every key back to depth m with SUBTOTAL slots and merges the
//! levels into one dense table. It never knows which of its inputs were rows
//! or columns, so the composer can run it on either axis.

use std::sync::Arc;

use log::trace;

use crate::aggregate::{aggregate, merge_into_table, FlatAggregation};
use crate::cache::{AggregateAccumulator, CompositeKey, FieldCache};
use crate::definition::FieldIndex;
use crate::error::Result;
use crate::reshape::LongTable;
use crate::view::{Axis, PivotTable};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Which prefix depths of a hierarchy get aggregated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LevelPlan {
    /// Prefix lengths, finest first.
    levels: Vec<usize>,
}

impl LevelPlan {
    /// Plan for a plain hierarchy of `show_subtotals.len()` fields.
    ///
    /// `show_subtotals[i]` asks for the subtotal of each item of field i, i.e.
    /// the level that keeps fields 0..=i and collapses the rest. The innermost
    /// flag is ignored. With `grand_total`, level 0 (one global bucket) is added.
    pub fn standalone(show_subtotals: &[bool], grand_total: bool) -> Self {
        let depth = show_subtotals.len();
        let mut levels = vec![depth];
        for k in (1..depth).rev() {
            if show_subtotals[k - 1] {
                levels.push(k);
            }
        }
        if grand_total && depth > 0 {
            levels.push(0);
        }
        LevelPlan { levels }
    }

    /// Plan for `[root] ++ fields`, where the root is a single-valued synthetic
    /// field. The root-only level (k = 1) is the grand total; level 0 is never
    /// requested since it would repeat it.
    pub fn rooted(show_subtotals: &[bool], grand_total: bool) -> Self {
        let depth = show_subtotals.len() + 1;
        let mut levels = vec![depth];
        for k in (2..depth).rev() {
            if show_subtotals[k - 2] {
                levels.push(k);
            }
        }
        if grand_total && depth > 1 {
            levels.push(1);
        }
        LevelPlan { levels }
    }

    pub fn levels(&self) -> &[usize] {
        &self.levels
    }
}

/// Maps `f` over `items`, on the rayon pool when the `parallel` feature is on.
/// Output order follows input order either way.
pub(crate) fn map_levels<T, R, F>(items: &[T], f: F) -> Result<Vec<R>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Sync + Send,
{
    #[cfg(feature = "parallel")]
    {
        items.par_iter().map(f).collect()
    }
    #[cfg(not(feature = "parallel"))]
    {
        items.iter().map(f).collect()
    }
}

/// Expands `group_fields` into a subtotaled row axis while `pass_fields` stay
/// flat as the column axis.
///
/// Row keys have depth `group_fields.len()`; columns are the full pass-through
/// tuples observed at the finest level. Every level aggregates the full
/// pass-through tuple, so all levels share one column-key set. An empty table
/// yields a single grand-total cell holding an empty accumulator.
pub fn expand_hierarchy(
    table: &LongTable<AggregateAccumulator>,
    group_fields: &[FieldIndex],
    pass_fields: &[FieldIndex],
    plan: &LevelPlan,
) -> Result<PivotTable<AggregateAccumulator>> {
    table.check_fields(group_fields)?;
    table.check_fields(pass_fields)?;

    let row_fields: Vec<Arc<FieldCache>> = group_fields.iter().map(|&f| table.field(f).clone()).collect();
    let col_fields: Vec<Arc<FieldCache>> = pass_fields.iter().map(|&f| table.field(f).clone()).collect();

    if table.is_empty() {
        let rows = Axis::new(row_fields, [CompositeKey::grand_total(group_fields.len())]);
        let cols = Axis::new(col_fields, [CompositeKey::grand_total(pass_fields.len())]);
        return Ok(PivotTable::from_fn(rows, cols, |_, _| AggregateAccumulator::new()));
    }

    let parts: Vec<FlatAggregation<AggregateAccumulator>> = map_levels(plan.levels(), |&k| {
        let level = aggregate(table, &group_fields[..k], pass_fields)?;
        trace!("expand level {}: {} groups", k, level.len());
        Ok(level.pad_to(&row_fields, &col_fields))
    })?;

    Ok(merge_into_table(row_fields, col_fields, parts, AggregateAccumulator::new()))
}
