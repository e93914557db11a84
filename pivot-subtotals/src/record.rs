//! FILENAME: pivot-subtotals/src/record.rs
//! Source records: named categorical attributes plus one optional measure.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::cache::CategoryValue;
use crate::definition::PivotValue;

/// Anything that can feed a pivot: attribute lookup by name and a numeric measure.
pub trait SourceRecord {
    /// Value of the named attribute, or `None` if the record does not carry it.
    fn attribute(&self, name: &str) -> Option<&CategoryValue>;

    /// The measure; `None` (or NaN) marks it missing.
    fn measure(&self) -> PivotValue;
}

/// A plain in-memory record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub attributes: FxHashMap<String, CategoryValue>,
    pub measure: PivotValue,
}

impl Record {
    pub fn new(measure: PivotValue) -> Self {
        Record {
            attributes: FxHashMap::default(),
            measure,
        }
    }

    /// Builder-style attribute setter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<CategoryValue>) -> Self {
        self.attributes.insert(name.into(), value.into());
        self
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<CategoryValue>) {
        self.attributes.insert(name.into(), value.into());
    }
}

impl SourceRecord for Record {
    fn attribute(&self, name: &str) -> Option<&CategoryValue> {
        self.attributes.get(name)
    }

    fn measure(&self) -> PivotValue {
        self.measure
    }
}

impl<T: SourceRecord> SourceRecord for &T {
    fn attribute(&self, name: &str) -> Option<&CategoryValue> {
        (**self).attribute(name)
    }

    fn measure(&self) -> PivotValue {
        (**self).measure()
    }
}
