//! Flat exclusive region profile
//!
//! Each record is credited to the first entry that is a region, by that
//! entry's own value.

use crate::metadata::MetadataStore;
use crate::record::Record;

use super::{RegionProfile, RegionProfileResult, Selection};

/// Metric sum per innermost region value
#[derive(Debug, Clone)]
pub struct FlatExclusiveRegionProfile {
    selection: Selection,
    acc: RegionProfileResult,
}

impl FlatExclusiveRegionProfile {
    /// Profile `metric` over `region`, or over all nested attributes
    pub fn new(metric: &str, region: Option<&str>) -> Self {
        Self {
            selection: Selection::new(metric, region),
            acc: RegionProfileResult::default(),
        }
    }
}

impl RegionProfile for FlatExclusiveRegionProfile {
    fn process(&mut self, db: &MetadataStore, record: &Record) {
        let Some(value) = self.selection.begin(db, record, &mut self.acc) else {
            return;
        };

        let selection = &self.selection;
        let region = record
            .iter()
            .find(|e| e.attribute(db).map_or(false, |a| selection.is_region(db, a)))
            .and_then(|e| e.value(db));

        if let Some(region) = region {
            self.acc.total_reg += value;
            *self.acc.regions.entry(region.to_string()).or_default() += value;
        }
    }

    fn result(&self) -> RegionProfileResult {
        self.acc.clone()
    }
}
