//! Nested exclusive region profile
//!
//! Each record is credited once, to the full region path of its first
//! reference entry whose node is a region.

use crate::metadata::MetadataStore;
use crate::record::Record;

use super::{RegionProfile, RegionProfileResult, Selection};

/// Metric sum per innermost region path
#[derive(Debug, Clone)]
pub struct NestedExclusiveRegionProfile {
    selection: Selection,
    acc: RegionProfileResult,
}

impl NestedExclusiveRegionProfile {
    /// Profile `metric` over `region`, or over all nested attributes
    pub fn new(metric: &str, region: Option<&str>) -> Self {
        Self {
            selection: Selection::new(metric, region),
            acc: RegionProfileResult::default(),
        }
    }
}

impl RegionProfile for NestedExclusiveRegionProfile {
    fn process(&mut self, db: &MetadataStore, record: &Record) {
        let Some(value) = self.selection.begin(db, record, &mut self.acc) else {
            return;
        };

        let hit = record.references().find(|id| {
            db.node(*id)
                .map_or(false, |n| self.selection.is_region(db, n.attribute()))
        });

        if let Some(node) = hit {
            self.acc.total_reg += value;
            let path = self.selection.path(db, node);
            *self.acc.regions.entry(path).or_default() += value;
        }
    }

    fn result(&self) -> RegionProfileResult {
        self.acc.clone()
    }
}
