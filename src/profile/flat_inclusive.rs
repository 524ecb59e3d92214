//! Flat inclusive region profile
//!
//! Every region node on every reference chain of a record is credited, so a
//! region's value includes the time spent in everything nested below it.

use crate::metadata::MetadataStore;
use crate::record::Record;

use super::{RegionProfile, RegionProfileResult, Selection};

/// Metric sum per region value, inclusive of nested regions
#[derive(Debug, Clone)]
pub struct FlatInclusiveRegionProfile {
    selection: Selection,
    acc: RegionProfileResult,
}

impl FlatInclusiveRegionProfile {
    /// Profile `metric` over `region`, or over all nested attributes
    pub fn new(metric: &str, region: Option<&str>) -> Self {
        Self {
            selection: Selection::new(metric, region),
            acc: RegionProfileResult::default(),
        }
    }
}

impl RegionProfile for FlatInclusiveRegionProfile {
    fn process(&mut self, db: &MetadataStore, record: &Record) {
        let Some(value) = self.selection.begin(db, record, &mut self.acc) else {
            return;
        };

        let mut hit = false;
        for node in record.references().flat_map(|id| db.parent_chain(id)) {
            if self.selection.is_region(db, node.attribute()) {
                hit = true;
                *self.acc.regions.entry(node.value().to_string()).or_default() += value;
            }
        }

        if hit {
            self.acc.total_reg += value;
        }
    }

    fn result(&self) -> RegionProfileResult {
        self.acc.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeProperties, ValueType};
    use crate::value::Value;

    #[test]
    fn test_recursion_counts_each_level() {
        let db = MetadataStore::new();
        let func = db
            .create_attribute("function", ValueType::String, AttributeProperties::NESTED)
            .unwrap()
            .id();
        let time = db
            .create_attribute("time", ValueType::Int, AttributeProperties::AS_VALUE)
            .unwrap()
            .id();
        let (f, g) = (Value::from("f"), Value::from("g"));
        let node = db.intern_path([(func, &f), (func, &g), (func, &f)]).unwrap();

        let mut profile = FlatInclusiveRegionProfile::new("time", None);
        profile.process(&db, &Record::new().with_reference(node).with_immediate(time, 10i64));

        let result = profile.result();
        assert_eq!(result.region("f"), 20.0);
        assert_eq!(result.region("g"), 10.0);
        assert_eq!(result.total_reg, 10.0);
        assert_eq!(result.total, 10.0);
    }
}
