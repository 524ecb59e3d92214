//! Nested inclusive region profile
//!
//! Every region prefix of a record's path is credited: a record in `a/b/c`
//! adds to `a`, `a/b` and `a/b/c`. Only the first reference entry that has a
//! region path is used.

use crate::metadata::MetadataStore;
use crate::record::Record;

use super::{RegionProfile, RegionProfileResult, Selection};

/// Metric sum per region path, inclusive of nested paths
#[derive(Debug, Clone)]
pub struct NestedInclusiveRegionProfile {
    selection: Selection,
    acc: RegionProfileResult,
}

impl NestedInclusiveRegionProfile {
    /// Profile `metric` over `region`, or over all nested attributes
    pub fn new(metric: &str, region: Option<&str>) -> Self {
        Self {
            selection: Selection::new(metric, region),
            acc: RegionProfileResult::default(),
        }
    }
}

impl RegionProfile for NestedInclusiveRegionProfile {
    fn process(&mut self, db: &MetadataStore, record: &Record) {
        let Some(value) = self.selection.begin(db, record, &mut self.acc) else {
            return;
        };

        for id in record.references() {
            let mut names: Vec<String> = db
                .parent_chain(id)
                .filter(|n| self.selection.is_region(db, n.attribute()))
                .map(|n| n.value().to_string())
                .collect();
            if names.is_empty() {
                continue;
            }
            names.reverse();

            let mut path = String::new();
            for name in names {
                if !path.is_empty() {
                    path.push('/');
                }
                path.push_str(&name);
                *self.acc.regions.entry(path.clone()).or_default() += value;
            }

            self.acc.total_reg += value;
            break;
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
    fn test_every_prefix_is_credited() {
        let db = MetadataStore::new();
        let func = db
            .create_attribute("function", ValueType::String, AttributeProperties::NESTED)
            .unwrap()
            .id();
        let time = db
            .create_attribute("time", ValueType::Int, AttributeProperties::AS_VALUE)
            .unwrap()
            .id();
        let (a, b) = (Value::from("a"), Value::from("b"));
        let node = db.intern_path([(func, &a), (func, &b)]).unwrap();

        let mut profile = NestedInclusiveRegionProfile::new("time", Some("function"));
        profile.process(&db, &Record::new().with_reference(node).with_immediate(time, 5i64));
        profile.process(&db, &Record::new().with_immediate(time, 1i64));

        let result = profile.result();
        assert_eq!(result.region("a"), 5.0);
        assert_eq!(result.region("a/b"), 5.0);
        assert_eq!(result.total_reg, 5.0);
        assert_eq!(result.total, 6.0);
    }
}
