//! Region profiles
//!
//! Region profiles sum one numeric metric per region, for quick "where did
//! the time go" summaries without configuring an aggregator.
//!
//! ```text
//!                 exclusive                 inclusive
//!   flat     first region entry        every region node of
//!            of the record             every chain
//!   nested   first region reference,   every region prefix of the
//!            keyed by its full path    first chain holding a region
//! ```
//!
//! Regions are either the nodes of one named attribute or, when no region
//! attribute is given, every `NESTED` attribute. Records without the metric
//! are ignored; records with it always count towards `total`, and towards
//! `total_reg` when they hit a region.
//!
//! Attribute names resolve against the store on each record until found, so
//! a profile may be built before its attributes exist. While a region name is
//! unresolved, the profile falls back to every `NESTED` attribute.

use std::collections::BTreeMap;

use crate::metadata::MetadataStore;
use crate::record::Record;
use crate::types::{AttributeId, NodeId};

pub mod flat_exclusive;
pub mod flat_inclusive;
pub mod nested_exclusive;
pub mod nested_inclusive;

pub use flat_exclusive::FlatExclusiveRegionProfile;
pub use flat_inclusive::FlatInclusiveRegionProfile;
pub use nested_exclusive::NestedExclusiveRegionProfile;
pub use nested_inclusive::NestedInclusiveRegionProfile;

/// Accumulated profile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegionProfileResult {
    /// Metric sum per region (name or `/`-joined path)
    pub regions: BTreeMap<String, f64>,
    /// Metric sum of records that hit at least one region
    pub total_reg: f64,
    /// Metric sum of all records carrying the metric
    pub total: f64,
}

impl RegionProfileResult {
    /// Value of one region, 0 if absent
    pub fn region(&self, name: &str) -> f64 {
        self.regions.get(name).copied().unwrap_or(0.0)
    }
}

/// A projection of records onto per-region metric sums
pub trait RegionProfile {
    /// Fold one record
    fn process(&mut self, db: &MetadataStore, record: &Record);

    /// Current result
    fn result(&self) -> RegionProfileResult;

    /// Fold a batch of records
    fn process_all<'a, I>(&mut self, db: &MetadataStore, records: I)
    where
        I: IntoIterator<Item = &'a Record>,
        Self: Sized,
    {
        for record in records {
            self.process(db, record);
        }
    }
}

// ============================================================================
// Shared selection
// ============================================================================

/// Metric and region attribute selection shared by all profiles
#[derive(Debug, Clone)]
pub(crate) struct Selection {
    metric_name: String,
    region_name: Option<String>,
    metric: Option<AttributeId>,
    region: Option<AttributeId>,
}

impl Selection {
    pub(crate) fn new(metric: &str, region: Option<&str>) -> Self {
        Self {
            metric_name: metric.to_string(),
            region_name: region.filter(|r| !r.is_empty()).map(String::from),
            metric: None,
            region: None,
        }
    }

    fn resolve(&mut self, db: &MetadataStore) {
        if self.metric.is_none() {
            self.metric = db.get_attribute(&self.metric_name).map(|a| a.id());
        }
        if self.region.is_none() {
            if let Some(name) = &self.region_name {
                self.region = db.get_attribute(name).map(|a| a.id());
            }
        }
    }

    /// Resolve attributes and read the metric of `record`
    ///
    /// Adds the metric to `total`. Non-numeric metrics count as missing.
    pub(crate) fn begin(
        &mut self,
        db: &MetadataStore,
        record: &Record,
        acc: &mut RegionProfileResult,
    ) -> Option<f64> {
        self.resolve(db);
        let metric = self.metric?;
        let value = record
            .iter()
            .find(|e| e.attribute(db) == Some(metric))
            .and_then(|e| e.value(db))
            .and_then(|v| v.to_f64())?;
        acc.total += value;
        Some(value)
    }

    /// Whether nodes or entries of `attribute` are regions
    ///
    /// Until the region name resolves, every nested attribute is a region.
    pub(crate) fn is_region(&self, db: &MetadataStore, attribute: AttributeId) -> bool {
        match self.region {
            Some(region) => region == attribute,
            None => db.attribute(attribute).map_or(false, |a| a.is_nested()),
        }
    }

    /// `/`-joined region path of `node`, root first; empty if no region
    pub(crate) fn path(&self, db: &MetadataStore, node: NodeId) -> String {
        let mut names: Vec<String> = db
            .parent_chain(node)
            .filter(|n| self.is_region(db, n.attribute()))
            .map(|n| n.value().to_string())
            .collect();
        names.reverse();
        names.join("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AttributeProperties, ValueType};
    use crate::value::Value;

    #[test]
    fn test_non_numeric_metric_is_missing() {
        let db = MetadataStore::new();
        let m = db
            .create_attribute("m", ValueType::String, AttributeProperties::AS_VALUE)
            .unwrap()
            .id();
        let mut sel = Selection::new("m", None);
        let mut acc = RegionProfileResult::default();

        assert_eq!(sel.begin(&db, &Record::new().with_immediate(m, "abc"), &mut acc), None);
        assert_eq!(sel.begin(&db, &Record::new().with_immediate(m, "2.5"), &mut acc), Some(2.5));
        assert_eq!(acc.total, 2.5);
    }

    #[test]
    fn test_path_skips_non_region_nodes() {
        let db = MetadataStore::new();
        let reg = db
            .create_attribute("reg", ValueType::String, AttributeProperties::NESTED)
            .unwrap()
            .id();
        let other = db
            .create_attribute("other", ValueType::String, AttributeProperties::DEFAULT)
            .unwrap()
            .id();
        let a = Value::from("a");
        let x = Value::from("x");
        let b = Value::from("b");
        let node = db.intern_path([(reg, &a), (other, &x), (reg, &b)]).unwrap();

        let sel = Selection::new("m", None);
        assert_eq!(sel.path(&db, node), "a/b");
        assert_eq!(Selection::new("m", Some("nope")).path(&db, node), "a/b");

        let mut named = Selection::new("m", Some("other"));
        named.resolve(&db);
        assert_eq!(named.path(&db, node), "x");
    }
}
