//! Aggregation key derivation
//!
//! A record's key has two parts:
//!
//! ```text
//! AggregationKey
//! ├── path:   Option<NodeId>            selected NESTED context, interned
//! └── values: [(AttributeId, Value)]    everything else, sorted by attribute
//! ```
//!
//! Each reference entry contributes the selected nested nodes of its parent
//! chain as one root-first segment. Segments are sorted, deduplicated and
//! interned as a single path, so `main/solve` and `init/solve` stay distinct
//! while equal contexts always land on the same node. Inclusive kernels walk
//! that node's parent chain to find the ancestor buckets.
//!
//! Non-nested values keep the first occurrence per attribute, in record order
//! (chains nearest node first).

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::MetadataError;
use crate::metadata::{Attribute, MetadataStore};
use crate::record::{Entry, Record};
use crate::types::{AttributeId, NodeId};
use crate::value::Value;

use super::query::KeySpec;

// ============================================================================
// Key
// ============================================================================

/// Canonical grouping key of a bucket
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AggregationKey {
    path: Option<NodeId>,
    values: Vec<(AttributeId, Value)>,
}

impl AggregationKey {
    /// The empty key
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a key; `values` are sorted and deduplicated by attribute
    pub fn new(path: Option<NodeId>, mut values: Vec<(AttributeId, Value)>) -> Self {
        let mut seen = HashSet::with_capacity(values.len());
        values.retain(|(attr, _)| seen.insert(*attr));
        values.sort_by_key(|(attr, _)| *attr);
        Self {
            path: path.filter(|p| !p.is_root()),
            values,
        }
    }

    /// Same values under a different path
    pub fn with_path(&self, path: Option<NodeId>) -> Self {
        Self {
            path: path.filter(|p| !p.is_root()),
            values: self.values.clone(),
        }
    }

    /// Interned nested path, if any
    pub fn path(&self) -> Option<NodeId> {
        self.path
    }

    /// Non-nested `(attribute, value)` pairs, sorted by attribute
    pub fn values(&self) -> &[(AttributeId, Value)] {
        &self.values
    }

    /// Whether this is the empty key
    pub fn is_empty(&self) -> bool {
        self.path.is_none() && self.values.is_empty()
    }

    /// Expand to the flat tuple: path nodes root-first, then values
    pub fn tuple(&self, db: &MetadataStore) -> Vec<(AttributeId, Value)> {
        let mut out: Vec<(AttributeId, Value)> = match self.path {
            Some(path) => db
                .parent_chain(path)
                .map(|n| (n.attribute(), n.value().clone()))
                .collect(),
            None => Vec::new(),
        };
        out.reverse();
        out.extend(self.values.iter().cloned());
        out
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Which attributes the `Default` key selects
///
/// Hidden and skip-events attributes are never selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPolicy {
    /// Only select `NESTED` attributes from reference chains
    #[serde(default)]
    pub nested_only: bool,

    /// Select non-`AS_VALUE` immediate entries
    #[serde(default = "default_include_immediates")]
    pub include_immediates: bool,
}

fn default_include_immediates() -> bool {
    true
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            nested_only: false,
            include_immediates: default_include_immediates(),
        }
    }
}

// ============================================================================
// Selector
// ============================================================================

/// Resolved key selection
#[derive(Debug, Clone)]
pub struct KeySelector {
    spec: KeySpec,
    policy: KeyPolicy,
    list: Vec<Option<AttributeId>>,
}

impl KeySelector {
    /// Create a selector; list names resolve on first use
    pub fn new(spec: KeySpec, policy: KeyPolicy) -> Self {
        let list = match &spec {
            KeySpec::List(names) => vec![None; names.len()],
            _ => Vec::new(),
        };
        Self { spec, policy, list }
    }

    /// Key specification
    pub fn spec(&self) -> &KeySpec {
        &self.spec
    }

    /// Default-key policy
    pub fn policy(&self) -> KeyPolicy {
        self.policy
    }

    /// Resolve still-unknown list names against the store
    pub fn resolve(&mut self, db: &MetadataStore) {
        if let KeySpec::List(names) = &self.spec {
            for (slot, name) in self.list.iter_mut().zip(names) {
                if slot.is_none() {
                    *slot = db.get_attribute(name).map(|a| a.id());
                }
            }
        }
    }

    /// Whether `attribute` is part of the key
    ///
    /// `in_chain` is true for nodes reached through a reference entry.
    pub fn selects(&self, attribute: &Attribute, in_chain: bool) -> bool {
        match &self.spec {
            KeySpec::None => false,
            KeySpec::List(_) => self.list.contains(&Some(attribute.id())),
            KeySpec::Default => {
                if attribute.is_hidden() || attribute.is_skip_events() {
                    return false;
                }
                if in_chain {
                    attribute.is_nested() || !self.policy.nested_only
                } else {
                    self.policy.include_immediates && !attribute.is_as_value()
                }
            },
        }
    }

    /// Derive the key of `record`
    ///
    /// Fails on references to unknown nodes or unknown attributes, before any
    /// state is touched.
    pub fn derive(&self, db: &MetadataStore, record: &Record) -> Result<AggregationKey, MetadataError> {
        if self.spec == KeySpec::None {
            return Ok(AggregationKey::empty());
        }

        let mut segments: Vec<Vec<(AttributeId, Value)>> = Vec::new();
        let mut values: Vec<(AttributeId, Value)> = Vec::new();

        for entry in record {
            match entry {
                Entry::Reference(id) => {
                    db.require_node(*id)?;
                    let mut segment = Vec::new();
                    for node in db.parent_chain(*id) {
                        let attr = db.require_attribute(node.attribute())?;
                        if !self.selects(&attr, true) {
                            continue;
                        }
                        if attr.is_nested() {
                            segment.push((attr.id(), node.value().clone()));
                        } else {
                            values.push((attr.id(), node.value().clone()));
                        }
                    }
                    if !segment.is_empty() {
                        segment.reverse();
                        segments.push(segment);
                    }
                },
                Entry::Immediate(attr_id, value) => {
                    let attr = db.require_attribute(*attr_id)?;
                    if self.selects(&attr, false) {
                        values.push((attr.id(), value.clone()));
                    }
                },
            }
        }

        let path = if segments.is_empty() {
            None
        } else {
            segments.sort();
            segments.dedup();
            Some(db.intern_path(segments.iter().flatten().map(|(a, v)| (*a, v)))?)
        };

        Ok(AggregationKey::new(path, values))
    }
}
