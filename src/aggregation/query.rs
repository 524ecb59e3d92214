//! Structured query specification
//!
//! The aggregator consumes a fixed, small query surface: a key selection and
//! a list of named kernel ops with positional inputs and numeric arguments.
//! No text is parsed here; callers (or a TOML config file) build the spec.
//!
//! ```text
//! ┌───────────────────────────────────────────────┐
//! │ QuerySpec                                     │
//! │   key: default | none | { list = [names] }    │
//! │   ops: [ { kernel, attributes, args } ... ]   │
//! └───────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust
//! use snapagg::aggregation::{KeySpec, QuerySpec};
//!
//! let spec = QuerySpec::builder()
//!     .key(KeySpec::list(&["function"]))
//!     .op("count", &[], &[])
//!     .op("ratio", &["bytes", "time"], &[1000.0])
//!     .build();
//!
//! assert_eq!(spec.ops.len(), 2);
//! assert!(spec.validate().is_empty());
//! ```

use serde::{Deserialize, Serialize};

use crate::error::SpecError;

use super::kernel::KernelOp;

/// Selection of the aggregation key
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeySpec {
    /// All eligible attributes of the record, as decided by the key policy
    #[default]
    Default,
    /// Exactly the named attributes
    List(Vec<String>),
    /// The empty key: one global bucket
    None,
}

impl KeySpec {
    /// Build a list key from attribute names
    pub fn list(names: &[&str]) -> Self {
        KeySpec::List(names.iter().map(|s| s.to_string()).collect())
    }
}

/// One aggregation op: a kernel name with its inputs and arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpSpec {
    /// Kernel name, e.g. `sum` or `inclusive_ratio`
    pub kernel: String,

    /// Input attribute names
    #[serde(default)]
    pub attributes: Vec<String>,

    /// Numeric literal arguments
    #[serde(default)]
    pub args: Vec<f64>,
}

impl OpSpec {
    /// Create an op spec
    pub fn new(kernel: &str, attributes: &[&str], args: &[f64]) -> Self {
        Self {
            kernel: kernel.to_string(),
            attributes: attributes.iter().map(|s| s.to_string()).collect(),
            args: args.to_vec(),
        }
    }
}

/// A complete aggregation query
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct QuerySpec {
    /// Key selection
    #[serde(default)]
    pub key: KeySpec,

    /// Aggregation ops
    #[serde(default)]
    pub ops: Vec<OpSpec>,
}

impl QuerySpec {
    /// Create a spec from its parts
    pub fn new(key: KeySpec, ops: Vec<OpSpec>) -> Self {
        Self { key, ops }
    }

    /// Start a builder
    pub fn builder() -> QuerySpecBuilder {
        QuerySpecBuilder::default()
    }

    /// Check every op and the key list, returning all problems found
    pub fn validate(&self) -> Vec<SpecError> {
        let mut errors: Vec<SpecError> = self
            .ops
            .iter()
            .filter_map(|op| KernelOp::from_spec(op).err())
            .collect();

        if let KeySpec::List(names) = &self.key {
            if names.iter().any(|n| n.is_empty()) {
                errors.push(SpecError::EmptyAttributeName("key list".to_string()));
            }
        }

        errors
    }
}

/// Builder for [`QuerySpec`]
#[derive(Debug, Default)]
pub struct QuerySpecBuilder {
    key: KeySpec,
    ops: Vec<OpSpec>,
}

impl QuerySpecBuilder {
    /// Set the key selection
    pub fn key(mut self, key: KeySpec) -> Self {
        self.key = key;
        self
    }

    /// Append an op
    pub fn op(mut self, kernel: &str, attributes: &[&str], args: &[f64]) -> Self {
        self.ops.push(OpSpec::new(kernel, attributes, args));
        self
    }

    /// Finish the spec
    pub fn build(self) -> QuerySpec {
        QuerySpec {
            key: self.key,
            ops: self.ops,
        }
    }
}
