//! snapagg - snapshot aggregation over a shared context tree
//!
//! Performance measurement produces a stream of small snapshot records. Each
//! record references nodes of a context tree (call paths, phases, loop
//! iterations) and carries immediate measurements. This library:
//! - interns context nodes into one tree shared by all threads
//! - groups records by a configurable key and reduces them with statistical
//!   kernels (count, sum, min/max, avg, variance, ratios, percentages)
//! - propagates inclusive metrics up the context hierarchy
//! - merges partial aggregations through self-describing output records
//! - projects records onto flat or nested region profiles
//!
//! ```text
//!  ┌────────────┐   records   ┌────────────┐  flush   ┌──────────────┐
//!  │  producer  │ ──────────▶ │ Aggregator │ ───────▶ │ output rows  │
//!  └────────────┘             └────────────┘          └──────────────┘
//!        │                          │                        │
//!        └──────── MetadataStore (attributes + context tree) ┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod error;
pub mod metadata;
pub mod record;
pub mod types;
pub mod value;

/// Grouping, reduction kernels, inclusive propagation and merge
pub mod aggregation;

/// Flat and nested region profiles
pub mod profile;

/// Configuration management with TOML support
pub mod config;

/// Tracing subscriber setup
pub mod logging;

// Re-export main types
pub use aggregation::{Aggregator, KeyPolicy, KeySpec, OpSpec, QuerySpec};
pub use config::Config;
pub use error::{Error, Result};
pub use metadata::{IdMap, MetadataStore};
pub use profile::{RegionProfile, RegionProfileResult};
pub use record::{Entry, Record};
pub use types::{AttributeId, AttributeProperties, NodeId, ValueType};
pub use value::Value;
