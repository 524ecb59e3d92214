//! Snapshot aggregation engine
//!
//! Records are grouped by an [`AggregationKey`] and reduced by a set of
//! kernels chosen through a [`QuerySpec`].
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │             QuerySpec               │
//! │   key selection + kernel op list    │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │            KeySelector              │
//! │  record → (nested path, values)     │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │            BucketStore              │
//! │  key → one state per kernel         │
//! │  inclusive kernels also update the  │
//! │  buckets of every ancestor path     │
//! └─────────────────────────────────────┘
//!                  ↓
//! ┌─────────────────────────────────────┐
//! │              Flush                  │
//! │  one self-describing record/bucket  │
//! └─────────────────────────────────────┘
//! ```
//!
//! Flushed records carry every value needed to continue the aggregation, so
//! partial aggregators (one per thread, say) can be folded together with
//! [`Aggregator::merge_into`].
//!
//! # Example
//!
//! ```rust
//! use snapagg::aggregation::{Aggregator, KeySpec, QuerySpec};
//! use snapagg::{AttributeProperties, MetadataStore, NodeId, Record, Value, ValueType};
//!
//! let db = MetadataStore::new();
//! let func = db
//!     .create_attribute("function", ValueType::String, AttributeProperties::NESTED)
//!     .unwrap();
//! let time = db
//!     .create_attribute("time", ValueType::Int, AttributeProperties::AS_VALUE)
//!     .unwrap();
//! let main = db.intern(func.id(), NodeId::ROOT, Value::from("main")).unwrap();
//!
//! let spec = QuerySpec::builder()
//!     .key(KeySpec::Default)
//!     .op("count", &[], &[])
//!     .op("sum", &["time"], &[])
//!     .build();
//! let mut agg = Aggregator::new(&spec);
//!
//! for t in [3i64, 4] {
//!     let record = Record::new().with_reference(main).with_immediate(time.id(), t);
//!     agg.add(&db, &record).unwrap();
//! }
//!
//! let out: Vec<Record> = agg.flush().collect();
//! let sum = db.get_attribute("sum#time").unwrap();
//! assert_eq!(out.len(), 1);
//! assert_eq!(out[0].immediate(sum.id()), Some(&Value::Int(7)));
//! ```

pub mod aggregator;
pub mod kernel;
pub mod key;
pub mod query;
pub(crate) mod store;

pub use aggregator::{Aggregator, AggregatorStats, AggregatorStatsSnapshot, BatchReport, Flush};
pub use kernel::{KernelKind, KernelOp};
pub use key::{AggregationKey, KeyPolicy, KeySelector};
pub use query::{KeySpec, OpSpec, QuerySpec, QuerySpecBuilder};
