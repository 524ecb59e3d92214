//! Streaming aggregator
//!
//! ```text
//!   add(record)
//!     ├─ resolve key list names and kernel attributes (lazy)
//!     ├─ derive key ───────────────▶ reject on unknown ids
//!     ├─ per kernel contribution
//!     ├─ own bucket  ◀── every contribution
//!     └─ ancestor buckets of the key path ◀── raw inclusive contributions
//!
//!   flush() ── lazy iterator of records, percentages against
//!              the exclusive total over all buckets
//! ```
//!
//! An aggregator is owned by one thread. Several aggregators may share one
//! [`MetadataStore`] and be combined with [`Aggregator::merge_into`].

use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, warn};

use crate::error::{Error, Result, SpecError};
use crate::metadata::MetadataStore;
use crate::record::Record;

use super::kernel::{Contribution, KernelOp};
use super::key::{AggregationKey, KeyPolicy, KeySelector};
use super::query::QuerySpec;
use super::store::{Bucket, BucketStore};

// ============================================================================
// Statistics
// ============================================================================

/// Aggregator counters
#[derive(Debug, Default)]
pub struct AggregatorStats {
    /// Records folded into buckets
    pub records_added: AtomicU64,

    /// Records rejected during key derivation
    pub records_rejected: AtomicU64,

    /// Buckets created, including propagation targets
    pub buckets_created: AtomicU64,

    /// Ancestor bucket updates from inclusive kernels
    pub propagation_updates: AtomicU64,

    /// Flushes started
    pub flushes: AtomicU64,
}

impl AggregatorStats {
    /// Get a snapshot of current statistics
    pub fn snapshot(&self) -> AggregatorStatsSnapshot {
        AggregatorStatsSnapshot {
            records_added: self.records_added.load(Ordering::Relaxed),
            records_rejected: self.records_rejected.load(Ordering::Relaxed),
            buckets_created: self.buckets_created.load(Ordering::Relaxed),
            propagation_updates: self.propagation_updates.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
        }
    }

    fn reset(&self) {
        self.records_added.store(0, Ordering::Relaxed);
        self.records_rejected.store(0, Ordering::Relaxed);
        self.buckets_created.store(0, Ordering::Relaxed);
        self.propagation_updates.store(0, Ordering::Relaxed);
        self.flushes.store(0, Ordering::Relaxed);
    }
}

/// Snapshot of aggregator statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregatorStatsSnapshot {
    /// Records folded into buckets
    pub records_added: u64,
    /// Records rejected during key derivation
    pub records_rejected: u64,
    /// Buckets created
    pub buckets_created: u64,
    /// Ancestor bucket updates
    pub propagation_updates: u64,
    /// Flushes started
    pub flushes: u64,
}

/// Outcome of folding a batch of records
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Records folded into buckets
    pub added: usize,
    /// Rejected records with their position in the batch
    pub rejected: Vec<(usize, Error)>,
}

impl BatchReport {
    /// Whether every record was folded
    pub fn is_complete(&self) -> bool {
        self.rejected.is_empty()
    }

    fn record(&mut self, position: usize, outcome: Result<()>) {
        match outcome {
            Ok(()) => self.added += 1,
            Err(e) => self.rejected.push((position, e)),
        }
    }
}

// ============================================================================
// Aggregator
// ============================================================================

/// Groups records by key and folds them through the configured kernels
#[derive(Debug)]
pub struct Aggregator {
    selector: KeySelector,
    ops: Vec<KernelOp>,
    spec_errors: Vec<SpecError>,
    store: BucketStore,
    stats: AggregatorStats,
}

impl Aggregator {
    /// Create an aggregator with the default key policy
    pub fn new(spec: &QuerySpec) -> Self {
        Self::with_policy(spec, KeyPolicy::default())
    }

    /// Create an aggregator
    ///
    /// Malformed ops are logged once and skipped; see
    /// [`spec_errors`](Self::spec_errors).
    pub fn with_policy(spec: &QuerySpec, policy: KeyPolicy) -> Self {
        let mut ops = Vec::with_capacity(spec.ops.len());
        let mut spec_errors = Vec::new();

        for op in &spec.ops {
            match KernelOp::from_spec(op) {
                Ok(kernel) => ops.push(kernel),
                Err(e) => {
                    warn!(kernel = %op.kernel, error = %e, "Skipping invalid aggregation op");
                    spec_errors.push(e);
                },
            }
        }

        debug!(
            ops = ops.len(),
            skipped = spec_errors.len(),
            key = ?spec.key,
            "Created aggregator"
        );

        Self {
            selector: KeySelector::new(spec.key.clone(), policy),
            ops,
            spec_errors,
            store: BucketStore::new(),
            stats: AggregatorStats::default(),
        }
    }

    /// Ops rejected at construction
    pub fn spec_errors(&self) -> &[SpecError] {
        &self.spec_errors
    }

    /// Active kernel ops
    pub fn ops(&self) -> &[KernelOp] {
        &self.ops
    }

    /// Key selector
    pub fn key_selector(&self) -> &KeySelector {
        &self.selector
    }

    /// Statistics counters
    pub fn stats(&self) -> &AggregatorStats {
        &self.stats
    }

    /// Number of buckets
    pub fn len(&self) -> usize {
        self.store.len()
    }

    /// Whether no bucket exists
    pub fn is_empty(&self) -> bool {
        self.store.len() == 0
    }

    /// Drop all buckets and reset counters
    pub fn clear(&mut self) {
        self.store.clear();
        self.stats.reset();
    }

    /// Fold one record
    ///
    /// Records referencing unknown nodes or attributes are rejected before
    /// any bucket changes.
    pub fn add(&mut self, db: &MetadataStore, record: &Record) -> Result<()> {
        self.selector.resolve(db);
        for op in &mut self.ops {
            op.bind(db)?;
        }

        let key = match self.selector.derive(db, record) {
            Ok(key) => key,
            Err(e) => {
                self.stats.records_rejected.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, record = %record, "Rejected record");
                return Err(e.into());
            },
        };

        let contributions: Vec<Option<Contribution>> = self
            .ops
            .iter()
            .map(|op| op.contribution(db, record))
            .collect();

        let propagate = contributions
            .iter()
            .flatten()
            .any(|c| c.ancestors.is_some());
        let ancestor_base = if propagate {
            key.path().map(|path| (path, key.clone()))
        } else {
            None
        };

        let ops = &self.ops;
        let init = || ops.iter().map(KernelOp::new_state).collect();

        let (bucket, created) = self.store.get_or_insert(key, init);
        if created {
            self.stats.buckets_created.fetch_add(1, Ordering::Relaxed);
        }
        for (state, c) in bucket.states.iter_mut().zip(&contributions) {
            if let Some(c) = c {
                state.apply(&c.own);
            }
        }

        if let Some((path, key)) = ancestor_base {
            for ancestor in db.parent_chain(path).skip(1) {
                let (bucket, created) = self
                    .store
                    .get_or_insert(key.with_path(Some(ancestor.id())), init);
                if created {
                    self.stats.buckets_created.fetch_add(1, Ordering::Relaxed);
                }
                for (state, c) in bucket.states.iter_mut().zip(&contributions) {
                    if let Some(input) = c.as_ref().and_then(|c| c.ancestors.as_ref()) {
                        state.apply(input);
                    }
                }
                self.stats.propagation_updates.fetch_add(1, Ordering::Relaxed);
            }
        }

        self.stats.records_added.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Fold a batch of records
    ///
    /// A rejected record is skipped and the rest of the batch is still
    /// folded. Rejections are returned with their position in the batch.
    pub fn add_all<'a, I>(&mut self, db: &MetadataStore, records: I) -> BatchReport
    where
        I: IntoIterator<Item = &'a Record>,
    {
        let mut report = BatchReport::default();
        for (i, record) in records.into_iter().enumerate() {
            report.record(i, self.add(db, record));
        }
        report
    }

    /// Emit one record per bucket
    ///
    /// Percentage totals are computed here over all buckets. The aggregator
    /// keeps its state; call [`clear`](Self::clear) to start over.
    pub fn flush(&self) -> Flush<'_> {
        self.stats.flushes.fetch_add(1, Ordering::Relaxed);
        debug!(buckets = self.store.len(), "Flushing aggregator");

        Flush {
            ops: &self.ops,
            totals: self.totals(),
            buckets: self.store.iter(),
        }
    }

    /// Output record of the bucket with `key`, if present
    pub fn bucket(&self, key: &AggregationKey) -> Option<Record> {
        let bucket = self.store.get(key)?;
        Some(render(&self.ops, &self.totals(), bucket))
    }

    /// Exclusive totals over all buckets, for percentage kernels only
    fn totals(&self) -> Vec<Option<f64>> {
        self.ops
            .iter()
            .enumerate()
            .map(|(i, op)| {
                op.kind().needs_total().then(|| {
                    self.store
                        .iter()
                        .map(|b| op.exclusive_share(&b.states[i]))
                        .sum()
                })
            })
            .collect()
    }

    /// Feed every flushed record into `target`
    ///
    /// Rows the target rejects are skipped; the others are still merged.
    pub fn merge_into(&self, db: &MetadataStore, target: &mut Aggregator) -> BatchReport {
        let mut report = BatchReport::default();
        for (i, record) in self.flush().enumerate() {
            report.record(i, target.add(db, &record));
        }
        debug!(
            records = report.added,
            rejected = report.rejected.len(),
            "Merged aggregator"
        );
        report
    }
}

// ============================================================================
// Flush
// ============================================================================

/// Lazy iterator over flushed bucket records
#[derive(Debug)]
pub struct Flush<'a> {
    ops: &'a [KernelOp],
    totals: Vec<Option<f64>>,
    buckets: std::slice::Iter<'a, Bucket>,
}

fn render(ops: &[KernelOp], totals: &[Option<f64>], bucket: &Bucket) -> Record {
    let key = &bucket.key;
    let mut record = Record::with_capacity(1 + key.values().len() + ops.len());

    if let Some(path) = key.path() {
        record.push_reference(path);
    }
    for (attr, value) in key.values() {
        record.push_immediate(*attr, value.clone());
    }
    for ((op, state), total) in ops.iter().zip(&bucket.states).zip(totals) {
        op.emit(state, *total, &mut record);
    }
    record
}

impl Iterator for Flush<'_> {
    type Item = Record;

    fn next(&mut self) -> Option<Record> {
        let bucket = self.buckets.next()?;
        Some(render(self.ops, &self.totals, bucket))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.buckets.size_hint()
    }
}

impl ExactSizeIterator for Flush<'_> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::query::KeySpec;
    use crate::types::{AttributeId, AttributeProperties, ValueType};
    use crate::value::Value;

    fn setup() -> (MetadataStore, AttributeId, AttributeId) {
        let db = MetadataStore::new();
        let region = db
            .create_attribute("region", ValueType::String, AttributeProperties::NESTED)
            .unwrap()
            .id();
        let val = db
            .create_attribute("val", ValueType::Int, AttributeProperties::AS_VALUE)
            .unwrap()
            .id();
        (db, region, val)
    }

    #[test]
    fn test_invalid_ops_are_skipped() {
        let spec = QuerySpec::builder()
            .op("count", &[], &[])
            .op("median", &["val"], &[])
            .build();
        let agg = Aggregator::new(&spec);
        assert_eq!(agg.ops().len(), 1);
        assert_eq!(agg.spec_errors().len(), 1);
    }

    #[test]
    fn test_rejected_record_leaves_state_untouched() {
        let (db, _, val) = setup();
        let spec = QuerySpec::builder().op("count", &[], &[]).build();
        let mut agg = Aggregator::new(&spec);

        let bad = Record::new()
            .with_reference(crate::types::NodeId(77))
            .with_immediate(val, 1i64);
        assert!(agg.add(&db, &bad).is_err());
        assert!(agg.is_empty());

        let stats = agg.stats().snapshot();
        assert_eq!(stats.records_rejected, 1);
        assert_eq!(stats.records_added, 0);
    }

    #[test]
    fn test_propagation_creates_ancestor_buckets() {
        let (db, region, val) = setup();
        let outer = db.intern(region, crate::types::NodeId::ROOT, Value::from("outer")).unwrap();
        let inner = db.intern(region, outer, Value::from("inner")).unwrap();

        let spec = QuerySpec::builder()
            .key(KeySpec::Default)
            .op("inclusive_sum", &["val"], &[])
            .build();
        let mut agg = Aggregator::new(&spec);
        agg.add(&db, &Record::new().with_reference(inner).with_immediate(val, 5i64))
            .unwrap();

        assert_eq!(agg.len(), 2);
        let stats = agg.stats().snapshot();
        assert_eq!(stats.buckets_created, 2);
        assert_eq!(stats.propagation_updates, 1);

        let outer_out = agg.bucket(&AggregationKey::new(Some(outer), Vec::new())).unwrap();
        let inclusive = db.get_attribute("inclusive#val").unwrap().id();
        assert_eq!(outer_out.immediate(inclusive), Some(&Value::Int(5)));
    }

    #[test]
    fn test_batch_skips_rejected_record() {
        let (db, _, val) = setup();
        let spec = QuerySpec::builder()
            .op("count", &[], &[])
            .op("sum", &["val"], &[])
            .build();
        let mut agg = Aggregator::new(&spec);

        let records = vec![
            Record::new().with_immediate(val, 1i64),
            Record::new()
                .with_reference(crate::types::NodeId(999))
                .with_immediate(val, 100i64),
            Record::new().with_immediate(val, 2i64),
            Record::new().with_immediate(val, 3i64),
        ];
        let report = agg.add_all(&db, &records);

        assert_eq!(report.added, 3);
        assert!(!report.is_complete());
        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.rejected[0].0, 1);

        let out: Vec<Record> = agg.flush().collect();
        assert_eq!(out.len(), 1);
        let count = db.get_attribute("count").unwrap().id();
        let sum = db.get_attribute("sum#val").unwrap().id();
        assert_eq!(out[0].immediate(count), Some(&Value::UInt(3)));
        assert_eq!(out[0].immediate(sum), Some(&Value::Int(6)));

        let stats = agg.stats().snapshot();
        assert_eq!(stats.records_added, 3);
        assert_eq!(stats.records_rejected, 1);
    }

    #[test]
    fn test_merge_skips_rows_the_target_rejects() {
        let (db, region, val) = setup();
        let main = db.intern(region, crate::types::NodeId::ROOT, Value::from("main")).unwrap();
        let spec = QuerySpec::builder().op("count", &[], &[]).build();

        let mut source = Aggregator::new(&spec);
        source.add(&db, &Record::new().with_reference(main)).unwrap();
        source.add(&db, &Record::new().with_immediate(val, 1i64)).unwrap();

        // Same attribute ids, but the context tree never saw `main`
        let other = MetadataStore::new();
        other
            .create_attribute("region", ValueType::String, AttributeProperties::NESTED)
            .unwrap();
        other
            .create_attribute("val", ValueType::Int, AttributeProperties::AS_VALUE)
            .unwrap();
        let mut target = Aggregator::new(&spec);
        let report = source.merge_into(&other, &mut target);

        assert_eq!(report.rejected.len(), 1);
        assert_eq!(report.added, 1);
        assert_eq!(target.len(), 1);
    }

    #[test]
    fn test_flush_is_repeatable_and_clear_resets() {
        let (db, _, val) = setup();
        let spec = QuerySpec::builder()
            .key(KeySpec::None)
            .op("sum", &["val"], &[])
            .build();
        let mut agg = Aggregator::new(&spec);
        agg.add(&db, &Record::new().with_immediate(val, 2i64)).unwrap();

        let first: Vec<Record> = agg.flush().collect();
        let second: Vec<Record> = agg.flush().collect();
        assert_eq!(first, second);
        assert_eq!(agg.flush().len(), 1);

        agg.clear();
        assert!(agg.is_empty());
        assert_eq!(agg.flush().count(), 0);
    }
}
