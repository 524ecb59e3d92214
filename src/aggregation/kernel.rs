//! Aggregation kernels
//!
//! Every op of a query resolves to a [`KernelKind`] once, when the aggregator
//! is built. Per record the kernel extracts a [`Contribution`] and folds it
//! into a per-bucket [`State`]; on flush it emits its outputs as immediate
//! entries.
//!
//! ```text
//!   record ──▶ contribution ──▶ own bucket state
//!                   │
//!                   └─ inclusive, raw input only
//!                        ──▶ every ancestor bucket state
//!
//!   flush: state ──▶ (output attribute, value) entries
//! ```
//!
//! # Self-describing merge
//!
//! Kernels recognise their own output attributes on incoming records and fold
//! those values verbatim instead of reading the raw input. Outputs needed to
//! merge correctly but not meant for display (running sums and counts behind
//! averages, ratios and percentages) are emitted under hidden attributes.
//! Pre-aggregated inclusive values only update the bucket they arrive in;
//! their ancestors receive their own pre-aggregated values.
//!
//! | kernel                    | outputs                                            |
//! |---------------------------|----------------------------------------------------|
//! | `count`                   | `count`                                            |
//! | `scale_count(f)`          | `scount`                                           |
//! | `sum(x)`                  | `sum#x`                                            |
//! | `min(x)` / `max(x)`       | `min#x` / `max#x`                                  |
//! | `any(x)`                  | `any#x`                                            |
//! | `avg(x)`                  | `avg#x`, `avg.sum#x`*, `avg.count#x`*              |
//! | `variance(x)`             | `variance#x`, `var.sum#x`*, `var.sqsum#x`*, `var.count#x`* |
//! | `scale(x, f)`             | `scale#x`                                          |
//! | `ratio(x, y, f)`          | `ratio#x/y`, `ratio.num#x/y`*, `ratio.den#x/y`*    |
//! | `percent_total(x)`        | `percent_total#x`, `pct.sum#x`*                    |
//! | `inclusive_sum(x)`        | `inclusive#x`                                      |
//! | `inclusive_scale(x, f)`   | `iscale#x`                                         |
//! | `inclusive_ratio(x, y, f)`| `iratio#x/y`, `iratio.num#x/y`*, `iratio.den#x/y`* |
//! | `inclusive_percent_total(x)` | `ipercent_total#x`, `ipct.sum#x`*, `ipct.isum#x`* |
//!
//! `*` hidden attribute.

use std::fmt;

use crate::error::{MetadataError, SpecError};
use crate::metadata::MetadataStore;
use crate::record::{Entry, Record};
use crate::types::{AttributeId, AttributeProperties, ValueType};
use crate::value::Value;

use super::query::OpSpec;

// ============================================================================
// Kernel kinds
// ============================================================================

/// The closed set of reduction kernels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelKind {
    /// Number of records
    Count,
    /// Number of records times a factor
    ScaleCount,
    /// Running sum
    Sum,
    /// Running minimum
    Min,
    /// Running maximum
    Max,
    /// Running mean
    Avg,
    /// First value seen
    Any,
    /// Population variance
    Variance,
    /// Running sum of `x * f`
    Scale,
    /// `f * sum(x) / sum(y)`
    Ratio,
    /// Share of the flush-wide sum, in percent
    PercentTotal,
    /// Sum propagated to ancestor contexts
    InclusiveSum,
    /// Scaled sum propagated to ancestor contexts
    InclusiveScale,
    /// Ratio of sums propagated to ancestor contexts
    InclusiveRatio,
    /// Inclusive share of the flush-wide exclusive sum, in percent
    InclusivePercentTotal,
}

impl KernelKind {
    /// Every kernel, in lookup order
    pub const ALL: [KernelKind; 15] = [
        KernelKind::Count,
        KernelKind::ScaleCount,
        KernelKind::Sum,
        KernelKind::Min,
        KernelKind::Max,
        KernelKind::Avg,
        KernelKind::Any,
        KernelKind::Variance,
        KernelKind::Scale,
        KernelKind::Ratio,
        KernelKind::PercentTotal,
        KernelKind::InclusiveSum,
        KernelKind::InclusiveScale,
        KernelKind::InclusiveRatio,
        KernelKind::InclusivePercentTotal,
    ];

    /// Kernel name as used in query specs
    pub fn name(self) -> &'static str {
        match self {
            KernelKind::Count => "count",
            KernelKind::ScaleCount => "scale_count",
            KernelKind::Sum => "sum",
            KernelKind::Min => "min",
            KernelKind::Max => "max",
            KernelKind::Avg => "avg",
            KernelKind::Any => "any",
            KernelKind::Variance => "variance",
            KernelKind::Scale => "scale",
            KernelKind::Ratio => "ratio",
            KernelKind::PercentTotal => "percent_total",
            KernelKind::InclusiveSum => "inclusive_sum",
            KernelKind::InclusiveScale => "inclusive_scale",
            KernelKind::InclusiveRatio => "inclusive_ratio",
            KernelKind::InclusivePercentTotal => "inclusive_percent_total",
        }
    }

    /// Look up a kernel by name
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    /// Number of input attributes
    pub fn input_arity(self) -> usize {
        match self {
            KernelKind::Count | KernelKind::ScaleCount => 0,
            KernelKind::Ratio | KernelKind::InclusiveRatio => 2,
            _ => 1,
        }
    }

    /// Allowed number of numeric arguments, inclusive bounds
    pub fn arg_bounds(self) -> (usize, usize) {
        match self {
            KernelKind::ScaleCount | KernelKind::Scale | KernelKind::InclusiveScale => (1, 1),
            KernelKind::Ratio | KernelKind::InclusiveRatio => (0, 1),
            _ => (0, 0),
        }
    }

    /// Whether raw contributions propagate to ancestor buckets
    pub fn is_inclusive(self) -> bool {
        matches!(
            self,
            KernelKind::InclusiveSum
                | KernelKind::InclusiveScale
                | KernelKind::InclusiveRatio
                | KernelKind::InclusivePercentTotal
        )
    }

    /// Whether finalization needs the flush-wide total
    pub fn needs_total(self) -> bool {
        matches!(
            self,
            KernelKind::PercentTotal | KernelKind::InclusivePercentTotal
        )
    }
}

impl fmt::Display for KernelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Outputs
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputType {
    /// Same type as the first input attribute
    Input,
    Double,
    UInt,
}

#[derive(Debug, Clone)]
struct OutputSpec {
    name: String,
    hidden: bool,
    ty: OutputType,
}

impl OutputSpec {
    fn visible(name: String, ty: OutputType) -> Self {
        Self {
            name,
            hidden: false,
            ty,
        }
    }

    fn hidden(name: String, ty: OutputType) -> Self {
        Self {
            name,
            hidden: true,
            ty,
        }
    }

    fn properties(&self) -> AttributeProperties {
        let props = AttributeProperties::AS_VALUE | AttributeProperties::SKIP_EVENTS;
        if self.hidden {
            props | AttributeProperties::HIDDEN
        } else {
            props
        }
    }

    fn value_type(&self, input: Option<ValueType>) -> ValueType {
        match self.ty {
            OutputType::Double => ValueType::Double,
            OutputType::UInt => ValueType::UInt,
            OutputType::Input => input.unwrap_or(ValueType::Double),
        }
    }
}

fn output_specs(kind: KernelKind, inputs: &[String]) -> Vec<OutputSpec> {
    use OutputType::*;

    let x = inputs.first().map(String::as_str).unwrap_or_default();
    let xy = inputs.join("/");

    match kind {
        KernelKind::Count => vec![OutputSpec::visible("count".to_string(), UInt)],
        KernelKind::ScaleCount => vec![OutputSpec::visible("scount".to_string(), Double)],
        KernelKind::Sum => vec![OutputSpec::visible(format!("sum#{}", x), Input)],
        KernelKind::Min => vec![OutputSpec::visible(format!("min#{}", x), Input)],
        KernelKind::Max => vec![OutputSpec::visible(format!("max#{}", x), Input)],
        KernelKind::Any => vec![OutputSpec::visible(format!("any#{}", x), Input)],
        KernelKind::Avg => vec![
            OutputSpec::visible(format!("avg#{}", x), Double),
            OutputSpec::hidden(format!("avg.sum#{}", x), Double),
            OutputSpec::hidden(format!("avg.count#{}", x), UInt),
        ],
        KernelKind::Variance => vec![
            OutputSpec::visible(format!("variance#{}", x), Double),
            OutputSpec::hidden(format!("var.sum#{}", x), Double),
            OutputSpec::hidden(format!("var.sqsum#{}", x), Double),
            OutputSpec::hidden(format!("var.count#{}", x), UInt),
        ],
        KernelKind::Scale => vec![OutputSpec::visible(format!("scale#{}", x), Double)],
        KernelKind::Ratio => vec![
            OutputSpec::visible(format!("ratio#{}", xy), Double),
            OutputSpec::hidden(format!("ratio.num#{}", xy), Double),
            OutputSpec::hidden(format!("ratio.den#{}", xy), Double),
        ],
        KernelKind::PercentTotal => vec![
            OutputSpec::visible(format!("percent_total#{}", x), Double),
            OutputSpec::hidden(format!("pct.sum#{}", x), Double),
        ],
        KernelKind::InclusiveSum => vec![OutputSpec::visible(format!("inclusive#{}", x), Input)],
        KernelKind::InclusiveScale => vec![OutputSpec::visible(format!("iscale#{}", x), Double)],
        KernelKind::InclusiveRatio => vec![
            OutputSpec::visible(format!("iratio#{}", xy), Double),
            OutputSpec::hidden(format!("iratio.num#{}", xy), Double),
            OutputSpec::hidden(format!("iratio.den#{}", xy), Double),
        ],
        KernelKind::InclusivePercentTotal => vec![
            OutputSpec::visible(format!("ipercent_total#{}", x), Double),
            OutputSpec::hidden(format!("ipct.sum#{}", x), Double),
            OutputSpec::hidden(format!("ipct.isum#{}", x), Double),
        ],
    }
}

// ============================================================================
// Contributions and state
// ============================================================================

/// What one record feeds into a kernel
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Input {
    Count(u64),
    Value(Value),
    Real(f64),
    Moments { sum: f64, sqsum: f64, count: u64 },
    Pair { num: f64, den: f64 },
    Share { exclusive: f64, inclusive: f64 },
}

/// A record's contribution to its own bucket and, for raw inclusive input,
/// to every ancestor bucket
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Contribution {
    pub(crate) own: Input,
    pub(crate) ancestors: Option<Input>,
}

impl Contribution {
    fn own(input: Input) -> Self {
        Self {
            own: input,
            ancestors: None,
        }
    }

    fn propagated(input: Input) -> Self {
        Self {
            ancestors: Some(input.clone()),
            own: input,
        }
    }
}

/// Per-bucket accumulator of one kernel
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum State {
    Count(u64),
    Sum(Option<Value>),
    Min(Option<Value>),
    Max(Option<Value>),
    Any(Option<Value>),
    Real(Option<f64>),
    Moments { sum: f64, sqsum: f64, count: u64 },
    Pair(Option<(f64, f64)>),
    Share { exclusive: f64, inclusive: f64 },
}

impl State {
    fn new(kind: KernelKind) -> Self {
        match kind {
            KernelKind::Count => State::Count(0),
            KernelKind::Sum | KernelKind::InclusiveSum => State::Sum(None),
            KernelKind::Min => State::Min(None),
            KernelKind::Max => State::Max(None),
            KernelKind::Any => State::Any(None),
            KernelKind::ScaleCount
            | KernelKind::Scale
            | KernelKind::InclusiveScale
            | KernelKind::PercentTotal => State::Real(None),
            KernelKind::Avg | KernelKind::Variance => State::Moments {
                sum: 0.0,
                sqsum: 0.0,
                count: 0,
            },
            KernelKind::Ratio | KernelKind::InclusiveRatio => State::Pair(None),
            KernelKind::InclusivePercentTotal => State::Share {
                exclusive: 0.0,
                inclusive: 0.0,
            },
        }
    }

    /// Fold one input into the state
    pub(crate) fn apply(&mut self, input: &Input) {
        match (self, input) {
            (State::Count(n), Input::Count(k)) => *n += k,
            (State::Sum(acc), Input::Value(v)) => {
                *acc = Some(match acc.take() {
                    Some(old) => add_values(&old, v),
                    None => v.clone(),
                })
            },
            (State::Min(acc), Input::Value(v)) => {
                if acc.as_ref().map_or(true, |old| less(v, old)) {
                    *acc = Some(v.clone());
                }
            },
            (State::Max(acc), Input::Value(v)) => {
                if acc.as_ref().map_or(true, |old| less(old, v)) {
                    *acc = Some(v.clone());
                }
            },
            (State::Any(acc), Input::Value(v)) => {
                if acc.is_none() {
                    *acc = Some(v.clone());
                }
            },
            (State::Real(acc), Input::Real(x)) => *acc = Some(acc.unwrap_or(0.0) + x),
            (
                State::Moments { sum, sqsum, count },
                Input::Moments {
                    sum: s,
                    sqsum: sq,
                    count: c,
                },
            ) => {
                *sum += s;
                *sqsum += sq;
                *count += c;
            },
            (State::Pair(acc), Input::Pair { num, den }) => {
                let (n, d) = acc.unwrap_or((0.0, 0.0));
                *acc = Some((n + num, d + den));
            },
            (
                State::Share {
                    exclusive,
                    inclusive,
                },
                Input::Share {
                    exclusive: e,
                    inclusive: i,
                },
            ) => {
                *exclusive += e;
                *inclusive += i;
            },
            // Kinds and inputs are paired by construction
            _ => {},
        }
    }
}

/// Sum keeping integer types where both sides are integers
fn add_values(a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Value::Int(x.wrapping_add(*y)),
        (Value::UInt(x), Value::UInt(y)) => Value::UInt(x.wrapping_add(*y)),
        (Value::Int(x), Value::UInt(y)) | (Value::UInt(y), Value::Int(x)) => {
            Value::Int(x.wrapping_add(*y as i64))
        },
        _ => Value::Double(a.to_f64().unwrap_or(0.0) + b.to_f64().unwrap_or(0.0)),
    }
}

/// Numeric comparison across numeric types, value order otherwise
fn less(a: &Value, b: &Value) -> bool {
    let (ta, tb) = (a.value_type(), b.value_type());
    if ta != tb && ta.is_numeric() && tb.is_numeric() {
        if let (Some(x), Some(y)) = (a.to_f64(), b.to_f64()) {
            return x < y;
        }
    }
    a < b
}

// ============================================================================
// Kernel op
// ============================================================================

/// A resolved aggregation op
///
/// Input and output attributes bind lazily against the metadata store: an
/// input may only be registered after the aggregator is built. Outputs are
/// created once and cached.
#[derive(Debug, Clone)]
pub struct KernelOp {
    kind: KernelKind,
    inputs: Vec<String>,
    factor: f64,
    outputs: Vec<OutputSpec>,
    input_ids: Vec<Option<AttributeId>>,
    output_ids: Option<Vec<AttributeId>>,
}

impl KernelOp {
    /// Resolve an op spec, checking kernel name, arity and arguments
    pub fn from_spec(spec: &OpSpec) -> Result<Self, SpecError> {
        let kind = KernelKind::from_name(&spec.kernel)
            .ok_or_else(|| SpecError::UnknownKernel(spec.kernel.clone()))?;

        if spec.attributes.len() != kind.input_arity() {
            return Err(SpecError::WrongArity {
                kernel: spec.kernel.clone(),
                expected: kind.input_arity(),
                actual: spec.attributes.len(),
            });
        }
        if spec.attributes.iter().any(|a| a.is_empty()) {
            return Err(SpecError::EmptyAttributeName(spec.kernel.clone()));
        }

        let (min, max) = kind.arg_bounds();
        if spec.args.len() < min || spec.args.len() > max {
            return Err(SpecError::WrongArgumentCount {
                kernel: spec.kernel.clone(),
                min,
                max,
                actual: spec.args.len(),
            });
        }
        if let Some(&bad) = spec.args.iter().find(|a| !a.is_finite()) {
            return Err(SpecError::InvalidArgument {
                kernel: spec.kernel.clone(),
                value: bad,
            });
        }

        Ok(Self {
            kind,
            inputs: spec.attributes.clone(),
            factor: spec.args.first().copied().unwrap_or(1.0),
            outputs: output_specs(kind, &spec.attributes),
            input_ids: vec![None; spec.attributes.len()],
            output_ids: None,
        })
    }

    /// Kernel kind
    pub fn kind(&self) -> KernelKind {
        self.kind
    }

    /// Input attribute names
    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    /// Numeric factor (1 when not given)
    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// Name of the visible output attribute
    pub fn output_name(&self) -> &str {
        &self.outputs[0].name
    }

    /// Names of all output attributes, hidden ones included
    pub fn output_names(&self) -> impl Iterator<Item = &str> {
        self.outputs.iter().map(|o| o.name.as_str())
    }

    /// Whether output attributes have been resolved
    pub fn is_bound(&self) -> bool {
        self.output_ids.is_some()
    }

    /// Resolve input and output attributes against the store
    ///
    /// Outputs are created once every input is known, so typed outputs can
    /// take the input's type. Before that, outputs already registered by a
    /// producer (e.g. a merged aggregator) are picked up by name.
    pub(crate) fn bind(&mut self, db: &MetadataStore) -> Result<(), MetadataError> {
        for (slot, name) in self.input_ids.iter_mut().zip(&self.inputs) {
            if slot.is_none() {
                *slot = db.get_attribute(name).map(|a| a.id());
            }
        }

        if self.output_ids.is_some() {
            return Ok(());
        }

        if self.input_ids.iter().all(Option::is_some) {
            let input_type = self
                .input_ids
                .first()
                .copied()
                .flatten()
                .and_then(|id| db.attribute(id))
                .map(|a| a.value_type());
            let ids = self
                .outputs
                .iter()
                .map(|o| {
                    db.create_attribute(&o.name, o.value_type(input_type), o.properties())
                        .map(|a| a.id())
                })
                .collect::<Result<Vec<_>, _>>()?;
            self.output_ids = Some(ids);
        } else {
            self.output_ids = self
                .outputs
                .iter()
                .map(|o| db.get_attribute(&o.name).map(|a| a.id()))
                .collect();
        }

        Ok(())
    }

    /// Fresh accumulator for a new bucket
    pub(crate) fn new_state(&self) -> State {
        State::new(self.kind)
    }

    /// Extract this record's contribution, if any
    pub(crate) fn contribution(&self, db: &MetadataStore, record: &Record) -> Option<Contribution> {
        let outputs = self.output_ids.as_deref();
        let pre = |slot: usize| outputs.and_then(|ids| record.immediate(ids[slot]));
        let pre_f64 = |slot: usize| pre(slot).and_then(Value::to_f64);
        let raw = |slot: usize| self.input_ids[slot].and_then(|id| record.get(db, id));
        let raw_f64 = |slot: usize| raw(slot).and_then(|v| v.to_f64());
        let numeric = |v: Value| v.to_f64().map(|_| v);

        match self.kind {
            KernelKind::Count => {
                let n = pre(0).and_then(Value::to_u64).unwrap_or(1);
                Some(Contribution::own(Input::Count(n)))
            },
            KernelKind::ScaleCount => {
                let x = pre_f64(0).unwrap_or(self.factor);
                Some(Contribution::own(Input::Real(x)))
            },
            KernelKind::Sum => pre(0)
                .cloned()
                .or_else(|| raw(0))
                .and_then(numeric)
                .map(|v| Contribution::own(Input::Value(v))),
            KernelKind::Min | KernelKind::Max | KernelKind::Any => pre(0)
                .cloned()
                .or_else(|| raw(0))
                .filter(|v| !v.is_empty())
                .map(|v| Contribution::own(Input::Value(v))),
            KernelKind::Avg => match (pre_f64(1), pre(2).and_then(Value::to_u64)) {
                (Some(sum), Some(count)) => Some(Contribution::own(Input::Moments {
                    sum,
                    sqsum: 0.0,
                    count,
                })),
                _ => raw_f64(0).map(|x| {
                    Contribution::own(Input::Moments {
                        sum: x,
                        sqsum: x * x,
                        count: 1,
                    })
                }),
            },
            KernelKind::Variance => {
                match (pre_f64(1), pre_f64(2), pre(3).and_then(Value::to_u64)) {
                    (Some(sum), Some(sqsum), Some(count)) => {
                        Some(Contribution::own(Input::Moments { sum, sqsum, count }))
                    },
                    _ => raw_f64(0).map(|x| {
                        Contribution::own(Input::Moments {
                            sum: x,
                            sqsum: x * x,
                            count: 1,
                        })
                    }),
                }
            },
            KernelKind::Scale => pre_f64(0)
                .or_else(|| raw_f64(0).map(|x| x * self.factor))
                .map(|x| Contribution::own(Input::Real(x))),
            KernelKind::PercentTotal => pre_f64(1)
                .or_else(|| raw_f64(0))
                .map(|x| Contribution::own(Input::Real(x))),
            KernelKind::Ratio => match (pre_f64(1), pre_f64(2)) {
                (Some(num), Some(den)) => Some(Contribution::own(Input::Pair { num, den })),
                _ => self.raw_pair(&raw_f64).map(Contribution::own),
            },
            KernelKind::InclusiveSum => match pre(0).cloned().and_then(numeric) {
                Some(v) => Some(Contribution::own(Input::Value(v))),
                None => raw(0)
                    .and_then(numeric)
                    .map(|v| Contribution::propagated(Input::Value(v))),
            },
            KernelKind::InclusiveScale => match pre_f64(0) {
                Some(x) => Some(Contribution::own(Input::Real(x))),
                None => raw_f64(0).map(|x| Contribution::propagated(Input::Real(x * self.factor))),
            },
            KernelKind::InclusiveRatio => match (pre_f64(1), pre_f64(2)) {
                (Some(num), Some(den)) => Some(Contribution::own(Input::Pair { num, den })),
                _ => self.raw_pair(&raw_f64).map(Contribution::propagated),
            },
            KernelKind::InclusivePercentTotal => match (pre_f64(1), pre_f64(2)) {
                (Some(exclusive), Some(inclusive)) => Some(Contribution::own(Input::Share {
                    exclusive,
                    inclusive,
                })),
                _ => raw_f64(0).map(|x| Contribution {
                    own: Input::Share {
                        exclusive: x,
                        inclusive: x,
                    },
                    ancestors: Some(Input::Share {
                        exclusive: 0.0,
                        inclusive: x,
                    }),
                }),
            },
        }
    }

    fn raw_pair(&self, raw_f64: &dyn Fn(usize) -> Option<f64>) -> Option<Input> {
        match (raw_f64(0), raw_f64(1)) {
            (None, None) => None,
            (num, den) => Some(Input::Pair {
                num: num.unwrap_or(0.0),
                den: den.unwrap_or(0.0),
            }),
        }
    }

    /// This bucket's share of the flush-wide total for percentage kernels
    pub(crate) fn exclusive_share(&self, state: &State) -> f64 {
        match state {
            State::Real(Some(x)) if self.kind == KernelKind::PercentTotal => *x,
            State::Share { exclusive, .. } => *exclusive,
            _ => 0.0,
        }
    }

    /// Append finalized outputs for one bucket
    ///
    /// `total` is the flush-wide exclusive sum for percentage kernels.
    pub(crate) fn emit(&self, state: &State, total: Option<f64>, out: &mut Record) {
        let Some(ids) = self.output_ids.as_deref() else {
            return;
        };
        let mut put = |slot: usize, value: Value| out.push(Entry::Immediate(ids[slot], value));
        let percent = |x: f64| total.filter(|t| *t != 0.0).map(|t| 100.0 * x / t);

        match (self.kind, state) {
            (_, State::Count(n)) => put(0, Value::UInt(*n)),
            (_, State::Sum(Some(v)) | State::Min(Some(v)) | State::Max(Some(v)) | State::Any(Some(v))) => {
                put(0, v.clone())
            },
            (KernelKind::ScaleCount, State::Real(x)) => put(0, Value::Double(x.unwrap_or(0.0))),
            (KernelKind::PercentTotal, State::Real(x)) => {
                if let Some(p) = percent(x.unwrap_or(0.0)) {
                    put(0, Value::Double(p));
                }
                if let Some(x) = x {
                    put(1, Value::Double(*x));
                }
            },
            (_, State::Real(Some(x))) => put(0, Value::Double(*x)),
            (KernelKind::Avg, State::Moments { sum, count, .. }) if *count > 0 => {
                put(0, Value::Double(sum / *count as f64));
                put(1, Value::Double(*sum));
                put(2, Value::UInt(*count));
            },
            (KernelKind::Variance, State::Moments { sum, sqsum, count }) if *count > 0 => {
                let n = *count as f64;
                let mean = sum / n;
                put(0, Value::Double(sqsum / n - mean * mean));
                put(1, Value::Double(*sum));
                put(2, Value::Double(*sqsum));
                put(3, Value::UInt(*count));
            },
            (_, State::Pair(Some((num, den)))) => {
                if *den != 0.0 {
                    put(0, Value::Double(self.factor * num / den));
                }
                put(1, Value::Double(*num));
                put(2, Value::Double(*den));
            },
            (_, State::Share {
                exclusive,
                inclusive,
            }) => {
                if let Some(p) = percent(*inclusive) {
                    put(0, Value::Double(p));
                }
                put(1, Value::Double(*exclusive));
                put(2, Value::Double(*inclusive));
            },
            _ => {},
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(kernel: &str, attrs: &[&str], args: &[f64]) -> KernelOp {
        KernelOp::from_spec(&OpSpec::new(kernel, attrs, args)).unwrap()
    }

    fn store() -> (MetadataStore, AttributeId) {
        let db = MetadataStore::new();
        let val = db
            .create_attribute("val", ValueType::Int, AttributeProperties::AS_VALUE)
            .unwrap()
            .id();
        (db, val)
    }

    fn fold(op: &KernelOp, db: &MetadataStore, records: &[Record]) -> State {
        let mut state = op.new_state();
        for r in records {
            if let Some(c) = op.contribution(db, r) {
                state.apply(&c.own);
            }
        }
        state
    }

    fn emitted(op: &KernelOp, db: &MetadataStore, state: &State, total: Option<f64>) -> Vec<(String, Value)> {
        let mut out = Record::new();
        op.emit(state, total, &mut out);
        out.iter()
            .map(|e| match e {
                Entry::Immediate(attr, v) => (db.attribute(*attr).unwrap().name().to_string(), v.clone()),
                Entry::Reference(_) => unreachable!(),
            })
            .collect()
    }

    #[test]
    fn test_name_lookup_covers_all_kernels() {
        for kind in KernelKind::ALL {
            assert_eq!(KernelKind::from_name(kind.name()), Some(kind));
        }
        assert_eq!(KernelKind::from_name("median"), None);
    }

    #[test]
    fn test_from_spec_validation() {
        let check = |k: &str, a: &[&str], x: &[f64]| KernelOp::from_spec(&OpSpec::new(k, a, x));

        assert!(check("count", &[], &[]).is_ok());
        assert!(matches!(check("nope", &[], &[]), Err(SpecError::UnknownKernel(_))));
        assert!(matches!(check("sum", &[], &[]), Err(SpecError::WrongArity { .. })));
        assert!(matches!(
            check("scale", &["x"], &[]),
            Err(SpecError::WrongArgumentCount { min: 1, max: 1, .. })
        ));
        assert!(matches!(
            check("ratio", &["x", "y"], &[f64::NAN]),
            Err(SpecError::InvalidArgument { .. })
        ));
        assert!(matches!(check("min", &[""], &[]), Err(SpecError::EmptyAttributeName(_))));
        assert_eq!(check("ratio", &["x", "y"], &[]).unwrap().factor(), 1.0);
    }

    #[test]
    fn test_output_names() {
        assert_eq!(op("sum", &["val"], &[]).output_name(), "sum#val");
        assert_eq!(op("inclusive_sum", &["val"], &[]).output_name(), "inclusive#val");
        assert_eq!(op("inclusive_scale", &["val"], &[2.0]).output_name(), "iscale#val");
        assert_eq!(op("ratio", &["x", "y"], &[]).output_name(), "ratio#x/y");
        assert_eq!(op("inclusive_ratio", &["x", "y"], &[]).output_name(), "iratio#x/y");
        assert_eq!(op("scale_count", &[], &[2.5]).output_name(), "scount");
        assert_eq!(
            op("inclusive_percent_total", &["val"], &[]).output_name(),
            "ipercent_total#val"
        );
        assert_eq!(op("avg", &["t"], &[]).output_names().count(), 3);
    }

    #[test]
    fn test_outputs_wait_for_inputs() {
        let db = MetadataStore::new();
        let mut sum = op("sum", &["late"], &[]);
        sum.bind(&db).unwrap();
        assert!(!sum.is_bound());
        assert!(db.get_attribute("sum#late").is_none());

        db.create_attribute("late", ValueType::UInt, AttributeProperties::AS_VALUE)
            .unwrap();
        sum.bind(&db).unwrap();
        assert!(sum.is_bound());

        let out = db.get_attribute("sum#late").unwrap();
        assert_eq!(out.value_type(), ValueType::UInt);
        assert!(out.is_as_value() && out.is_skip_events() && !out.is_hidden());
    }

    #[test]
    fn test_hidden_outputs_are_hidden() {
        let (db, _) = store();
        let mut avg = op("avg", &["val"], &[]);
        avg.bind(&db).unwrap();
        assert!(!db.get_attribute("avg#val").unwrap().is_hidden());
        assert!(db.get_attribute("avg.sum#val").unwrap().is_hidden());
        assert_eq!(
            db.get_attribute("avg.count#val").unwrap().value_type(),
            ValueType::UInt
        );
    }

    #[test]
    fn test_sum_keeps_integer_type() {
        let (db, val) = store();
        let mut sum = op("sum", &["val"], &[]);
        sum.bind(&db).unwrap();

        let records: Vec<Record> = [3i64, 4, 7]
            .iter()
            .map(|v| Record::new().with_immediate(val, *v))
            .collect();
        let state = fold(&sum, &db, &records);
        assert_eq!(state, State::Sum(Some(Value::Int(14))));
        assert_eq!(
            emitted(&sum, &db, &state, None),
            vec![("sum#val".to_string(), Value::Int(14))]
        );
    }

    #[test]
    fn test_missing_input_is_ignored() {
        let (db, _) = store();
        let mut min = op("min", &["val"], &[]);
        min.bind(&db).unwrap();
        assert!(min.contribution(&db, &Record::new()).is_none());

        let state = fold(&min, &db, &[Record::new()]);
        assert!(emitted(&min, &db, &state, None).is_empty());
    }

    #[test]
    fn test_min_max_any() {
        let (db, val) = store();
        let records: Vec<Record> = [5i64, -2, 9]
            .iter()
            .map(|v| Record::new().with_immediate(val, *v))
            .collect();

        for (kernel, expected) in [("min", -2i64), ("max", 9), ("any", 5)] {
            let mut k = op(kernel, &["val"], &[]);
            k.bind(&db).unwrap();
            let state = fold(&k, &db, &records);
            assert_eq!(
                emitted(&k, &db, &state, None)[0].1,
                Value::Int(expected),
                "{}",
                kernel
            );
        }
    }

    #[test]
    fn test_mixed_numeric_comparison() {
        assert!(less(&Value::Int(-1), &Value::Double(0.5)));
        assert!(less(&Value::UInt(1), &Value::Int(2)));
        assert!(!less(&Value::Double(3.0), &Value::Int(2)));
    }

    #[test]
    fn test_count_folds_incoming_count() {
        let (db, _) = store();
        let mut count = op("count", &[], &[]);
        count.bind(&db).unwrap();
        let count_attr = db.get_attribute("count").unwrap().id();

        let records = vec![
            Record::new(),
            Record::new().with_immediate(count_attr, 5u64),
        ];
        assert_eq!(fold(&count, &db, &records), State::Count(6));
    }

    #[test]
    fn test_ratio_with_factor() {
        let db = MetadataStore::new();
        let x = db
            .create_attribute("x", ValueType::Int, AttributeProperties::AS_VALUE)
            .unwrap()
            .id();
        let y = db
            .create_attribute("y", ValueType::Int, AttributeProperties::AS_VALUE)
            .unwrap()
            .id();
        let mut ratio = op("ratio", &["x", "y"], &[10.0]);
        ratio.bind(&db).unwrap();

        let records = vec![
            Record::new().with_immediate(x, 10i64).with_immediate(y, 20i64),
            Record::new().with_immediate(x, 74i64).with_immediate(y, 22i64),
        ];
        let state = fold(&ratio, &db, &records);
        let out = emitted(&ratio, &db, &state, None);
        assert_eq!(out[0], ("ratio#x/y".to_string(), Value::Double(20.0)));
        assert_eq!(out[1], ("ratio.num#x/y".to_string(), Value::Double(84.0)));
    }

    #[test]
    fn test_ratio_zero_denominator_emits_only_sums() {
        let (db, val) = store();
        db.create_attribute("den", ValueType::Int, AttributeProperties::AS_VALUE)
            .unwrap();
        let mut ratio = op("ratio", &["val", "den"], &[]);
        ratio.bind(&db).unwrap();

        let state = fold(&ratio, &db, &[Record::new().with_immediate(val, 3i64)]);
        let names: Vec<_> = emitted(&ratio, &db, &state, None)
            .into_iter()
            .map(|(n, _)| n)
            .collect();
        assert_eq!(names, vec!["ratio.num#val/den", "ratio.den#val/den"]);
    }

    #[test]
    fn test_inclusive_contribution_propagates_only_raw_input() {
        let (db, val) = store();
        let mut isum = op("inclusive_sum", &["val"], &[]);
        isum.bind(&db).unwrap();
        let out_attr = db.get_attribute("inclusive#val").unwrap().id();

        let raw = isum
            .contribution(&db, &Record::new().with_immediate(val, 7i64))
            .unwrap();
        assert_eq!(raw.ancestors, Some(Input::Value(Value::Int(7))));

        let merged = isum
            .contribution(&db, &Record::new().with_immediate(out_attr, 21i64))
            .unwrap();
        assert_eq!(merged.own, Input::Value(Value::Int(21)));
        assert_eq!(merged.ancestors, None);
    }

    #[test]
    fn test_inclusive_percent_total_ancestors_get_no_exclusive_share() {
        let (db, val) = store();
        let mut ipct = op("inclusive_percent_total", &["val"], &[]);
        ipct.bind(&db).unwrap();

        let c = ipct
            .contribution(&db, &Record::new().with_immediate(val, 4i64))
            .unwrap();
        assert_eq!(
            c.ancestors,
            Some(Input::Share {
                exclusive: 0.0,
                inclusive: 4.0
            })
        );
    }

    #[test]
    fn test_percent_needs_total() {
        let (db, val) = store();
        let mut pct = op("percent_total", &["val"], &[]);
        pct.bind(&db).unwrap();
        let state = fold(&pct, &db, &[Record::new().with_immediate(val, 20i64)]);

        assert_eq!(pct.exclusive_share(&state), 20.0);
        let out = emitted(&pct, &db, &state, Some(80.0));
        assert_eq!(out[0], ("percent_total#val".to_string(), Value::Double(25.0)));

        // Without a total only the hidden running sum is emitted
        let out = emitted(&pct, &db, &state, None);
        assert_eq!(out, vec![("pct.sum#val".to_string(), Value::Double(20.0))]);
    }

    #[test]
    fn test_variance_population() {
        let (db, val) = store();
        let mut var = op("variance", &["val"], &[]);
        var.bind(&db).unwrap();
        let records: Vec<Record> = [2i64, 4, 4, 4, 5, 5, 7, 9]
            .iter()
            .map(|v| Record::new().with_immediate(val, *v))
            .collect();
        let state = fold(&var, &db, &records);
        assert_eq!(emitted(&var, &db, &state, None)[0].1, Value::Double(4.0));
    }
}
