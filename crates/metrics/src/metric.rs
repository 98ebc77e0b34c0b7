//! Metric shapes and value cells.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::atomic::AtomicF64;
use crate::error::{Result, StoreError};

/// Upper bounds used when a histogram declares none.
pub const DEFAULT_BUCKETS: [f64; 4] = [1.0, 2.0, 4.0, 8.0];

/// Metric kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    /// Monotonic non-negative accumulator
    Counter,
    /// Last-set value, may move up or down
    Gauge,
    /// Gauge-like duration measurement
    Timer,
    /// Distribution of observed values
    Histogram,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Counter => "counter",
            Kind::Gauge => "gauge",
            Kind::Timer => "timer",
            Kind::Histogram => "histogram",
        };
        f.write_str(s)
    }
}

/// Numeric representation of a metric's cells.
///
/// An integer metric turns into a float metric the first time it receives a
/// non-integral value; it never turns back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Int,
    Float,
}

/// A numeric value written to or read from a cell.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(x) => x,
        }
    }

    /// Exact integer value, if there is one.
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Number::Int(n) => Some(n),
            Number::Float(x) if x.fract() == 0.0 && x >= i64::MIN as f64 && x < i64::MAX as f64 => {
                Some(x as i64)
            }
            Number::Float(_) => None,
        }
    }

    fn is_negative_or_nan(self) -> bool {
        match self {
            Number::Int(n) => n < 0,
            Number::Float(x) => !(x >= 0.0),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{}", n),
            Number::Float(x) => write!(f, "{}", x),
        }
    }
}

/// Declared shape of a metric.
///
/// Two declarations of the same name are compatible when kind, keys and
/// buckets match.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricDecl {
    /// Store key (the exported name)
    pub name: String,
    pub kind: Kind,
    /// Ordered label keys
    pub keys: Vec<String>,
    pub value_type: ValueType,
    /// Histogram upper bounds, strictly increasing; empty for other kinds
    pub buckets: Vec<f64>,
    /// Excluded from the exported view
    pub hidden: bool,
}

impl MetricDecl {
    /// Unlabelled metric with the kind's default value type and buckets.
    pub fn new(name: impl Into<String>, kind: Kind) -> Self {
        let (value_type, buckets) = match kind {
            Kind::Histogram => (ValueType::Float, DEFAULT_BUCKETS.to_vec()),
            _ => (ValueType::Int, Vec::new()),
        };
        Self {
            name: name.into(),
            kind,
            keys: Vec::new(),
            value_type,
            buckets,
            hidden: false,
        }
    }

    pub fn with_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keys = keys.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_value_type(mut self, value_type: ValueType) -> Self {
        if self.kind != Kind::Histogram {
            self.value_type = value_type;
        }
        self
    }

    pub fn with_buckets(mut self, buckets: Vec<f64>) -> Self {
        self.buckets = buckets;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    /// Check bucket bounds: histograms need at least one finite, strictly
    /// increasing bound; other kinds take none.
    pub fn validate(&self) -> Result<()> {
        let invalid = |message: &str| StoreError::InvalidBuckets {
            name: self.name.clone(),
            message: message.to_string(),
        };

        if self.kind != Kind::Histogram {
            return if self.buckets.is_empty() {
                Ok(())
            } else {
                Err(invalid("only histograms have buckets"))
            };
        }
        if self.buckets.is_empty() {
            return Err(invalid("at least one bucket is required"));
        }
        if self.buckets.iter().any(|b| !b.is_finite()) {
            return Err(invalid("bucket bounds must be finite"));
        }
        if self.buckets.windows(2).any(|w| w[0] >= w[1]) {
            return Err(invalid("bucket bounds must be strictly increasing"));
        }
        Ok(())
    }

    /// Whether `other` describes the same metric shape. The value type is
    /// not part of the shape.
    pub fn same_shape(&self, other: &MetricDecl) -> bool {
        self.kind == other.kind && self.keys == other.keys && self.buckets == other.buckets
    }

    pub(crate) fn shape_string(&self) -> String {
        let mut s = self.kind.to_string();
        if !self.keys.is_empty() {
            s.push_str(&format!(" by {}", self.keys.join(", ")));
        }
        if self.kind == Kind::Histogram {
            let bounds: Vec<String> = self.buckets.iter().map(|b| b.to_string()).collect();
            s.push_str(&format!(" buckets {}", bounds.join(", ")));
        }
        s
    }
}

/// Histogram distribution guarded by a mutex.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct HistogramState {
    /// Per-bucket counts; the last entry is the implicit `+Inf` bucket.
    pub counts: Vec<u64>,
    pub count: u64,
    pub sum: f64,
}

/// One value cell (a metric at a fixed label tuple).
#[derive(Debug)]
pub(crate) enum Cell {
    Int(AtomicI64),
    Float(AtomicF64),
    Histogram(Mutex<HistogramState>),
}

impl Cell {
    fn new(decl: &MetricDecl, float: bool) -> Self {
        match decl.kind {
            Kind::Histogram => Cell::Histogram(Mutex::new(HistogramState {
                counts: vec![0; decl.buckets.len() + 1],
                count: 0,
                sum: 0.0,
            })),
            _ if float => Cell::Float(AtomicF64::new(0.0)),
            _ => Cell::Int(AtomicI64::new(0)),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Write {
    Add,
    Set,
}

impl Write {
    fn name(self) -> &'static str {
        match self {
            Write::Add => "increment",
            Write::Set => "set",
        }
    }
}

/// A declared metric and its lazily created cells.
#[derive(Debug)]
pub struct Metric {
    decl: MetricDecl,
    /// Set once the metric holds floats
    float: AtomicBool,
    cells: DashMap<Vec<String>, Cell>,
}

impl Metric {
    pub(crate) fn new(decl: MetricDecl) -> Self {
        let float = decl.kind == Kind::Histogram || decl.value_type == ValueType::Float;
        Self {
            decl,
            float: AtomicBool::new(float),
            cells: DashMap::new(),
        }
    }

    pub fn decl(&self) -> &MetricDecl {
        &self.decl
    }

    pub fn name(&self) -> &str {
        &self.decl.name
    }

    pub fn kind(&self) -> Kind {
        self.decl.kind
    }

    /// Current value type; starts as declared and may be promoted to float.
    pub fn value_type(&self) -> ValueType {
        if self.is_float() {
            ValueType::Float
        } else {
            ValueType::Int
        }
    }

    fn is_float(&self) -> bool {
        self.float.load(Ordering::Acquire)
    }

    /// Switch the metric to float, converting every integer cell in place.
    pub(crate) fn promote(&self) {
        if self.float.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!(metric = %self.decl.name, "metric promoted to float");
        for mut entry in self.cells.iter_mut() {
            let current = match entry.value() {
                Cell::Int(v) => v.load(Ordering::Acquire),
                _ => continue,
            };
            *entry.value_mut() = Cell::Float(AtomicF64::new(current as f64));
        }
    }

    fn promote_cell(&self, labels: &[String]) {
        if let Some(mut cell) = self.cells.get_mut(labels) {
            let current = match &*cell {
                Cell::Int(v) => v.load(Ordering::Acquire),
                _ => return,
            };
            *cell = Cell::Float(AtomicF64::new(current as f64));
        }
    }

    /// Number of cells created so far.
    pub fn cell_count(&self) -> usize {
        self.cells.len()
    }

    pub(crate) fn increment(&self, labels: &[String], delta: Number) -> Result<()> {
        self.check_labels(labels)?;
        match self.decl.kind {
            Kind::Histogram => return Err(self.wrong_operation("increment")),
            Kind::Counter if delta.is_negative_or_nan() => {
                return Err(StoreError::NegativeIncrement {
                    name: self.decl.name.clone(),
                    delta: delta.as_f64(),
                })
            }
            _ => {}
        }

        self.write(labels, delta, Write::Add)
    }

    pub(crate) fn set(&self, labels: &[String], value: Number) -> Result<()> {
        self.check_labels(labels)?;
        if self.decl.kind == Kind::Histogram {
            return Err(self.wrong_operation("set"));
        }

        self.write(labels, value, Write::Set)
    }

    /// Apply a numeric write. Callers have already validated labels and kind,
    /// so a failed write never leaves a new cell behind.
    fn write(&self, labels: &[String], value: Number, op: Write) -> Result<()> {
        let int = if self.is_float() { None } else { value.as_i64() };
        if int.is_none() {
            self.promote();
        }

        loop {
            let done = self.with_cell(labels, |cell| match (cell, int) {
                (Cell::Int(v), Some(n)) => self.write_int(v, n, op).map(|()| true),
                // Created by a writer that had not yet seen the promotion.
                (Cell::Int(_), None) => Ok(false),
                (Cell::Float(v), _) => {
                    match op {
                        Write::Add => {
                            v.fetch_add(value.as_f64(), Ordering::AcqRel);
                        }
                        Write::Set => v.store(value.as_f64(), Ordering::Release),
                    }
                    Ok(true)
                }
                (Cell::Histogram(_), _) => Err(self.wrong_operation(op.name())),
            })?;
            if done {
                return Ok(());
            }
            self.promote_cell(labels);
        }
    }

    fn write_int(&self, cell: &AtomicI64, value: i64, op: Write) -> Result<()> {
        match op {
            Write::Add => cell
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cur| cur.checked_add(value))
                .map(|_| ())
                .map_err(|_| StoreError::Overflow {
                    name: self.decl.name.clone(),
                }),
            Write::Set => {
                cell.store(value, Ordering::Release);
                Ok(())
            }
        }
    }

    pub(crate) fn observe(&self, labels: &[String], value: Number) -> Result<()> {
        self.check_labels(labels)?;
        if self.decl.kind != Kind::Histogram {
            return Err(self.wrong_operation("observe"));
        }

        let value = value.as_f64();
        let bucket = self
            .decl
            .buckets
            .iter()
            .position(|bound| value <= *bound)
            .unwrap_or(self.decl.buckets.len());

        self.with_cell(labels, |cell| match cell {
            Cell::Histogram(state) => {
                let mut state = state.lock();
                state.counts[bucket] += 1;
                state.count += 1;
                state.sum += value;
                Ok(())
            }
            _ => Err(self.wrong_operation("observe")),
        })
    }

    /// Current value of a cell, 0 when it has not been created. Histograms
    /// read as the sum of their observations. Never creates the cell.
    pub(crate) fn load(&self, labels: &[String]) -> Result<Number> {
        self.check_labels(labels)?;
        let Some(cell) = self.cells.get(labels) else {
            return Ok(if self.is_float() {
                Number::Float(0.0)
            } else {
                Number::Int(0)
            });
        };
        Ok(match &*cell {
            Cell::Int(v) => Number::Int(v.load(Ordering::Acquire)),
            Cell::Float(v) => Number::Float(v.load(Ordering::Acquire)),
            Cell::Histogram(state) => Number::Float(state.lock().sum),
        })
    }

    /// Visit every cell under its shard read lock.
    pub(crate) fn for_each_cell(&self, mut f: impl FnMut(&[String], &Cell)) {
        for entry in self.cells.iter() {
            f(entry.key(), entry.value());
        }
    }

    /// Run `f` on the cell for `labels`, creating it if needed.
    fn with_cell<R>(&self, labels: &[String], f: impl FnOnce(&Cell) -> R) -> R {
        if let Some(cell) = self.cells.get(labels) {
            return f(&cell);
        }
        let cell = self
            .cells
            .entry(labels.to_vec())
            .or_insert_with(|| Cell::new(&self.decl, self.is_float()))
            .downgrade();
        f(&cell)
    }

    fn check_labels(&self, labels: &[String]) -> Result<()> {
        if labels.len() == self.decl.keys.len() {
            Ok(())
        } else {
            Err(StoreError::LabelArity {
                name: self.decl.name.clone(),
                expected: self.decl.keys.len(),
                found: labels.len(),
            })
        }
    }

    fn wrong_operation(&self, op: &'static str) -> StoreError {
        StoreError::WrongOperation {
            name: self.decl.name.clone(),
            kind: self.decl.kind,
            op,
        }
    }
}
