//! Process-wide metric registry.
//!
//! A [`Store`] maps metric names to [`Metric`]s. It is created once per
//! runtime and shared by reference (`Arc<Store>`) with every program; there is
//! no global instance, so tests build a fresh store per case.
//!
//! Locking: the name registry sits behind a `parking_lot::RwLock` that is only
//! written during declaration. Cell mutations take the registry lock not at
//! all; they go straight to the metric's sharded cell map and then to a single
//! atomic (or, for histograms, a per-cell mutex).

use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::metric::{Cell, Metric, MetricDecl, Number, ValueType};
use crate::snapshot::{CellSnapshot, CellValue, HistogramSnapshot, MetricSnapshot, Snapshot};

/// The metrics store.
#[derive(Debug, Default)]
pub struct Store {
    metrics: RwLock<IndexMap<String, Arc<Metric>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a metric, or return the existing one when the shape matches.
    pub fn declare(&self, decl: MetricDecl) -> Result<Arc<Metric>> {
        let mut declared = self.declare_all(vec![decl])?;
        Ok(declared.remove(0))
    }

    /// Register several metrics atomically: either every declaration is
    /// compatible and all are registered, or nothing changes.
    pub fn declare_all(&self, decls: Vec<MetricDecl>) -> Result<Vec<Arc<Metric>>> {
        for decl in &decls {
            decl.validate()?;
        }

        let mut metrics = self.metrics.write();

        for (i, decl) in decls.iter().enumerate() {
            let existing = metrics
                .get(&decl.name)
                .map(|m| m.decl())
                .or_else(|| decls[..i].iter().find(|d| d.name == decl.name));
            if let Some(existing) = existing {
                if !existing.same_shape(decl) {
                    return Err(StoreError::ShapeMismatch {
                        name: decl.name.clone(),
                        existing: existing.shape_string(),
                        requested: decl.shape_string(),
                    });
                }
            }
        }

        let handles = decls
            .into_iter()
            .map(|decl| {
                let float = decl.value_type == ValueType::Float;
                let metric = Arc::clone(metrics.entry(decl.name.clone()).or_insert_with(|| {
                    debug!(metric = %decl.name, kind = %decl.kind, "metric declared");
                    Arc::new(Metric::new(decl))
                }));
                if float {
                    metric.promote();
                }
                metric
            })
            .collect();
        Ok(handles)
    }

    /// Look up a metric by store name.
    pub fn get(&self, name: &str) -> Option<Arc<Metric>> {
        self.metrics.read().get(name).cloned()
    }

    /// Number of declared metrics.
    pub fn len(&self) -> usize {
        self.metrics.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add `delta` to a counter, gauge or timer cell. Counters reject
    /// negative deltas.
    pub fn increment(&self, metric: &Metric, labels: &[String], delta: Number) -> Result<()> {
        metric.increment(labels, delta)
    }

    /// Overwrite a counter, gauge or timer cell.
    pub fn set(&self, metric: &Metric, labels: &[String], value: Number) -> Result<()> {
        metric.set(labels, value)
    }

    /// Record one observation in a histogram cell.
    pub fn observe(&self, metric: &Metric, labels: &[String], value: Number) -> Result<()> {
        metric.observe(labels, value)
    }

    /// Current value of a cell (0 if never written). Does not create the cell.
    pub fn load(&self, metric: &Metric, labels: &[String]) -> Result<Number> {
        metric.load(labels)
    }

    /// Copy out every metric and cell.
    ///
    /// Each cell is read atomically; the snapshot as a whole is not taken
    /// under a global lock.
    pub fn snapshot(&self) -> Snapshot {
        let metrics: Vec<Arc<Metric>> = self.metrics.read().values().cloned().collect();

        let metrics = metrics
            .iter()
            .map(|metric| {
                let decl = metric.decl();
                let mut cells = Vec::with_capacity(metric.cell_count());
                metric.for_each_cell(|labels, cell| {
                    cells.push(CellSnapshot {
                        labels: labels.to_vec(),
                        value: cell_value(decl, cell),
                    })
                });
                cells.sort_by(|a, b| a.labels.cmp(&b.labels));

                (
                    decl.name.clone(),
                    MetricSnapshot {
                        kind: decl.kind,
                        keys: decl.keys.clone(),
                        hidden: decl.hidden,
                        cells,
                    },
                )
            })
            .collect();

        Snapshot { metrics }
    }
}

fn cell_value(decl: &MetricDecl, cell: &Cell) -> CellValue {
    use std::sync::atomic::Ordering;

    match cell {
        Cell::Int(v) => CellValue::Number(Number::Int(v.load(Ordering::Acquire))),
        Cell::Float(v) => CellValue::Number(Number::Float(v.load(Ordering::Acquire))),
        Cell::Histogram(state) => {
            let state = state.lock();
            CellValue::Histogram(HistogramSnapshot {
                bounds: decl.buckets.clone(),
                counts: state.counts.clone(),
                count: state.count,
                sum: state.sum,
            })
        }
    }
}
