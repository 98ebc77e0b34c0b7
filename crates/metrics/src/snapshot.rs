//! Point-in-time view of the store.
//!
//! The serialized form is the golden-file format used by acceptance tests:
//!
//! ```json
//! {
//!   "bytes": {
//!     "kind": "counter",
//!     "keys": ["user"],
//!     "cells": [
//!       { "labels": ["alice"], "value": 15 },
//!       { "labels": ["bob"], "value": 20 }
//!     ]
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::metric::{Kind, Number};

/// All metrics by store name, sorted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot {
    pub metrics: BTreeMap<String, MetricSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub kind: Kind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keys: Vec<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hidden: bool,
    /// Cells sorted by label tuple
    pub cells: Vec<CellSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellSnapshot {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
    pub value: CellValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Number(Number),
    Histogram(HistogramSnapshot),
}

/// Histogram distribution. `counts` has one entry per bound plus the
/// trailing `+Inf` bucket; counts are per bucket, not cumulative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub bounds: Vec<f64>,
    pub counts: Vec<u64>,
    pub count: u64,
    pub sum: f64,
}

impl Snapshot {
    /// Value of one cell, if it exists.
    pub fn get(&self, name: &str, labels: &[&str]) -> Option<&CellValue> {
        self.metrics
            .get(name)?
            .cells
            .iter()
            .find(|cell| cell.labels.iter().map(String::as_str).eq(labels.iter().copied()))
            .map(|cell| &cell.value)
    }

    /// Numeric value of one cell, as f64.
    pub fn value(&self, name: &str, labels: &[&str]) -> Option<f64> {
        match self.get(name, labels)? {
            CellValue::Number(n) => Some(n.as_f64()),
            CellValue::Histogram(h) => Some(h.sum),
        }
    }

    /// The view handed to exporters: hidden metrics removed.
    pub fn exported(&self) -> Snapshot {
        Snapshot {
            metrics: self
                .metrics
                .iter()
                .filter(|(_, m)| !m.hidden)
                .map(|(name, m)| (name.clone(), m.clone()))
                .collect(),
        }
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Snapshot> {
        serde_json::from_str(json)
    }
}
