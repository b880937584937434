//! Core metric types shared by the agent and the storage layer.
//!
//! - [`Gauge`] / [`Counter`]: typed metric values keyed by name
//! - [`Metric`]: tagged union of the two
//! - [`MetricRecord`]: wire and storage DTO (`{"id", "type", "delta"?, "value"?}`)

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};
use thiserror::Error;

/// Validation failures for metric values and records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Counter increments must be non-negative.
    #[error("counter '{name}' cannot be incremented by negative delta {delta}")]
    NegativeDelta { name: String, delta: i64 },

    /// Gauge record without a `value`.
    #[error("gauge '{0}' requires a value")]
    MissingValue(String),

    /// Counter record without a `delta`.
    #[error("counter '{0}' requires a delta")]
    MissingDelta(String),

    /// Record with an empty metric name.
    #[error("metric name cannot be empty")]
    EmptyName,

    /// Gauge value is NaN or infinite; JSON cannot carry it.
    #[error("gauge '{0}' value must be finite")]
    NonFiniteValue(String),

    /// Increment would push the counter past `i64::MAX`.
    #[error("counter '{name}' overflows when incremented by {delta}")]
    Overflow { name: String, delta: i64 },
}

/// Metric type discriminator.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum MetricKind {
    /// Last-value-wins sample.
    Gauge,
    /// Monotonic accumulated sum.
    Counter,
}

/// A gauge: its value is overwritten by every update.
///
/// Serialized with `Name`/`Value` keys, which is the layout of the memory
/// backend's dump file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Gauge {
    pub name: String,
    pub value: f64,
}

impl Gauge {
    pub fn new(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Overwrite the current value.
    pub fn set(&mut self, value: f64) {
        self.value = value;
    }
}

/// A counter: its value is the running sum of non-negative increments.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Counter {
    pub name: String,
    pub value: i64,
}

impl Counter {
    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    /// Add `delta` to the counter.
    ///
    /// # Errors
    /// Returns [`ModelError::NegativeDelta`] if `delta` is negative and
    /// [`ModelError::Overflow`] if the sum exceeds `i64::MAX`. The value is
    /// unchanged in both cases.
    pub fn increment(&mut self, delta: i64) -> Result<(), ModelError> {
        if delta < 0 {
            return Err(ModelError::NegativeDelta {
                name: self.name.clone(),
                delta,
            });
        }
        self.value = self
            .value
            .checked_add(delta)
            .ok_or_else(|| ModelError::Overflow {
                name: self.name.clone(),
                delta,
            })?;
        Ok(())
    }

    /// Zero the counter after its value was handed off in a snapshot.
    pub fn reset(&mut self) {
        self.value = 0;
    }
}

/// A typed metric.
#[derive(Debug, Clone, PartialEq)]
pub enum Metric {
    Gauge(Gauge),
    Counter(Counter),
}

impl Metric {
    pub fn name(&self) -> &str {
        match self {
            Self::Gauge(g) => &g.name,
            Self::Counter(c) => &c.name,
        }
    }

    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Gauge(_) => MetricKind::Gauge,
            Self::Counter(_) => MetricKind::Counter,
        }
    }

    /// Wire representation of the current value.
    pub fn to_record(&self) -> MetricRecord {
        match self {
            Self::Gauge(g) => MetricRecord::gauge(&g.name, g.value),
            Self::Counter(c) => MetricRecord::counter(&c.name, c.value),
        }
    }
}

impl From<Gauge> for Metric {
    fn from(g: Gauge) -> Self {
        Self::Gauge(g)
    }
}

impl From<Counter> for Metric {
    fn from(c: Counter) -> Self {
        Self::Counter(c)
    }
}

/// Wire/storage DTO.
///
/// Exactly one of `delta` / `value` is meaningful, selected by `kind`.
/// Records produced by this crate always satisfy that; records decoded from
/// the network are checked by [`MetricRecord::validate`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: MetricKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delta: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
}

impl MetricRecord {
    pub fn gauge(id: impl Into<String>, value: f64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Gauge,
            delta: None,
            value: Some(value),
        }
    }

    pub fn counter(id: impl Into<String>, delta: i64) -> Self {
        Self {
            id: id.into(),
            kind: MetricKind::Counter,
            delta: Some(delta),
            value: None,
        }
    }

    /// Check the record and convert it into a typed [`Metric`].
    ///
    /// For counters the resulting value is the (non-negative) delta.
    pub fn validate(&self) -> Result<Metric, ModelError> {
        if self.id.is_empty() {
            return Err(ModelError::EmptyName);
        }
        match self.kind {
            MetricKind::Gauge => {
                let value = self
                    .value
                    .ok_or_else(|| ModelError::MissingValue(self.id.clone()))?;
                if !value.is_finite() {
                    return Err(ModelError::NonFiniteValue(self.id.clone()));
                }
                Ok(Metric::Gauge(Gauge::new(&self.id, value)))
            }
            MetricKind::Counter => {
                let delta = self
                    .delta
                    .ok_or_else(|| ModelError::MissingDelta(self.id.clone()))?;
                if delta < 0 {
                    return Err(ModelError::NegativeDelta {
                        name: self.id.clone(),
                        delta,
                    });
                }
                Ok(Metric::Counter(Counter::new(&self.id, delta)))
            }
        }
    }
}

impl From<&Gauge> for MetricRecord {
    fn from(g: &Gauge) -> Self {
        Self::gauge(&g.name, g.value)
    }
}

impl From<&Counter> for MetricRecord {
    fn from(c: &Counter) -> Self {
        Self::counter(&c.name, c.value)
    }
}
