//! Process-wide counters, gauges and histograms for the writer hot paths.
//!
//! Everything compiles to nothing unless the `telemetry` feature is enabled;
//! [`snapshot`] then always comes back empty.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::types::duration_to_us;

pub mod tags;
pub mod worker;

pub use worker::{DefaultWorkerTelemetry, WorkerTelemetry};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HistogramSnapshot {
    pub count: u64,
    pub total: u64,
    pub min: u64,
    pub max: u64,
    pub mean: f64,
}

/// Point-in-time copy of every metric recorded so far, keyed by metric name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, u64>,
    pub histograms: BTreeMap<String, HistogramSnapshot>,
}

impl TelemetrySnapshot {
    pub fn counter(&self, name: &str) -> Option<u64> {
        self.counters.get(name).copied()
    }

    pub fn gauge(&self, name: &str) -> Option<u64> {
        self.gauges.get(name).copied()
    }

    pub fn histogram(&self, name: &str) -> Option<HistogramSnapshot> {
        self.histograms.get(name).copied()
    }
}

#[inline]
pub fn increment_counter(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::with(|current| current.count(name, value));

    let _ = (name, value);
}

#[inline]
pub fn record_histogram(name: &'static str, value: u64) {
    #[cfg(feature = "telemetry")]
    registry::with(|current| current.observe(name, value));

    let _ = (name, value);
}

/// Records `elapsed` in microseconds.
#[inline]
pub fn record_latency(name: &'static str, elapsed: Duration) {
    record_histogram(name, duration_to_us(elapsed));
}

/// Moves a gauge by `delta`; gauges never drop below zero.
#[inline]
pub fn adjust_gauge(name: &'static str, delta: i64) {
    #[cfg(feature = "telemetry")]
    registry::with(|current| current.adjust(name, delta));

    let _ = (name, delta);
}

pub fn snapshot() -> TelemetrySnapshot {
    #[cfg(feature = "telemetry")]
    {
        return registry::with(|current| current.snapshot());
    }

    #[cfg(not(feature = "telemetry"))]
    {
        TelemetrySnapshot::default()
    }
}

pub fn reset() {
    #[cfg(feature = "telemetry")]
    registry::with(|current| *current = registry::Registry::new());
}

#[cfg(feature = "telemetry")]
mod registry {
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    use super::{HistogramSnapshot, TelemetrySnapshot};
    use crate::sync::lock_unpoisoned;

    static REGISTRY: Mutex<Registry> = Mutex::new(Registry::new());

    pub(super) fn with<T>(apply: impl FnOnce(&mut Registry) -> T) -> T {
        apply(&mut lock_unpoisoned(&REGISTRY))
    }

    #[derive(Debug, Clone, Copy, Default)]
    struct Aggregate {
        count: u64,
        total: u64,
        min: u64,
        max: u64,
    }

    impl Aggregate {
        fn record(&mut self, value: u64) {
            self.min = if self.count == 0 { value } else { self.min.min(value) };
            self.max = self.max.max(value);
            self.count = self.count.saturating_add(1);
            self.total = self.total.saturating_add(value);
        }

        fn snapshot(&self) -> HistogramSnapshot {
            HistogramSnapshot {
                count: self.count,
                total: self.total,
                min: self.min,
                max: self.max,
                mean: match self.count {
                    0 => 0.0,
                    count => self.total as f64 / count as f64,
                },
            }
        }
    }

    pub(super) struct Registry {
        counters: BTreeMap<&'static str, u64>,
        gauges: BTreeMap<&'static str, u64>,
        histograms: BTreeMap<&'static str, Aggregate>,
    }

    impl Registry {
        pub(super) const fn new() -> Self {
            Self {
                counters: BTreeMap::new(),
                gauges: BTreeMap::new(),
                histograms: BTreeMap::new(),
            }
        }

        pub(super) fn count(&mut self, name: &'static str, value: u64) {
            let counter = self.counters.entry(name).or_insert(0);
            *counter = counter.saturating_add(value);
        }

        pub(super) fn observe(&mut self, name: &'static str, value: u64) {
            self.histograms.entry(name).or_default().record(value);
        }

        pub(super) fn adjust(&mut self, name: &'static str, delta: i64) {
            let gauge = self.gauges.entry(name).or_insert(0);
            *gauge = gauge.saturating_add_signed(delta);
        }

        pub(super) fn snapshot(&self) -> TelemetrySnapshot {
            TelemetrySnapshot {
                counters: owned_keys(&self.counters, |value| *value),
                gauges: owned_keys(&self.gauges, |value| *value),
                histograms: owned_keys(&self.histograms, Aggregate::snapshot),
            }
        }
    }

    fn owned_keys<V, T>(
        map: &BTreeMap<&'static str, V>,
        convert: impl Fn(&V) -> T,
    ) -> BTreeMap<String, T> {
        map.iter()
            .map(|(name, value)| ((*name).to_owned(), convert(value)))
            .collect()
    }

}
