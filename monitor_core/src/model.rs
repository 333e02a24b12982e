//! The monitor data model: descriptor, runtime state, and datapoints.
//!
//! The descriptor is assembled once at load time and never mutated; the
//! runtime state is the only thing the kernel, alert engine, and dispatcher
//! touch while the agent is running.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// What kind of observations a monitor produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitorKind {
    Usage,
    Status,
    Log,
}

impl MonitorKind {
    /// The AMQP routing key an aggregation flush for this kind publishes under.
    pub fn routing_key(&self) -> &'static str {
        match self {
            MonitorKind::Usage => "usage",
            MonitorKind::Status => "status",
            MonitorKind::Log => "log",
        }
    }
}

/// A single observed reading: a number for usage sources, a state label for
/// status sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Observation {
    Numeric(f64),
    State(String),
}

impl Observation {
    pub fn as_numeric(&self) -> Option<f64> {
        match self {
            Observation::Numeric(v) => Some(*v),
            Observation::State(_) => None,
        }
    }

    pub fn as_state(&self) -> Option<&str> {
        match self {
            Observation::State(s) => Some(s.as_str()),
            Observation::Numeric(_) => None,
        }
    }
}

/// The per-source threshold (usage) or expected state (status) an operator
/// has declared. Untyped at the map level; interpreted against `Observation`
/// according to the owning monitor's `kind`.
pub type Expected = Observation;

/// A single timestamped collection result. Carries exactly the keys declared
/// in the owning monitor's `sources`, plus the collection timestamp and the
/// poll interval in effect when it was taken.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Datapoint {
    pub readings: HashMap<String, Observation>,
    pub timestamp: i64,
    pub interval: u64,
}

impl Datapoint {
    pub fn new(readings: HashMap<String, Observation>, timestamp: i64, interval: u64) -> Self {
        Self {
            readings,
            timestamp,
            interval,
        }
    }
}

/// The immutable shape of a monitor, assembled once by the loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorDescriptor {
    pub uid: String,
    pub name: String,
    pub kind: MonitorKind,
    /// Usage: source -> unit tag (e.g. "percent", "bytes"). Status: source -> "" (unit unused).
    pub sources: HashMap<String, String>,
    /// Status monitors only: the ordered set of legal state strings.
    pub states: Vec<String>,
    pub importance: u8,
    pub poll_interval: Option<u64>,
    pub aggregation_interval: u64,
    pub flop_threshold: u32,
    pub pulls_processes: bool,
}

impl MonitorDescriptor {
    pub const DEFAULT_IMPORTANCE: u8 = 5;
    pub const DEFAULT_AGGREGATION_INTERVAL: u64 = 1800;
    pub const DEFAULT_FLOP_THRESHOLD: u32 = 6;

    /// Clamp importance into the legal [1, 10] range, per the loader's
    /// validation rules.
    pub fn clamp_importance(value: u8) -> u8 {
        value.clamp(1, 10)
    }
}

/// Per-source flop-protection counters, owned by `MonitorRuntimeState`.
#[derive(Debug, Default, Clone)]
pub struct SourceCounters {
    pub failing: u32,
    pub passing: u32,
}

impl SourceCounters {
    pub fn reset(&mut self) {
        self.failing = 0;
        self.passing = 0;
    }
}

/// A registered real-time fan-out target for a monitor's raw observations.
#[derive(Clone)]
pub struct LiveStreamSink {
    pub routing_key: String,
    pub exchange: String,
}

/// The mutable state the kernel, alert engine, and dispatcher all operate on
/// for a single monitor. Always accessed through the owning `Mutex` in
/// `kernel::MonitorHandle`; never constructed bare in running code.
#[derive(Default)]
pub struct MonitorRuntimeState {
    pub expected_values: HashMap<String, Expected>,
    pub datapoints: Vec<Datapoint>,
    pub failing_counters: HashMap<String, u32>,
    pub passing_counters: HashMap<String, u32>,
    pub alert_status: HashMap<String, bool>,
    pub live_streams: HashMap<String, LiveStreamSink>,
}

impl MonitorRuntimeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters_for(&mut self, source: &str) -> SourceCounters {
        SourceCounters {
            failing: *self.failing_counters.get(source).unwrap_or(&0),
            passing: *self.passing_counters.get(source).unwrap_or(&0),
        }
    }

    pub fn store_counters(&mut self, source: &str, counters: SourceCounters) {
        self.failing_counters
            .insert(source.to_string(), counters.failing);
        self.passing_counters
            .insert(source.to_string(), counters.passing);
    }

    pub fn is_failing(&self, source: &str) -> bool {
        *self.alert_status.get(source).unwrap_or(&false)
    }

    pub fn set_failing(&mut self, source: &str, failing: bool) {
        self.alert_status.insert(source.to_string(), failing);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn importance_clamps_to_legal_range() {
        assert_eq!(MonitorDescriptor::clamp_importance(0), 1);
        assert_eq!(MonitorDescriptor::clamp_importance(15), 10);
        assert_eq!(MonitorDescriptor::clamp_importance(5), 5);
    }

    #[test]
    fn counters_reset_clears_both() {
        let mut c = SourceCounters {
            failing: 3,
            passing: 0,
        };
        c.reset();
        assert_eq!(c.failing, 0);
        assert_eq!(c.passing, 0);
    }

    #[test]
    fn runtime_state_default_alert_status_is_passing() {
        let state = MonitorRuntimeState::new();
        assert!(!state.is_failing("cpu"));
    }
}
