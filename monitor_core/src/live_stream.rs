//! Live Stream Registry: per-monitor fan-out of raw observations to
//! operator-requested routing keys, mutated only through the task dispatcher.

use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::model::{Datapoint, LiveStreamSink, MonitorRuntimeState};

/// The reports exchange live-stream publishes go out on, distinct from the
/// primary info exchange used for aggregation flushes and alerts.
pub fn reports_exchange(user_id: &str) -> String {
    format!("agent.{user_id}.reports")
}

impl MonitorRuntimeState {
    /// Registers (or replaces, if already present) a sink for `routing_key`.
    /// Idempotent on duplicate start, per §4.4.
    pub fn start_live_stream(&mut self, routing_key: &str, exchange: String) {
        self.live_streams.insert(
            routing_key.to_string(),
            LiveStreamSink {
                routing_key: routing_key.to_string(),
                exchange,
            },
        );
    }

    /// Removes a sink by routing key. Absent keys are the caller's problem to
    /// log; this is a silent no-op at the data-structure level.
    pub fn stop_live_stream(&mut self, routing_key: &str) -> bool {
        self.live_streams.remove(routing_key).is_some()
    }

    /// A point-in-time copy of the registered sinks, safe to iterate after
    /// the runtime-state lock is released (snapshot semantics per §4.4).
    pub fn live_stream_snapshot(&self) -> Vec<LiveStreamSink> {
        self.live_streams.values().cloned().collect()
    }
}

/// The stripped-down frame published to a live-stream sink on every poll:
/// the monitor id and the raw reading, with no `extra` alert payload.
pub fn poll_frame(monitor_id: &str, datapoint: &Datapoint) -> Value {
    let mut readings = Map::new();
    for (source, obs) in &datapoint.readings {
        readings.insert(source.clone(), serde_json::to_value(obs).unwrap_or(Value::Null));
    }
    serde_json::json!({
        "monitor_id": monitor_id,
        "data": readings,
    })
}

/// The bootstrap frame a `live_data/start` task publishes immediately: the
/// current (not-yet-flushed) merged buffer for the monitor, keyed by source.
pub fn bootstrap_frame(
    monitor_id: &str,
    datapoints: &[Datapoint],
) -> Value {
    let mut merged: HashMap<String, Vec<Value>> = HashMap::new();
    for dp in datapoints {
        for (source, obs) in &dp.readings {
            merged
                .entry(source.clone())
                .or_default()
                .push(serde_json::to_value(obs).unwrap_or(Value::Null));
        }
    }
    serde_json::json!({
        "monitor_id": monitor_id,
        "data": merged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Observation;
    use std::collections::HashMap as StdMap;

    #[test]
    fn start_is_idempotent_on_duplicate() {
        let mut state = MonitorRuntimeState::new();
        state.start_live_stream("r1", "agent.u.reports".to_string());
        state.start_live_stream("r1", "agent.u.reports".to_string());
        assert_eq!(state.live_streams.len(), 1);
    }

    #[test]
    fn stop_removes_absent_is_noop() {
        let mut state = MonitorRuntimeState::new();
        assert!(!state.stop_live_stream("missing"));
    }

    #[test]
    fn stop_after_start_removes_sink() {
        let mut state = MonitorRuntimeState::new();
        state.start_live_stream("r1", "agent.u.reports".to_string());
        assert!(state.stop_live_stream("r1"));
        assert!(state.live_streams.is_empty());
    }

    #[test]
    fn poll_frame_has_no_extra_payload() {
        let mut readings = StdMap::new();
        readings.insert("cpu".to_string(), Observation::Numeric(42.0));
        let dp = Datapoint::new(readings, 1000, 10);
        let frame = poll_frame("m1", &dp);
        assert_eq!(frame["monitor_id"], "m1");
        assert!(frame.get("extra").is_none());
    }
}
