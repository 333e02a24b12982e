//! Monitor Kernel: the polling loop, the aggregation loop, and the glue that
//! feeds both into the Alert Engine and the Live Stream Registry, per §4.2.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use chrono::{Datelike, Timelike, Utc};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::alert::{self, AlertTransition};
use crate::bus::Publisher;
use crate::collector::Collector;
use crate::live_stream::{bootstrap_frame, poll_frame, reports_exchange};
use crate::model::{Datapoint, MonitorDescriptor, MonitorKind, MonitorRuntimeState, Observation};
use crate::scheduler::{delay_to_next_boundary, Scheduler};
use crate::sysinfo_provider::{SystemInfoProvider, TopBy};

/// Everything the kernel needs for one monitor: its (immutable) collector
/// and descriptor, and its (mutable, mutex-guarded) runtime state. Held for
/// the lifetime of the agent; never removed except at shutdown.
pub struct MonitorHandle {
    pub collector: Arc<dyn Collector>,
    pub state: Mutex<MonitorRuntimeState>,
}

impl MonitorHandle {
    pub fn new(collector: Arc<dyn Collector>) -> Self {
        Self {
            collector,
            state: Mutex::new(MonitorRuntimeState::new()),
        }
    }

    pub fn descriptor(&self) -> &MonitorDescriptor {
        self.collector.descriptor()
    }
}

fn current_timestamp() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before epoch")
        .as_secs() as i64
}

/// Registers monitors, starts their polling/aggregation loops, and routes
/// alert-check results to the bus publisher. Owns no AMQP-specific logic;
/// all of that lives behind the `Publisher` trait.
pub struct MonitorKernel {
    monitors: Mutex<HashMap<String, Arc<MonitorHandle>>>,
    scheduler: Scheduler,
    publisher: Arc<dyn Publisher>,
    system_info: Arc<dyn SystemInfoProvider>,
    host_id: String,
    user_id: String,
}

impl MonitorKernel {
    pub fn new(
        scheduler: Scheduler,
        publisher: Arc<dyn Publisher>,
        system_info: Arc<dyn SystemInfoProvider>,
        host_id: String,
        user_id: String,
    ) -> Self {
        Self {
            monitors: Mutex::new(HashMap::new()),
            scheduler,
            publisher,
            system_info,
            host_id,
            user_id,
        }
    }

    pub async fn register(&self, handle: Arc<MonitorHandle>) {
        let uid = handle.descriptor().uid.clone();
        self.monitors.lock().await.insert(uid, handle);
    }

    pub async fn get(&self, uid: &str) -> Option<Arc<MonitorHandle>> {
        self.monitors.lock().await.get(uid).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<MonitorHandle>> {
        self.monitors.lock().await.values().cloned().collect()
    }

    /// Starts the polling and aggregation loops for every registered monitor,
    /// per Controller step 4. Call once, after all monitors are registered.
    pub async fn start_all(self: &Arc<Self>) {
        for handle in self.all().await {
            self.start_polling(handle.clone());
            self.start_aggregation(handle);
        }
    }

    fn start_polling(self: &Arc<Self>, handle: Arc<MonitorHandle>) {
        let kernel = Arc::clone(self);
        match handle.descriptor().poll_interval {
            Some(interval) => {
                let interval = Duration::from_secs(interval.max(1));
                self.scheduler.every(interval, Duration::from_secs(0), move || {
                    let kernel = Arc::clone(&kernel);
                    let handle = Arc::clone(&handle);
                    async move { kernel.poll_tick(&handle).await }
                });
            }
            None => {
                // A once-off worker: run a single poll at registration time.
                self.scheduler.after(Duration::from_secs(0), move || {
                    let kernel = Arc::clone(&kernel);
                    async move { kernel.poll_tick(&handle).await }
                });
            }
        }
    }

    fn start_aggregation(self: &Arc<Self>, handle: Arc<MonitorHandle>) {
        let kernel = Arc::clone(self);
        let descriptor = handle.descriptor().clone();
        let interval = descriptor.aggregation_interval.max(1);
        let now = Utc::now();
        let seconds_into_period =
            (now.minute() as u64 * 60 + now.second() as u64) % interval.max(1);
        let initial_delay = delay_to_next_boundary(seconds_into_period, interval);
        self.scheduler.every(
            Duration::from_secs(interval),
            initial_delay,
            move || {
                let kernel = Arc::clone(&kernel);
                let handle = Arc::clone(&handle);
                async move { kernel.aggregation_tick(&handle).await }
            },
        );
    }

    /// One polling-loop iteration: collect -> store -> alertCheck -> fan-out.
    /// Sequential and atomic relative to further polls of the same monitor
    /// because it runs entirely while holding that monitor's own mutex.
    pub async fn poll_tick(&self, handle: &Arc<MonitorHandle>) -> anyhow::Result<()> {
        let descriptor = handle.descriptor().clone();
        let datapoint = match handle.collector.collect().await {
            Ok(dp) => dp,
            Err(err) => {
                warn!(uid = %descriptor.uid, error = %err, "collection failed, skipping tick");
                return Ok(());
            }
        };

        let mut state = handle.state.lock().await;
        state.datapoints.push(datapoint.clone());

        for (source, observation) in datapoint.readings.clone() {
            let expected = state.expected_values.get(&source).cloned();
            let currently_failing = state.is_failing(&source);
            let counters = state.counters_for(&source);
            let (next_counters, transition) = alert::check(
                counters,
                &observation,
                expected.as_ref(),
                currently_failing,
                descriptor.flop_threshold,
            );
            state.store_counters(&source, next_counters);

            match transition {
                AlertTransition::NoEmission => {}
                AlertTransition::NowFailing => {
                    state.set_failing(&source, true);
                    self.emit_alert(handle, &descriptor, &source, &observation, expected.as_ref(), true)
                        .await;
                }
                AlertTransition::NowPassing => {
                    state.set_failing(&source, false);
                    self.emit_alert(handle, &descriptor, &source, &observation, expected.as_ref(), false)
                        .await;
                }
            }
        }

        let sinks = state.live_stream_snapshot();
        drop(state);
        if !sinks.is_empty() {
            let frame = poll_frame(&descriptor.uid, &datapoint);
            for sink in sinks {
                if let Err(err) = self
                    .publisher
                    .publish(&sink.exchange, &sink.routing_key, frame.clone(), false)
                    .await
                {
                    warn!(uid = %descriptor.uid, routing_key = %sink.routing_key, error = %err, "live-stream publish failed");
                }
            }
        }

        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn emit_alert(
        &self,
        handle: &Arc<MonitorHandle>,
        descriptor: &MonitorDescriptor,
        source: &str,
        observation: &Observation,
        expected: Option<&Observation>,
        failing: bool,
    ) {
        let source_type = descriptor.sources.get(source).cloned().unwrap_or_default();

        let mut payload = json!({
            "timestamp": current_timestamp(),
            "monitor": {
                "id": descriptor.uid,
                "name": descriptor.name,
                "kind": descriptor.kind,
                "source": source,
                "source_type": source_type,
            },
            "failing": failing,
        });

        if let Some(map) = payload.as_object_mut() {
            match observation {
                Observation::Numeric(v) => {
                    map.insert("current_usage".into(), json!(v));
                }
                Observation::State(s) => {
                    map.insert("current_state".into(), json!(s));
                }
            }
            if let Some(expected) = expected {
                match expected {
                    Observation::Numeric(v) => {
                        map.insert("threshold".into(), json!(v));
                    }
                    Observation::State(s) => {
                        map.insert("expected".into(), json!(s));
                    }
                }
            }
        }

        if failing {
            if let Some(extra) = handle.collector.extra_alert_data(source).await {
                if let Some(map) = payload.as_object_mut() {
                    map.insert("event_data".into(), Value::Object(extra));
                }
            }
            if descriptor.pulls_processes {
                let by = if source.contains("cpu") {
                    TopBy::Cpu
                } else {
                    TopBy::Memory
                };
                let processes = self.system_info.top_processes(by, 10).await;
                if let Some(map) = payload.as_object_mut() {
                    map.insert(
                        "current_processes".into(),
                        serde_json::to_value(processes).unwrap_or(Value::Null),
                    );
                }
            }
        }

        if let Err(err) = self.publisher.publish(&self.primary_exchange(), "alert", payload, true).await {
            warn!(uid = %descriptor.uid, error = %err, "alert publish failed");
        }
    }

    /// One aggregation-loop iteration: merge the window buffer, attach
    /// metadata, publish, and clear unconditionally after a successful
    /// enqueue, per §4.2.
    async fn aggregation_tick(&self, handle: &Arc<MonitorHandle>) -> anyhow::Result<()> {
        let descriptor = handle.descriptor().clone();
        let mut state = handle.state.lock().await;

        let now = current_timestamp();
        let now_dt = Utc::now();
        let interval = descriptor.aggregation_interval.max(1) as i64;
        let seconds_into_period =
            (now_dt.minute() as i64 * 60 + now_dt.second() as i64) % interval;
        let earliest = now - interval - seconds_into_period;

        let mut merged: HashMap<String, Vec<Value>> = HashMap::new();
        for dp in state.datapoints.iter().filter(|dp| dp.timestamp >= earliest) {
            for (source, obs) in &dp.readings {
                merged
                    .entry(source.clone())
                    .or_default()
                    .push(serde_json::to_value(obs).unwrap_or(Value::Null));
            }
        }

        let next_boundary_dt = now_dt + chrono::Duration::seconds(interval - seconds_into_period);
        let period = format!("{:02}{:02}", next_boundary_dt.hour(), next_boundary_dt.minute());
        let day = next_boundary_dt.weekday().num_days_from_monday();

        let payload = json!({
            "host_id": self.host_id,
            "id": descriptor.uid,
            "interval": descriptor.aggregation_interval,
            "period": period,
            "day": day,
            "data": merged,
        });

        let result = self
            .publisher
            .publish(&self.primary_exchange(), descriptor.kind.routing_key(), payload, false)
            .await;

        match result {
            Ok(()) => {
                state.datapoints.clear();
                info!(uid = %descriptor.uid, "aggregation flushed and buffer cleared");
            }
            Err(err) => {
                warn!(uid = %descriptor.uid, error = %err, "aggregation publish failed; buffer retained");
            }
        }

        Ok(())
    }

    /// `live_data/start`: registers a sink and immediately publishes the
    /// current merged buffer as a bootstrap frame, per §4.4/S6.
    pub async fn start_live_stream(&self, uid: &str, routing_key: &str) -> anyhow::Result<()> {
        let Some(handle) = self.get(uid).await else {
            anyhow::bail!("vanished monitor '{uid}'");
        };
        let exchange = reports_exchange(&self.user_id);
        let mut state = handle.state.lock().await;
        state.start_live_stream(routing_key, exchange.clone());
        let frame = bootstrap_frame(uid, &state.datapoints);
        drop(state);
        self.publisher.publish(&exchange, routing_key, frame, false).await
    }

    pub async fn stop_live_stream(&self, uid: &str, routing_key: &str) -> anyhow::Result<bool> {
        let Some(handle) = self.get(uid).await else {
            anyhow::bail!("vanished monitor '{uid}'");
        };
        let mut state = handle.state.lock().await;
        Ok(state.stop_live_stream(routing_key))
    }

    pub async fn update_expected(&self, uid: &str, expected: HashMap<String, Observation>) -> bool {
        let Some(handle) = self.get(uid).await else {
            return false;
        };
        let mut state = handle.state.lock().await;
        state.expected_values.extend(expected);
        true
    }

    fn primary_exchange(&self) -> String {
        format!("agent.{}", self.user_id)
    }
}
