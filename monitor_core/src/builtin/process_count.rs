//! Process count monitor: a single-source usage monitor over the host's
//! running process count, a trivial consumer of `SystemInfoProvider`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::collector::{CollectResult, Collector};
use crate::model::{Datapoint, MonitorDescriptor, MonitorKind, Observation};
use crate::sysinfo_provider::SystemInfoProvider;

pub struct ProcessCountMonitor {
    descriptor: MonitorDescriptor,
    system_info: Arc<dyn SystemInfoProvider>,
}

impl ProcessCountMonitor {
    pub const UID: &'static str = "builtin.process_count";

    pub fn new(system_info: Arc<dyn SystemInfoProvider>, poll_interval: u64) -> Self {
        Self {
            descriptor: MonitorDescriptor {
                uid: Self::UID.to_string(),
                name: "Process count".to_string(),
                kind: MonitorKind::Usage,
                sources: HashMap::from([("count".to_string(), "count".to_string())]),
                states: vec![],
                importance: MonitorDescriptor::DEFAULT_IMPORTANCE,
                poll_interval: Some(poll_interval),
                aggregation_interval: MonitorDescriptor::DEFAULT_AGGREGATION_INTERVAL,
                flop_threshold: MonitorDescriptor::DEFAULT_FLOP_THRESHOLD,
                pulls_processes: false,
            },
            system_info,
        }
    }
}

#[async_trait]
impl Collector for ProcessCountMonitor {
    fn descriptor(&self) -> &MonitorDescriptor {
        &self.descriptor
    }

    async fn collect(&self) -> CollectResult {
        let count = self.system_info.process_count().await;
        let mut readings = HashMap::new();
        readings.insert("count".to_string(), Observation::Numeric(count as f64));
        Ok(Datapoint::new(
            readings,
            Utc::now().timestamp(),
            self.descriptor.poll_interval.unwrap_or(0),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysinfo_provider::SysinfoProvider;

    #[tokio::test]
    async fn collect_reports_a_positive_count() {
        let provider = Arc::new(SysinfoProvider::new());
        let monitor = ProcessCountMonitor::new(provider, 30);
        let datapoint = monitor.collect().await.unwrap();
        let count = datapoint.readings.get("count").unwrap().as_numeric().unwrap();
        assert!(count > 0.0);
    }
}
