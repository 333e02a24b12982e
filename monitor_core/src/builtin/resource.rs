//! Resource usage monitor: CPU, RAM, disk, and network throughput.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::collector::{CollectResult, Collector};
use crate::model::{Datapoint, MonitorDescriptor, MonitorKind, Observation};
use crate::sysinfo_provider::SystemInfoProvider;

pub struct ResourceMonitor {
    descriptor: MonitorDescriptor,
    system_info: Arc<dyn SystemInfoProvider>,
}

impl ResourceMonitor {
    pub const UID: &'static str = "builtin.resource";

    pub async fn new(system_info: Arc<dyn SystemInfoProvider>, poll_interval: u64) -> Self {
        let snapshot = system_info.resource_snapshot().await;
        let mut sources: HashMap<String, String> = HashMap::from([
            ("cpu_percent".to_string(), "percent".to_string()),
            ("ram_percent".to_string(), "percent".to_string()),
            ("bytes_sent".to_string(), "bytes".to_string()),
            ("bytes_recv".to_string(), "bytes".to_string()),
        ]);
        for (mount, _) in &snapshot.disk_percent {
            sources.insert(format!("disk_{mount}_percent"), "percent".to_string());
        }

        Self {
            descriptor: MonitorDescriptor {
                uid: Self::UID.to_string(),
                name: "Resource usage".to_string(),
                kind: MonitorKind::Usage,
                sources,
                states: vec![],
                importance: MonitorDescriptor::DEFAULT_IMPORTANCE,
                poll_interval: Some(poll_interval),
                aggregation_interval: MonitorDescriptor::DEFAULT_AGGREGATION_INTERVAL,
                flop_threshold: MonitorDescriptor::DEFAULT_FLOP_THRESHOLD,
                pulls_processes: true,
            },
            system_info,
        }
    }
}

#[async_trait]
impl Collector for ResourceMonitor {
    fn descriptor(&self) -> &MonitorDescriptor {
        &self.descriptor
    }

    async fn collect(&self) -> CollectResult {
        let snapshot = self.system_info.resource_snapshot().await;
        let mut readings = HashMap::new();
        readings.insert(
            "cpu_percent".to_string(),
            Observation::Numeric(snapshot.cpu_percent as f64),
        );
        readings.insert(
            "ram_percent".to_string(),
            Observation::Numeric(snapshot.ram_percent as f64),
        );
        readings.insert(
            "bytes_sent".to_string(),
            Observation::Numeric(snapshot.bytes_sent as f64),
        );
        readings.insert(
            "bytes_recv".to_string(),
            Observation::Numeric(snapshot.bytes_recv as f64),
        );
        for (mount, percent) in &snapshot.disk_percent {
            readings.insert(
                format!("disk_{mount}_percent"),
                Observation::Numeric(*percent as f64),
            );
        }

        Ok(Datapoint::new(
            readings,
            Utc::now().timestamp(),
            self.descriptor.poll_interval.unwrap_or(0),
        ))
    }

    async fn extra_alert_data(
        &self,
        source: &str,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        let snapshot = self.system_info.resource_snapshot().await;
        let (total, used, free, label) = if source == "ram_percent" {
            (100.0_f32, snapshot.ram_percent, 100.0 - snapshot.ram_percent, "memory")
        } else if source.starts_with("disk_") {
            let percent = snapshot
                .disk_percent
                .iter()
                .find(|(mount, _)| format!("disk_{mount}_percent") == source)
                .map(|(_, p)| *p)
                .unwrap_or(0.0);
            (100.0, percent, 100.0 - percent, "disk")
        } else {
            return None;
        };

        let mut map = serde_json::Map::new();
        map.insert("total".to_string(), serde_json::json!(total));
        map.insert("used".to_string(), serde_json::json!(used));
        map.insert("free".to_string(), serde_json::json!(free));
        map.insert("resource".to_string(), serde_json::json!(label));
        Some(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sysinfo_provider::SysinfoProvider;

    #[tokio::test]
    async fn descriptor_includes_core_usage_sources() {
        let provider = Arc::new(SysinfoProvider::new());
        let monitor = ResourceMonitor::new(provider, 10).await;
        assert!(monitor.descriptor().sources.contains_key("cpu_percent"));
        assert!(monitor.descriptor().sources.contains_key("ram_percent"));
        assert!(monitor.descriptor().pulls_processes);
    }

    #[tokio::test]
    async fn collect_reports_all_declared_sources() {
        let provider = Arc::new(SysinfoProvider::new());
        let monitor = ResourceMonitor::new(provider, 10).await;
        let datapoint = monitor.collect().await.unwrap();
        assert!(datapoint.readings.contains_key("cpu_percent"));
        assert!(datapoint.readings.contains_key("bytes_sent"));
    }
}
