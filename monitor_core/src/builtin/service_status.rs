//! Service status monitor: one generic `status`-kind monitor parameterized by
//! a list of service names, rather than one struct per OS service family
//! (systemd/sysv/Windows SCM), per Design Note §9. The platform-specific
//! probe itself lives behind `SystemInfoProvider::pull("services")`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;

use crate::collector::{CollectError, CollectResult, Collector};
use crate::model::{Datapoint, MonitorDescriptor, MonitorKind, Observation};
use crate::sysinfo_provider::SystemInfoProvider;

pub struct ServiceStatusMonitor {
    descriptor: MonitorDescriptor,
    services: Vec<String>,
    system_info: Arc<dyn SystemInfoProvider>,
}

const LEGAL_STATES: &[&str] = &["running", "stopped", "unknown"];

impl ServiceStatusMonitor {
    pub fn new(
        uid: impl Into<String>,
        name: impl Into<String>,
        services: Vec<String>,
        system_info: Arc<dyn SystemInfoProvider>,
        poll_interval: u64,
    ) -> Self {
        let sources = services
            .iter()
            .map(|s| (s.clone(), String::new()))
            .collect();

        Self {
            descriptor: MonitorDescriptor {
                uid: uid.into(),
                name: name.into(),
                kind: MonitorKind::Status,
                sources,
                states: LEGAL_STATES.iter().map(|s| s.to_string()).collect(),
                importance: MonitorDescriptor::DEFAULT_IMPORTANCE,
                poll_interval: Some(poll_interval),
                aggregation_interval: MonitorDescriptor::DEFAULT_AGGREGATION_INTERVAL,
                flop_threshold: MonitorDescriptor::DEFAULT_FLOP_THRESHOLD,
                pulls_processes: false,
            },
            services,
            system_info,
        }
    }
}

#[async_trait]
impl Collector for ServiceStatusMonitor {
    fn descriptor(&self) -> &MonitorDescriptor {
        &self.descriptor
    }

    async fn collect(&self) -> CollectResult {
        let report = self.system_info.pull("services").await;
        let report = report
            .as_object()
            .ok_or_else(|| CollectError::Failed("service report was not a JSON object".to_string()))?;

        let mut readings = HashMap::new();
        for service in &self.services {
            let state = report
                .get(service)
                .and_then(|v| v.as_str())
                .filter(|s| LEGAL_STATES.contains(s))
                .unwrap_or("unknown");
            readings.insert(service.clone(), Observation::State(state.to_string()));
        }

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
    async fn collect_defaults_unreported_service_to_unknown() {
        let provider = Arc::new(SysinfoProvider::new());
        let monitor = ServiceStatusMonitor::new(
            "svc1",
            "service status",
            vec!["sshd".to_string()],
            provider,
            30,
        );
        let datapoint = monitor.collect().await.unwrap();
        assert_eq!(
            datapoint.readings.get("sshd").unwrap().as_state(),
            Some("unknown")
        );
    }
}
