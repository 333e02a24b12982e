//! Monitor Loader: discovers built-in and external (declarative) monitors at
//! startup, per §4.5. External monitors are expressed as a single concrete
//! implementation parameterized by the declarative config (Design Note §9),
//! not one Rust type per `.mon` file.

use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::warn;

use crate::collector::{CollectResult, Collector};
use crate::model::{Datapoint, MonitorDescriptor, MonitorKind, Observation};

/// The declarative shape of a `.mon` file, per §4.5/§6. `type` discriminates
/// usage vs. status via a tagged deserializer on the `type` field.
#[derive(Debug, Clone, Deserialize)]
pub struct ExternalMonitorConfig {
    pub uid: String,
    pub name: String,
    #[serde(rename = "type")]
    pub monitor_type: ExternalMonitorType,
    pub get_data: String,
    pub extra_data: Option<String>,
    #[serde(default)]
    pub sources: HashMap<String, String>,
    pub default_type: Option<String>,
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default = "MonitorDescriptor::default_importance_field")]
    pub importance: u8,
    #[serde(default)]
    pub services: Vec<String>,
    pub poll_interval: Option<u64>,
    pub aggregation_interval: Option<u64>,
    pub flop_threshold: Option<u32>,
}

impl MonitorDescriptor {
    fn default_importance_field() -> u8 {
        Self::DEFAULT_IMPORTANCE
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExternalMonitorType {
    Usage,
    Status,
}

#[derive(Debug, thiserror::Error)]
pub enum LoaderError {
    #[error("required field missing: {0}")]
    MissingField(&'static str),
    #[error("usage monitor needs 'sources' or 'default_type'")]
    MissingSourcesOrDefaultType,
    #[error("status monitor needs 'states'")]
    MissingStates,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Runs `get_data` (and, on alert, `extra_data`) as shell commands, parsing
/// stdout as a JSON object keyed by source. Parameterized entirely by its
/// config: a single concrete type, not one subtype per `.mon` file.
pub struct ExternalMonitor {
    descriptor: MonitorDescriptor,
    get_data: String,
    extra_data: Option<String>,
}

impl ExternalMonitor {
    /// Validates and constructs one external monitor, running `get_data`
    /// once to discover sources if none were declared. Fails closed: a
    /// validation failure here is the caller's problem to log and skip, not
    /// a reason to abort the whole loader.
    pub async fn from_config(config: ExternalMonitorConfig) -> Result<Self, LoaderError> {
        if config.uid.is_empty() {
            return Err(LoaderError::MissingField("uid"));
        }
        if config.name.is_empty() {
            return Err(LoaderError::MissingField("name"));
        }
        if config.get_data.is_empty() {
            return Err(LoaderError::MissingField("get_data"));
        }

        let kind = match config.monitor_type {
            ExternalMonitorType::Usage => MonitorKind::Usage,
            ExternalMonitorType::Status => MonitorKind::Status,
        };

        let mut sources = config.sources.clone();
        if kind == MonitorKind::Usage && sources.is_empty() {
            let Some(default_type) = &config.default_type else {
                return Err(LoaderError::MissingSourcesOrDefaultType);
            };
            let probe = run_shell_json(&config.get_data).await.unwrap_or_default();
            for key in probe.keys() {
                sources.insert(key.clone(), default_type.clone());
            }
        }

        if kind == MonitorKind::Status {
            if config.states.is_empty() {
                return Err(LoaderError::MissingStates);
            }
            if sources.is_empty() {
                let probe = run_shell_json(&config.get_data).await.unwrap_or_default();
                for key in probe.keys() {
                    sources.insert(key.clone(), String::new());
                }
            }
        }

        let descriptor = MonitorDescriptor {
            uid: config.uid,
            name: config.name,
            kind,
            sources,
            states: config.states,
            importance: MonitorDescriptor::clamp_importance(config.importance),
            poll_interval: config.poll_interval,
            aggregation_interval: config
                .aggregation_interval
                .unwrap_or(MonitorDescriptor::DEFAULT_AGGREGATION_INTERVAL),
            flop_threshold: config
                .flop_threshold
                .unwrap_or(MonitorDescriptor::DEFAULT_FLOP_THRESHOLD),
            pulls_processes: false,
        };

        Ok(Self {
            descriptor,
            get_data: config.get_data,
            extra_data: config.extra_data,
        })
    }
}

async fn run_shell_json(command: &str) -> Option<serde_json::Map<String, serde_json::Value>> {
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .output()
        .await
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let value: serde_json::Value = serde_json::from_slice(&output.stdout).ok()?;
    value.as_object().cloned()
}

#[async_trait]
impl Collector for ExternalMonitor {
    fn descriptor(&self) -> &MonitorDescriptor {
        &self.descriptor
    }

    async fn collect(&self) -> CollectResult {
        let timestamp = chrono::Utc::now().timestamp();
        let interval = self.descriptor.poll_interval.unwrap_or(0);

        let Some(object) = run_shell_json(&self.get_data).await else {
            warn!(uid = %self.descriptor.uid, "get_data produced non-object or unparsable output");
            return Ok(Datapoint::new(HashMap::new(), timestamp, interval));
        };

        let mut readings = HashMap::new();
        for (key, value) in object {
            let observation = match self.descriptor.kind {
                MonitorKind::Usage => value.as_f64().map(Observation::Numeric),
                _ => value.as_str().map(|s| Observation::State(s.to_string())),
            };
            if let Some(observation) = observation {
                readings.insert(key, observation);
            }
        }

        Ok(Datapoint::new(readings, timestamp, interval))
    }

    async fn extra_alert_data(
        &self,
        _source: &str,
    ) -> Option<serde_json::Map<String, serde_json::Value>> {
        let command = self.extra_data.as_ref()?;
        run_shell_json(command).await
    }
}

/// Reads every `.mon` file in `dir`, constructing one `ExternalMonitor` per
/// valid config. A single bad file is logged and skipped: fail-closed per
/// monitor, not per directory, per §4.5.
pub async fn load_external_monitors(dir: &Path) -> anyhow::Result<Vec<Arc<dyn Collector>>> {
    let mut monitors: Vec<Arc<dyn Collector>> = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "external monitors directory unreadable");
            return Ok(monitors);
        }
    };

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("mon") {
            continue;
        }
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to read .mon file");
                continue;
            }
        };
        let config: ExternalMonitorConfig = match serde_json::from_str(&contents) {
            Ok(c) => c,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "failed to parse .mon file");
                continue;
            }
        };
        match ExternalMonitor::from_config(config).await {
            Ok(monitor) => monitors.push(Arc::new(monitor)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "invalid external monitor config");
            }
        }
    }

    Ok(monitors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use tokio::fs;

    fn minimal_usage_config() -> ExternalMonitorConfig {
        ExternalMonitorConfig {
            uid: "ext1".into(),
            name: "external one".into(),
            monitor_type: ExternalMonitorType::Usage,
            get_data: "echo '{\"cpu\": 10}'".into(),
            extra_data: None,
            sources: HashMap::from([("cpu".to_string(), "percent".to_string())]),
            default_type: None,
            states: vec![],
            importance: 5,
            services: vec![],
            poll_interval: Some(10),
            aggregation_interval: None,
            flop_threshold: None,
        }
    }

    #[tokio::test]
    async fn valid_usage_config_builds_monitor() {
        let monitor = ExternalMonitor::from_config(minimal_usage_config()).await.unwrap();
        assert_eq!(monitor.descriptor().uid, "ext1");
        assert_eq!(
            monitor.descriptor().aggregation_interval,
            MonitorDescriptor::DEFAULT_AGGREGATION_INTERVAL
        );
    }

    #[tokio::test]
    async fn missing_uid_fails_validation() {
        let mut config = minimal_usage_config();
        config.uid = String::new();
        let result = ExternalMonitor::from_config(config).await;
        assert!(matches!(result, Err(LoaderError::MissingField("uid"))));
    }

    #[tokio::test]
    async fn status_monitor_requires_states() {
        let mut config = minimal_usage_config();
        config.monitor_type = ExternalMonitorType::Status;
        config.sources = HashMap::from([("service".to_string(), String::new())]);
        let result = ExternalMonitor::from_config(config).await;
        assert!(matches!(result, Err(LoaderError::MissingStates)));
    }

    #[tokio::test]
    async fn collect_runs_get_data_and_parses_json() {
        let monitor = ExternalMonitor::from_config(minimal_usage_config()).await.unwrap();
        let datapoint = monitor.collect().await.unwrap();
        assert_eq!(
            datapoint.readings.get("cpu"),
            Some(&Observation::Numeric(10.0))
        );
    }

    #[tokio::test]
    async fn collect_on_bad_json_yields_empty_datapoint() {
        let mut config = minimal_usage_config();
        config.get_data = "echo 'not json'".into();
        let monitor = ExternalMonitor::from_config(config).await.unwrap();
        let datapoint = monitor.collect().await.unwrap();
        assert!(datapoint.readings.is_empty());
    }

    #[tokio::test]
    async fn load_external_monitors_skips_invalid_files() {
        let dir = tempdir().unwrap();
        fs::write(
            dir.path().join("good.mon"),
            serde_json::to_string(&serde_json::json!({
                "uid": "ext1",
                "name": "good",
                "type": "usage",
                "get_data": "echo '{\"cpu\": 1}'",
                "sources": {"cpu": "percent"},
            }))
            .unwrap(),
        )
        .await
        .unwrap();
        fs::write(dir.path().join("bad.mon"), "not json at all").await.unwrap();

        let monitors = load_external_monitors(dir.path()).await.unwrap();
        assert_eq!(monitors.len(), 1);
    }
}
