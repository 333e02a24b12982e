//! Task Dispatcher: routes inbound commands from the Message Bus Client to
//! the Monitor Kernel, Live Stream Registry, and System Info Provider, per
//! §4.7. Deliveries arrive already acknowledged (ack-before-effect, §5/§8
//! property 7); this module only ever sees the parsed body.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::warn;

use crate::bus::{InboundTask, Publisher};
use crate::kernel::MonitorKernel;
use crate::model::Observation;
use crate::sysinfo_provider::SystemInfoProvider;

#[derive(Debug, Deserialize)]
struct TaskEnvelope {
    id: Option<String>,
    command: TaskCommand,
}

#[derive(Debug, Deserialize)]
struct TaskCommand {
    name: String,
    #[serde(flatten)]
    extra: HashMap<String, Value>,
}

pub struct TaskDispatcher {
    kernel: Arc<MonitorKernel>,
    system_info: Arc<dyn SystemInfoProvider>,
    publisher: Arc<dyn Publisher>,
    user_id: String,
    host_id: String,
}

impl TaskDispatcher {
    pub fn new(
        kernel: Arc<MonitorKernel>,
        system_info: Arc<dyn SystemInfoProvider>,
        publisher: Arc<dyn Publisher>,
        user_id: String,
        host_id: String,
    ) -> Self {
        Self {
            kernel,
            system_info,
            publisher,
            user_id,
            host_id,
        }
    }

    fn primary_exchange(&self) -> String {
        format!("agent.{}", self.user_id)
    }

    /// Drains `rx` until the channel closes (i.e. the bus client's consumer
    /// worker stops), dispatching each task serially. Tasks are independent
    /// of one another; nothing here needs to run concurrently because the
    /// bus-level drain loop is already the sole producer.
    pub async fn run(&self, mut rx: mpsc::Receiver<InboundTask>) {
        while let Some(task) = rx.recv().await {
            self.dispatch(task).await;
        }
    }

    async fn dispatch(&self, task: InboundTask) {
        let envelope: TaskEnvelope = match serde_json::from_value(task.body) {
            Ok(envelope) => envelope,
            Err(err) => {
                warn!(error = %err, "failed to parse task message; dropped");
                return;
            }
        };

        let (routing_key, response) = match envelope.command.name.as_str() {
            "refresh" => self.handle_refresh(&envelope.command.extra).await,
            "expected_update" => self.handle_expected_update(&envelope.command.extra).await,
            "live_data" => self.handle_live_data(&envelope.command.extra).await,
            "com" => (
                "task_complete".to_string(),
                serde_json::json!({ "status": "FAILURE" }),
            ),
            other => {
                warn!(command = %other, "unrecognized task command");
                (
                    "task_complete".to_string(),
                    serde_json::json!({ "status": "NOT_IMPLEMENTED" }),
                )
            }
        };

        // Responses publish to task_complete iff the original task carried a
        // non-null id, unless the routing key was rewritten (refresh).
        let should_publish = envelope.id.is_some() || routing_key != "task_complete";
        if !should_publish {
            return;
        }

        let mut body = response;
        if let Some(map) = body.as_object_mut() {
            map.insert("id".into(), envelope.id.map(Value::String).unwrap_or(Value::Null));
        }

        if let Err(err) = self
            .publisher
            .publish(&self.primary_exchange(), &routing_key, body, false)
            .await
        {
            warn!(error = %err, routing_key, "task response publish failed");
        }
    }

    async fn handle_refresh(&self, extra: &HashMap<String, Value>) -> (String, Value) {
        let item = extra
            .get("item")
            .and_then(|v| v.as_str())
            .unwrap_or("all")
            .to_string();
        let result = self.system_info.pull(&item).await;
        let routing_key = format!("{}.{}.{}", self.user_id, self.host_id, item);
        (
            routing_key,
            serde_json::json!({ "status": "SUCCESS", "data": result }),
        )
    }

    async fn handle_expected_update(&self, extra: &HashMap<String, Value>) -> (String, Value) {
        let monitor = extra.get("monitor").and_then(|v| v.as_str()).unwrap_or_default();
        let expected_value = extra.get("expected").cloned().unwrap_or(Value::Null);

        let mut expected = HashMap::new();
        if let Value::Object(map) = expected_value {
            for (source, value) in map {
                let observation = match value {
                    Value::Number(n) => n.as_f64().map(Observation::Numeric),
                    Value::String(s) => Some(Observation::State(s)),
                    _ => None,
                };
                if let Some(observation) = observation {
                    expected.insert(source, observation);
                }
            }
        }

        let updated = self.kernel.update_expected(monitor, expected).await;
        if !updated {
            warn!(monitor, "expected_update referenced unknown monitor");
        }
        (
            "task_complete".to_string(),
            serde_json::json!({ "status": if updated { "SUCCESS" } else { "FAILURE" } }),
        )
    }

    async fn handle_live_data(&self, extra: &HashMap<String, Value>) -> (String, Value) {
        let action = extra.get("action").and_then(|v| v.as_str()).unwrap_or_default();
        let monitor = extra.get("monitor").and_then(|v| v.as_str()).unwrap_or_default();
        let routing_key = extra
            .get("routing_key")
            .and_then(|v| v.as_str())
            .unwrap_or_default();

        let result = match action {
            "start" => self.kernel.start_live_stream(monitor, routing_key).await,
            "stop" => self
                .kernel
                .stop_live_stream(monitor, routing_key)
                .await
                .map(|_| ()),
            other => {
                warn!(action = %other, "unrecognized live_data action");
                Ok(())
            }
        };

        match result {
            Ok(()) => (
                "task_complete".to_string(),
                serde_json::json!({ "status": "SUCCESS" }),
            ),
            Err(err) => {
                warn!(error = %err, monitor, "live_data referenced vanished monitor");
                (
                    "task_complete".to_string(),
                    serde_json::json!({ "status": "FAILURE" }),
                )
            }
        }
    }
}
