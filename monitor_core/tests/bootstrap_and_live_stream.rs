//! Integration coverage for the two scenarios that need more than one
//! module in isolation: bootstrap's capacity-exhausted response, and a
//! full live-stream start/poll/stop cycle through the kernel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use monitor_core::bus::{bootstrap, BootstrapConfig, HmacSha1Signer, Publisher};
use monitor_core::collector::{CollectResult, Collector};
use monitor_core::error::AgentError;
use monitor_core::kernel::{MonitorHandle, MonitorKernel};
use monitor_core::model::{Datapoint, MonitorDescriptor, MonitorKind, Observation};
use monitor_core::scheduler::Scheduler;
use monitor_core::sysinfo_provider::SysinfoProvider;

/// S5: bootstrap responds 409, so the agent must fail with `AgentError::Capacity`
/// (which maps to exit code 409 via `AgentError::exit_code`) without ever
/// attempting an AMQP connection — the caller never gets credentials to connect with.
#[tokio::test]
async fn bootstrap_409_maps_to_capacity_exit_code() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/amqp/account"))
        .respond_with(ResponseTemplate::new(409))
        .mount(&server)
        .await;

    let config = BootstrapConfig {
        remote_host: server.address().to_string(),
        fqdn: "host1.example.com".to_string(),
        ca_bundle_path: None,
        disable_ssl_verification: true,
    };
    let signer = HmacSha1Signer::new("key", "secret");
    let cancel = CancellationToken::new();

    let result = bootstrap(&config, &signer, &cancel).await;
    match result {
        Err(AgentError::Capacity) => {
            assert_eq!(AgentError::Capacity.exit_code(), Some(409));
        }
        other => panic!("expected Capacity error, got {other:?}"),
    }
}

struct FakePublisher {
    published: StdMutex<Vec<(String, String, Value)>>,
}

#[async_trait]
impl Publisher for FakePublisher {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Value,
        _retry: bool,
    ) -> anyhow::Result<()> {
        self.published
            .lock()
            .unwrap()
            .push((exchange.to_string(), routing_key.to_string(), body));
        Ok(())
    }
}

struct CountingCollector {
    descriptor: MonitorDescriptor,
    next: StdMutex<f64>,
}

#[async_trait]
impl Collector for CountingCollector {
    fn descriptor(&self) -> &MonitorDescriptor {
        &self.descriptor
    }

    async fn collect(&self) -> CollectResult {
        let mut next = self.next.lock().unwrap();
        let value = *next;
        *next += 1.0;
        let mut readings = HashMap::new();
        readings.insert("cpu".to_string(), Observation::Numeric(value));
        Ok(Datapoint::new(readings, value as i64, 1))
    }
}

fn descriptor() -> MonitorDescriptor {
    MonitorDescriptor {
        uid: "m1".into(),
        name: "test".into(),
        kind: MonitorKind::Usage,
        sources: HashMap::from([("cpu".to_string(), "percent".to_string())]),
        states: vec![],
        importance: 5,
        poll_interval: Some(1),
        aggregation_interval: 1800,
        flop_threshold: 6,
        pulls_processes: false,
    }
}

/// S6: `live_data/start` registers a sink and immediately publishes the
/// current buffer; subsequent polls each publish a `{monitor_id, data}`
/// frame under the registered routing key; `live_data/stop` removes the
/// sink and silences further frames.
#[tokio::test]
async fn live_stream_start_poll_stop_cycle() {
    let publisher = Arc::new(FakePublisher {
        published: StdMutex::new(Vec::new()),
    });
    let system_info = Arc::new(SysinfoProvider::new());
    let kernel = Arc::new(MonitorKernel::new(
        Scheduler::new(),
        publisher.clone(),
        system_info,
        "host1".to_string(),
        "user1".to_string(),
    ));
    let collector = Arc::new(CountingCollector {
        descriptor: descriptor(),
        next: StdMutex::new(1.0),
    });
    let handle = Arc::new(MonitorHandle::new(collector));
    kernel.register(handle.clone()).await;

    kernel.start_live_stream("m1", "r1").await.unwrap();
    {
        let published = publisher.published.lock().unwrap();
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].1, "r1");
    }

    for _ in 0..3 {
        kernel.poll_tick(&handle).await.unwrap();
    }

    {
        let published = publisher.published.lock().unwrap();
        // One bootstrap frame plus three poll frames, all under "r1".
        assert_eq!(published.len(), 4);
        for (_, routing_key, body) in published.iter().skip(1) {
            assert_eq!(routing_key, "r1");
            assert!(body.get("monitor_id").is_some());
            assert!(body.get("data").is_some());
        }
    }

    let stopped = kernel.stop_live_stream("m1", "r1").await.unwrap();
    assert!(stopped);

    kernel.poll_tick(&handle).await.unwrap();
    let published = publisher.published.lock().unwrap();
    assert_eq!(published.len(), 4, "no further frames after stop");
}
