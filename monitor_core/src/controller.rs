//! Controller: binds every component at startup in the order specified by
//! §4.8, and propagates shutdown through the scheduler's cancellation token.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::builtin::{LogTailMonitor, ProcessCountMonitor, ResourceMonitor, ServiceStatusMonitor};
use crate::bus::{bootstrap, BootstrapConfig, HmacSha1Signer, MessageBusClient};
use crate::collector::Collector;
use crate::config::AgentConfig;
use crate::dispatcher::TaskDispatcher;
use crate::error::AgentError;
use crate::kernel::{MonitorHandle, MonitorKernel};
use crate::loader::load_external_monitors;
use crate::scheduler::Scheduler;
use crate::sysinfo_provider::{SysinfoProvider, SystemInfoProvider};

/// A fixed, low-cost endpoint probed to confirm the host has outbound
/// connectivity before attempting bootstrap at all, per §4.8 step 1.
const REACHABILITY_PROBE_URL: &str = "https://1.1.1.1";

/// Seam for the daemonization/service-wrapping concerns §1 names as external
/// collaborators (PID files, fork/detach, Windows service harness). The
/// Controller calls `on_shutdown` as its last shutdown step; the default
/// implementation does nothing, since this crate ships no daemon wrapper of
/// its own.
pub trait DaemonHooks: Send + Sync {
    fn on_shutdown(&self) {}
}

struct NoopDaemonHooks;
impl DaemonHooks for NoopDaemonHooks {}

pub struct Controller {
    config: AgentConfig,
    fqdn: String,
    scheduler: Scheduler,
    kernel: Option<Arc<MonitorKernel>>,
    bus: Option<Arc<MessageBusClient>>,
    daemon_hooks: Arc<dyn DaemonHooks>,
}

impl Controller {
    pub fn new(config: AgentConfig, fqdn: String) -> Self {
        Self::with_daemon_hooks(config, fqdn, Arc::new(NoopDaemonHooks))
    }

    /// As `new`, but with a caller-supplied daemonization seam (PID-file
    /// removal, service-manager notification, ...) invoked during shutdown.
    pub fn with_daemon_hooks(config: AgentConfig, fqdn: String, daemon_hooks: Arc<dyn DaemonHooks>) -> Self {
        Self {
            config,
            fqdn,
            scheduler: Scheduler::new(),
            kernel: None,
            bus: None,
            daemon_hooks,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.scheduler.cancellation_token()
    }

    /// Runs the full startup sequence from §4.8. On success the agent is
    /// fully wired and ticking; this only returns once startup completes;
    /// the caller awaits `cancellation_token().cancelled()` to block for the
    /// life of the process.
    pub async fn start(&mut self) -> Result<(), AgentError> {
        let system_info: Arc<dyn SystemInfoProvider> = Arc::new(SysinfoProvider::new());

        if self.config.local_only {
            info!("local_only set: skipping network reachability wait and bootstrap");
            return self.start_local_only(system_info).await;
        }

        // Step 1: block until the public network is reachable.
        let probe_client = reqwest::Client::new();
        crate::bus::backoff::wait_for_reachability(
            &probe_client,
            REACHABILITY_PROBE_URL,
            &self.cancellation_token(),
        )
        .await;

        // Step 2: bootstrap credentials and open the AMQP connection.
        let signer = HmacSha1Signer::new(
            self.config.consumer_key.clone(),
            self.config.consumer_secret.clone(),
        );
        let bootstrap_config = BootstrapConfig {
            remote_host: self.config.remote_host.clone(),
            fqdn: self.fqdn.clone(),
            ca_bundle_path: self.config.ca_bundle_path.clone().map(PathBuf::from),
            disable_ssl_verification: self.config.disable_ssl_verification,
        };
        let creds = bootstrap(&bootstrap_config, &signer, &self.cancellation_token()).await?;

        let amqp_uri = format!(
            "amqps://{}:{}@{}:5671/%2f",
            creds.user_id, creds.amqp_password, self.config.remote_host
        );
        let bus = Arc::new(MessageBusClient::new(
            amqp_uri,
            creds.user_id.clone(),
            creds.host_id.clone(),
            self.cancellation_token(),
        ));
        bus.connect()
            .await
            .map_err(|e| AgentError::Transient(format!("failed to open AMQP connection: {e}")))?;
        self.bus = Some(Arc::clone(&bus));

        self.wire_and_start(system_info, bus.clone(), creds.user_id, creds.host_id)
            .await
    }

    /// Smoke-testing path: wires the kernel and built-in monitors without any
    /// network/bus activity, for running monitors standalone.
    async fn start_local_only(&mut self, system_info: Arc<dyn SystemInfoProvider>) -> Result<(), AgentError> {
        struct NullPublisher;
        #[async_trait::async_trait]
        impl crate::bus::Publisher for NullPublisher {
            async fn publish(
                &self,
                _exchange: &str,
                _routing_key: &str,
                _body: serde_json::Value,
                _retry: bool,
            ) -> anyhow::Result<()> {
                Ok(())
            }
        }
        let publisher: Arc<dyn crate::bus::Publisher> = Arc::new(NullPublisher);
        let kernel = Arc::new(MonitorKernel::new(
            self.scheduler.clone(),
            publisher,
            system_info.clone(),
            "local".to_string(),
            "local".to_string(),
        ));
        self.register_monitors(&kernel, system_info).await;
        kernel.start_all().await;
        self.kernel = Some(kernel);
        Ok(())
    }

    async fn wire_and_start(
        &mut self,
        system_info: Arc<dyn SystemInfoProvider>,
        bus: Arc<MessageBusClient>,
        user_id: String,
        host_id: String,
    ) -> Result<(), AgentError> {
        let kernel = Arc::new(MonitorKernel::new(
            self.scheduler.clone(),
            bus.clone(),
            system_info.clone(),
            host_id.clone(),
            user_id.clone(),
        ));

        // Step 3: load monitors (built-in + external).
        self.register_monitors(&kernel, system_info.clone()).await;

        // Step 4: register/start each monitor's polling + aggregation loops.
        kernel.start_all().await;
        self.kernel = Some(Arc::clone(&kernel));

        // Step 5: publish a one-shot startup info dump.
        let descriptors: Vec<_> = kernel
            .all()
            .await
            .iter()
            .map(|h| h.descriptor().clone())
            .collect();
        let startup_payload = serde_json::json!({
            "host_id": host_id,
            "monitors": descriptors,
        });
        let _ = bus
            .publish(&bus.primary_exchange(), "startup", startup_payload, false)
            .await;

        // Step 6: schedule the keepalive ping.
        bus.schedule_keepalive(&self.scheduler, Duration::from_secs(self.config.ping_interval_seconds));

        // Task dispatcher: consumes inbound tasks off the bus.
        let (dispatch_tx, dispatch_rx) = mpsc::channel(256);
        bus.start_consumer(&self.scheduler, dispatch_tx);
        let dispatcher = TaskDispatcher::new(
            Arc::clone(&kernel),
            system_info,
            bus.clone(),
            user_id,
            host_id,
        );
        tokio::spawn(async move {
            dispatcher.run(dispatch_rx).await;
        });

        // Step 7: enter the scheduler (the caller awaits cancellation).
        Ok(())
    }

    async fn register_monitors(&self, kernel: &Arc<MonitorKernel>, system_info: Arc<dyn SystemInfoProvider>) {
        let resource = ResourceMonitor::new(system_info.clone(), 10).await;
        kernel
            .register(Arc::new(MonitorHandle::new(Arc::new(resource))))
            .await;

        let process_count = ProcessCountMonitor::new(system_info.clone(), 30);
        kernel
            .register(Arc::new(MonitorHandle::new(Arc::new(process_count))))
            .await;

        if let Some(path) = &self.config.log_tail_path {
            let log_tail = LogTailMonitor::new(
                "builtin.log_tail",
                "Log tail",
                PathBuf::from(path),
                30,
            );
            kernel
                .register(Arc::new(MonitorHandle::new(Arc::new(log_tail))))
                .await;
        }

        if !self.config.watched_services.is_empty() {
            let service_status = ServiceStatusMonitor::new(
                "builtin.service_status",
                "Service status",
                self.config.watched_services.clone(),
                system_info.clone(),
                30,
            );
            kernel
                .register(Arc::new(MonitorHandle::new(Arc::new(service_status))))
                .await;
        }

        if let Some(dir) = &self.config.external_monitors_dir {
            let external = load_external_monitors(&PathBuf::from(dir)).await.unwrap_or_default();
            for collector in external {
                self.register_dyn(kernel, collector).await;
            }
        }
    }

    async fn register_dyn(&self, kernel: &Arc<MonitorKernel>, collector: Arc<dyn Collector>) {
        kernel.register(Arc::new(MonitorHandle::new(collector))).await;
    }

    /// Orderly shutdown: mark stopping, release AMQP (best-effort), cancel
    /// scheduled tasks, then invoke the daemon-hooks seam (PID-file removal
    /// is the external daemon collaborator's responsibility per §1; the
    /// default hook is a no-op).
    pub async fn shutdown(&self) {
        info!("shutting down: releasing AMQP connection and cancelling scheduled tasks");
        self.scheduler.shutdown();
        if let Some(bus) = &self.bus {
            bus.close().await;
        }
        self.daemon_hooks.on_shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct SpyDaemonHooks {
        called: Arc<AtomicBool>,
    }

    impl DaemonHooks for SpyDaemonHooks {
        fn on_shutdown(&self) {
            self.called.store(true, Ordering::SeqCst);
        }
    }

    fn sample_config() -> AgentConfig {
        AgentConfig {
            consumer_key: "key".into(),
            consumer_secret: "secret".into(),
            remote_host: "control.example.com".into(),
            ca_bundle_path: None,
            disable_ssl_verification: false,
            external_monitors_dir: None,
            ping_interval_seconds: 120,
            default_aggregation_interval_seconds: 1800,
            default_flop_threshold: 6,
            local_only: true,
            log_tail_path: None,
            watched_services: Vec::new(),
        }
    }

    #[tokio::test]
    async fn shutdown_invokes_daemon_hooks() {
        let called = Arc::new(AtomicBool::new(false));
        let hooks = Arc::new(SpyDaemonHooks {
            called: called.clone(),
        });
        let controller = Controller::with_daemon_hooks(sample_config(), "host1".to_string(), hooks);
        controller.shutdown().await;
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn local_only_start_registers_builtin_monitors_without_network() {
        let mut controller = Controller::new(sample_config(), "host1".to_string());
        controller.start().await.unwrap();
        let kernel = controller.kernel.as_ref().unwrap();
        let uids: Vec<_> = kernel
            .all()
            .await
            .iter()
            .map(|h| h.descriptor().uid.clone())
            .collect();
        assert!(uids.contains(&"builtin.resource".to_string()));
        assert!(uids.contains(&"builtin.process_count".to_string()));
        controller.shutdown().await;
    }
}
