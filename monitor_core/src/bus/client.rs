//! The Message Bus Client: connection lifecycle, consumer drain, and the
//! publisher with retry/backoff, per spec §4.6/§6.
//!
//! `lapin` is the AMQP 0.9.1 client backing this module. No crate in the
//! retrieval corpus speaks AMQP; `lapin` is the standard, actively
//! maintained async implementation and is the only way to honor the literal
//! exchange/queue/routing-key/TLS-port semantics this spec names without
//! fabricating a protocol layer (see DESIGN.md).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions, BasicPublishOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Connection, ConnectionProperties};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backoff::backoff_delay;
use crate::scheduler::Scheduler;

/// Abstract publish surface the Monitor Kernel, Alert Engine, and Task
/// Dispatcher all depend on, so none of them need to know about `lapin`
/// directly (Design Note §9: cross-context state sharing through an explicit
/// interface, not a shared global).
#[async_trait]
pub trait Publisher: Send + Sync {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        body: Value,
        retry: bool,
    ) -> anyhow::Result<()>;
}

/// An inbound task delivery, already acknowledged by the time the dispatcher
/// sees it (per the ack-before-effect ordering guarantee in §5/§8 property 7).
#[derive(Debug, Clone)]
pub struct InboundTask {
    pub body: Value,
}

struct ChannelState {
    connection: Connection,
    channel: lapin::Channel,
}

/// Owns the single long-lived AMQP connection and exposes the publish,
/// consume, and keepalive behaviors described in §4.6.
pub struct MessageBusClient {
    amqp_uri: String,
    pub user_id: String,
    pub host_id: String,
    state: Mutex<Option<ChannelState>>,
    cancel: CancellationToken,
}

impl MessageBusClient {
    /// `amqp_uri` must already encode TLS (`amqps://...:5671`) and the
    /// bootstrap-issued credentials.
    pub fn new(amqp_uri: String, user_id: String, host_id: String, cancel: CancellationToken) -> Self {
        Self {
            amqp_uri,
            user_id,
            host_id,
            state: Mutex::new(None),
            cancel,
        }
    }

    pub fn primary_exchange(&self) -> String {
        format!("agent.{}", self.user_id)
    }

    pub fn reports_exchange(&self) -> String {
        format!("agent.{}.reports", self.user_id)
    }

    pub fn tasks_queue(&self) -> String {
        format!("agent.{}.tasks.{}", self.user_id, self.host_id)
    }

    pub async fn connect(&self) -> anyhow::Result<()> {
        let connection =
            Connection::connect(&self.amqp_uri, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        *self.state.lock().await = Some(ChannelState { connection, channel });
        info!("AMQP connection established");
        Ok(())
    }

    /// Best-effort release followed by a fresh `connect()` with backoff,
    /// retried until it succeeds or the client is told to stop.
    async fn reconnect(&self) {
        {
            let mut guard = self.state.lock().await;
            if let Some(state) = guard.take() {
                let _ = state.channel.close(200, "reconnecting").await;
                let _ = state.connection.close(200, "reconnecting").await;
            }
        }
        let mut attempt: u32 = 0;
        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.connect().await {
                Ok(()) => return,
                Err(err) => {
                    warn!(error = %err, attempt, "AMQP reconnect failed, backing off");
                    let delay = backoff_delay(attempt);
                    attempt = attempt.saturating_add(1);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// On shutdown, release is best-effort and errors are ignored, per §4.6.
    pub async fn close(&self) {
        let mut guard = self.state.lock().await;
        if let Some(state) = guard.take() {
            let _ = state.channel.close(200, "shutting down").await;
            let _ = state.connection.close(200, "shutting down").await;
        }
    }

    /// Spawns the dedicated drain worker (§4.1 `in_thread`) that consumes
    /// `tasks_queue()` until told to stop, forwarding each already-acked
    /// delivery to `dispatch_tx`.
    pub fn start_consumer(self: &Arc<Self>, scheduler: &Scheduler, dispatch_tx: mpsc::Sender<InboundTask>) {
        let client = Arc::clone(self);
        scheduler.in_thread(move || async move {
            client.drain_loop(dispatch_tx).await;
        });
    }

    async fn drain_loop(self: Arc<Self>, dispatch_tx: mpsc::Sender<InboundTask>) {
        loop {
            if self.cancel.is_cancelled() {
                return;
            }

            let channel = {
                let guard = self.state.lock().await;
                guard.as_ref().map(|s| s.channel.clone())
            };
            let Some(channel) = channel else {
                self.reconnect().await;
                continue;
            };

            let queue = self.tasks_queue();
            let consumer = channel
                .basic_consume(
                    &queue,
                    "agent-consumer",
                    BasicConsumeOptions::default(),
                    FieldTable::default(),
                )
                .await;

            let mut consumer = match consumer {
                Ok(c) => c,
                Err(err) => {
                    warn!(error = %err, "failed to open consumer, reconnecting");
                    self.reconnect().await;
                    continue;
                }
            };

            loop {
                if self.cancel.is_cancelled() {
                    return;
                }
                let next = tokio::time::timeout(Duration::from_secs(1), consumer.next()).await;
                match next {
                    Err(_elapsed) => continue, // 1s poll of the running flag, per §5
                    Ok(None) => break,          // consumer stream ended; reconnect
                    Ok(Some(Err(err))) => {
                        warn!(error = %err, "AMQP delivery error, reconnecting");
                        break;
                    }
                    Ok(Some(Ok(delivery))) => {
                        // Ack before effect: acknowledge immediately, then parse.
                        if let Err(err) = delivery.ack(BasicAckOptions::default()).await {
                            warn!(error = %err, "failed to ack delivery");
                        }
                        match serde_json::from_slice::<Value>(&delivery.data) {
                            Ok(body) => {
                                if dispatch_tx.send(InboundTask { body }).await.is_err() {
                                    return;
                                }
                            }
                            Err(err) => {
                                warn!(error = %err, "failed to parse task message; dropped");
                            }
                        }
                    }
                }
            }

            if self.cancel.is_cancelled() {
                return;
            }
            self.reconnect().await;
        }
    }

    /// Publishes an empty-body `ping` on the primary exchange. Never retries.
    pub async fn ping(&self) -> anyhow::Result<()> {
        self.publish(&self.primary_exchange(), "ping", Value::Object(Default::default()), false)
            .await
    }

    /// Schedules the keepalive ping every `ping_interval` seconds.
    pub fn schedule_keepalive(self: &Arc<Self>, scheduler: &Scheduler, ping_interval: Duration) {
        let client = Arc::clone(self);
        scheduler.every(ping_interval, ping_interval, move || {
            let client = Arc::clone(&client);
            async move {
                if let Err(err) = client.ping().await {
                    warn!(error = %err, "keepalive ping failed");
                }
                Ok(())
            }
        });
    }
}

#[async_trait]
impl Publisher for MessageBusClient {
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        mut body: Value,
        retry: bool,
    ) -> anyhow::Result<()> {
        if let Value::Object(map) = &mut body {
            map.insert("user_id".into(), Value::String(self.user_id.clone()));
            map.insert(
                "timestamp".into(),
                Value::Number(chrono::Utc::now().timestamp().into()),
            );
        }
        let payload = serde_json::to_vec(&body)?;

        let channel = {
            let guard = self.state.lock().await;
            guard.as_ref().map(|s| s.channel.clone())
        };

        let Some(channel) = channel else {
            anyhow::bail!("AMQP channel not connected");
        };

        let result = channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions::default(),
                &payload,
                BasicProperties::default(),
            )
            .await;

        match result {
            Ok(confirm) => {
                confirm.await?;
                Ok(())
            }
            Err(err) => {
                error!(error = %err, exchange, routing_key, "publish failed, reconnecting");
                self.reconnect().await;
                if retry {
                    let channel = {
                        let guard = self.state.lock().await;
                        guard.as_ref().map(|s| s.channel.clone())
                    };
                    if let Some(channel) = channel {
                        let confirm = channel
                            .basic_publish(
                                exchange,
                                routing_key,
                                BasicPublishOptions::default(),
                                &payload,
                                BasicProperties::default(),
                            )
                            .await?;
                        confirm.await?;
                        return Ok(());
                    }
                }
                Err(err.into())
            }
        }
    }
}
