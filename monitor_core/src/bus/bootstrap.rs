//! Credential bootstrap: the signed HTTPS GET that exchanges the operator's
//! access token for AMQP connection credentials, per spec §4.6/§6.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::backoff::{backoff_delay, wait_for_reachability, MAX_BACKOFF_ATTEMPT};
use super::signer::RequestSigner;
use crate::error::AgentError;

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapCredentials {
    pub amqp_password: String,
    pub user_id: String,
    pub host_id: String,
}

/// A fixed, low-cost endpoint used only to confirm outbound connectivity
/// before retrying bootstrap; never the actual control-plane host.
const REACHABILITY_PROBE_URL: &str = "https://1.1.1.1";

pub struct BootstrapConfig {
    pub remote_host: String,
    pub fqdn: String,
    pub ca_bundle_path: Option<std::path::PathBuf>,
    pub disable_ssl_verification: bool,
}

fn build_http_client(config: &BootstrapConfig) -> anyhow::Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder();
    if config.disable_ssl_verification {
        warn!("TLS verification disabled for bootstrap requests");
        builder = builder.danger_accept_invalid_certs(true);
    } else if let Some(path) = &config.ca_bundle_path {
        let pem = std::fs::read(path)?;
        let cert = reqwest::Certificate::from_pem(&pem)?;
        builder = builder.add_root_certificate(cert);
    }
    Ok(builder.build()?)
}

/// Performs the signed GET with exponential backoff and a reachability probe
/// before each retry, per §4.6. Returns the parsed credentials on success, or
/// an `AgentError` already categorized for the caller to map onto an exit
/// code (§6's exit-code table).
pub async fn bootstrap(
    config: &BootstrapConfig,
    signer: &dyn RequestSigner,
    cancel: &CancellationToken,
) -> Result<BootstrapCredentials, AgentError> {
    let client = build_http_client(config)
        .map_err(|e| AgentError::Config(format!("failed to build HTTP client: {e}")))?;
    let url = format!(
        "https://{}/amqp/account?hostname={}",
        config.remote_host, config.fqdn
    );

    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(AgentError::Transient("agent stopping before bootstrap completed".into()));
        }

        let signed = signer.sign_get(&url);
        let response = client
            .get(&signed.url)
            .header("Authorization", signed.authorization_header)
            .send()
            .await;

        match response {
            Ok(resp) => {
                let status = resp.status().as_u16();
                match status {
                    200 => {
                        let body: serde_json::Value = resp
                            .json()
                            .await
                            .map_err(|e| AgentError::Config(format!("invalid bootstrap body: {e}")))?;
                        let creds: BootstrapCredentials = serde_json::from_value(body.clone())
                            .map_err(|_| {
                                AgentError::Config(
                                    "bootstrap response missing amqp_password/user_id/host_id".into(),
                                )
                            })?;
                        info!(user_id = %creds.user_id, host_id = %creds.host_id, "bootstrap succeeded");
                        return Ok(creds);
                    }
                    409 => {
                        error!("bootstrap reported license exhausted (409)");
                        return Err(AgentError::Capacity);
                    }
                    401 | 403 => {
                        error!(status, "bootstrap authorization failed");
                        return Err(AgentError::Authorization { status });
                    }
                    other => {
                        error!(status = other, "bootstrap failed with unexpected status");
                        return Err(AgentError::Authorization { status: other });
                    }
                }
            }
            Err(err) => {
                warn!(error = %err, attempt, "bootstrap request failed, backing off");
                if attempt >= MAX_BACKOFF_ATTEMPT {
                    return Err(AgentError::Transient(format!(
                        "bootstrap exhausted retries: {err}"
                    )));
                }
                let delay = backoff_delay(attempt);
                attempt += 1;
                tokio::select! {
                    _ = cancel.cancelled() => {
                        return Err(AgentError::Transient("agent stopping during backoff".into()));
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
                wait_for_reachability(&client, REACHABILITY_PROBE_URL, cancel).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_deserialize_from_expected_shape() {
        let body = serde_json::json!({
            "amqp_password": "pw",
            "user_id": "u1",
            "host_id": "h1",
        });
        let creds: BootstrapCredentials = serde_json::from_value(body).unwrap();
        assert_eq!(creds.user_id, "u1");
        assert_eq!(creds.host_id, "h1");
    }

    #[test]
    fn credentials_missing_field_fails_to_deserialize() {
        let body = serde_json::json!({ "amqp_password": "pw", "user_id": "u1" });
        let result: Result<BootstrapCredentials, _> = serde_json::from_value(body);
        assert!(result.is_err());
    }
}
