//! Exponential backoff with jitter, and the reachability probe that gates
//! each retry. `2^attempt` base delay, carrying a `rand(0,1)` jitter term
//! per §4.6 and capped at attempt 10 rather than at a wall-clock max-delay.

use std::time::Duration;

use rand::Rng;

/// Attempt beyond which the delay no longer grows, per §8 property 6.
pub const MAX_BACKOFF_ATTEMPT: u32 = 10;

/// `delay = 2^attempt + rand(0,1)` seconds, attempt capped at
/// `MAX_BACKOFF_ATTEMPT`.
pub fn backoff_delay(attempt: u32) -> Duration {
    let capped = attempt.min(MAX_BACKOFF_ATTEMPT);
    let base = 2f64.powi(capped as i32);
    let jitter: f64 = rand::rng().random_range(0.0..1.0);
    Duration::from_secs_f64(base + jitter)
}

/// A fixed public endpoint probed with a short timeout before each retry, to
/// confirm the host has any network connectivity at all before re-attempting
/// the actual operation. Probing loops every 5 seconds until it succeeds or
/// the cancellation token fires.
pub async fn wait_for_reachability(
    client: &reqwest::Client,
    probe_url: &str,
    cancel: &tokio_util::sync::CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            return;
        }
        let probe = client
            .get(probe_url)
            .timeout(Duration::from_secs(1))
            .send();
        tokio::select! {
            _ = cancel.cancelled() => return,
            result = probe => {
                if result.is_ok() {
                    return;
                }
            }
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(Duration::from_secs(5)) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_jitter_bound_holds_for_each_attempt() {
        for attempt in 0..=12 {
            let delay = backoff_delay(attempt);
            let capped = attempt.min(MAX_BACKOFF_ATTEMPT);
            let base = 2f64.powi(capped as i32);
            let secs = delay.as_secs_f64();
            assert!(secs >= base, "attempt {attempt}: {secs} < {base}");
            assert!(secs < base + 1.0, "attempt {attempt}: {secs} >= {}", base + 1.0);
        }
    }

    #[test]
    fn backoff_caps_growth_beyond_max_attempt() {
        let at_cap = backoff_delay(MAX_BACKOFF_ATTEMPT);
        let beyond_cap = backoff_delay(MAX_BACKOFF_ATTEMPT + 5);
        let cap_base = 2f64.powi(MAX_BACKOFF_ATTEMPT as i32);
        assert!(at_cap.as_secs_f64() >= cap_base);
        assert!(beyond_cap.as_secs_f64() >= cap_base);
        assert!(beyond_cap.as_secs_f64() < cap_base + 1.0);
    }
}
