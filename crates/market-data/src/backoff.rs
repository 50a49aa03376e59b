//! Jittered exponential backoff for establishing the realtime connection.

use config::ReconnectConfig;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
}

impl ReconnectPolicy {
    pub fn new(max_attempts: usize, base_delay_ms: u64, max_delay_ms: u64, jitter_pct: f64) -> Self {
        let base_delay_ms = base_delay_ms.max(1);
        Self {
            max_attempts: max_attempts.max(1),
            base_delay_ms,
            max_delay_ms: max_delay_ms.max(base_delay_ms),
            jitter_pct: jitter_pct.clamp(0.0, 1.0),
        }
    }

    pub fn from_config(config: &ReconnectConfig) -> Self {
        Self::new(
            config.max_attempts,
            config.base_delay_ms,
            config.max_delay_ms,
            config.jitter_pct,
        )
    }

    /// Delay before retry number `attempt` (zero-based).
    pub fn next_delay(&self, attempt: usize) -> Duration {
        let exp = 2_u64.saturating_pow(attempt as u32);
        let delay = self.base_delay_ms.saturating_mul(exp).min(self.max_delay_ms);

        if self.jitter_pct == 0.0 {
            return Duration::from_millis(delay);
        }

        let spread = (delay as f64 * self.jitter_pct) as i64;
        let delta = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_millis(delay.saturating_add_signed(delta))
    }

    /// Run `op` until it succeeds or attempts run out; the last error is returned.
    pub async fn retry_async<F, Fut, T, E>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut attempt = 0;
        loop {
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt += 1;
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = self.next_delay(attempt - 1);
                    warn!(
                        attempt,
                        max_attempts = self.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Connect attempt failed, backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ReconnectConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_new_clamps_inputs() {
        let policy = ReconnectPolicy::new(0, 0, 0, 3.0);
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.base_delay_ms, 1);
        assert_eq!(policy.max_delay_ms, 1);
        assert_eq!(policy.jitter_pct, 1.0);
    }

    #[test]
    fn test_delay_doubles_then_caps() {
        let policy = ReconnectPolicy::new(5, 500, 3_000, 0.0);
        let delays: Vec<u128> = (0..5).map(|a| policy.next_delay(a).as_millis()).collect();
        assert_eq!(delays, vec![500, 1_000, 2_000, 3_000, 3_000]);
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = ReconnectPolicy::new(5, 1_000, 1_000, 0.2);
        for _ in 0..50 {
            let ms = policy.next_delay(0).as_millis();
            assert!((800..=1_200).contains(&ms), "delay {} out of band", ms);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_until_success() {
        let policy = ReconnectPolicy::new(5, 10, 100, 0.0);
        let calls = Arc::new(AtomicUsize::new(0));

        let counter = calls.clone();
        let result: Result<&str, String> = policy
            .retry_async(|attempt| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    if attempt < 2 {
                        Err(format!("refused #{}", attempt))
                    } else {
                        Ok("connected")
                    }
                }
            })
            .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up_with_last_error() {
        let policy = ReconnectPolicy::new(3, 10, 100, 0.0);

        let result: Result<(), String> = policy
            .retry_async(|attempt| async move { Err(format!("refused #{}", attempt)) })
            .await;

        assert_eq!(result, Err("refused #2".to_string()));
    }
}
