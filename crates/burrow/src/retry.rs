use std::{future::Future, time::Duration};
use tracing::debug;

/// Bounded exponential backoff across a list of equivalent endpoints.
#[derive(Debug, Clone)]
pub struct Backoff {
    /// Full passes over the endpoint list.
    pub rounds: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Upper bound of the random delay added to each sleep.
    pub jitter: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            rounds: 3,
            base: Duration::from_millis(400),
            cap: Duration::from_secs(4),
            jitter: Duration::from_millis(250),
        }
    }
}

impl Backoff {
    /// No sleeping; used by tests and by callers that must not stall.
    pub const fn immediate(rounds: u32) -> Self {
        Self {
            rounds,
            base: Duration::ZERO,
            cap: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    fn delay_after(&self, round: u32) -> Duration {
        let factor = 1_u32.checked_shl(round.min(16)).unwrap_or(u32::MAX);
        let exp = self.base.saturating_mul(factor).min(self.cap);
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        if jitter_ms == 0 {
            return exp;
        }
        exp.saturating_add(Duration::from_millis(
            rand::random::<u64>() % jitter_ms.saturating_add(1),
        ))
    }
}

/// Run `op` against each endpoint in order until one succeeds. After a full failed pass,
/// sleep and start over, up to `backoff.rounds` passes. The last error is returned.
pub async fn first_success<T, Fut>(
    endpoints: &[String],
    backoff: &Backoff,
    label: &'static str,
    mut op: impl FnMut(String) -> Fut + Send,
) -> eyre::Result<T>
where
    Fut: Future<Output = eyre::Result<T>> + Send,
{
    if endpoints.is_empty() {
        eyre::bail!("{label}: no endpoints configured");
    }
    let rounds = backoff.rounds.max(1);
    let mut last_err = None;

    for round in 0..rounds {
        for url in endpoints {
            match op(url.clone()).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    debug!(endpoint = %url, round, error = %format!("{e:#}"), "{label} failed");
                    last_err = Some(e);
                }
            }
        }
        if round + 1 < rounds {
            tokio::time::sleep(backoff.delay_after(round)).await;
        }
    }

    Err(last_err
        .unwrap_or_else(|| eyre::eyre!("no attempts made"))
        .wrap_err(label))
}
