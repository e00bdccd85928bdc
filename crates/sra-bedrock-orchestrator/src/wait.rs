//! Polling for resources that become usable some time after creation
//!
//! A freshly created state table only accepts writes once its status turns
//! `ACTIVE`. [`poll_until_ready`] re-runs a readiness probe on a jittered
//! exponential schedule until it reports ready, fails, or the deadline passes.

use anyhow::Result;
use backon::{BackoffBuilder, ExponentialBuilder};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Probe schedule
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub first_delay: Duration,
    pub max_delay: Duration,
    /// Overall deadline, probes included
    pub deadline: Duration,
}

impl PollSchedule {
    /// Table creation takes seconds to a few minutes
    pub const STATE_TABLE: Self = Self {
        first_delay: Duration::from_secs(1),
        max_delay: Duration::from_secs(10),
        deadline: Duration::from_secs(300),
    };
}

/// Run `probe` until it returns `Ok(true)`.
///
/// Probe errors end the wait immediately. Hitting the deadline is an error
/// naming `what`.
pub async fn poll_until_ready<F, Fut>(schedule: PollSchedule, what: &str, probe: F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let delays = ExponentialBuilder::default()
        .with_min_delay(schedule.first_delay)
        .with_max_delay(schedule.max_delay)
        .with_jitter()
        .without_max_times()
        .build();

    let polling = async {
        let mut probes = 0u32;
        for delay in std::iter::once(Duration::ZERO).chain(delays) {
            tokio::time::sleep(delay).await;
            probes += 1;
            match probe().await {
                Ok(true) => {
                    debug!(resource = %what, probes, "Ready");
                    return Ok(());
                }
                Ok(false) => debug!(resource = %what, probes, next_ms = delay.as_millis(), "Not ready yet"),
                Err(e) => {
                    warn!(resource = %what, probes, error = %e, "Readiness probe failed");
                    return Err(e);
                }
            }
        }
        anyhow::bail!("Gave up polling {what}")
    };

    match tokio::time::timeout(schedule.deadline, polling).await {
        Ok(result) => result,
        Err(_) => anyhow::bail!("{what} was not ready within {:?}", schedule.deadline),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    const FAST: PollSchedule = PollSchedule {
        first_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        deadline: Duration::from_secs(5),
    };

    #[tokio::test]
    async fn test_ready_on_third_probe() {
        let probes = AtomicU32::new(0);
        poll_until_ready(FAST, "sra_state", || async {
            Ok(probes.fetch_add(1, Ordering::SeqCst) >= 2)
        })
        .await
        .unwrap();
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_probe_error_ends_wait() {
        let result = poll_until_ready(FAST, "sra_state", || async {
            anyhow::bail!("ResourceNotFoundException")
        })
        .await;
        assert!(result.unwrap_err().to_string().contains("ResourceNotFoundException"));
    }

    #[tokio::test]
    async fn test_deadline() {
        let schedule = PollSchedule {
            deadline: Duration::from_millis(20),
            ..FAST
        };
        let err = poll_until_ready(schedule, "sra_state", || async { Ok(false) })
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sra_state was not ready"));
    }
}
