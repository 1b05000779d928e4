use std::time::Duration;

/// Bounds the client's commit loops. Each round trip to the metadata store
/// counts as one attempt; conflicts back off exponentially up to `max_backoff`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 16,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, initial_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            initial_backoff,
            max_backoff,
        }
    }

    /// No sleeping between attempts.
    pub fn immediate(max_attempts: u32) -> Self {
        Self::new(max_attempts, Duration::ZERO, Duration::ZERO)
    }

    /// Delay before retrying after the `conflicts`-th version conflict (1-based).
    pub fn backoff(&self, conflicts: u32) -> Duration {
        if conflicts == 0 || self.initial_backoff.is_zero() {
            return Duration::ZERO;
        }

        let factor = 1u32.checked_shl(conflicts - 1).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    pub(crate) async fn wait(&self, conflicts: u32) {
        let delay = self.backoff(conflicts);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}
