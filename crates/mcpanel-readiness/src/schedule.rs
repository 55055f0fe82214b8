use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Fixed-delay timer that can be aborted from outside.
///
/// Every wait in a readiness session goes through one of these, so
/// cancelling the schedule ends the session at its next suspension point.
#[derive(Debug, Clone, Default)]
pub struct Schedule {
    cancel: CancellationToken,
}

impl Schedule {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sleep for `delay`. Returns `false` if cancelled before it elapsed.
    pub async fn wait(&self, delay: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => false,
            () = tokio::time::sleep(delay) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_wait_elapses() {
        let schedule = Schedule::new();
        let started = tokio::time::Instant::now();
        assert!(schedule.wait(Duration::from_secs(5)).await);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_wait() {
        let schedule = Schedule::new();
        let sleeper = schedule.clone();
        let waiter = tokio::spawn(async move { sleeper.wait(Duration::from_secs(3600)).await });
        schedule.cancel();
        assert!(!waiter.await.unwrap());
        assert!(schedule.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_after_cancel_returns_immediately() {
        let schedule = Schedule::new();
        schedule.cancel();
        let started = tokio::time::Instant::now();
        assert!(!schedule.wait(Duration::from_secs(60)).await);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }
}
