//! Caller-supplied deadline shared by the submitter and the confirmation tracker.

use std::time::Duration;

use tokio::{sync::watch, time::Instant};

/// Point in time after which an invocation stops waiting, optionally cancellable.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancel: Option<watch::Receiver<bool>>,
}

/// Cancels every [`Deadline`] cloned from the one it was created with.
#[derive(Debug)]
pub struct Canceller(watch::Sender<bool>);

impl Canceller {
    pub fn cancel(&self) {
        // No receiver left means there is nothing to cancel.
        let _ = self.0.send(true);
    }
}

impl Deadline {
    /// A deadline `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            cancel: None,
        }
    }

    /// Attach a cancellation channel to this deadline.
    pub fn with_cancellation(self) -> (Self, Canceller) {
        let (tx, rx) = watch::channel(false);
        (
            Self {
                cancel: Some(rx),
                ..self
            },
            Canceller(tx),
        )
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.at.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        self.is_cancelled() || Instant::now() >= self.at
    }

    /// Whether waiting `delay` would still end before the deadline.
    pub fn allows(&self, delay: Duration) -> bool {
        !self.is_cancelled() && Instant::now() + delay < self.at
    }

    /// Sleep for `delay`, cut short by expiry or cancellation.
    ///
    /// Returns `true` if the deadline still holds after waking up.
    pub async fn sleep(&self, delay: Duration) -> bool {
        let wake_at = (Instant::now() + delay).min(self.at);

        match self.cancel.clone() {
            Some(mut rx) => {
                tokio::select! {
                    _ = tokio::time::sleep_until(wake_at) => {}
                    _ = wait_cancelled(&mut rx) => {
                        tracing::debug!("Deadline cancelled");
                    }
                }
            }
            None => tokio::time::sleep_until(wake_at).await,
        }

        !self.is_expired()
    }
}

async fn wait_cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        // The canceller is gone and can no longer fire.
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_sleep_is_clamped_to_deadline() {
        let deadline = Deadline::after(Duration::from_secs(5));
        let start = Instant::now();

        assert!(deadline.sleep(Duration::from_secs(2)).await);
        assert!(!deadline.sleep(Duration::from_secs(60)).await);

        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert!(deadline.is_expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_allows() {
        let deadline = Deadline::after(Duration::from_secs(10));
        assert!(deadline.allows(Duration::from_secs(9)));
        assert!(!deadline.allows(Duration::from_secs(10)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_wakes_sleepers() {
        let (deadline, canceller) =
            Deadline::after(Duration::from_secs(300)).with_cancellation();
        let sleeper = deadline.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move { sleeper.sleep(Duration::from_secs(120)).await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        canceller.cancel();

        assert!(!handle.await.unwrap());
        assert!(start.elapsed() < Duration::from_secs(120));
        assert!(deadline.is_cancelled());
        assert!(deadline.is_expired());
        assert!(!deadline.allows(Duration::ZERO));
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_canceller_never_fires() {
        let (deadline, canceller) = Deadline::after(Duration::from_secs(3)).with_cancellation();
        drop(canceller);

        let start = Instant::now();
        assert!(deadline.sleep(Duration::from_secs(1)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }
}
