use std::future::Future;
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{sleep_until, Duration, Instant};

use super::GatewayError;

/// Process-wide admission for ledger RPCs.
///
/// One request is in flight at a time and waiters are served in arrival
/// order. A cooldown instant set after a rate-limit response holds back every
/// later request, queued ones included, until it passes.
pub struct AdmissionControl {
    slot: Semaphore,
    cooldown: Mutex<Option<Instant>>,
}

/// Exclusive right to issue one RPC. Released on drop.
pub struct SlotGuard<'a> {
    _permit: SemaphorePermit<'a>,
    control: &'a AdmissionControl,
}

impl Default for AdmissionControl {
    fn default() -> Self {
        Self::new()
    }
}

impl AdmissionControl {
    pub fn new() -> Self {
        Self {
            slot: Semaphore::new(1),
            cooldown: Mutex::new(None),
        }
    }

    /// Wait for the slot, then for any active cooldown
    pub async fn acquire(&self) -> Result<SlotGuard<'_>, GatewayError> {
        let permit = self.slot.acquire().await.map_err(|_| GatewayError::Closed)?;

        // The cooldown can only move while the slot is held, so one check suffices
        let until = *self.cooldown.lock().await;
        if let Some(until) = until {
            if until > Instant::now() {
                let wait_ms = (until - Instant::now()).as_millis() as u64;
                tracing::debug!(wait_ms, "Waiting out RPC cooldown");
                sleep_until(until).await;
            }
        }

        Ok(SlotGuard {
            _permit: permit,
            control: self,
        })
    }

    /// Run `f` while holding the slot
    pub async fn with_slot<F, Fut, T>(&self, f: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _guard = self.acquire().await?;
        Ok(f().await)
    }

    pub async fn cooldown_until(&self) -> Option<Instant> {
        *self.cooldown.lock().await
    }
}

impl SlotGuard<'_> {
    /// Push the shared cooldown to at least `now + delay`
    pub async fn extend_cooldown(&self, delay: Duration) {
        let until = Instant::now() + delay;
        let mut cooldown = self.control.cooldown.lock().await;
        if cooldown.map_or(true, |current| current < until) {
            *cooldown = Some(until);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_single_slot_in_flight() {
        let control = Arc::new(AdmissionControl::new());
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..4 {
            let control = control.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                control
                    .with_slot(|| async {
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_delays_next_caller() {
        let control = AdmissionControl::new();
        let start = Instant::now();

        {
            let guard = control.acquire().await.unwrap();
            guard.extend_cooldown(Duration::from_millis(500)).await;
        }

        let _guard = control.acquire().await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cooldown_never_shrinks() {
        let control = AdmissionControl::new();
        let guard = control.acquire().await.unwrap();
        guard.extend_cooldown(Duration::from_secs(2)).await;
        let long = control.cooldown_until().await;
        guard.extend_cooldown(Duration::from_millis(100)).await;

        assert_eq!(control.cooldown_until().await, long);
    }
}
