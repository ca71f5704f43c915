//! Per-instance re-entrancy guard
//!
//! A cycle that fires while the previous one still runs is dropped, not
//! queued. The flag is released when the ticket drops, including on early
//! returns and errors.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Default)]
pub struct CycleGuard {
    busy: AtomicBool,
}

/// Proof that the holder owns the current cycle
#[derive(Debug)]
pub struct CycleTicket<'a> {
    guard: &'a CycleGuard,
}

impl CycleGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the guard; `None` when a cycle is already running
    pub fn try_enter(&self) -> Option<CycleTicket<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| CycleTicket { guard: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for CycleTicket<'_> {
    fn drop(&mut self) {
        self.guard.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_second_entry_is_rejected() {
        let guard = CycleGuard::new();
        let ticket = guard.try_enter();
        assert!(ticket.is_some());
        assert!(guard.try_enter().is_none());
        assert!(guard.is_busy());

        drop(ticket);
        assert!(!guard.is_busy());
        assert!(guard.try_enter().is_some());
    }

    #[test]
    fn test_released_on_error_path() {
        fn failing_cycle(guard: &CycleGuard) -> Result<(), &'static str> {
            let _ticket = guard.try_enter().ok_or("busy")?;
            Err("orchestrator unavailable")
        }

        let guard = CycleGuard::new();
        assert_eq!(failing_cycle(&guard), Err("orchestrator unavailable"));
        assert!(!guard.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_attempts_admit_one() {
        let guard = Arc::new(CycleGuard::new());
        let barrier = Arc::new(tokio::sync::Barrier::new(8));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let guard = guard.clone();
            let barrier = barrier.clone();
            handles.push(tokio::spawn(async move {
                barrier.wait().await;
                let ticket = guard.try_enter();
                let admitted = ticket.is_some();
                // hold until everyone has tried
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                drop(ticket);
                admitted
            }));
        }

        let mut admitted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 1);
    }
}
