//! Bounded in-flight request counting. One token is acquired before the
//! first dispatch of a chunk request and released exactly once on terminal
//! completion; retries of the same request do not reacquire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

/// Bounded in-flight request counter shared by all requests of one client.
#[derive(Debug)]
pub struct InflightThrottle {
    /// Current number of in-flight requests.
    inflight: AtomicU64,

    /// Maximum number of in-flight requests.
    max_inflight: u64,

    /// Wakes one waiter whenever a token is released.
    freed: Notify,
}

impl InflightThrottle {
    /// Creates a throttle admitting at most `max_inflight` requests.
    pub fn new(max_inflight: u64) -> Self {
        InflightThrottle {
            inflight: AtomicU64::new(0),
            max_inflight,
            freed: Notify::new(),
        }
    }

    /// Whether the client is at its in-flight bound right now.
    pub fn is_overload(&self) -> bool {
        self.inflight.load(Ordering::Relaxed) >= self.max_inflight
    }

    /// Current number of in-flight requests.
    pub fn inflight(&self) -> u64 {
        self.inflight.load(Ordering::Relaxed)
    }

    /// Acquires one token, cooperatively waiting while the bound is hit.
    pub async fn acquire(self: Arc<Self>) -> InflightToken {
        loop {
            if self.try_increment() {
                break;
            }
            let freed = self.freed.notified();
            // re-check to close the race against a release that fired
            // between the failed increment and registering the waiter
            if self.try_increment() {
                break;
            }
            freed.await;
        }
        InflightToken { throttle: self }
    }

    fn try_increment(&self) -> bool {
        let mut current = self.inflight.load(Ordering::Relaxed);
        while current < self.max_inflight {
            match self.inflight.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
        false
    }

    fn release(&self) {
        self.inflight.fetch_sub(1, Ordering::AcqRel);
        self.freed.notify_one();
    }
}

/// RAII guard of one in-flight token; releases on drop.
#[derive(Debug)]
pub struct InflightToken {
    throttle: Arc<InflightThrottle>,
}

impl Drop for InflightToken {
    fn drop(&mut self) {
        self.throttle.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::ClientError;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn acquire_and_release() -> Result<(), ClientError> {
        let throttle = Arc::new(InflightThrottle::new(2));
        let t1 = throttle.clone().acquire().await;
        let _t2 = throttle.clone().acquire().await;
        assert!(throttle.is_overload());
        assert_eq!(throttle.inflight(), 2);
        drop(t1);
        assert!(!throttle.is_overload());
        let _t3 = throttle.clone().acquire().await;
        assert_eq!(throttle.inflight(), 2);
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn bound_respected_under_contention() -> Result<(), ClientError> {
        let throttle = Arc::new(InflightThrottle::new(4));
        let mut handles = Vec::new();
        for _ in 0..32 {
            let throttle = throttle.clone();
            handles.push(tokio::spawn(async move {
                let _token = throttle.clone().acquire().await;
                assert!(throttle.inflight() <= 4);
                tokio::task::yield_now().await;
            }));
        }
        for handle in handles {
            handle.await.map_err(ClientError::msg)?;
        }
        assert_eq!(throttle.inflight(), 0);
        Ok(())
    }
}
