//! Clock and cooperative sleep abstraction used by the retry engine.
//! Injectable so that backoff and slow-request behavior can be driven
//! deterministically in tests.

use async_trait::async_trait;

use tokio::time::{self, Duration, Instant};

/// Monotonic clock plus cooperative sleep. The sleep must yield the worker
/// instead of blocking an OS thread.
#[async_trait]
pub trait IoTimer: Send + Sync {
    /// Monotonic milliseconds since an arbitrary fixed origin.
    fn now_ms(&self) -> u64;

    /// Cooperatively sleeps for the given number of microseconds.
    async fn sleep_us(&self, us: u64);
}

/// Default timer over the tokio runtime clock.
#[derive(Debug)]
pub struct TokioTimer {
    /// Fixed origin of `now_ms()`.
    start: Instant,
}

impl TokioTimer {
    /// Creates a timer with its origin at construction time.
    pub fn new() -> Self {
        TokioTimer {
            start: Instant::now(),
        }
    }
}

impl Default for TokioTimer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IoTimer for TokioTimer {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }

    async fn sleep_us(&self, us: u64) {
        time::sleep(Duration::from_micros(us)).await;
    }
}
