// Clock abstraction
//
// Readiness polling reads time and sleeps only through this trait so tests can
// drive it with tokio's paused runtime instead of wall-clock time.

use std::future::Future;
use std::pin::Pin;
use tokio::time::{self, Duration, Instant};

/// Time source for polling loops
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use tokio::time::Duration;
/// use devnet_bootstrap::clock::{Clock, SystemClock};
///
/// #[tokio::main]
/// async fn main() {
///     let clock: Arc<dyn Clock> = Arc::new(SystemClock);
///     let start = clock.now();
///     clock.sleep(Duration::from_millis(10)).await;
///     assert!(clock.now() - start >= Duration::from_millis(10));
/// }
/// ```
pub trait Clock: Send + Sync {
    /// Current instant; simulated under a paused runtime
    fn now(&self) -> Instant;

    /// Sleep for `d`; under a paused runtime this completes once time is advanced
    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Real time, used by the binaries
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}

/// Paused tokio time, for tests
///
/// Requires a current-thread runtime whose time is paused, either through
/// `start_paused = true` or, with the `test-util` feature, by constructing the
/// clock with `PausedClock::pausing`.
/// A sleeping task with nothing else to do lets the runtime auto-advance to the
/// next timer, so a probe that waits for minutes completes instantly while still
/// observing the elapsed time it would have spent.
///
/// ```rust
/// use tokio::time::Duration;
/// use devnet_bootstrap::clock::{Clock, PausedClock};
///
/// #[tokio::main(flavor = "current_thread", start_paused = true)]
/// async fn main() {
///     let clock = PausedClock::new();
///     let start = clock.now();
///     clock.sleep(Duration::from_secs(3600)).await;
///     assert_eq!(clock.now() - start, Duration::from_secs(3600));
/// }
/// ```
#[derive(Debug)]
pub struct PausedClock;

impl PausedClock {
    /// Clock over a runtime that was started paused
    pub fn new() -> Self {
        Self
    }

    /// Pause the current runtime's time, then build the clock. Panics if time is
    /// already paused.
    #[cfg(any(test, feature = "test-util"))]
    pub fn pausing() -> Self {
        time::pause();
        Self
    }

    /// Move simulated time forward, waking timers that expire on the way
    #[cfg(any(test, feature = "test-util"))]
    pub async fn advance(&self, d: Duration) {
        time::advance(d).await
    }
}

impl Default for PausedClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for PausedClock {
    fn now(&self) -> Instant {
        time::Instant::now()
    }

    fn sleep(&self, d: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(time::sleep(d))
    }
}
