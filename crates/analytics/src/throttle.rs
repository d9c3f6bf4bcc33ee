//! Rate limiting for flushes (throttle) and initialization (debounce).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Leading-edge throttle: the first call in a window runs, the rest of the
/// window's calls are dropped.
#[derive(Debug)]
pub struct Throttle {
    window: Duration,
    last: Mutex<Option<Instant>>,
}

impl Throttle {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: Mutex::new(None),
        }
    }

    /// Returns `true` if the caller may proceed.
    pub fn try_acquire(&self) -> bool {
        let now = Instant::now();
        let mut last = self.last.lock();
        match *last {
            Some(at) if now.duration_since(at) < self.window => false,
            _ => {
                *last = Some(now);
                true
            }
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }
}

/// Trailing-edge debounce: only the last call in a burst runs, `delay`
/// after that call.
#[derive(Debug, Clone)]
pub struct Debounce {
    delay: Duration,
    generation: Arc<AtomicU64>,
}

impl Debounce {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Schedule `f`, superseding any call still waiting. Returns `false`
    /// when there is no runtime to schedule on.
    pub fn call<F, Fut>(&self, f: F) -> bool
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return false;
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let current = Arc::clone(&self.generation);
        let delay = self.delay;
        handle.spawn(async move {
            tokio::time::sleep(delay).await;
            if current.load(Ordering::SeqCst) == generation {
                f().await;
            }
        });
        true
    }

    /// Drop any pending call.
    pub fn cancel(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}
