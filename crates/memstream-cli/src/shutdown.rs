use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// Stop flag for the watch loop, set from the Ctrl+C handler.
#[derive(Default)]
pub struct ShutdownSignal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    fn stopped(&self) -> MutexGuard<'_, bool> {
        self.stopped.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn trigger(&self) {
        *self.stopped() = true;
        self.wake.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        *self.stopped()
    }

    /// Sleep between refreshes. Returns `true` if stopped before `interval` ran out.
    pub fn wait(&self, interval: Duration) -> bool {
        let (stopped, _) = self
            .wake
            .wait_timeout_while(self.stopped(), interval, |stopped| !*stopped)
            .unwrap_or_else(PoisonError::into_inner);
        *stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn test_full_interval_without_trigger() {
        let signal = ShutdownSignal::new();
        let start = Instant::now();

        assert!(!signal.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!signal.is_shutdown());
    }

    #[test]
    fn test_trigger_cuts_interval_short() {
        let signal = Arc::new(ShutdownSignal::new());
        let handler = Arc::clone(&signal);

        let watcher = thread::spawn(move || {
            let start = Instant::now();
            (handler.wait(Duration::from_secs(10)), start.elapsed())
        });
        thread::sleep(Duration::from_millis(30));
        signal.trigger();

        let (stopped, elapsed) = watcher.join().unwrap();
        assert!(stopped);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[test]
    fn test_triggered_before_wait() {
        let signal = ShutdownSignal::new();
        signal.trigger();

        let start = Instant::now();
        assert!(signal.is_shutdown());
        assert!(signal.wait(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_millis(100));
    }
}
