use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

/// Result of a bounded semaphore wait.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum WaitOutcome {
    /// A permit was taken.
    Acquired,
    /// The timeout elapsed before a permit became available.
    TimedOut,
}

/// Counting semaphore with relative-timeout waits.
///
/// Poisoned locks are recovered rather than propagated: the counter is a plain
/// integer that cannot be left half-updated by a panicking holder.
#[derive(Debug, Default)]
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore holding `initial` permits.
    pub(crate) fn new(initial: usize) -> Self {
        Self {
            permits: Mutex::new(initial),
            available: Condvar::new(),
        }
    }

    /// Releases one permit and wakes one waiter.
    pub(crate) fn post(&self) {
        let mut permits = self.lock();
        *permits = permits.saturating_add(1);
        drop(permits);
        self.available.notify_one();
    }

    /// Takes a permit if one is immediately available.
    pub(crate) fn try_wait(&self) -> bool {
        let mut permits = self.lock();
        if *permits == 0 {
            return false;
        }
        *permits -= 1;
        true
    }

    /// Blocks for at most `timeout` waiting for a permit.
    pub(crate) fn wait_timeout(&self, timeout: Duration) -> WaitOutcome {
        let deadline = Instant::now().checked_add(timeout);
        let mut permits = self.lock();
        while *permits == 0 {
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return WaitOutcome::TimedOut;
                    }
                    deadline - now
                }
                // Timeout too large to represent; treat as unbounded.
                None => Duration::from_secs(u64::from(u32::MAX)),
            };
            let (guard, _result) = self
                .available
                .wait_timeout(permits, remaining)
                .unwrap_or_else(PoisonError::into_inner);
            permits = guard;
        }
        *permits -= 1;
        WaitOutcome::Acquired
    }

    /// Returns the number of permits currently available.
    pub(crate) fn value(&self) -> usize {
        *self.lock()
    }

    /// Drops every available permit and returns how many were discarded.
    pub(crate) fn drain(&self) -> usize {
        let mut permits = self.lock();
        std::mem::take(&mut *permits)
    }

    fn lock(&self) -> MutexGuard<'_, usize> {
        self.permits.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(0, false)]
    #[case(1, true)]
    #[case(3, true)]
    fn try_wait_reflects_available_permits(#[case] initial: usize, #[case] expected: bool) {
        let semaphore = Semaphore::new(initial);
        assert_eq!(expected, semaphore.try_wait());
        assert_eq!(initial.saturating_sub(1), semaphore.value());
    }

    #[test]
    fn wait_timeout_expires_without_posts() {
        let semaphore = Semaphore::new(0);
        let started = Instant::now();

        let outcome = semaphore.wait_timeout(Duration::from_millis(40));

        assert_eq!(WaitOutcome::TimedOut, outcome);
        assert!(started.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn post_from_another_thread_wakes_waiter() {
        let semaphore = Arc::new(Semaphore::new(0));
        let poster = Arc::clone(&semaphore);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            poster.post();
        });

        let outcome = semaphore.wait_timeout(Duration::from_secs(5));
        handle.join().expect("poster thread should not panic");

        assert_eq!(WaitOutcome::Acquired, outcome);
        assert_eq!(0, semaphore.value());
    }

    #[test]
    fn drain_discards_all_permits() {
        let semaphore = Semaphore::new(0);
        semaphore.post();
        semaphore.post();

        assert_eq!(2, semaphore.drain());
        assert_eq!(0, semaphore.value());
        assert_eq!(
            WaitOutcome::TimedOut,
            semaphore.wait_timeout(Duration::from_millis(1))
        );
    }
}
