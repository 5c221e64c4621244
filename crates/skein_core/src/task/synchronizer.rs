//! Countdown barrier that fires a continuation exactly once.

use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Continuation run when a plan finishes.
pub type Completion = Box<dyn FnOnce() + Send + 'static>;

/// Counts down once per finished sub-task and runs the continuation when the
/// count reaches zero.
///
/// The thread that performs the final decrement runs the continuation.
pub struct Synchronizer {
    remaining: AtomicUsize,
    on_completion: Mutex<Option<Completion>>,
}

impl Synchronizer {
    /// Creates a barrier expecting `count` decrements.
    ///
    /// A zero count never fires; callers complete immediately instead.
    #[must_use]
    pub fn new(count: usize, on_completion: Completion) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            on_completion: Mutex::new(Some(on_completion)),
        }
    }

    /// Records one finished sub-task, running the continuation if it was the last.
    pub fn decrement_and_eventually_run(&self) {
        if self.remaining.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        let completion = self.on_completion.lock().take();
        if let Some(completion) = completion {
            completion();
        }
    }

    /// Returns how many decrements are still outstanding.
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fires_once_after_last_decrement() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let sync = Synchronizer::new(
            3,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        sync.decrement_and_eventually_run();
        sync.decrement_and_eventually_run();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(sync.remaining(), 1);

        sync.decrement_and_eventually_run();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_concurrent_decrements() {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let sync = Arc::new(Synchronizer::new(
            64,
            Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ));

        let threads: Vec<_> = (0..8)
            .map(|_| {
                let sync = Arc::clone(&sync);
                thread::spawn(move || {
                    for _ in 0..8 {
                        sync.decrement_and_eventually_run();
                    }
                })
            })
            .collect();
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
