//! # Named Flags
//!
//! A flag is a named boolean with raise/lower/query. Plans raise flags when a
//! stage of work completes; the owning thread waits on them through
//! [`TaskExecutor::sync_until`](crate::TaskExecutor::sync_until).
//!
//! Raising is a release store and querying an acquire load, so everything a
//! task wrote before raising is visible to whoever observes the flag raised.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

/// A named, thread-safe boolean.
///
/// Shared between plans and the thread that waits on them as `Arc<Flag>`.
pub struct Flag {
    /// Name used in logs and debug output.
    name: String,
    /// Current state.
    raised: AtomicBool,
}

impl Flag {
    /// Creates a lowered flag.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            raised: AtomicBool::new(false),
        }
    }

    /// Returns the flag's name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Raises the flag.
    #[inline]
    pub fn raise(&self) {
        self.raised.store(true, Ordering::Release);
    }

    /// Lowers the flag.
    #[inline]
    pub fn lower(&self) {
        self.raised.store(false, Ordering::Release);
    }

    /// Returns true if the flag is raised.
    #[inline]
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.raised.load(Ordering::Acquire)
    }
}

impl fmt::Debug for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flag")
            .field("name", &self.name)
            .field("raised", &self.is_raised())
            .finish()
    }
}
