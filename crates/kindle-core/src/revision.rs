//! The process-wide logical clock.
//!
//! Every tracked write allocates a fresh [`Revision`] through [`bump`]. Nothing
//! else in the crate mutates global state, so revisions observed on the single
//! UI thread are totally ordered.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A point in logical time.
///
/// Revisions only ever grow. Two revisions taken from the clock compare the
/// same way the writes that produced them were ordered.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Revision(u64);

impl Revision {
    /// Reported by tags that can never change.
    pub const CONSTANT: Revision = Revision(0);

    /// The clock value before any tracked write happened.
    pub const INITIAL: Revision = Revision(1);

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

static CLOCK: AtomicU64 = AtomicU64::new(Revision::INITIAL.0);

/// Returns the latest revision handed out by the clock.
pub fn current() -> Revision {
    Revision(CLOCK.load(Ordering::SeqCst))
}

/// Allocates a revision strictly greater than every revision issued before.
pub fn bump() -> Revision {
    Revision(CLOCK.fetch_add(1, Ordering::SeqCst) + 1)
}
