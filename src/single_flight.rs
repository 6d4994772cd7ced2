//! Single-flight gate used by the scan and refresh passes.
//!
//! A pass enters the gate by bumping an atomic counter. Only the caller that
//! moved the counter from 0 to 1 gets a [`FlightGuard`]; everyone else is
//! dropped on the floor. Work requested while the gate is busy is lost, the
//! next external trigger re-requests it.

use std::sync::atomic::{AtomicUsize, Ordering};

/// Debouncing gate that lets at most one pass run at a time.
#[derive(Debug, Default)]
pub struct SingleFlight {
    count: AtomicUsize,
}

impl SingleFlight {
    pub const fn new() -> Self {
        Self {
            count: AtomicUsize::new(0),
        }
    }

    /// Tries to enter the gate.
    ///
    /// Returns `None` when another pass already holds it. The returned guard
    /// resets the gate when dropped, whichever way the pass ends.
    pub fn try_enter(&self) -> Option<FlightGuard<'_>> {
        (self.count.fetch_add(1, Ordering::AcqRel) == 0).then_some(FlightGuard { gate: self })
    }

    /// Cheap non-atomic-section check used to skip work while a pass runs.
    pub fn is_active(&self) -> bool {
        self.count.load(Ordering::Acquire) > 0
    }
}

/// Scoped ownership of a [`SingleFlight`] gate.
#[derive(Debug)]
pub struct FlightGuard<'a> {
    gate: &'a SingleFlight,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        self.gate.count.store(0, Ordering::Release);
    }
}
