//! Per-division readiness gate.
//!
//! `true` means the division's selected calendar has its current and next
//! year allotments in the cache and in the live display. The flag says
//! nothing about the next scope-changing call, so consumers re-read it
//! every time instead of holding on to it.

use std::collections::HashMap;

#[derive(Debug, Clone, Default)]
pub struct ReadinessTracker {
    flags: HashMap<String, bool>,
}

impl ReadinessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Unknown divisions are not ready
    pub fn is_ready(&self, division: &str) -> bool {
        self.flags.get(division).copied().unwrap_or(false)
    }

    pub fn mark_ready(&mut self, division: &str) {
        self.flags.insert(division.to_string(), true);
    }

    pub fn mark_not_ready(&mut self, division: &str) {
        self.flags.insert(division.to_string(), false);
    }

    pub fn forget(&mut self, division: &str) {
        self.flags.remove(division);
    }

    pub fn clear(&mut self) {
        self.flags.clear();
    }
}
