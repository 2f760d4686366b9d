// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
use std::sync::atomic::{AtomicU64, Ordering};

/// Plain copy of the tracker counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackerStatsSnapshot {
    pub redundant_binds_avoided: u64,
    pub binds_issued: u64,
    pub resolve_calls: u64,
    pub transition_hazards: u64,
    pub render_target_changes: u64,
    pub render_target_skips: u64,
    pub draws: u64,
    pub dispatches: u64,
}

/// Telemetry counters for one or more command contexts.
///
/// Updated on the recording thread, readable from anywhere.
#[derive(Debug, Default)]
pub struct TrackerStats {
    redundant_binds_avoided: AtomicU64,
    binds_issued: AtomicU64,
    resolve_calls: AtomicU64,
    transition_hazards: AtomicU64,
    render_target_changes: AtomicU64,
    render_target_skips: AtomicU64,
    draws: AtomicU64,
    dispatches: AtomicU64,
}

impl TrackerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_redundant_binds_avoided(&self) {
        self.redundant_binds_avoided.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_binds_issued(&self) {
        self.binds_issued.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_resolve_calls(&self) {
        self.resolve_calls.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_transition_hazards(&self) {
        self.transition_hazards.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_render_target_changes(&self) {
        self.render_target_changes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_render_target_skips(&self) {
        self.render_target_skips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_draws(&self) {
        self.draws.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dispatches(&self) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> TrackerStatsSnapshot {
        TrackerStatsSnapshot {
            redundant_binds_avoided: self.redundant_binds_avoided.load(Ordering::Relaxed),
            binds_issued: self.binds_issued.load(Ordering::Relaxed),
            resolve_calls: self.resolve_calls.load(Ordering::Relaxed),
            transition_hazards: self.transition_hazards.load(Ordering::Relaxed),
            render_target_changes: self.render_target_changes.load(Ordering::Relaxed),
            render_target_skips: self.render_target_skips.load(Ordering::Relaxed),
            draws: self.draws.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        for counter in [
            &self.redundant_binds_avoided,
            &self.binds_issued,
            &self.resolve_calls,
            &self.transition_hazards,
            &self.render_target_changes,
            &self.render_target_skips,
            &self.draws,
            &self.dispatches,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
