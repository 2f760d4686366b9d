// SPDX-License-Identifier: Parity-7.0.0 OR PolyForm-Noncommercial-1.0.0
//! Tracker configuration.
//!
//! The main switch is [`Severity`], which decides what happens when a resource is used
//! without the barrier its [`BarrierPolicy`](crate::resource::BarrierPolicy) requires.
//! Development builds want to stop at the first hazard; shipping builds want to log it and
//! keep drawing, accepting possibly wrong pixels for that frame.

/// How an unsynchronized hazard is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Severity {
    /// Return the hazard to the caller and leave the resource untouched.
    Fatal,
    /// Log the hazard, apply the transition anyway and report success.
    Warn,
}

impl Default for Severity {
    fn default() -> Self {
        if cfg!(debug_assertions) {
            Severity::Fatal
        } else {
            Severity::Warn
        }
    }
}

/// Configuration for a [`CommandContext`](crate::context::CommandContext).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrackerConfig {
    pub severity: Severity,
    /// Null every texture slot whenever a new pipeline is selected.
    ///
    /// Slow, but useful when chasing a stale-binding bug.
    pub unbind_resources_between_pipelines: bool,
}

impl TrackerConfig {
    /// Reads overrides from the environment on top of [`TrackerConfig::default`].
    ///
    /// * `BB_HAZARD_SEVERITY` set to `fatal` or `warn`
    /// * `BB_UNBIND_BETWEEN_PIPELINES` set to `1`
    pub fn from_env() -> Self {
        let mut config = TrackerConfig::default();
        if let Ok(severity) = std::env::var("BB_HAZARD_SEVERITY") {
            match severity.as_str() {
                "fatal" => config.severity = Severity::Fatal,
                "warn" => config.severity = Severity::Warn,
                other => {
                    logwise::warn_sync!(
                        "Ignoring unknown BB_HAZARD_SEVERITY {value}",
                        value = logwise::privacy::LogIt(&other)
                    );
                }
            }
        }
        config.unbind_resources_between_pipelines = std::env::var("BB_UNBIND_BETWEEN_PIPELINES")
            .map(|e| e == "1")
            .unwrap_or(false);
        config
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }
}
