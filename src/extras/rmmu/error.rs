// rmmu_host/src/extras/rmmu/error.rs

use thiserror::Error;

use super::state::Zone;
use crate::configfile::ConfigError;
use crate::core_traits::MotionError;

fn tool_label(tool: &Option<usize>) -> String {
    match tool {
        Some(t) => format!("T{}", t),
        None => "device".to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RmmuError {
    /// A sensor disagrees with what the operation expected.
    #[error("{}: sensor fault: {reason}", tool_label(.tool))]
    SensorFault { tool: Option<usize>, reason: String },

    /// A zone transition ran out of retries.
    #[error("T{tool}: could not move filament from {from:?} to {to:?}: {reason}")]
    TransitionFailure { tool: usize, from: Zone, to: Zone, reason: String },

    /// A remap or spool join would break the disjointness of its table.
    #[error("{}: routing conflict: {reason}", tool_label(.tool))]
    RoutingConflict { tool: Option<usize>, reason: String },

    /// The operation needs hardware or settings this unit does not have.
    #[error("{}: configuration error: {reason}", tool_label(.tool))]
    Configuration { tool: Option<usize>, reason: String },

    /// The operation is not allowed in the current device state.
    #[error("{}: not allowed now: {reason}", tool_label(.tool))]
    ConcurrencyViolation { tool: Option<usize>, reason: String },

    #[error("motion system: {0}")]
    Motion(#[from] MotionError),
}

impl RmmuError {
    pub fn sensor(tool: Option<usize>, reason: impl Into<String>) -> Self {
        RmmuError::SensorFault { tool, reason: reason.into() }
    }

    pub fn config(tool: Option<usize>, reason: impl Into<String>) -> Self {
        RmmuError::Configuration { tool, reason: reason.into() }
    }

    pub fn routing(tool: Option<usize>, reason: impl Into<String>) -> Self {
        RmmuError::RoutingConflict { tool, reason: reason.into() }
    }

    pub fn not_allowed(tool: Option<usize>, reason: impl Into<String>) -> Self {
        RmmuError::ConcurrencyViolation { tool, reason: reason.into() }
    }

    /// Tool index the failure is about, if any.
    pub fn tool(&self) -> Option<usize> {
        match self {
            RmmuError::SensorFault { tool, .. }
            | RmmuError::RoutingConflict { tool, .. }
            | RmmuError::Configuration { tool, .. }
            | RmmuError::ConcurrencyViolation { tool, .. } => *tool,
            RmmuError::TransitionFailure { tool, .. } => Some(*tool),
            RmmuError::Motion(_) => None,
        }
    }
}

impl From<ConfigError> for RmmuError {
    fn from(e: ConfigError) -> Self {
        RmmuError::Configuration { tool: None, reason: e.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_tool_and_reason() {
        let err = RmmuError::sensor(Some(3), "parking sensor not triggered");
        assert_eq!(err.to_string(), "T3: sensor fault: parking sensor not triggered");
        assert_eq!(err.tool(), Some(3));

        let err = RmmuError::config(None, "no per-tool parking sensors");
        assert_eq!(err.to_string(), "device: configuration error: no per-tool parking sensors");
    }

    #[test]
    fn config_error_converts() {
        let err: RmmuError = ConfigError::SectionNotFound("rmmu rmmu_t0".to_string()).into();
        assert!(matches!(err, RmmuError::Configuration { tool: None, .. }));
    }
}
