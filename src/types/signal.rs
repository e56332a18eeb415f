//! Threshold evaluator output: Severity and ChannelSignal

use serde::{Deserialize, Serialize};

use super::Channel;

/// Severity band assigned by the threshold evaluator.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    #[default]
    Safe = 0,
    Warning = 1,
    Critical = 2,
}

impl Severity {
    /// Whether this severity is actionable for fusion (warning or worse).
    pub fn is_actionable(self) -> bool {
        self >= Severity::Warning
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Safe => write!(f, "SAFE"),
            Severity::Warning => write!(f, "WARNING"),
            Severity::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Per-channel evaluation result for a single observation.
///
/// Ephemeral: retained only inside the tracking window and as the
/// `contributing` list on an emitted incident.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelSignal {
    pub subject_id: String,
    pub channel: Channel,
    pub severity: Severity,
    /// Human-readable explanation naming the offending metric and value
    pub reason: String,
    /// Timestamp of the observation this signal was derived from (epoch ms)
    pub observed_at_ms: u64,
    /// Confidence inherited from the observation, in [0, 1]
    pub confidence: f64,
    /// When the evaluator produced this signal (epoch ms)
    pub evaluated_at_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Safe < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
    }

    #[test]
    fn test_severity_actionable() {
        assert!(!Severity::Safe.is_actionable());
        assert!(Severity::Warning.is_actionable());
        assert!(Severity::Critical.is_actionable());
    }

    #[test]
    fn test_severity_display() {
        assert_eq!(format!("{}", Severity::Safe), "SAFE");
        assert_eq!(format!("{}", Severity::Warning), "WARNING");
        assert_eq!(format!("{}", Severity::Critical), "CRITICAL");
    }
}
