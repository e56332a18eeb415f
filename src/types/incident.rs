//! Incident types — fused alert candidates and their status machine

use serde::{Deserialize, Serialize};

use super::ChannelSignal;

/// Classification of a fused incident.
///
/// Closed variant set with exhaustive handling at the fusion and dispatch
/// boundaries — free-form alert strings are not accepted anywhere.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IncidentType {
    /// Accelerometer impact corroborated by a vision posture transition
    ConfirmedFall,
    /// Single-channel anomaly, not corroborated
    SuspiciousEvent,
    /// Vitals-only critical signal, independent of posture
    HealthAlert,
    /// Subject outside all configured safe zones
    GeofenceBreach,
    /// Scheduled medication dose not confirmed within the grace period
    MedicationMiss,
}

impl IncidentType {
    /// Tie-break priority when multiple incident types qualify for the same
    /// trigger. Higher wins; only the highest-priority incident is emitted.
    pub fn priority(self) -> u8 {
        match self {
            IncidentType::ConfirmedFall => 4,
            IncidentType::HealthAlert => 3,
            IncidentType::GeofenceBreach => 2,
            IncidentType::SuspiciousEvent => 1,
            IncidentType::MedicationMiss => 0,
        }
    }
}

impl std::fmt::Display for IncidentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentType::ConfirmedFall => write!(f, "CONFIRMED_FALL"),
            IncidentType::SuspiciousEvent => write!(f, "SUSPICIOUS_EVENT"),
            IncidentType::HealthAlert => write!(f, "HEALTH_ALERT"),
            IncidentType::GeofenceBreach => write!(f, "GEOFENCE_BREACH"),
            IncidentType::MedicationMiss => write!(f, "MEDICATION_MISS"),
        }
    }
}

/// Incident lifecycle status.
///
/// ```text
/// open --dispatch success--> notified --operator ack--> acknowledged
///                                                        --operator clear--> dismissed
/// open --dispatch exhausted--> open (flagged for manual follow-up)
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum IncidentStatus {
    #[default]
    Open,
    Notified,
    Acknowledged,
    Dismissed,
}

impl IncidentStatus {
    /// Whether the status machine permits a transition to `next`.
    pub fn can_transition_to(self, next: IncidentStatus) -> bool {
        use IncidentStatus::*;
        matches!(
            (self, next),
            (Open, Notified)
                | (Open, Dismissed)
                | (Notified, Acknowledged)
                | (Notified, Dismissed)
                | (Acknowledged, Dismissed)
        )
    }

    /// Whether the incident still counts against the per-subject debounce.
    pub fn is_active(self) -> bool {
        matches!(self, IncidentStatus::Open | IncidentStatus::Notified)
    }
}

impl std::fmt::Display for IncidentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IncidentStatus::Open => write!(f, "open"),
            IncidentStatus::Notified => write!(f, "notified"),
            IncidentStatus::Acknowledged => write!(f, "acknowledged"),
            IncidentStatus::Dismissed => write!(f, "dismissed"),
        }
    }
}

/// A fused alert candidate, retained in the event store indefinitely.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Incident {
    pub id: String,
    pub subject_id: String,
    pub incident_type: IncidentType,
    /// Signals that contributed, ordered by observation time.
    /// Always contains at least one signal with severity >= warning
    /// (medication misses carry a synthetic schedule signal).
    pub contributing: Vec<ChannelSignal>,
    /// Fused confidence in [0, 1]; monotone in corroboration count
    pub confidence: f64,
    pub created_at_ms: u64,
    pub status: IncidentStatus,
    /// Set when dispatch exhausted retries for at least one contact
    #[serde(default)]
    pub delivery_failed: bool,
}

impl Incident {
    pub fn new(
        subject_id: impl Into<String>,
        incident_type: IncidentType,
        contributing: Vec<ChannelSignal>,
        confidence: f64,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            subject_id: subject_id.into(),
            incident_type,
            contributing,
            confidence,
            created_at_ms,
            status: IncidentStatus::Open,
            delivery_failed: false,
        }
    }

    /// Number of distinct channels among contributing signals.
    pub fn corroboration_count(&self) -> usize {
        let mut channels: Vec<_> = self.contributing.iter().map(|s| s.channel).collect();
        channels.sort_by_key(|c| *c as u8);
        channels.dedup();
        channels.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, Severity};

    fn signal(channel: Channel, severity: Severity) -> ChannelSignal {
        ChannelSignal {
            subject_id: "s1".to_string(),
            channel,
            severity,
            reason: "test".to_string(),
            observed_at_ms: 1_000,
            confidence: 0.9,
            evaluated_at_ms: 1_001,
        }
    }

    #[test]
    fn test_priority_ordering() {
        assert!(IncidentType::ConfirmedFall.priority() > IncidentType::HealthAlert.priority());
        assert!(IncidentType::HealthAlert.priority() > IncidentType::GeofenceBreach.priority());
        assert!(
            IncidentType::GeofenceBreach.priority() > IncidentType::SuspiciousEvent.priority()
        );
    }

    #[test]
    fn test_status_machine_allowed_transitions() {
        use IncidentStatus::*;
        assert!(Open.can_transition_to(Notified));
        assert!(Notified.can_transition_to(Acknowledged));
        assert!(Acknowledged.can_transition_to(Dismissed));
        assert!(Notified.can_transition_to(Dismissed));
        // No path backwards and no skipping into acknowledged
        assert!(!Notified.can_transition_to(Open));
        assert!(!Open.can_transition_to(Acknowledged));
        assert!(!Dismissed.can_transition_to(Open));
    }

    #[test]
    fn test_active_statuses() {
        assert!(IncidentStatus::Open.is_active());
        assert!(IncidentStatus::Notified.is_active());
        assert!(!IncidentStatus::Acknowledged.is_active());
        assert!(!IncidentStatus::Dismissed.is_active());
    }

    #[test]
    fn test_corroboration_count_dedupes_channels() {
        let incident = Incident::new(
            "s1",
            IncidentType::ConfirmedFall,
            vec![
                signal(Channel::Accelerometer, Severity::Critical),
                signal(Channel::Accelerometer, Severity::Warning),
                signal(Channel::VisionPosture, Severity::Warning),
            ],
            0.95,
            2_000,
        );
        assert_eq!(incident.corroboration_count(), 2);
    }
}
