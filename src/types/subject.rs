//! Subject enrollment types: contacts, geofences, lifecycle state

use serde::{Deserialize, Serialize};

/// An emergency contact reachable through the notification sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EmergencyContact {
    pub id: String,
    /// E.164-ish phone number; sanitized to `+` and digits before sending
    pub phone: String,
    #[serde(default)]
    pub relationship: String,
    /// Inactive contacts are skipped by the dispatcher
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

/// Zone classification used to evaluate location signals.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceKind {
    #[default]
    Safe,
    Warning,
    Danger,
}

impl std::fmt::Display for GeofenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GeofenceKind::Safe => write!(f, "safe"),
            GeofenceKind::Warning => write!(f, "warning"),
            GeofenceKind::Danger => write!(f, "danger"),
        }
    }
}

/// A named zone with a radius, e.g. "Home Zone" (100 m, safe),
/// "Neighborhood" (500 m, warning), "City Limits" (5 km, danger).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Geofence {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: GeofenceKind,
    /// Radius in meters
    pub radius_m: f64,
}

/// Monitoring lifecycle of an enrolled subject.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Normal operation, no active incident
    #[default]
    Monitored,
    /// At least one open or notified incident
    Alerting,
    /// Last incident acknowledged, pending operator clear
    Resolved,
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleState::Monitored => write!(f, "monitored"),
            LifecycleState::Alerting => write!(f, "alerting"),
            LifecycleState::Resolved => write!(f, "resolved"),
        }
    }
}

/// A monitored person. Created on enrollment (config load); contacts are
/// mutated via config reload; never deleted while monitoring is active.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Subject {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub contacts: Vec<EmergencyContact>,
    #[serde(default)]
    pub geofences: Vec<Geofence>,
    #[serde(default)]
    pub lifecycle: LifecycleState,
}

impl Subject {
    /// Contacts the dispatcher should actually message.
    pub fn active_contacts(&self) -> impl Iterator<Item = &EmergencyContact> {
        self.contacts.iter().filter(|c| c.active)
    }

    /// Ids of zones classified as safe, i.e. the innermost tier.
    pub fn safe_zone_ids(&self) -> Vec<&str> {
        self.geofences
            .iter()
            .filter(|g| g.kind == GeofenceKind::Safe)
            .map(|g| g.id.as_str())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject_with_contacts() -> Subject {
        Subject {
            id: "s1".to_string(),
            name: "Margaret".to_string(),
            contacts: vec![
                EmergencyContact {
                    id: "c1".to_string(),
                    phone: "+15550001111".to_string(),
                    relationship: "daughter".to_string(),
                    active: true,
                },
                EmergencyContact {
                    id: "c2".to_string(),
                    phone: "+15550002222".to_string(),
                    relationship: "neighbor".to_string(),
                    active: false,
                },
            ],
            geofences: vec![
                Geofence {
                    id: "home".to_string(),
                    name: "Home Zone".to_string(),
                    kind: GeofenceKind::Safe,
                    radius_m: 100.0,
                },
                Geofence {
                    id: "neighborhood".to_string(),
                    name: "Neighborhood".to_string(),
                    kind: GeofenceKind::Warning,
                    radius_m: 500.0,
                },
            ],
            lifecycle: LifecycleState::Monitored,
        }
    }

    #[test]
    fn test_active_contacts_filters_inactive() {
        let subject = subject_with_contacts();
        let active: Vec<_> = subject.active_contacts().collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, "c1");
    }

    #[test]
    fn test_safe_zone_ids() {
        let subject = subject_with_contacts();
        assert_eq!(subject.safe_zone_ids(), vec!["home"]);
    }
}
