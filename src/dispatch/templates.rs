//! WhatsApp message bodies per incident type
//!
//! Wording mirrors the alert copy the care team already ships to
//! families; keep the emoji headers stable — recipients filter on them.

use crate::types::{Incident, IncidentType, Severity};

/// Render the message body for one incident.
///
/// `site` is the deployment's human-readable location label and `time` a
/// pre-formatted local timestamp string.
pub fn render(incident: &Incident, subject_name: &str, site: &str, time: &str) -> String {
    let details = incident
        .contributing
        .iter()
        .filter(|s| s.severity.is_actionable())
        .map(|s| s.reason.as_str())
        .collect::<Vec<_>>()
        .join("; ");

    match incident.incident_type {
        IncidentType::ConfirmedFall => format!(
            "🚨 URGENT FALL ALERT 🚨\n\n\
             {subject_name} has fallen!\n\n\
             📍 Location: {site}\n\
             ⏰ Time: {time}\n\n\
             Please check on them immediately or contact emergency services if needed."
        ),
        IncidentType::HealthAlert => format!(
            "❤️ VITALS ALERT\n\n\
             Abnormal vital signs detected for {subject_name}\n\n\
             💓 {details}\n\
             📍 Location: {site}\n\
             ⏰ Time: {time}\n\n\
             Please verify their condition."
        ),
        IncidentType::GeofenceBreach => format!(
            "📍 GEOFENCE ALERT\n\n\
             {subject_name} has left the safe area\n\n\
             🗺️ {details}\n\
             ⏰ Time: {time}\n\n\
             Please verify their whereabouts."
        ),
        IncidentType::MedicationMiss => format!(
            "💊 MEDICATION ALERT\n\n\
             {subject_name} missed a scheduled dose\n\n\
             {details}\n\
             ⏰ Time: {time}\n\n\
             Please remind them to take their medication."
        ),
        IncidentType::SuspiciousEvent => {
            let peak = incident
                .contributing
                .iter()
                .map(|s| s.severity)
                .max()
                .unwrap_or(Severity::Warning);
            if peak == Severity::Critical {
                format!(
                    "⚠️ DANGER ALERT ⚠️\n\n\
                     Concerning activity detected for {subject_name}\n\n\
                     {details}\n\
                     📍 Location: {site}\n\
                     ⏰ Time: {time}\n\n\
                     Please verify their safety."
                )
            } else {
                format!(
                    "⚡ ACTIVITY WARNING\n\n\
                     Unusual activity detected for {subject_name}\n\n\
                     {details}\n\
                     📍 Location: {site}\n\
                     ⏰ Time: {time}"
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, ChannelSignal};

    fn incident(incident_type: IncidentType, severity: Severity) -> Incident {
        Incident::new(
            "s1",
            incident_type,
            vec![ChannelSignal {
                subject_id: "s1".to_string(),
                channel: Channel::Accelerometer,
                severity,
                reason: "impact 16.2 g at or above critical threshold 15.0 g".to_string(),
                observed_at_ms: 1_000,
                confidence: 0.9,
                evaluated_at_ms: 1_000,
            }],
            0.95,
            1_000,
        )
    }

    #[test]
    fn test_fall_template_headline() {
        let body = render(
            &incident(IncidentType::ConfirmedFall, Severity::Critical),
            "Margaret",
            "Home",
            "2026-08-07 10:15",
        );
        assert!(body.starts_with("🚨 URGENT FALL ALERT"));
        assert!(body.contains("Margaret has fallen!"));
        assert!(body.contains("Location: Home"));
    }

    #[test]
    fn test_health_template_includes_reasons() {
        let mut inc = incident(IncidentType::HealthAlert, Severity::Critical);
        inc.contributing[0].reason = "heart rate 135 bpm outside safe band 60-100".to_string();
        let body = render(&inc, "Margaret", "Home", "now");
        assert!(body.starts_with("❤️ VITALS ALERT"));
        assert!(body.contains("heart rate 135 bpm"));
    }

    #[test]
    fn test_suspicious_event_escalates_wording_by_severity() {
        let warning = render(
            &incident(IncidentType::SuspiciousEvent, Severity::Warning),
            "Margaret",
            "Home",
            "now",
        );
        assert!(warning.starts_with("⚡ ACTIVITY WARNING"));

        let danger = render(
            &incident(IncidentType::SuspiciousEvent, Severity::Critical),
            "Margaret",
            "Home",
            "now",
        );
        assert!(danger.starts_with("⚠️ DANGER ALERT"));
    }
}
