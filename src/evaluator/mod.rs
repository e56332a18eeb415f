//! Threshold Evaluator — stateless per-channel rule evaluation
//!
//! Maps one normalized observation to a [`ChannelSignal`] using the
//! configured policy tables. Deterministic and side-effect free: the
//! caller supplies the evaluation clock, so every band boundary is
//! unit-testable.
//!
//! Boundary convention: warning/critical thresholds are inclusive on the
//! worse side (see [`ThresholdConfig`]). A magnitude of exactly the
//! critical threshold is CRITICAL.

use crate::config::{ThresholdConfig, VitalsThresholds};
use crate::types::{
    ChannelSignal, Geofence, GeofenceKind, Observation, ObservationValue, Posture, Severity,
    VitalsSample,
};

/// Evaluate one observation against the policy tables.
///
/// `geofences` is the observing subject's zone configuration (only used
/// for location observations). `now_ms` stamps `evaluated_at_ms`.
pub fn evaluate(
    observation: &Observation,
    thresholds: &ThresholdConfig,
    geofences: &[Geofence],
    now_ms: u64,
) -> ChannelSignal {
    let (severity, reason) = match &observation.value {
        ObservationValue::Accelerometer(sample) => evaluate_magnitude(sample.magnitude, thresholds),
        ObservationValue::Posture { posture } => evaluate_posture(*posture),
        ObservationValue::Vitals(sample) => evaluate_vitals(sample, &thresholds.vitals),
        ObservationValue::Location(sample) => evaluate_location(&sample.inside_zones, geofences),
    };

    ChannelSignal {
        subject_id: observation.subject_id.clone(),
        channel: observation.channel,
        severity,
        reason,
        observed_at_ms: observation.timestamp_ms,
        confidence: observation.confidence,
        evaluated_at_ms: now_ms,
    }
}

fn evaluate_magnitude(magnitude: f64, thresholds: &ThresholdConfig) -> (Severity, String) {
    let accel = &thresholds.accelerometer;
    if magnitude >= accel.critical_g {
        (
            Severity::Critical,
            format!(
                "impact {magnitude:.1} g at or above critical threshold {:.1} g",
                accel.critical_g
            ),
        )
    } else if magnitude >= accel.warning_g {
        (
            Severity::Warning,
            format!(
                "impact {magnitude:.1} g at or above warning threshold {:.1} g",
                accel.warning_g
            ),
        )
    } else {
        (Severity::Safe, format!("magnitude {magnitude:.1} g nominal"))
    }
}

fn evaluate_posture(posture: Posture) -> (Severity, String) {
    match posture {
        Posture::Fallen => (
            Severity::Critical,
            "posture classifier reports fallen".to_string(),
        ),
        Posture::Lying => (
            Severity::Warning,
            "posture classifier reports lying".to_string(),
        ),
        Posture::Standing | Posture::Sitting | Posture::Unknown => {
            (Severity::Safe, format!("posture {posture}"))
        }
    }
}

/// Banded metric check: outside the warning envelope is critical, outside
/// the safe range is warning. All bounds inclusive on their safe side.
fn band(value: f64, warn_min: f64, safe_min: f64, safe_max: f64, warn_max: f64) -> Severity {
    if value < warn_min || value > warn_max {
        Severity::Critical
    } else if value < safe_min || value > safe_max {
        Severity::Warning
    } else {
        Severity::Safe
    }
}

fn evaluate_vitals(sample: &VitalsSample, t: &VitalsThresholds) -> (Severity, String) {
    let mut worst = (Severity::Safe, "vitals nominal".to_string());

    let mut consider = |severity: Severity, reason: String| {
        if severity > worst.0 {
            worst = (severity, reason);
        }
    };

    if let Some(hr) = sample.heart_rate {
        let sev = band(
            hr,
            t.heart_rate_warn_min,
            t.heart_rate_safe_min,
            t.heart_rate_safe_max,
            t.heart_rate_warn_max,
        );
        consider(
            sev,
            format!(
                "heart rate {hr:.0} bpm outside safe band {:.0}-{:.0}",
                t.heart_rate_safe_min, t.heart_rate_safe_max
            ),
        );
    }

    if let Some(spo2) = sample.spo2 {
        let sev = if spo2 < t.spo2_critical_below {
            Severity::Critical
        } else if spo2 < t.spo2_safe_min {
            Severity::Warning
        } else {
            Severity::Safe
        };
        consider(
            sev,
            format!("SpO2 {spo2:.0}% below safe minimum {:.0}%", t.spo2_safe_min),
        );
    }

    if let Some(temp) = sample.temp_f {
        let sev = band(
            temp,
            t.temp_warn_min,
            t.temp_safe_min,
            t.temp_safe_max,
            t.temp_warn_max,
        );
        consider(
            sev,
            format!(
                "temperature {temp:.1} °F outside safe band {:.1}-{:.1}",
                t.temp_safe_min, t.temp_safe_max
            ),
        );
    }

    if let Some(resp) = sample.resp_rate {
        let sev = band(
            resp,
            t.resp_warn_min,
            t.resp_safe_min,
            t.resp_safe_max,
            t.resp_warn_max,
        );
        consider(
            sev,
            format!(
                "respiratory rate {resp:.0}/min outside safe band {:.0}-{:.0}",
                t.resp_safe_min, t.resp_safe_max
            ),
        );
    }

    if let Some(stress) = sample.stress {
        let sev = if stress > t.stress_critical_above {
            Severity::Critical
        } else if stress >= t.stress_warning_at {
            Severity::Warning
        } else {
            Severity::Safe
        };
        consider(sev, format!("stress index {stress:.0} elevated"));
    }

    match (sample.systolic, sample.diastolic) {
        (Some(sys), dia) => {
            let dia = dia.unwrap_or(0.0);
            let sev = if sys > t.systolic_crit_above || dia > t.diastolic_crit_above {
                Severity::Critical
            } else if sys > t.systolic_warn_above || dia > t.diastolic_warn_above {
                Severity::Warning
            } else {
                Severity::Safe
            };
            consider(
                sev,
                format!("blood pressure {sys:.0}/{dia:.0} mmHg elevated"),
            );
        }
        (None, Some(dia)) => {
            let sev = if dia > t.diastolic_crit_above {
                Severity::Critical
            } else if dia > t.diastolic_warn_above {
                Severity::Warning
            } else {
                Severity::Safe
            };
            consider(sev, format!("diastolic pressure {dia:.0} mmHg elevated"));
        }
        (None, None) => {}
    }

    worst
}

fn evaluate_location(inside_zones: &[String], geofences: &[Geofence]) -> (Severity, String) {
    if geofences.is_empty() {
        // No zones configured for this subject — nothing to breach.
        return (Severity::Safe, "no geofences configured".to_string());
    }

    let inside_configured: Vec<&Geofence> = geofences
        .iter()
        .filter(|g| inside_zones.iter().any(|z| z == &g.id))
        .collect();

    if inside_configured
        .iter()
        .any(|g| g.kind == GeofenceKind::Safe)
    {
        return (Severity::Safe, "inside safe zone".to_string());
    }

    if let Some(outermost) = inside_configured.first() {
        (
            Severity::Warning,
            format!("outside safe zone, inside {}", outermost.name),
        )
    } else {
        (
            Severity::Critical,
            "outside all configured zones".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccelSample, Channel};

    fn thresholds() -> ThresholdConfig {
        ThresholdConfig::default()
    }

    fn accel_obs(magnitude: f64) -> Observation {
        Observation {
            subject_id: "s1".to_string(),
            channel: Channel::Accelerometer,
            timestamp_ms: 1_000,
            value: ObservationValue::Accelerometer(AccelSample {
                x: 0.0,
                y: 0.0,
                z: magnitude,
                magnitude,
            }),
            confidence: 0.9,
        }
    }

    fn vitals_obs(sample: VitalsSample) -> Observation {
        Observation {
            subject_id: "s1".to_string(),
            channel: Channel::Vitals,
            timestamp_ms: 1_000,
            value: ObservationValue::Vitals(sample),
            confidence: 1.0,
        }
    }

    fn eval(obs: &Observation) -> ChannelSignal {
        evaluate(obs, &thresholds(), &[], 2_000)
    }

    #[test]
    fn test_accel_band_edges() {
        // Critical boundary is inclusive
        assert_eq!(eval(&accel_obs(15.0)).severity, Severity::Critical);
        assert_eq!(eval(&accel_obs(16.2)).severity, Severity::Critical);
        assert_eq!(eval(&accel_obs(14.99)).severity, Severity::Warning);
        // Warning boundary is inclusive
        assert_eq!(eval(&accel_obs(12.0)).severity, Severity::Warning);
        assert_eq!(eval(&accel_obs(11.99)).severity, Severity::Safe);
        assert_eq!(eval(&accel_obs(9.8)).severity, Severity::Safe);
    }

    #[test]
    fn test_heart_rate_band_edges() {
        let hr = |v: f64| {
            eval(&vitals_obs(VitalsSample {
                heart_rate: Some(v),
                ..VitalsSample::default()
            }))
            .severity
        };
        assert_eq!(hr(60.0), Severity::Safe);
        assert_eq!(hr(100.0), Severity::Safe);
        assert_eq!(hr(59.0), Severity::Warning);
        assert_eq!(hr(50.0), Severity::Warning);
        assert_eq!(hr(101.0), Severity::Warning);
        assert_eq!(hr(120.0), Severity::Warning);
        assert_eq!(hr(49.0), Severity::Critical);
        assert_eq!(hr(135.0), Severity::Critical);
    }

    #[test]
    fn test_spo2_band_edges() {
        let spo2 = |v: f64| {
            eval(&vitals_obs(VitalsSample {
                spo2: Some(v),
                ..VitalsSample::default()
            }))
            .severity
        };
        assert_eq!(spo2(95.0), Severity::Safe);
        assert_eq!(spo2(94.0), Severity::Warning);
        assert_eq!(spo2(90.0), Severity::Warning);
        assert_eq!(spo2(89.9), Severity::Critical);
    }

    #[test]
    fn test_worst_vitals_metric_wins() {
        let signal = eval(&vitals_obs(VitalsSample {
            heart_rate: Some(72.0),
            spo2: Some(85.0),
            ..VitalsSample::default()
        }));
        assert_eq!(signal.severity, Severity::Critical);
        assert!(signal.reason.contains("SpO2"));
    }

    #[test]
    fn test_posture_severities() {
        let posture_obs = |p: Posture| Observation {
            subject_id: "s1".to_string(),
            channel: Channel::VisionPosture,
            timestamp_ms: 1_000,
            value: ObservationValue::Posture { posture: p },
            confidence: 0.95,
        };
        assert_eq!(eval(&posture_obs(Posture::Fallen)).severity, Severity::Critical);
        assert_eq!(eval(&posture_obs(Posture::Lying)).severity, Severity::Warning);
        assert_eq!(eval(&posture_obs(Posture::Standing)).severity, Severity::Safe);
        assert_eq!(eval(&posture_obs(Posture::Unknown)).severity, Severity::Safe);
    }

    #[test]
    fn test_location_zone_tiers() {
        let fences = vec![
            Geofence {
                id: "home".to_string(),
                name: "Home Zone".to_string(),
                kind: GeofenceKind::Safe,
                radius_m: 100.0,
            },
            Geofence {
                id: "hood".to_string(),
                name: "Neighborhood".to_string(),
                kind: GeofenceKind::Warning,
                radius_m: 500.0,
            },
        ];
        let loc_obs = |zones: Vec<&str>| Observation {
            subject_id: "s1".to_string(),
            channel: Channel::Location,
            timestamp_ms: 1_000,
            value: ObservationValue::Location(crate::types::LocationSample {
                coordinates: None,
                zone_id: None,
                inside_zones: zones.into_iter().map(String::from).collect(),
            }),
            confidence: 1.0,
        };

        let inside = evaluate(&loc_obs(vec!["home", "hood"]), &thresholds(), &fences, 0);
        assert_eq!(inside.severity, Severity::Safe);

        let wandered = evaluate(&loc_obs(vec!["hood"]), &thresholds(), &fences, 0);
        assert_eq!(wandered.severity, Severity::Warning);

        let gone = evaluate(&loc_obs(vec![]), &thresholds(), &fences, 0);
        assert_eq!(gone.severity, Severity::Critical);
        assert!(gone.reason.contains("outside all"));
    }

    #[test]
    fn test_signal_carries_observation_metadata() {
        let signal = eval(&accel_obs(16.2));
        assert_eq!(signal.channel, Channel::Accelerometer);
        assert_eq!(signal.observed_at_ms, 1_000);
        assert_eq!(signal.evaluated_at_ms, 2_000);
        assert_eq!(signal.confidence, 0.9);
    }
}
