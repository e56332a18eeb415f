//! Channel Normalizer — raw readings to validated Observations
//!
//! Pure conversion with channel-specific validation. Vitals outside their
//! physiological envelope are clamped (sensor noise); invalid posture or
//! location payloads and non-finite accelerometer samples are rejected
//! outright. Rejected readings never reach downstream evaluation silently:
//! the caller receives a typed reason and counts the rejection.

use crate::types::{
    AccelSample, Channel, LocationSample, Observation, ObservationValue, Posture, RawObservation,
    VitalsSample,
};

/// Why a raw reading was rejected.
#[derive(Debug, thiserror::Error)]
pub enum InvalidObservation {
    #[error("malformed {channel} payload: {source}")]
    BadPayload {
        channel: Channel,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} is not a finite number")]
    NonFinite { field: &'static str },
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: f64 },
    #[error("empty subject id")]
    EmptySubjectId,
    #[error("vitals reading carries no metrics")]
    EmptyVitals,
    #[error(
        "out-of-order observation for {channel}: {timestamp_ms} ms precedes last seen {last_seen_ms} ms"
    )]
    OutOfOrder {
        channel: Channel,
        timestamp_ms: u64,
        last_seen_ms: u64,
    },
    #[error("subject '{0}' is not enrolled")]
    UnknownSubject(String),
    #[error("channel '{0}' is synthetic and not accepted at ingestion")]
    SyntheticChannel(Channel),
}

/// Physiological clamp envelopes for vitals. Readings outside these are
/// treated as sensor noise and pulled to the nearest bound rather than
/// dropped, so a glitching probe still produces a (critical) signal.
mod vitals_envelope {
    pub const HEART_RATE: (f64, f64) = (20.0, 260.0);
    pub const SPO2: (f64, f64) = (0.0, 100.0);
    pub const TEMP_F: (f64, f64) = (80.0, 110.0);
    pub const SYSTOLIC: (f64, f64) = (50.0, 260.0);
    pub const DIASTOLIC: (f64, f64) = (30.0, 200.0);
    pub const RESP_RATE: (f64, f64) = (0.0, 80.0);
    pub const STRESS: (f64, f64) = (0.0, 100.0);
}

/// Normalize a raw reading into an [`Observation`].
///
/// Pure function: no side effects, no clock reads — the observation keeps
/// the timestamp the adapter reported.
pub fn normalize(raw: RawObservation) -> Result<Observation, InvalidObservation> {
    if raw.subject_id.is_empty() {
        return Err(InvalidObservation::EmptySubjectId);
    }

    let confidence = match raw.confidence {
        None => 1.0,
        Some(c) if c.is_nan() => return Err(InvalidObservation::NonFinite { field: "confidence" }),
        Some(c) => c.clamp(0.0, 1.0),
    };

    let value = match raw.channel {
        Channel::Accelerometer => normalize_accel(raw.value)?,
        Channel::VisionPosture => normalize_posture(raw.value)?,
        Channel::Vitals => normalize_vitals(raw.value)?,
        Channel::Location => normalize_location(raw.value)?,
        Channel::Medication => {
            return Err(InvalidObservation::SyntheticChannel(Channel::Medication))
        }
    };

    Ok(Observation {
        subject_id: raw.subject_id,
        channel: raw.channel,
        timestamp_ms: raw.timestamp_ms,
        value,
        confidence,
    })
}

fn normalize_accel(value: serde_json::Value) -> Result<ObservationValue, InvalidObservation> {
    #[derive(serde::Deserialize)]
    struct RawAccel {
        x: f64,
        y: f64,
        z: f64,
        #[serde(default)]
        magnitude: Option<f64>,
    }

    let raw: RawAccel =
        serde_json::from_value(value).map_err(|source| InvalidObservation::BadPayload {
            channel: Channel::Accelerometer,
            source,
        })?;

    for (field, v) in [("x", raw.x), ("y", raw.y), ("z", raw.z)] {
        if !v.is_finite() {
            return Err(InvalidObservation::NonFinite { field });
        }
    }

    let magnitude = match raw.magnitude {
        Some(m) if !m.is_finite() => {
            return Err(InvalidObservation::NonFinite { field: "magnitude" })
        }
        Some(m) if m < 0.0 => {
            return Err(InvalidObservation::OutOfRange {
                field: "magnitude",
                value: m,
            })
        }
        Some(m) => m,
        // Devices that omit magnitude get it recomputed from the axes
        None => (raw.x * raw.x + raw.y * raw.y + raw.z * raw.z).sqrt(),
    };

    Ok(ObservationValue::Accelerometer(AccelSample {
        x: raw.x,
        y: raw.y,
        z: raw.z,
        magnitude,
    }))
}

fn normalize_posture(value: serde_json::Value) -> Result<ObservationValue, InvalidObservation> {
    #[derive(serde::Deserialize)]
    struct RawPosture {
        posture: Posture,
    }

    // Unknown enumeration values fail serde and are rejected outright —
    // a posture we cannot name must not feed the transition detector.
    let raw: RawPosture =
        serde_json::from_value(value).map_err(|source| InvalidObservation::BadPayload {
            channel: Channel::VisionPosture,
            source,
        })?;

    Ok(ObservationValue::Posture {
        posture: raw.posture,
    })
}

fn normalize_vitals(value: serde_json::Value) -> Result<ObservationValue, InvalidObservation> {
    let raw: VitalsSample =
        serde_json::from_value(value).map_err(|source| InvalidObservation::BadPayload {
            channel: Channel::Vitals,
            source,
        })?;

    let sample = VitalsSample {
        heart_rate: clamp_metric("heart_rate", raw.heart_rate, vitals_envelope::HEART_RATE)?,
        spo2: clamp_metric("spo2", raw.spo2, vitals_envelope::SPO2)?,
        temp_f: clamp_metric("temp_f", raw.temp_f, vitals_envelope::TEMP_F)?,
        systolic: clamp_metric("systolic", raw.systolic, vitals_envelope::SYSTOLIC)?,
        diastolic: clamp_metric("diastolic", raw.diastolic, vitals_envelope::DIASTOLIC)?,
        resp_rate: clamp_metric("resp_rate", raw.resp_rate, vitals_envelope::RESP_RATE)?,
        stress: clamp_metric("stress", raw.stress, vitals_envelope::STRESS)?,
    };

    if sample == VitalsSample::default() {
        return Err(InvalidObservation::EmptyVitals);
    }

    Ok(ObservationValue::Vitals(sample))
}

fn clamp_metric(
    field: &'static str,
    value: Option<f64>,
    (lo, hi): (f64, f64),
) -> Result<Option<f64>, InvalidObservation> {
    match value {
        None => Ok(None),
        Some(v) if !v.is_finite() => Err(InvalidObservation::NonFinite { field }),
        Some(v) => Ok(Some(v.clamp(lo, hi))),
    }
}

fn normalize_location(value: serde_json::Value) -> Result<ObservationValue, InvalidObservation> {
    let raw: LocationSample =
        serde_json::from_value(value).map_err(|source| InvalidObservation::BadPayload {
            channel: Channel::Location,
            source,
        })?;

    if let Some(coords) = raw.coordinates {
        if !coords.lat.is_finite() || !coords.lng.is_finite() {
            return Err(InvalidObservation::NonFinite { field: "coordinates" });
        }
        if !(-90.0..=90.0).contains(&coords.lat) {
            return Err(InvalidObservation::OutOfRange {
                field: "lat",
                value: coords.lat,
            });
        }
        if !(-180.0..=180.0).contains(&coords.lng) {
            return Err(InvalidObservation::OutOfRange {
                field: "lng",
                value: coords.lng,
            });
        }
    }

    Ok(ObservationValue::Location(raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(channel: Channel, value: serde_json::Value) -> RawObservation {
        RawObservation {
            subject_id: "s1".to_string(),
            channel,
            timestamp_ms: 1_000,
            value,
            confidence: None,
        }
    }

    #[test]
    fn test_accel_magnitude_recomputed_when_missing() {
        let obs = normalize(raw(
            Channel::Accelerometer,
            serde_json::json!({"x": 3.0, "y": 0.0, "z": 4.0}),
        ))
        .expect("normalize");
        match obs.value {
            ObservationValue::Accelerometer(sample) => {
                assert!((sample.magnitude - 5.0).abs() < 1e-9);
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn test_negative_magnitude_rejected() {
        let err = normalize(raw(
            Channel::Accelerometer,
            serde_json::json!({"x": 0.0, "y": 0.0, "z": 0.0, "magnitude": -1.0}),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            InvalidObservation::OutOfRange {
                field: "magnitude",
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_posture_rejected() {
        let err = normalize(raw(
            Channel::VisionPosture,
            serde_json::json!({"posture": "levitating"}),
        ))
        .unwrap_err();
        assert!(matches!(err, InvalidObservation::BadPayload { .. }));
    }

    #[test]
    fn test_vitals_clamped_not_rejected() {
        let obs = normalize(raw(
            Channel::Vitals,
            serde_json::json!({"spo2": 140.0, "heart_rate": 72.0}),
        ))
        .expect("normalize");
        match obs.value {
            ObservationValue::Vitals(sample) => {
                assert_eq!(sample.spo2, Some(100.0));
                assert_eq!(sample.heart_rate, Some(72.0));
            }
            other => panic!("unexpected value: {other:?}"),
        }
    }

    #[test]
    fn test_empty_vitals_rejected() {
        let err = normalize(raw(Channel::Vitals, serde_json::json!({}))).unwrap_err();
        assert!(matches!(err, InvalidObservation::EmptyVitals));
    }

    #[test]
    fn test_confidence_defaults_and_clamps() {
        let mut r = raw(
            Channel::VisionPosture,
            serde_json::json!({"posture": "standing"}),
        );
        r.confidence = Some(1.7);
        let obs = normalize(r).expect("normalize");
        assert_eq!(obs.confidence, 1.0);

        let obs = normalize(raw(
            Channel::VisionPosture,
            serde_json::json!({"posture": "standing"}),
        ))
        .expect("normalize");
        assert_eq!(obs.confidence, 1.0);
    }

    #[test]
    fn test_bad_coordinates_rejected() {
        let err = normalize(raw(
            Channel::Location,
            serde_json::json!({"coordinates": {"lat": 123.0, "lng": 0.0}, "inside_zones": []}),
        ))
        .unwrap_err();
        assert!(matches!(
            err,
            InvalidObservation::OutOfRange { field: "lat", .. }
        ));
    }
}
