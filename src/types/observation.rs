//! Observation types — one normalized reading per sensing channel

use serde::{Deserialize, Serialize};

/// An independent sensing modality.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    /// Wearable accelerometer (g-force samples)
    Accelerometer,
    /// Vision-derived posture classifier output
    VisionPosture,
    /// Vital-sign monitor (heart rate, SpO2, temperature, ...)
    Vitals,
    /// Location / geofence tracker
    Location,
    /// Synthetic channel for the medication adherence pipeline.
    /// Never accepted at ingestion — it exists so medication-miss
    /// incidents can carry a schedule signal like every other incident.
    Medication,
}

impl Channel {
    /// The ingestible sensing channels (excludes the synthetic
    /// medication channel).
    pub const ALL: [Channel; 4] = [
        Channel::Accelerometer,
        Channel::VisionPosture,
        Channel::Vitals,
        Channel::Location,
    ];
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::Accelerometer => write!(f, "accelerometer"),
            Channel::VisionPosture => write!(f, "vision_posture"),
            Channel::Vitals => write!(f, "vitals"),
            Channel::Location => write!(f, "location"),
            Channel::Medication => write!(f, "medication"),
        }
    }
}

/// Posture classification emitted by the vision channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Posture {
    Standing,
    Sitting,
    Lying,
    Fallen,
    #[default]
    Unknown,
}

impl Posture {
    /// Whether this posture is an upright state a fall can start from.
    pub fn is_upright(self) -> bool {
        matches!(self, Posture::Standing | Posture::Sitting)
    }

    /// Whether this posture is a ground-level state a fall can end in.
    pub fn is_down(self) -> bool {
        matches!(self, Posture::Lying | Posture::Fallen)
    }
}

impl std::fmt::Display for Posture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Posture::Standing => write!(f, "standing"),
            Posture::Sitting => write!(f, "sitting"),
            Posture::Lying => write!(f, "lying"),
            Posture::Fallen => write!(f, "fallen"),
            Posture::Unknown => write!(f, "unknown"),
        }
    }
}

/// One accelerometer sample in g-force.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct AccelSample {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    /// Vector magnitude (g). Recomputed from axes when the device omits it.
    pub magnitude: f64,
}

/// One vital-signs sample. Fields the device did not report are `None`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct VitalsSample {
    /// Heart rate (bpm)
    pub heart_rate: Option<f64>,
    /// Blood oxygen saturation (%)
    pub spo2: Option<f64>,
    /// Body temperature (°F)
    pub temp_f: Option<f64>,
    /// Systolic blood pressure (mmHg)
    pub systolic: Option<f64>,
    /// Diastolic blood pressure (mmHg)
    pub diastolic: Option<f64>,
    /// Respiratory rate (breaths/min)
    pub resp_rate: Option<f64>,
    /// Stress index (0-100)
    pub stress: Option<f64>,
}

/// GPS coordinates reported by the location tracker.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

/// One location sample: which configured zones the subject is inside.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LocationSample {
    #[serde(default)]
    pub coordinates: Option<Coordinates>,
    /// Zone the tracker resolved as the current position label
    #[serde(default)]
    pub zone_id: Option<String>,
    /// All zone ids the subject is currently inside
    #[serde(default)]
    pub inside_zones: Vec<String>,
}

/// Channel-specific observation payload.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ObservationValue {
    Accelerometer(AccelSample),
    Posture { posture: Posture },
    Vitals(VitalsSample),
    Location(LocationSample),
}

impl ObservationValue {
    /// The channel this payload belongs to.
    pub fn channel(&self) -> Channel {
        match self {
            ObservationValue::Accelerometer(_) => Channel::Accelerometer,
            ObservationValue::Posture { .. } => Channel::VisionPosture,
            ObservationValue::Vitals(_) => Channel::Vitals,
            ObservationValue::Location(_) => Channel::Location,
        }
    }
}

/// Raw reading as posted by a sensor adapter, before normalization.
///
/// The `value` payload is untyped JSON; the normalizer parses it according
/// to `channel` and rejects readings it cannot make sense of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawObservation {
    pub subject_id: String,
    pub channel: Channel,
    /// Unix epoch milliseconds
    pub timestamp_ms: u64,
    pub value: serde_json::Value,
    /// Sensor-reported confidence; defaults to 1.0 when omitted
    #[serde(default)]
    pub confidence: Option<f64>,
}

/// One normalized reading. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Observation {
    pub subject_id: String,
    pub channel: Channel,
    /// Unix epoch milliseconds; must be non-decreasing per (subject, channel)
    pub timestamp_ms: u64,
    pub value: ObservationValue,
    /// Confidence in [0, 1]
    pub confidence: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_posture_transitions_classification() {
        assert!(Posture::Standing.is_upright());
        assert!(Posture::Sitting.is_upright());
        assert!(!Posture::Lying.is_upright());
        assert!(Posture::Lying.is_down());
        assert!(Posture::Fallen.is_down());
        assert!(!Posture::Unknown.is_upright());
        assert!(!Posture::Unknown.is_down());
    }

    #[test]
    fn test_channel_display_matches_serde() {
        for channel in Channel::ALL {
            let json = serde_json::to_string(&channel).expect("serialize");
            assert_eq!(json.trim_matches('"'), channel.to_string());
        }
    }

    #[test]
    fn test_observation_value_channel() {
        let v = ObservationValue::Posture {
            posture: Posture::Lying,
        };
        assert_eq!(v.channel(), Channel::VisionPosture);
    }
}
