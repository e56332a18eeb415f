//! Monitor Configuration - all detection thresholds as operator-tunable TOML values
//!
//! The numeric bands below default to the values the product team shipped
//! in the pilot dashboards. They are placeholders pending clinical
//! validation and MUST be reviewed per deployment; every one of them can
//! be overridden globally or per subject.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::types::{EmergencyContact, Geofence};

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a monitoring deployment.
///
/// Load with `MonitorConfig::load()` which searches:
/// 1. `$VIGIL_CONFIG` env var
/// 2. `./monitor_config.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct MonitorConfig {
    /// Deployment identification
    #[serde(default)]
    pub deployment: DeploymentInfo,

    /// Global detection threshold bands
    #[serde(default)]
    pub thresholds: ThresholdConfig,

    /// Temporal state tracker tuning
    #[serde(default)]
    pub tracker: TrackerConfig,

    /// Fusion engine tuning
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Alert dispatch retry policy
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Notification sink (messaging provider) settings
    #[serde(default)]
    pub sink: SinkConfig,

    /// Medication adherence scheduler
    #[serde(default)]
    pub medication: MedicationConfig,

    /// Event store location
    #[serde(default)]
    pub store: StoreConfig,

    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Enrolled subjects
    #[serde(default)]
    pub subjects: Vec<SubjectConfig>,
}

impl MonitorConfig {
    /// Load configuration using the standard search order:
    /// 1. `$VIGIL_CONFIG` environment variable
    /// 2. `./monitor_config.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("VIGIL_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), subjects = config.subjects.len(),
                              "Loaded monitor config from VIGIL_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e,
                              "Failed to load config from VIGIL_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "VIGIL_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("monitor_config.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!(subjects = config.subjects.len(),
                          "Loaded monitor config from ./monitor_config.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./monitor_config.toml, using defaults");
                }
            }
        }

        info!("No monitor_config.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.to_path_buf(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.to_path_buf(), e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field invariants the type system cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.thresholds.validate("thresholds")?;

        if self.tracker.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "tracker.window_secs must be greater than zero".to_string(),
            ));
        }
        if self.fusion.correlation_window_ms == 0 {
            return Err(ConfigError::Invalid(
                "fusion.correlation_window_ms must be greater than zero".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.fusion.single_source_discount) {
            return Err(ConfigError::Invalid(
                "fusion.single_source_discount must be within [0, 1]".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for subject in &self.subjects {
            if subject.id.is_empty() {
                return Err(ConfigError::Invalid("subject with empty id".to_string()));
            }
            if !seen.insert(subject.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate subject id '{}'",
                    subject.id
                )));
            }
            for contact in &subject.contacts {
                if contact.phone.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "subject '{}' contact '{}' has an empty phone number",
                        subject.id, contact.id
                    )));
                }
            }
            let mut zones = HashSet::new();
            for fence in &subject.geofences {
                if !zones.insert(fence.id.as_str()) {
                    return Err(ConfigError::Invalid(format!(
                        "subject '{}' has duplicate geofence id '{}'",
                        subject.id, fence.id
                    )));
                }
            }
            for med in &subject.medications {
                crate::medication::parse_timing(&med.timing).map_err(|e| {
                    ConfigError::Invalid(format!(
                        "subject '{}' medication '{}': {}",
                        subject.id, med.name, e
                    ))
                })?;
            }
            if let Some(ref overrides) = subject.thresholds {
                overrides.validate(&format!("subjects.{}.thresholds", subject.id))?;
            }
        }
        Ok(())
    }

    /// Look up an enrolled subject.
    pub fn subject(&self, subject_id: &str) -> Option<&SubjectConfig> {
        self.subjects.iter().find(|s| s.id == subject_id)
    }

    /// Effective thresholds for a subject: per-subject override or global.
    pub fn thresholds_for(&self, subject_id: &str) -> &ThresholdConfig {
        self.subject(subject_id)
            .and_then(|s| s.thresholds.as_ref())
            .unwrap_or(&self.thresholds)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// Deployment
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentInfo {
    /// Deployment identifier used in logs and dispatched messages
    #[serde(default = "default_deployment_name")]
    pub name: String,
    /// Human-readable site label included in alert messages
    #[serde(default = "default_site_label")]
    pub site: String,
}

fn default_deployment_name() -> String {
    "VIGIL-001".to_string()
}

fn default_site_label() -> String {
    "Home".to_string()
}

impl Default for DeploymentInfo {
    fn default() -> Self {
        Self {
            name: default_deployment_name(),
            site: default_site_label(),
        }
    }
}

// ============================================================================
// Threshold Bands
// ============================================================================

/// All per-channel detection bands.
///
/// Inclusivity convention: warning/critical boundaries are inclusive on the
/// worse side. An accelerometer magnitude of exactly `critical_g` is
/// CRITICAL; a heart rate of exactly `heart_rate_warn_max` is WARNING.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ThresholdConfig {
    #[serde(default)]
    pub accelerometer: AccelThresholds,
    #[serde(default)]
    pub vitals: VitalsThresholds,
}

impl ThresholdConfig {
    fn validate(&self, prefix: &str) -> Result<(), ConfigError> {
        if self.accelerometer.warning_g >= self.accelerometer.critical_g {
            return Err(ConfigError::Invalid(format!(
                "{prefix}.accelerometer: warning_g must be below critical_g"
            )));
        }
        let v = &self.vitals;
        if v.heart_rate_warn_min >= v.heart_rate_safe_min
            || v.heart_rate_safe_min > v.heart_rate_safe_max
            || v.heart_rate_safe_max >= v.heart_rate_warn_max
        {
            return Err(ConfigError::Invalid(format!(
                "{prefix}.vitals: heart rate bands must satisfy warn_min < safe_min <= safe_max < warn_max"
            )));
        }
        if v.spo2_critical_below > v.spo2_safe_min {
            return Err(ConfigError::Invalid(format!(
                "{prefix}.vitals: spo2_critical_below must not exceed spo2_safe_min"
            )));
        }
        if v.temp_warn_min >= v.temp_safe_min
            || v.temp_safe_min > v.temp_safe_max
            || v.temp_safe_max >= v.temp_warn_max
        {
            return Err(ConfigError::Invalid(format!(
                "{prefix}.vitals: temperature bands must satisfy warn_min < safe_min <= safe_max < warn_max"
            )));
        }
        Ok(())
    }
}

/// Accelerometer impact bands (g-force).
///
/// The pilot UI displayed a 2.5 g "fall detection threshold" marker; that
/// was a display element, not detection policy. Detection uses the bands
/// below.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AccelThresholds {
    /// Magnitude at or above this is a WARNING impact (g)
    #[serde(default = "default_accel_warning_g")]
    pub warning_g: f64,
    /// Magnitude at or above this is a CRITICAL impact (g)
    #[serde(default = "default_accel_critical_g")]
    pub critical_g: f64,
}

fn default_accel_warning_g() -> f64 {
    12.0
}

fn default_accel_critical_g() -> f64 {
    15.0
}

impl Default for AccelThresholds {
    fn default() -> Self {
        Self {
            warning_g: default_accel_warning_g(),
            critical_g: default_accel_critical_g(),
        }
    }
}

/// Vital-sign bands. Safe ranges are inclusive; readings outside the
/// warning envelope are CRITICAL.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VitalsThresholds {
    // === Heart rate (bpm) ===
    #[serde(default = "default_hr_warn_min")]
    pub heart_rate_warn_min: f64,
    #[serde(default = "default_hr_safe_min")]
    pub heart_rate_safe_min: f64,
    #[serde(default = "default_hr_safe_max")]
    pub heart_rate_safe_max: f64,
    #[serde(default = "default_hr_warn_max")]
    pub heart_rate_warn_max: f64,

    // === SpO2 (%) ===
    #[serde(default = "default_spo2_critical_below")]
    pub spo2_critical_below: f64,
    #[serde(default = "default_spo2_safe_min")]
    pub spo2_safe_min: f64,

    // === Body temperature (°F) ===
    #[serde(default = "default_temp_warn_min")]
    pub temp_warn_min: f64,
    #[serde(default = "default_temp_safe_min")]
    pub temp_safe_min: f64,
    #[serde(default = "default_temp_safe_max")]
    pub temp_safe_max: f64,
    #[serde(default = "default_temp_warn_max")]
    pub temp_warn_max: f64,

    // === Respiratory rate (breaths/min) ===
    #[serde(default = "default_resp_warn_min")]
    pub resp_warn_min: f64,
    #[serde(default = "default_resp_safe_min")]
    pub resp_safe_min: f64,
    #[serde(default = "default_resp_safe_max")]
    pub resp_safe_max: f64,
    #[serde(default = "default_resp_warn_max")]
    pub resp_warn_max: f64,

    // === Stress index (0-100) ===
    #[serde(default = "default_stress_warning_at")]
    pub stress_warning_at: f64,
    #[serde(default = "default_stress_critical_above")]
    pub stress_critical_above: f64,

    // === Blood pressure (mmHg) ===
    #[serde(default = "default_systolic_warn_above")]
    pub systolic_warn_above: f64,
    #[serde(default = "default_systolic_crit_above")]
    pub systolic_crit_above: f64,
    #[serde(default = "default_diastolic_warn_above")]
    pub diastolic_warn_above: f64,
    #[serde(default = "default_diastolic_crit_above")]
    pub diastolic_crit_above: f64,
}

fn default_hr_warn_min() -> f64 {
    50.0
}
fn default_hr_safe_min() -> f64 {
    60.0
}
fn default_hr_safe_max() -> f64 {
    100.0
}
fn default_hr_warn_max() -> f64 {
    120.0
}
fn default_spo2_critical_below() -> f64 {
    90.0
}
fn default_spo2_safe_min() -> f64 {
    95.0
}
fn default_temp_warn_min() -> f64 {
    96.0
}
fn default_temp_safe_min() -> f64 {
    97.0
}
fn default_temp_safe_max() -> f64 {
    99.5
}
fn default_temp_warn_max() -> f64 {
    101.0
}
fn default_resp_warn_min() -> f64 {
    10.0
}
fn default_resp_safe_min() -> f64 {
    12.0
}
fn default_resp_safe_max() -> f64 {
    20.0
}
fn default_resp_warn_max() -> f64 {
    24.0
}
fn default_stress_warning_at() -> f64 {
    70.0
}
fn default_stress_critical_above() -> f64 {
    85.0
}
fn default_systolic_warn_above() -> f64 {
    140.0
}
fn default_systolic_crit_above() -> f64 {
    180.0
}
fn default_diastolic_warn_above() -> f64 {
    90.0
}
fn default_diastolic_crit_above() -> f64 {
    120.0
}

impl Default for VitalsThresholds {
    fn default() -> Self {
        Self {
            heart_rate_warn_min: default_hr_warn_min(),
            heart_rate_safe_min: default_hr_safe_min(),
            heart_rate_safe_max: default_hr_safe_max(),
            heart_rate_warn_max: default_hr_warn_max(),
            spo2_critical_below: default_spo2_critical_below(),
            spo2_safe_min: default_spo2_safe_min(),
            temp_warn_min: default_temp_warn_min(),
            temp_safe_min: default_temp_safe_min(),
            temp_safe_max: default_temp_safe_max(),
            temp_warn_max: default_temp_warn_max(),
            resp_warn_min: default_resp_warn_min(),
            resp_safe_min: default_resp_safe_min(),
            resp_safe_max: default_resp_safe_max(),
            resp_warn_max: default_resp_warn_max(),
            stress_warning_at: default_stress_warning_at(),
            stress_critical_above: default_stress_critical_above(),
            systolic_warn_above: default_systolic_warn_above(),
            systolic_crit_above: default_systolic_crit_above(),
            diastolic_warn_above: default_diastolic_warn_above(),
            diastolic_crit_above: default_diastolic_crit_above(),
        }
    }
}

// ============================================================================
// Tracker / Fusion / Dispatch
// ============================================================================

/// Temporal state tracker tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Rolling window of recent signals kept per subject (seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// How far back an upright posture sample may be for a change into
    /// lying/fallen to count as a transition (seconds)
    #[serde(default = "default_transition_window_secs")]
    pub posture_transition_window_secs: u64,
    /// Quiet period after a confirmed fall during which new fall incidents
    /// are suppressed for the subject (seconds)
    #[serde(default = "default_fall_cooldown_secs")]
    pub fall_cooldown_secs: u64,
    /// No observations on any channel for this long raises a
    /// suspicious_event (seconds). 0 disables.
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
}

fn default_window_secs() -> u64 {
    60
}
fn default_transition_window_secs() -> u64 {
    10
}
fn default_fall_cooldown_secs() -> u64 {
    300
}
fn default_inactivity_timeout_secs() -> u64 {
    14_400
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            posture_transition_window_secs: default_transition_window_secs(),
            fall_cooldown_secs: default_fall_cooldown_secs(),
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
        }
    }
}

/// Fusion engine tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionConfig {
    /// Signals within this window of the trigger corroborate it (milliseconds)
    #[serde(default = "default_correlation_window_ms")]
    pub correlation_window_ms: u64,
    /// Confidence multiplier for uncorroborated single-channel incidents
    #[serde(default = "default_single_source_discount")]
    pub single_source_discount: f64,
}

fn default_correlation_window_ms() -> u64 {
    3_000
}
fn default_single_source_discount() -> f64 {
    0.7
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            correlation_window_ms: default_correlation_window_ms(),
            single_source_discount: default_single_source_discount(),
        }
    }
}

/// Alert dispatch retry policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Retries after the initial attempt (4 total attempts at the default)
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Backoff before retry N is base^(2N) seconds: 1 s, 4 s, 16 s
    #[serde(default = "default_backoff_base_secs")]
    pub backoff_base_secs: u64,
    /// Per-attempt sink call timeout; exceeding it counts as a failed attempt
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

fn default_max_retries() -> u32 {
    3
}
fn default_backoff_base_secs() -> u64 {
    1
}
fn default_attempt_timeout_secs() -> u64 {
    5
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_secs: default_backoff_base_secs(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

// ============================================================================
// Sink / Medication / Store / Server
// ============================================================================

/// Messaging provider settings. Credentials come from the environment
/// (`TWILIO_ACCOUNT_SID`, `TWILIO_AUTH_TOKEN`), never from this file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// WhatsApp sender number (without the `whatsapp:` prefix)
    #[serde(default)]
    pub from_whatsapp: String,
    /// Provider API base URL; override for test doubles
    #[serde(default = "default_sink_api_base")]
    pub api_base: String,
}

fn default_sink_api_base() -> String {
    "https://api.twilio.com".to_string()
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            from_whatsapp: String::new(),
            api_base: default_sink_api_base(),
        }
    }
}

/// Medication adherence scheduler tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MedicationConfig {
    /// Minutes after the scheduled time before a dose counts as missed
    #[serde(default = "default_grace_minutes")]
    pub grace_minutes: u32,
    /// How often the scheduler scans for missed doses (seconds)
    #[serde(default = "default_check_interval_secs")]
    pub check_interval_secs: u64,
}

fn default_grace_minutes() -> u32 {
    30
}
fn default_check_interval_secs() -> u64 {
    60
}

impl Default for MedicationConfig {
    fn default() -> Self {
        Self {
            grace_minutes: default_grace_minutes(),
            check_interval_secs: default_check_interval_secs(),
        }
    }
}

/// Event store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

fn default_db_path() -> String {
    "./data/vigil_events.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

fn default_server_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_server_addr(),
        }
    }
}

// ============================================================================
// Subjects
// ============================================================================

/// A medication schedule entry, e.g. `timing = "08:00, 20:00"`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MedicationSchedule {
    pub name: String,
    #[serde(default)]
    pub dosage: String,
    /// Comma-separated 24h `HH:MM` dose times
    pub timing: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

/// Per-subject enrollment: contacts, geofences, medications, and optional
/// threshold overrides replacing the global tables wholesale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectConfig {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub contacts: Vec<EmergencyContact>,
    #[serde(default)]
    pub geofences: Vec<Geofence>,
    #[serde(default)]
    pub medications: Vec<MedicationSchedule>,
    #[serde(default)]
    pub thresholds: Option<ThresholdConfig>,
}

impl SubjectConfig {
    /// Convert to the runtime subject type.
    pub fn to_subject(&self) -> crate::types::Subject {
        crate::types::Subject {
            id: self.id.clone(),
            name: self.name.clone(),
            contacts: self.contacts.clone(),
            geofences: self.geofences.clone(),
            lifecycle: crate::types::LifecycleState::Monitored,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_validates() {
        let config = MonitorConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_bands_match_pilot_ui() {
        let t = ThresholdConfig::default();
        assert_eq!(t.accelerometer.warning_g, 12.0);
        assert_eq!(t.accelerometer.critical_g, 15.0);
        assert_eq!(t.vitals.heart_rate_safe_min, 60.0);
        assert_eq!(t.vitals.heart_rate_safe_max, 100.0);
        assert_eq!(t.vitals.spo2_critical_below, 90.0);
        assert_eq!(t.vitals.spo2_safe_min, 95.0);
    }

    #[test]
    fn test_inverted_accel_bands_rejected() {
        let mut config = MonitorConfig::default();
        config.thresholds.accelerometer.warning_g = 16.0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("warning_g"));
    }

    #[test]
    fn test_duplicate_subject_ids_rejected() {
        let mut config = MonitorConfig::default();
        for _ in 0..2 {
            config.subjects.push(SubjectConfig {
                id: "s1".to_string(),
                name: "Margaret".to_string(),
                contacts: Vec::new(),
                geofences: Vec::new(),
                medications: Vec::new(),
                thresholds: None,
            });
        }
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate subject id"));
    }

    #[test]
    fn test_thresholds_for_prefers_subject_override() {
        let mut config = MonitorConfig::default();
        let mut overrides = ThresholdConfig::default();
        overrides.accelerometer.critical_g = 18.0;
        config.subjects.push(SubjectConfig {
            id: "s1".to_string(),
            name: "Margaret".to_string(),
            contacts: Vec::new(),
            geofences: Vec::new(),
            medications: Vec::new(),
            thresholds: Some(overrides),
        });
        assert_eq!(config.thresholds_for("s1").accelerometer.critical_g, 18.0);
        assert_eq!(config.thresholds_for("other").accelerometer.critical_g, 15.0);
    }

    #[test]
    fn test_parse_minimal_toml() {
        let toml_src = r#"
            [deployment]
            name = "VIGIL-TEST"

            [thresholds.accelerometer]
            warning_g = 11.0
            critical_g = 14.0

            [[subjects]]
            id = "s1"
            name = "Margaret"

            [[subjects.contacts]]
            id = "c1"
            phone = "+15550001111"
            relationship = "daughter"
        "#;
        let config: MonitorConfig = toml::from_str(toml_src).expect("parse");
        assert!(config.validate().is_ok());
        assert_eq!(config.thresholds.accelerometer.warning_g, 11.0);
        assert_eq!(config.subjects[0].contacts[0].relationship, "daughter");
        // Unset sections fall back to defaults
        assert_eq!(config.tracker.fall_cooldown_secs, 300);
    }
}
