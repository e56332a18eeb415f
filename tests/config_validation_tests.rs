//! Monitor configuration loading and validation tests.

use std::io::Write;

use vigil_os::config::MonitorConfig;

fn write_config(contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("monitor_config.toml");
    let mut file = std::fs::File::create(&path).expect("create");
    file.write_all(contents.as_bytes()).expect("write");
    (dir, path)
}

#[test]
fn test_full_config_parses() {
    let (_dir, path) = write_config(
        r#"
        [deployment]
        name = "VIGIL-TEST"
        site = "Maple Street House"

        [thresholds.accelerometer]
        warning_g = 11.0
        critical_g = 14.0

        [thresholds.vitals]
        heart_rate_safe_min = 55.0
        heart_rate_safe_max = 105.0

        [tracker]
        window_secs = 90
        fall_cooldown_secs = 600

        [fusion]
        correlation_window_ms = 2000

        [dispatch]
        max_retries = 5
        attempt_timeout_secs = 10

        [[subjects]]
        id = "margaret"
        name = "Margaret"

        [[subjects.contacts]]
        id = "c1"
        phone = "+91-6369739598"
        relationship = "daughter"

        [[subjects.geofences]]
        id = "home"
        name = "Home Zone"
        kind = "safe"
        radius_m = 100.0

        [[subjects.geofences]]
        id = "city"
        name = "City Limits"
        kind = "danger"
        radius_m = 5000.0

        [[subjects.medications]]
        name = "Lisinopril"
        dosage = "10mg"
        timing = "08:00, 20:00"
        "#,
    );

    let config = MonitorConfig::load_from_file(&path).expect("load");
    assert_eq!(config.deployment.site, "Maple Street House");
    assert_eq!(config.thresholds.accelerometer.warning_g, 11.0);
    assert_eq!(config.thresholds.vitals.heart_rate_safe_max, 105.0);
    // Untouched vitals fields keep their defaults
    assert_eq!(config.thresholds.vitals.spo2_safe_min, 95.0);
    assert_eq!(config.tracker.fall_cooldown_secs, 600);
    assert_eq!(config.fusion.correlation_window_ms, 2000);
    assert_eq!(config.dispatch.max_retries, 5);

    let subject = config.subject("margaret").expect("subject");
    assert_eq!(subject.contacts.len(), 1);
    assert_eq!(subject.geofences[1].radius_m, 5000.0);
    assert_eq!(subject.medications[0].timing, "08:00, 20:00");
}

#[test]
fn test_empty_file_is_all_defaults() {
    let (_dir, path) = write_config("");
    let config = MonitorConfig::load_from_file(&path).expect("load");
    assert_eq!(config.thresholds.accelerometer.critical_g, 15.0);
    assert_eq!(config.tracker.fall_cooldown_secs, 300);
    assert_eq!(config.dispatch.max_retries, 3);
    assert!(config.subjects.is_empty());
}

#[test]
fn test_inverted_accel_thresholds_rejected() {
    let (_dir, path) = write_config(
        r#"
        [thresholds.accelerometer]
        warning_g = 16.0
        critical_g = 14.0
        "#,
    );
    let err = MonitorConfig::load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("warning_g"));
}

#[test]
fn test_bad_medication_timing_rejected() {
    let (_dir, path) = write_config(
        r#"
        [[subjects]]
        id = "margaret"
        name = "Margaret"

        [[subjects.medications]]
        name = "Lisinopril"
        timing = "morning-ish"
        "#,
    );
    let err = MonitorConfig::load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("Lisinopril"));
}

#[test]
fn test_empty_contact_phone_rejected() {
    let (_dir, path) = write_config(
        r#"
        [[subjects]]
        id = "margaret"
        name = "Margaret"

        [[subjects.contacts]]
        id = "c1"
        phone = ""
        "#,
    );
    let err = MonitorConfig::load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("phone"));
}

#[test]
fn test_duplicate_geofence_ids_rejected() {
    let (_dir, path) = write_config(
        r#"
        [[subjects]]
        id = "margaret"
        name = "Margaret"

        [[subjects.geofences]]
        id = "home"
        name = "Home Zone"
        kind = "safe"
        radius_m = 100.0

        [[subjects.geofences]]
        id = "home"
        name = "Duplicate"
        kind = "warning"
        radius_m = 500.0
        "#,
    );
    let err = MonitorConfig::load_from_file(&path).unwrap_err();
    assert!(err.to_string().contains("duplicate geofence"));
}

#[test]
fn test_unparseable_toml_is_a_parse_error() {
    let (_dir, path) = write_config("thresholds = not valid toml {{{");
    let err = MonitorConfig::load_from_file(&path).unwrap_err();
    assert!(matches!(err, vigil_os::config::ConfigError::Parse(_, _)));
}

#[test]
fn test_subject_threshold_override_replaces_tables() {
    let (_dir, path) = write_config(
        r#"
        [[subjects]]
        id = "frail"
        name = "Frail Subject"

        [subjects.thresholds.accelerometer]
        warning_g = 8.0
        critical_g = 11.0

        [[subjects]]
        id = "typical"
        name = "Typical Subject"
        "#,
    );
    let config = MonitorConfig::load_from_file(&path).expect("load");
    assert_eq!(config.thresholds_for("frail").accelerometer.critical_g, 11.0);
    assert_eq!(config.thresholds_for("typical").accelerometer.critical_g, 15.0);
}
