//! Medication adherence pipeline
//!
//! Runs beside the sensor-fusion path: dose schedules come from the
//! subject config, a periodic scan flags doses not confirmed within the
//! grace period, and misses are raised as incidents through the shared
//! dispatcher. Medication signals never enter the fusion correlation
//! window.
//!
//! Schedule times (`timing = "08:00, 20:00"`) are interpreted in UTC;
//! deployments in other timezones encode their local dose times
//! accordingly.

use std::sync::Arc;

use chrono::{DateTime, Duration as ChronoDuration, NaiveTime, TimeZone, Utc};
use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::engine::MonitorEngine;

/// How early a dose may be confirmed before its scheduled time.
const PRE_CONFIRM_MINUTES: i64 = 60;
/// How long confirmation / flag bookkeeping is retained.
const RETENTION_HOURS: i64 = 48;

/// Parse a `"08:00, 20:00"` timing string into dose times.
pub fn parse_timing(timing: &str) -> Result<Vec<NaiveTime>, MedicationError> {
    let mut times = Vec::new();
    for part in timing.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let time = NaiveTime::parse_from_str(part, "%H:%M")
            .map_err(|_| MedicationError::BadTiming(part.to_string()))?;
        times.push(time);
    }
    if times.is_empty() {
        return Err(MedicationError::BadTiming(timing.to_string()));
    }
    Ok(times)
}

#[derive(Debug, thiserror::Error)]
pub enum MedicationError {
    #[error("unparseable dose time '{0}' (expected HH:MM)")]
    BadTiming(String),
    #[error("subject '{0}' not found")]
    UnknownSubject(String),
    #[error("medication '{0}' not scheduled for subject")]
    UnknownMedication(String),
    #[error("no dose of '{0}' is due")]
    NoDoseDue(String),
}

/// One concrete dose slot: (subject, medication, scheduled epoch ms).
type DoseKey = (String, String, u64);

/// Tracks confirmations and raises misses.
pub struct MedicationScheduler {
    engine: Arc<MonitorEngine>,
    config: Arc<MonitorConfig>,
    /// Dose slots confirmed as taken (value: confirmation epoch ms)
    confirmed: DashMap<DoseKey, u64>,
    /// Dose slots already flagged as missed
    flagged: DashMap<DoseKey, ()>,
}

impl MedicationScheduler {
    pub fn new(engine: Arc<MonitorEngine>, config: Arc<MonitorConfig>) -> Self {
        Self {
            engine,
            config,
            confirmed: DashMap::new(),
            flagged: DashMap::new(),
        }
    }

    /// Run the periodic missed-dose scan until cancellation.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let interval = std::time::Duration::from_secs(self.config.medication.check_interval_secs);
        info!(
            interval_secs = interval.as_secs(),
            grace_minutes = self.config.medication.grace_minutes,
            "Medication scheduler started"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[MedicationScheduler] Shutdown signal received");
                    break;
                }
                _ = tokio::time::sleep(interval) => {
                    self.scan_missed(Utc::now()).await;
                }
            }
        }
    }

    /// Confirm the dose of `medication_name` closest to due for the
    /// subject. Accepts confirmations up to an hour early and any time
    /// after the scheduled slot (late confirmation stops future flags for
    /// that slot; an already-raised miss stands as history).
    pub fn confirm_dose(
        &self,
        subject_id: &str,
        medication_name: &str,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, MedicationError> {
        let subject = self
            .config
            .subject(subject_id)
            .ok_or_else(|| MedicationError::UnknownSubject(subject_id.to_string()))?;
        let schedule = subject
            .medications
            .iter()
            .find(|m| m.name == medication_name)
            .ok_or_else(|| MedicationError::UnknownMedication(medication_name.to_string()))?;

        let times = parse_timing(&schedule.timing)?;
        let horizon = now + ChronoDuration::minutes(PRE_CONFIRM_MINUTES);

        // Latest slot (today or yesterday) already due within the
        // early-confirm window.
        let slot = [now.date_naive(), (now - ChronoDuration::days(1)).date_naive()]
            .iter()
            .flat_map(|date| times.iter().map(move |t| date.and_time(*t)))
            .filter_map(|naive| Utc.from_local_datetime(&naive).single())
            .filter(|scheduled| *scheduled <= horizon)
            .max()
            .ok_or_else(|| MedicationError::NoDoseDue(medication_name.to_string()))?;

        let key = (
            subject_id.to_string(),
            medication_name.to_string(),
            slot.timestamp_millis().max(0) as u64,
        );
        self.confirmed
            .insert(key, now.timestamp_millis().max(0) as u64);
        info!(
            subject = subject_id,
            medication = medication_name,
            slot = %slot,
            "Dose confirmed"
        );
        Ok(slot)
    }

    /// Flag every dose slot in the last 24 h that is past its grace period
    /// and unconfirmed. Each slot is flagged at most once.
    pub async fn scan_missed(&self, now: DateTime<Utc>) {
        self.prune(now);
        let grace = ChronoDuration::minutes(i64::from(self.config.medication.grace_minutes));

        for subject in &self.config.subjects {
            for schedule in &subject.medications {
                let times = match parse_timing(&schedule.timing) {
                    Ok(t) => t,
                    Err(e) => {
                        // Validated at load time; a failure here means the
                        // config changed underneath us.
                        warn!(subject = %subject.id, medication = %schedule.name,
                              error = %e, "Skipping unparseable schedule");
                        continue;
                    }
                };

                let slots = [now.date_naive(), (now - ChronoDuration::days(1)).date_naive()]
                    .iter()
                    .flat_map(|date| times.iter().map(move |t| date.and_time(*t)))
                    .filter_map(|naive| Utc.from_local_datetime(&naive).single())
                    .filter(|scheduled| {
                        *scheduled + grace <= now
                            && now - *scheduled <= ChronoDuration::hours(24)
                    })
                    .collect::<Vec<_>>();

                for slot in slots {
                    let slot_ms = slot.timestamp_millis().max(0) as u64;
                    let key = (subject.id.clone(), schedule.name.clone(), slot_ms);
                    if self.confirmed.contains_key(&key) || self.flagged.contains_key(&key) {
                        continue;
                    }
                    self.flagged.insert(key, ());
                    if let Err(e) = self
                        .engine
                        .raise_medication_miss(
                            &subject.id,
                            &schedule.name,
                            slot_ms,
                            now.timestamp_millis().max(0) as u64,
                        )
                        .await
                    {
                        warn!(subject = %subject.id, medication = %schedule.name,
                              error = %e, "Failed to raise medication miss");
                    }
                }
            }
        }
    }

    /// Drop bookkeeping older than the retention horizon.
    fn prune(&self, now: DateTime<Utc>) {
        let cutoff_ms = (now - ChronoDuration::hours(RETENTION_HOURS))
            .timestamp_millis()
            .max(0) as u64;
        self.confirmed.retain(|(_, _, slot_ms), _| *slot_ms >= cutoff_ms);
        self.flagged.retain(|(_, _, slot_ms), _| *slot_ms >= cutoff_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_timing_valid() {
        let times = parse_timing("08:00, 20:00").expect("parse");
        assert_eq!(times.len(), 2);
        assert_eq!(times[0], NaiveTime::from_hms_opt(8, 0, 0).expect("time"));
        assert_eq!(times[1], NaiveTime::from_hms_opt(20, 0, 0).expect("time"));
    }

    #[test]
    fn test_parse_timing_single_dose() {
        let times = parse_timing("21:30").expect("parse");
        assert_eq!(times, vec![NaiveTime::from_hms_opt(21, 30, 0).expect("time")]);
    }

    #[test]
    fn test_parse_timing_rejects_garbage() {
        assert!(parse_timing("8 o'clock").is_err());
        assert!(parse_timing("").is_err());
        assert!(parse_timing("25:00").is_err());
    }
}
