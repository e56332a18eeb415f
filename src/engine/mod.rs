//! Monitor Engine — per-subject sharded ingestion and fusion coordinator
//!
//! Owns the full observation path: normalize → monotonicity check →
//! threshold evaluation → window tracking → fusion → dispatch handoff.
//!
//! Concurrency discipline: subject state lives in a `DashMap` of
//! `Arc<Mutex<SubjectState>>`. Concurrent observations for the same
//! subject serialize on that subject's lock; different subjects proceed
//! in parallel. There is no global lock, and dispatch retries run on
//! spawned tasks so they never block ingestion.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::MonitorConfig;
use crate::dispatch::AlertDispatcher;
use crate::fusion::{FusionEngine, FusionOutcome};
use crate::ingest::{normalize, InvalidObservation};
use crate::store::{EventStore, SuppressedFallRecord};
use crate::tracker::SubjectTracker;
use crate::types::{
    Channel, ChannelSignal, Incident, IncidentStatus, IncidentType, LifecycleState, Posture,
    RawObservation, Severity, Subject,
};

/// Operator and query-path errors.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("incident '{0}' not found")]
    IncidentNotFound(String),
    #[error("subject '{0}' not found")]
    SubjectNotFound(String),
    #[error("invalid status transition {from} -> {to}")]
    InvalidTransition {
        from: IncidentStatus,
        to: IncidentStatus,
    },
    #[error(transparent)]
    Store(#[from] crate::store::StoreError),
}

/// A single-source incident candidate waiting out its correlation window.
///
/// Raising a suspicious event the instant one channel crosses warning
/// would double-report every corroborated fall (the first signal of the
/// burst would fire alone). Candidates are held until the window closes;
/// a higher-priority fusion inside the window replaces them.
struct PendingSuspicious {
    deadline_ms: u64,
    incident: Incident,
}

/// Mutable per-subject state, guarded by a per-subject mutex.
pub struct SubjectState {
    pub subject: Subject,
    pub tracker: SubjectTracker,
    /// Last activity timestamp an inactivity alert was raised for, so one
    /// quiet spell produces one alert
    inactivity_alerted_for: Option<u64>,
    /// Deferred suspicious-event candidate, if any
    pending_suspicious: Option<PendingSuspicious>,
}

/// Counters surfaced on the status endpoint.
#[derive(Default)]
struct EngineCounters {
    observations_accepted: AtomicU64,
    observations_rejected: AtomicU64,
    incidents_raised: AtomicU64,
    incidents_deduped: AtomicU64,
    falls_suppressed: AtomicU64,
}

/// Serializable snapshot of the engine counters.
#[derive(Debug, Clone, serde::Serialize)]
pub struct EngineStats {
    pub observations_accepted: u64,
    pub observations_rejected: u64,
    pub incidents_raised: u64,
    pub incidents_deduped: u64,
    pub falls_suppressed: u64,
    pub pending_store_writes: usize,
}

/// Dashboard view of one subject's live state.
#[derive(Debug, Clone, serde::Serialize)]
pub struct SubjectStateView {
    pub subject: Subject,
    pub current_posture: Option<Posture>,
    pub peak_severity: Severity,
    pub latest_signals: HashMap<String, ChannelSignal>,
    pub suppressed_falls: u64,
    pub active_incidents: Vec<Incident>,
}

pub struct MonitorEngine {
    config: Arc<MonitorConfig>,
    store: EventStore,
    dispatcher: Arc<AlertDispatcher>,
    fusion: FusionEngine,
    subjects: DashMap<String, Arc<Mutex<SubjectState>>>,
    counters: EngineCounters,
}

impl MonitorEngine {
    /// Build the engine and enroll every configured subject.
    pub fn new(
        config: Arc<MonitorConfig>,
        store: EventStore,
        dispatcher: Arc<AlertDispatcher>,
    ) -> Self {
        let subjects = DashMap::new();
        for subject_cfg in &config.subjects {
            let state = SubjectState {
                subject: subject_cfg.to_subject(),
                tracker: SubjectTracker::new(config.tracker),
                inactivity_alerted_for: None,
                pending_suspicious: None,
            };
            subjects.insert(subject_cfg.id.clone(), Arc::new(Mutex::new(state)));
        }
        info!(subjects = subjects.len(), "Monitor engine initialized");

        Self {
            fusion: FusionEngine::new(config.fusion),
            config,
            store,
            dispatcher,
            subjects,
            counters: EngineCounters::default(),
        }
    }

    fn subject_handle(&self, subject_id: &str) -> Option<Arc<Mutex<SubjectState>>> {
        // Clone the Arc out of the shard so the map guard drops before
        // any await on the subject mutex.
        self.subjects.get(subject_id).map(|s| Arc::clone(&s))
    }

    /// Ingest one raw observation end to end.
    ///
    /// Returns the rejection reason for invalid readings; the caller
    /// reports it back to the sensor adapter. Rejections are counted,
    /// never silently dropped.
    pub async fn ingest(&self, raw: RawObservation) -> Result<(), InvalidObservation> {
        let result = self.ingest_inner(raw).await;
        match &result {
            Ok(()) => {
                self.counters
                    .observations_accepted
                    .fetch_add(1, Ordering::Relaxed);
            }
            Err(reason) => {
                self.counters
                    .observations_rejected
                    .fetch_add(1, Ordering::Relaxed);
                warn!(reason = %reason, "Observation rejected");
            }
        }
        result
    }

    async fn ingest_inner(&self, raw: RawObservation) -> Result<(), InvalidObservation> {
        let handle = self
            .subject_handle(&raw.subject_id)
            .ok_or_else(|| InvalidObservation::UnknownSubject(raw.subject_id.clone()))?;

        let observation = normalize(raw)?;
        let thresholds = self.config.thresholds_for(&observation.subject_id);
        let now_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;

        let mut state = handle.lock().await;
        state.tracker.record_observation(&observation)?;
        // Fresh activity clears the one-shot inactivity alert latch.
        state.inactivity_alerted_for = None;

        let signal = crate::evaluator::evaluate(
            &observation,
            thresholds,
            &state.subject.geofences,
            now_ms,
        );
        state.tracker.record_signal(signal.clone());

        // Expire a deferred candidate whose window closed before this
        // observation, then fuse around the new signal if it is actionable.
        self.flush_pending_suspicious(&mut state, observation.timestamp_ms)
            .await;
        if signal.severity.is_actionable() {
            self.run_fusion(&mut state, &signal).await;
        }
        Ok(())
    }

    /// Fuse around an actionable trigger and hand any incident to the
    /// dispatcher. Runs under the subject lock.
    async fn run_fusion(&self, state: &mut SubjectState, trigger: &ChannelSignal) {
        match self.fusion.fuse(trigger, &state.tracker) {
            FusionOutcome::Raised(incident)
                if incident.incident_type == IncidentType::SuspiciousEvent =>
            {
                // Hold single-source candidates until the correlation
                // window closes; a corroborating signal inside the window
                // upgrades them instead. The deadline is anchored on the
                // first signal of the burst.
                let deadline_ms = state
                    .pending_suspicious
                    .as_ref()
                    .map_or_else(
                        || trigger.observed_at_ms + self.config.fusion.correlation_window_ms,
                        |p| p.deadline_ms,
                    );
                state.pending_suspicious = Some(PendingSuspicious {
                    deadline_ms,
                    incident,
                });
            }
            FusionOutcome::Raised(incident) => {
                state.pending_suspicious = None;
                // Debounce invariant: at most one active confirmed fall per
                // subject, even when the tracker cooldown has lapsed but an
                // earlier fall is still open.
                if incident.incident_type == IncidentType::ConfirmedFall {
                    if self.store.has_active_fall(&incident.subject_id) {
                        self.audit_suppressed_fall(
                            state,
                            incident.contributing,
                            trigger.observed_at_ms,
                        );
                        return;
                    }
                    state.tracker.note_confirmed_fall(trigger.observed_at_ms);
                }
                self.raise_deduped(state, incident).await;
            }
            FusionOutcome::FallSuppressed { contributing } => {
                // The burst was a (suppressed) fall — its first signal must
                // not resurface as a suspicious event.
                state.pending_suspicious = None;
                self.audit_suppressed_fall(state, contributing, trigger.observed_at_ms);
            }
            FusionOutcome::Nothing => {}
        }
    }

    /// Raise a deferred suspicious candidate once its window has closed.
    async fn flush_pending_suspicious(&self, state: &mut SubjectState, now_ms: u64) {
        let expired = state
            .pending_suspicious
            .as_ref()
            .is_some_and(|p| now_ms >= p.deadline_ms);
        if expired {
            if let Some(pending) = state.pending_suspicious.take() {
                self.raise_deduped(state, pending.incident).await;
            }
        }
    }

    /// Raise unless an incident of the same type is already active for the
    /// subject — repeated samples of one ongoing condition must not fan
    /// out into duplicate alerts.
    async fn raise_deduped(&self, state: &mut SubjectState, incident: Incident) {
        let duplicate = self.store.active_incidents().iter().any(|i| {
            i.subject_id == incident.subject_id && i.incident_type == incident.incident_type
        });
        if duplicate {
            self.counters.incidents_deduped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                subject = %incident.subject_id,
                incident_type = %incident.incident_type,
                "Incident deduplicated — same type already active"
            );
            return;
        }
        self.raise(state, incident).await;
    }

    fn audit_suppressed_fall(
        &self,
        state: &mut SubjectState,
        contributing: Vec<ChannelSignal>,
        at_ms: u64,
    ) {
        let count = state.tracker.note_suppressed_fall();
        self.counters.falls_suppressed.fetch_add(1, Ordering::Relaxed);
        info!(
            subject = %state.subject.id,
            suppressed_count = count,
            "Fall burst suppressed by cooldown — recorded for audit"
        );
        let record = SuppressedFallRecord {
            subject_id: state.subject.id.clone(),
            suppressed_at_ms: at_ms,
            contributing,
        };
        if let Err(e) = self.store.append_suppressed(&record) {
            warn!(subject = %state.subject.id, error = %e,
                  "Failed to persist suppressed-fall audit record");
        }
    }

    /// Persist an incident and spawn its dispatch task. Runs under the
    /// subject lock; the dispatch itself does not.
    async fn raise(&self, state: &mut SubjectState, incident: Incident) {
        info!(
            subject = %state.subject.id,
            incident = %incident.id,
            incident_type = %incident.incident_type,
            confidence = incident.confidence,
            corroboration = incident.corroboration_count(),
            "Incident raised"
        );
        self.counters.incidents_raised.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.store.append_incident(&incident) {
            // append_incident buffers internally; an Err here is a
            // programming defect worth failing loudly about in logs.
            warn!(incident = %incident.id, error = %e, "Incident append error");
        }
        state.subject.lifecycle = LifecycleState::Alerting;
        self.dispatcher.spawn(incident, state.subject.clone());
    }

    // ========================================================================
    // Medication / inactivity pipelines (share the dispatcher, not the
    // fusion correlation window)
    // ========================================================================

    /// Raise a medication-miss incident for an unconfirmed dose.
    pub async fn raise_medication_miss(
        &self,
        subject_id: &str,
        medication_name: &str,
        scheduled_at_ms: u64,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        let handle = self
            .subject_handle(subject_id)
            .ok_or_else(|| EngineError::SubjectNotFound(subject_id.to_string()))?;
        let mut state = handle.lock().await;

        let signal = ChannelSignal {
            subject_id: subject_id.to_string(),
            channel: Channel::Medication,
            severity: Severity::Warning,
            reason: format!("scheduled dose of {medication_name} not confirmed"),
            observed_at_ms: scheduled_at_ms,
            confidence: 1.0,
            evaluated_at_ms: now_ms,
        };
        let incident = Incident::new(
            subject_id,
            IncidentType::MedicationMiss,
            vec![signal],
            1.0,
            now_ms,
        );
        self.raise(&mut state, incident).await;
        Ok(())
    }

    /// Scan all subjects for inactivity and raise a low-confidence
    /// suspicious event for each newly quiet one. Called from the
    /// housekeeping loop; also retries buffered store writes.
    pub async fn check_inactivity(&self, now_ms: u64) {
        self.store.flush_pending();

        let handles: Vec<Arc<Mutex<SubjectState>>> = self
            .subjects
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        for handle in handles {
            let mut state = handle.lock().await;
            self.flush_pending_suspicious(&mut state, now_ms).await;
            let Some(elapsed_ms) = state.tracker.inactivity_elapsed_ms(now_ms) else {
                continue;
            };
            let last_activity = state.tracker.last_activity_ms();
            if state.inactivity_alerted_for == last_activity {
                continue; // already alerted for this quiet spell
            }
            state.inactivity_alerted_for = last_activity;

            let minutes = elapsed_ms / 60_000;
            let channel = state
                .tracker
                .latest_by_channel()
                .keys()
                .next()
                .copied()
                .unwrap_or(Channel::Vitals);
            let signal = ChannelSignal {
                subject_id: state.subject.id.clone(),
                channel,
                severity: Severity::Warning,
                reason: format!("no observations on any channel for {minutes} minutes"),
                observed_at_ms: now_ms,
                confidence: 0.5,
                evaluated_at_ms: now_ms,
            };
            let incident = Incident::new(
                state.subject.id.clone(),
                IncidentType::SuspiciousEvent,
                vec![signal],
                0.5,
                now_ms,
            );
            self.raise(&mut state, incident).await;
        }
    }

    // ========================================================================
    // Operator transitions
    // ========================================================================

    /// Operator acknowledges a notified incident.
    pub async fn acknowledge(&self, incident_id: &str) -> Result<Incident, EngineError> {
        self.transition(incident_id, IncidentStatus::Acknowledged)
            .await
    }

    /// Operator clears an incident. Cancels any in-flight dispatch retries.
    pub async fn dismiss(&self, incident_id: &str) -> Result<Incident, EngineError> {
        self.dispatcher.cancel(incident_id);
        self.transition(incident_id, IncidentStatus::Dismissed).await
    }

    async fn transition(
        &self,
        incident_id: &str,
        next: IncidentStatus,
    ) -> Result<Incident, EngineError> {
        let mut incident = self
            .store
            .get_incident(incident_id)?
            .ok_or_else(|| EngineError::IncidentNotFound(incident_id.to_string()))?;

        if !incident.status.can_transition_to(next) {
            return Err(EngineError::InvalidTransition {
                from: incident.status,
                to: next,
            });
        }
        incident.status = next;
        self.store.update_incident(&incident)?;
        info!(incident = %incident.id, status = %incident.status, "Incident status updated");

        // Reflect the subject lifecycle: acknowledged work is resolved,
        // and a subject with nothing active returns to monitored.
        if let Some(handle) = self.subject_handle(&incident.subject_id) {
            let mut state = handle.lock().await;
            let still_active = self
                .store
                .active_incidents()
                .iter()
                .any(|i| i.subject_id == incident.subject_id);
            state.subject.lifecycle = if still_active {
                LifecycleState::Alerting
            } else if next == IncidentStatus::Acknowledged {
                LifecycleState::Resolved
            } else {
                LifecycleState::Monitored
            };
        }

        Ok(incident)
    }

    // ========================================================================
    // Query surface
    // ========================================================================

    pub fn active_incidents(&self) -> Vec<Incident> {
        self.store.active_incidents()
    }

    pub fn incident_history(&self, subject_id: &str, since_ms: u64) -> Vec<Incident> {
        self.store.query_incidents(subject_id, since_ms)
    }

    /// Live state snapshot for one subject.
    pub async fn subject_state(&self, subject_id: &str) -> Result<SubjectStateView, EngineError> {
        let handle = self
            .subject_handle(subject_id)
            .ok_or_else(|| EngineError::SubjectNotFound(subject_id.to_string()))?;
        let state = handle.lock().await;

        let latest_signals = state
            .tracker
            .latest_by_channel()
            .into_iter()
            .map(|(channel, signal)| (channel.to_string(), signal))
            .collect();

        Ok(SubjectStateView {
            subject: state.subject.clone(),
            current_posture: state.tracker.current_posture(),
            peak_severity: state.tracker.peak_severity(),
            latest_signals,
            suppressed_falls: state.tracker.suppressed_fall_count(),
            active_incidents: self
                .store
                .active_incidents()
                .into_iter()
                .filter(|i| i.subject_id == subject_id)
                .collect(),
        })
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            observations_accepted: self.counters.observations_accepted.load(Ordering::Relaxed),
            observations_rejected: self.counters.observations_rejected.load(Ordering::Relaxed),
            incidents_raised: self.counters.incidents_raised.load(Ordering::Relaxed),
            incidents_deduped: self.counters.incidents_deduped.load(Ordering::Relaxed),
            falls_suppressed: self.counters.falls_suppressed.load(Ordering::Relaxed),
            pending_store_writes: self.store.pending_count(),
        }
    }

    pub fn store(&self) -> &EventStore {
        &self.store
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }
}
