//! Event Store — durable append-only incident log
//!
//! Persists incidents, delivery records, and suppressed-signal audit
//! entries to sled. Incident keys are big-endian creation timestamps
//! prefixing the incident id, so iteration is chronological; a secondary
//! id index supports status updates. No operation ever deletes an
//! incident — status transitions rewrite the record in place.
//!
//! A failed append is buffered in memory and retried on the next store
//! call: an incident is never silently dropped because the disk hiccuped.

use std::path::Path;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::dispatch::DeliveryRecord;
use crate::types::{ChannelSignal, Incident};

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sled::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("incident '{0}' not found")]
    NotFound(String),
    #[error("store poisoned: {0}")]
    Poisoned(String),
}

/// Whether an append landed on disk or was buffered for retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    Stored,
    Buffered,
}

/// Audit record for a fall burst suppressed by the cooldown.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SuppressedFallRecord {
    pub subject_id: String,
    pub suppressed_at_ms: u64,
    pub contributing: Vec<ChannelSignal>,
}

/// Sled-backed event store.
#[derive(Clone)]
pub struct EventStore {
    db: Arc<sled::Db>,
    incidents: sled::Tree,
    incident_index: sled::Tree,
    deliveries: sled::Tree,
    suppressed: sled::Tree,
    /// Incidents that failed to persist, awaiting retry
    pending: Arc<Mutex<Vec<Incident>>>,
}

impl EventStore {
    /// Open or create the event store at the specified path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let db = sled::open(path)?;
        let incidents = db.open_tree("incidents")?;
        let incident_index = db.open_tree("incident_index")?;
        let deliveries = db.open_tree("deliveries")?;
        let suppressed = db.open_tree("suppressed_falls")?;
        Ok(Self {
            db: Arc::new(db),
            incidents,
            incident_index,
            deliveries,
            suppressed,
            pending: Arc::new(Mutex::new(Vec::new())),
        })
    }

    fn primary_key(incident: &Incident) -> Vec<u8> {
        let mut key = incident.created_at_ms.to_be_bytes().to_vec();
        key.extend_from_slice(incident.id.as_bytes());
        key
    }

    /// Append a new incident.
    ///
    /// On database failure the incident is buffered in memory and the
    /// caller is told so; the next store call retries the buffer first.
    pub fn append_incident(&self, incident: &Incident) -> Result<AppendOutcome, StoreError> {
        self.flush_pending();

        match self.write_incident(incident) {
            Ok(()) => Ok(AppendOutcome::Stored),
            Err(e) => {
                warn!(incident = %incident.id, error = %e,
                      "Incident append failed — buffering for retry");
                self.pending
                    .lock()
                    .map_err(|e| StoreError::Poisoned(e.to_string()))?
                    .push(incident.clone());
                Ok(AppendOutcome::Buffered)
            }
        }
    }

    fn write_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let key = Self::primary_key(incident);
        let value = serde_json::to_vec(incident)?;
        self.incidents.insert(&key, value)?;
        self.incident_index
            .insert(incident.id.as_bytes(), key)?;
        Ok(())
    }

    /// Retry buffered appends. Called opportunistically by every append and
    /// by the engine's housekeeping tick.
    pub fn flush_pending(&self) {
        let drained: Vec<Incident> = match self.pending.lock() {
            Ok(mut pending) => pending.drain(..).collect(),
            Err(_) => return,
        };
        for incident in drained {
            if let Err(e) = self.write_incident(&incident) {
                warn!(incident = %incident.id, error = %e,
                      "Buffered incident still failing to persist");
                if let Ok(mut pending) = self.pending.lock() {
                    pending.push(incident);
                }
            }
        }
    }

    /// Number of incidents awaiting a successful append.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    /// Rewrite an incident after a status transition. The record keeps its
    /// original key — history ordering is by creation time.
    pub fn update_incident(&self, incident: &Incident) -> Result<(), StoreError> {
        let key = self
            .incident_index
            .get(incident.id.as_bytes())?
            .ok_or_else(|| StoreError::NotFound(incident.id.clone()))?;
        let value = serde_json::to_vec(incident)?;
        self.incidents.insert(key, value)?;
        Ok(())
    }

    /// Fetch one incident by id.
    pub fn get_incident(&self, id: &str) -> Result<Option<Incident>, StoreError> {
        let Some(key) = self.incident_index.get(id.as_bytes())? else {
            return Ok(None);
        };
        let Some(value) = self.incidents.get(key)? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&value)?))
    }

    /// Incidents for a subject created at or after `since_ms`, oldest first.
    pub fn query_incidents(&self, subject_id: &str, since_ms: u64) -> Vec<Incident> {
        let start = since_ms.to_be_bytes();
        self.incidents
            .range(start.to_vec()..)
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<Incident>(&value).ok())
            .filter(|incident| incident.subject_id == subject_id)
            .collect()
    }

    /// All open or notified incidents across subjects, oldest first.
    pub fn active_incidents(&self) -> Vec<Incident> {
        self.incidents
            .iter()
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<Incident>(&value).ok())
            .filter(|incident| incident.status.is_active())
            .collect()
    }

    /// Whether the subject already has an active confirmed fall — the
    /// per-subject debounce invariant check.
    pub fn has_active_fall(&self, subject_id: &str) -> bool {
        self.active_incidents().iter().any(|i| {
            i.subject_id == subject_id
                && i.incident_type == crate::types::IncidentType::ConfirmedFall
        })
    }

    // ========================================================================
    // Delivery records (dispatcher idempotency)
    // ========================================================================

    fn delivery_key(incident_id: &str, contact_id: &str) -> String {
        format!("{incident_id}:{contact_id}")
    }

    /// Persist the outcome of a dispatch attempt series for one contact.
    pub fn record_delivery(&self, record: &DeliveryRecord) -> Result<(), StoreError> {
        let key = Self::delivery_key(&record.incident_id, &record.contact_id);
        let value = serde_json::to_vec(record)?;
        self.deliveries.insert(key.as_bytes(), value)?;
        Ok(())
    }

    /// Stored delivery record for an (incident, contact) pair, if any.
    pub fn delivery(
        &self,
        incident_id: &str,
        contact_id: &str,
    ) -> Result<Option<DeliveryRecord>, StoreError> {
        let key = Self::delivery_key(incident_id, contact_id);
        let Some(value) = self.deliveries.get(key.as_bytes())? else {
            return Ok(None);
        };
        Ok(Some(serde_json::from_slice(&value)?))
    }

    /// All delivery records for an incident.
    pub fn deliveries_for(&self, incident_id: &str) -> Vec<DeliveryRecord> {
        let prefix = format!("{incident_id}:");
        self.deliveries
            .scan_prefix(prefix.as_bytes())
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<DeliveryRecord>(&value).ok())
            .collect()
    }

    // ========================================================================
    // Suppressed-fall audit
    // ========================================================================

    /// Record a cooldown-suppressed fall burst for audit.
    pub fn append_suppressed(&self, record: &SuppressedFallRecord) -> Result<(), StoreError> {
        let mut key = record.suppressed_at_ms.to_be_bytes().to_vec();
        key.extend_from_slice(record.subject_id.as_bytes());
        let value = serde_json::to_vec(record)?;
        self.suppressed.insert(key, value)?;
        Ok(())
    }

    /// Suppressed-fall audit records for a subject, oldest first.
    pub fn suppressed_for(&self, subject_id: &str) -> Vec<SuppressedFallRecord> {
        self.suppressed
            .iter()
            .filter_map(|item| item.ok())
            .filter_map(|(_, value)| serde_json::from_slice::<SuppressedFallRecord>(&value).ok())
            .filter(|r| r.subject_id == subject_id)
            .collect()
    }

    /// Flush sled to disk. Called on shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Channel, IncidentStatus, IncidentType, Severity};

    fn temp_store() -> (EventStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = EventStore::open(dir.path().join("events.db")).expect("open");
        (store, dir)
    }

    fn incident(subject_id: &str, created_at_ms: u64) -> Incident {
        Incident::new(
            subject_id,
            IncidentType::ConfirmedFall,
            vec![ChannelSignal {
                subject_id: subject_id.to_string(),
                channel: Channel::Accelerometer,
                severity: Severity::Critical,
                reason: "impact 16.2 g".to_string(),
                observed_at_ms: created_at_ms,
                confidence: 0.9,
                evaluated_at_ms: created_at_ms,
            }],
            0.95,
            created_at_ms,
        )
    }

    #[test]
    fn test_append_and_roundtrip() {
        let (store, _dir) = temp_store();
        let original = incident("s1", 1_000);
        assert_eq!(
            store.append_incident(&original).expect("append"),
            AppendOutcome::Stored
        );

        let fetched = store
            .get_incident(&original.id)
            .expect("get")
            .expect("present");
        assert_eq!(fetched, original);
    }

    #[test]
    fn test_query_is_chronological_and_filtered() {
        let (store, _dir) = temp_store();
        store.append_incident(&incident("s1", 3_000)).expect("a");
        store.append_incident(&incident("s2", 2_000)).expect("b");
        store.append_incident(&incident("s1", 1_000)).expect("c");

        let results = store.query_incidents("s1", 0);
        assert_eq!(results.len(), 2);
        assert!(results[0].created_at_ms <= results[1].created_at_ms);

        let since = store.query_incidents("s1", 2_000);
        assert_eq!(since.len(), 1);
        assert_eq!(since[0].created_at_ms, 3_000);
    }

    #[test]
    fn test_status_update_persists() {
        let (store, _dir) = temp_store();
        let mut inc = incident("s1", 1_000);
        store.append_incident(&inc).expect("append");

        inc.status = IncidentStatus::Notified;
        store.update_incident(&inc).expect("update");

        let fetched = store.get_incident(&inc.id).expect("get").expect("present");
        assert_eq!(fetched.status, IncidentStatus::Notified);
        // Still exactly one record — updates never append
        assert_eq!(store.query_incidents("s1", 0).len(), 1);
    }

    #[test]
    fn test_update_unknown_incident_errors() {
        let (store, _dir) = temp_store();
        let inc = incident("s1", 1_000);
        let err = store.update_incident(&inc).unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[test]
    fn test_active_incidents_and_fall_debounce_lookup() {
        let (store, _dir) = temp_store();
        let mut first = incident("s1", 1_000);
        store.append_incident(&first).expect("append");
        assert!(store.has_active_fall("s1"));
        assert!(!store.has_active_fall("s2"));

        first.status = IncidentStatus::Dismissed;
        store.update_incident(&first).expect("update");
        assert!(!store.has_active_fall("s1"));
        assert!(store.active_incidents().is_empty());
    }

    #[test]
    fn test_delivery_records_roundtrip() {
        let (store, _dir) = temp_store();
        let record = DeliveryRecord {
            incident_id: "i1".to_string(),
            contact_id: "c1".to_string(),
            phone: "+15550001111".to_string(),
            status: crate::dispatch::DeliveryStatus::Delivered,
            attempts: 1,
            sink_message_id: Some("SM123".to_string()),
            completed_at_ms: 5_000,
        };
        store.record_delivery(&record).expect("record");

        let fetched = store
            .delivery("i1", "c1")
            .expect("get")
            .expect("present");
        assert_eq!(fetched.status, crate::dispatch::DeliveryStatus::Delivered);
        assert!(store.delivery("i1", "c2").expect("get").is_none());
        assert_eq!(store.deliveries_for("i1").len(), 1);
    }

    #[test]
    fn test_suppressed_audit_roundtrip() {
        let (store, _dir) = temp_store();
        let record = SuppressedFallRecord {
            subject_id: "s1".to_string(),
            suppressed_at_ms: 33_000,
            contributing: Vec::new(),
        };
        store.append_suppressed(&record).expect("append");
        assert_eq!(store.suppressed_for("s1").len(), 1);
        assert!(store.suppressed_for("s2").is_empty());
    }
}
