//! Alert Dispatcher — notification delivery with retry and tracking
//!
//! For each active emergency contact: format the incident message, invoke
//! the notification sink, and record the delivery outcome. Transient sink
//! failures retry with exponential backoff (1 s, 4 s, 16 s at defaults);
//! every attempt is bounded by a timeout that counts as a failure when it
//! fires. Exhausted retries mark the delivery failed and leave the
//! incident open, flagged for manual follow-up — a confirmed fall is
//! never silently dropped.
//!
//! Dispatch runs as a cancellable task per incident; dismissing the
//! incident cancels any in-flight retry loop. Re-dispatching an incident
//! consults stored delivery records and never duplicates a send that
//! already succeeded.

mod sink;
mod templates;

pub use sink::{
    sanitize_phone, LogSink, NotificationSink, OutboundMessage, RecordingSink, SinkError,
    SinkReceipt, TwilioWhatsAppSink,
};
pub use templates::render;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::DispatchConfig;
use crate::store::EventStore;
use crate::types::{EmergencyContact, Incident, IncidentStatus, Subject};

/// Final state of one (incident, contact) delivery.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Delivered,
    Failed,
    Cancelled,
}

/// Persisted outcome of a dispatch attempt series for one contact.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DeliveryRecord {
    pub incident_id: String,
    pub contact_id: String,
    pub phone: String,
    pub status: DeliveryStatus,
    /// Total sink attempts made (0 when skipped as already delivered)
    pub attempts: u32,
    /// Provider message id on success
    pub sink_message_id: Option<String>,
    pub completed_at_ms: u64,
}

/// Per-contact outcome returned to the caller.
#[derive(Debug, Clone)]
pub struct ContactDelivery {
    pub contact_id: String,
    pub status: DeliveryStatus,
    pub attempts: u32,
}

/// Outcome of dispatching one incident to all active contacts.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub incident_id: String,
    pub contacts: Vec<ContactDelivery>,
}

impl DeliveryResult {
    pub fn any_delivered(&self) -> bool {
        self.contacts
            .iter()
            .any(|c| c.status == DeliveryStatus::Delivered)
    }

    pub fn any_failed(&self) -> bool {
        self.contacts
            .iter()
            .any(|c| c.status == DeliveryStatus::Failed)
    }
}

/// Owns the retry policy and the per-incident task registry.
pub struct AlertDispatcher {
    config: DispatchConfig,
    sink: Arc<dyn NotificationSink>,
    store: EventStore,
    /// Site label rendered into message bodies
    site: String,
    /// Cancellation tokens for in-flight dispatch tasks, by incident id
    in_flight: Mutex<HashMap<String, CancellationToken>>,
}

impl AlertDispatcher {
    pub fn new(
        config: DispatchConfig,
        sink: Arc<dyn NotificationSink>,
        store: EventStore,
        site: String,
    ) -> Self {
        Self {
            config,
            sink,
            store,
            site,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Spawn dispatch as a background task for `incident`.
    ///
    /// The task is registered under the incident id so a later dismissal
    /// can cancel it mid-retry.
    pub fn spawn(self: &Arc<Self>, mut incident: Incident, subject: Subject) {
        let token = CancellationToken::new();
        if let Ok(mut in_flight) = self.in_flight.lock() {
            in_flight.insert(incident.id.clone(), token.clone());
        }

        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let result = dispatcher
                .dispatch_incident(&mut incident, &subject, &token)
                .await;
            if result.any_failed() {
                error!(
                    incident = %incident.id,
                    incident_type = %incident.incident_type,
                    "Delivery failed after retry exhaustion — flagged for manual follow-up"
                );
            }
            if let Ok(mut in_flight) = dispatcher.in_flight.lock() {
                in_flight.remove(&incident.id);
            }
        });
    }

    /// Cancel an in-flight dispatch task, if any. Returns whether one was
    /// cancelled.
    pub fn cancel(&self, incident_id: &str) -> bool {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if let Some(token) = in_flight.remove(incident_id) {
                token.cancel();
                return true;
            }
        }
        false
    }

    /// Dispatch `incident` to every active contact of `subject`, recording
    /// delivery outcomes and driving the incident status machine.
    pub async fn dispatch_incident(
        &self,
        incident: &mut Incident,
        subject: &Subject,
        cancel: &CancellationToken,
    ) -> DeliveryResult {
        let time = chrono::Utc::now().format("%Y-%m-%d %H:%M UTC").to_string();
        let body = templates::render(incident, &subject.name, &self.site, &time);

        let mut contacts = Vec::new();
        for contact in subject.active_contacts() {
            let delivery = self
                .deliver_to_contact(incident, contact, &body, cancel)
                .await;
            contacts.push(delivery);
            if cancel.is_cancelled() {
                break;
            }
        }

        let result = DeliveryResult {
            incident_id: incident.id.clone(),
            contacts,
        };

        // A dismissal owns the stored record from the moment it cancels
        // this task; the dispatch path must not clobber it.
        if cancel.is_cancelled() {
            return result;
        }
        if let Ok(Some(current)) = self.store.get_incident(&incident.id) {
            if current.status == IncidentStatus::Dismissed {
                return result;
            }
        }

        // Status machine: any successful delivery moves open -> notified.
        // Exhausted failures leave the incident open but flagged.
        if result.any_delivered() && incident.status.can_transition_to(IncidentStatus::Notified) {
            incident.status = IncidentStatus::Notified;
        }
        if result.any_failed() {
            incident.delivery_failed = true;
        }
        if let Err(e) = self.store.update_incident(incident) {
            warn!(incident = %incident.id, error = %e,
                  "Failed to persist incident status after dispatch");
        }

        result
    }

    async fn deliver_to_contact(
        &self,
        incident: &Incident,
        contact: &EmergencyContact,
        body: &str,
        cancel: &CancellationToken,
    ) -> ContactDelivery {
        // Idempotency: a recorded success for this (incident, contact)
        // pair must not be re-sent, whatever the sink's own dedup does.
        match self.store.delivery(&incident.id, &contact.id) {
            Ok(Some(record)) if record.status == DeliveryStatus::Delivered => {
                info!(
                    incident = %incident.id,
                    contact = %contact.id,
                    "Delivery already recorded — skipping re-send"
                );
                return ContactDelivery {
                    contact_id: contact.id.clone(),
                    status: DeliveryStatus::Delivered,
                    attempts: 0,
                };
            }
            Ok(_) => {}
            Err(e) => {
                // A failed lookup is not a reason to risk a missed alert;
                // proceed with the send and let the record overwrite.
                warn!(incident = %incident.id, error = %e, "Delivery record lookup failed");
            }
        }

        let message = OutboundMessage {
            to_phone: sanitize_phone(&contact.phone),
            body: body.to_string(),
        };
        let attempt_timeout = Duration::from_secs(self.config.attempt_timeout_secs);
        let mut attempts: u32 = 0;
        let mut receipt: Option<SinkReceipt> = None;

        // Initial attempt plus `max_retries` retries.
        'attempts: for attempt in 0..=self.config.max_retries {
            if cancel.is_cancelled() {
                break;
            }
            attempts += 1;

            let outcome = tokio::select! {
                _ = cancel.cancelled() => break 'attempts,
                result = tokio::time::timeout(attempt_timeout, self.sink.send(&message)) => result,
            };

            match outcome {
                Ok(Ok(r)) => {
                    info!(
                        incident = %incident.id,
                        contact = %contact.id,
                        sink = self.sink.sink_name(),
                        message_id = %r.id,
                        attempt = attempt + 1,
                        "Notification delivered"
                    );
                    receipt = Some(r);
                    break;
                }
                Ok(Err(e)) if e.is_retryable() && attempt < self.config.max_retries => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        incident = %incident.id,
                        contact = %contact.id,
                        error = %e,
                        retry_in_secs = backoff.as_secs(),
                        "Transient sink failure — will retry"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break 'attempts,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Ok(Err(e)) if e.is_retryable() => {
                    warn!(
                        incident = %incident.id,
                        contact = %contact.id,
                        error = %e,
                        attempts,
                        "Retries exhausted"
                    );
                    break;
                }
                Ok(Err(e)) => {
                    // Auth / invalid recipient: retrying cannot help.
                    error!(
                        incident = %incident.id,
                        contact = %contact.id,
                        error = %e,
                        "Permanent sink failure"
                    );
                    break;
                }
                Err(_elapsed) if attempt < self.config.max_retries => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        incident = %incident.id,
                        contact = %contact.id,
                        timeout_secs = attempt_timeout.as_secs(),
                        retry_in_secs = backoff.as_secs(),
                        "Sink call timed out — counts as a failed attempt"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => break 'attempts,
                        _ = tokio::time::sleep(backoff) => {}
                    }
                }
                Err(_elapsed) => {
                    warn!(
                        incident = %incident.id,
                        contact = %contact.id,
                        attempts,
                        "Sink call timed out — retries exhausted"
                    );
                    break;
                }
            }
        }

        let status = match (&receipt, cancel.is_cancelled()) {
            (Some(_), _) => DeliveryStatus::Delivered,
            (None, true) => DeliveryStatus::Cancelled,
            (None, false) => DeliveryStatus::Failed,
        };

        let record = DeliveryRecord {
            incident_id: incident.id.clone(),
            contact_id: contact.id.clone(),
            phone: message.to_phone.clone(),
            status,
            attempts,
            sink_message_id: receipt.map(|r| r.id),
            completed_at_ms: chrono::Utc::now().timestamp_millis().max(0) as u64,
        };
        if let Err(e) = self.store.record_delivery(&record) {
            warn!(incident = %incident.id, contact = %contact.id, error = %e,
                  "Failed to persist delivery record");
        }

        ContactDelivery {
            contact_id: contact.id.clone(),
            status,
            attempts,
        }
    }

    /// Exponential backoff before retry N (0-based): base * 4^N seconds,
    /// i.e. 1 s, 4 s, 16 s at defaults.
    fn backoff_for(&self, attempt: u32) -> Duration {
        Duration::from_secs(self.config.backoff_base_secs * 4u64.pow(attempt))
    }
}
