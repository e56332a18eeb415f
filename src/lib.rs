//! VIGIL-OS: Elder-Care Sensor-Fusion Monitoring Core
//!
//! Streaming multi-sensor fusion and alerting engine for elder-care
//! monitoring.
//!
//! ## Architecture
//!
//! - **Channel Normalizer**: per-sensor conversion of raw readings into
//!   validated observations
//! - **Threshold Evaluator**: stateless per-channel policy tables
//! - **Temporal State Tracker**: per-subject rolling windows, posture
//!   transition detection, fall cooldown
//! - **Fusion Engine**: cross-channel corroboration into typed incidents
//! - **Alert Dispatcher**: per-contact delivery with retry, timeout, and
//!   idempotent re-dispatch

pub mod api;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod evaluator;
pub mod fusion;
pub mod ingest;
pub mod medication;
pub mod store;
pub mod tracker;
pub mod types;

// Re-export monitor configuration
pub use config::MonitorConfig;

// Re-export commonly used types
pub use types::{
    Channel, ChannelSignal, EmergencyContact, Geofence, GeofenceKind, Incident, IncidentStatus,
    IncidentType, LifecycleState, Observation, ObservationValue, Posture, RawObservation,
    Severity, Subject,
};

// Re-export the engine and its collaborators
pub use dispatch::{AlertDispatcher, NotificationSink};
pub use engine::{EngineError, MonitorEngine};
pub use fusion::{FusionEngine, FusionOutcome};
pub use store::{EventStore, StoreError};
pub use tracker::SubjectTracker;
