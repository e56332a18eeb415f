//! Fusion Engine — combines concurrent channel signals into incidents
//!
//! Invoked whenever an actionable (warning or worse) signal arrives.
//! Gathers the correlation window around the trigger, classifies the
//! highest-priority incident type that qualifies, and derives a fused
//! confidence. Conflicting candidates resolve by fixed priority:
//! confirmed_fall > health_alert > geofence_breach > suspicious_event.

use crate::config::FusionConfig;
use crate::tracker::SubjectTracker;
use crate::types::{Channel, ChannelSignal, Incident, IncidentType, Severity};

/// Fused confidence never reaches certainty.
const CONFIDENCE_CAP: f64 = 0.99;

/// Result of one fusion pass.
#[derive(Debug)]
pub enum FusionOutcome {
    /// An incident should be raised.
    Raised(Incident),
    /// A fall qualified but the per-subject cooldown suppressed it; the
    /// contributing signals are returned for audit.
    FallSuppressed { contributing: Vec<ChannelSignal> },
    /// Nothing actionable in the window.
    Nothing,
}

pub struct FusionEngine {
    config: FusionConfig,
}

impl FusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    /// Fuse the signals around `trigger` into at most one incident.
    ///
    /// The correlation window is anchored on the trigger's observation
    /// time, not wall clock, so replayed captures fuse identically.
    pub fn fuse(&self, trigger: &ChannelSignal, tracker: &SubjectTracker) -> FusionOutcome {
        if !trigger.severity.is_actionable() {
            return FusionOutcome::Nothing;
        }

        let now_ms = trigger.observed_at_ms;
        // A warning-level lying report only participates while a recent
        // change into a down posture exists. A subject resting in bed
        // produces lying signals indefinitely; without the transition they
        // are not evidence of anything.
        let transition_recent = tracker.recent_down_transition(now_ms).is_some();
        let mut window: Vec<ChannelSignal> = tracker
            .recent_signals(self.config.correlation_window_ms, now_ms)
            .into_iter()
            .filter(|s| s.severity.is_actionable())
            .filter(|s| {
                s.channel != Channel::VisionPosture
                    || s.severity == Severity::Critical
                    || transition_recent
            })
            .collect();
        window.sort_by_key(|s| s.observed_at_ms);

        if window.is_empty() {
            return FusionOutcome::Nothing;
        }

        let accel = best_of(&window, Channel::Accelerometer);
        let vision = best_of(&window, Channel::VisionPosture);
        let vitals = best_of(&window, Channel::Vitals);
        let location = best_of(&window, Channel::Location);

        // Rule 1: accelerometer impact corroborated by vision. The window
        // filter above guarantees the vision side is either an outright
        // fallen report or backed by a fresh down transition.
        if let (Some(a), Some(v)) = (accel, vision) {
            if tracker.fall_in_cooldown(now_ms) {
                return FusionOutcome::FallSuppressed {
                    contributing: window,
                };
            }
            let confidence =
                (0.5 + 0.5 * a.confidence.min(v.confidence)).min(CONFIDENCE_CAP);
            return FusionOutcome::Raised(Incident::new(
                trigger.subject_id.clone(),
                IncidentType::ConfirmedFall,
                window,
                confidence,
                now_ms,
            ));
        }

        // Rule 2: vitals-only critical, independent of posture.
        if let Some(v) = vitals {
            if v.severity == Severity::Critical {
                let confidence = v.confidence.min(CONFIDENCE_CAP);
                return FusionOutcome::Raised(Incident::new(
                    trigger.subject_id.clone(),
                    IncidentType::HealthAlert,
                    window,
                    confidence,
                    now_ms,
                ));
            }
        }

        // Rule 3: location critical — outside all configured zones.
        if let Some(l) = location {
            if l.severity == Severity::Critical {
                let confidence = l.confidence.min(CONFIDENCE_CAP);
                return FusionOutcome::Raised(Incident::new(
                    trigger.subject_id.clone(),
                    IncidentType::GeofenceBreach,
                    window,
                    confidence,
                    now_ms,
                ));
            }
        }

        // Rule 4: anything else actionable is a suspicious event. A single
        // channel takes the single-source discount; independent channels
        // agreeing keep the strongest confidence (monotone in
        // corroboration).
        let mut channels: Vec<Channel> = window.iter().map(|s| s.channel).collect();
        channels.sort_by_key(|c| *c as u8);
        channels.dedup();

        let max_conf = window
            .iter()
            .map(|s| s.confidence)
            .fold(0.0_f64, f64::max);
        let confidence = if channels.len() == 1 {
            (max_conf * self.config.single_source_discount).min(CONFIDENCE_CAP)
        } else {
            max_conf.min(CONFIDENCE_CAP)
        };

        FusionOutcome::Raised(Incident::new(
            trigger.subject_id.clone(),
            IncidentType::SuspiciousEvent,
            window,
            confidence,
            now_ms,
        ))
    }
}

/// Strongest actionable signal for a channel (severity first, then
/// confidence).
fn best_of(window: &[ChannelSignal], channel: Channel) -> Option<&ChannelSignal> {
    window
        .iter()
        .filter(|s| s.channel == channel)
        .max_by(|a, b| {
            (a.severity, a.confidence)
                .partial_cmp(&(b.severity, b.confidence))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}
