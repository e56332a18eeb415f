//! Temporal State Tracker — per-subject rolling window and debounce
//!
//! Maintains a bounded, time-ordered window of recent channel signals, a
//! posture change timeline for transition detection, per-channel timestamp
//! monotonicity, and the confirmed-fall cooldown. One tracker instance per
//! subject; the engine guarantees exclusive access (see `engine`).

use std::collections::{HashMap, VecDeque};

use crate::config::TrackerConfig;
use crate::ingest::InvalidObservation;
use crate::types::{Channel, ChannelSignal, Observation, ObservationValue, Posture, Severity};

/// Maximum posture change points retained. Changes are sparse (steady
/// states are not re-recorded), so a small bound spans hours.
const MAX_POSTURE_CHANGES: usize = 32;

/// A posture change point: the subject entered `posture` at `at_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostureChange {
    pub at_ms: u64,
    pub posture: Posture,
}

/// Rolling per-subject state.
#[derive(Debug)]
pub struct SubjectTracker {
    config: TrackerConfig,
    /// Recent signals, ordered by observation time
    signals: VecDeque<ChannelSignal>,
    /// Posture change points only — steady states are not re-recorded
    posture_changes: VecDeque<PostureChange>,
    /// Last observation timestamp per channel (monotonicity enforcement)
    last_seen_ms: HashMap<Channel, u64>,
    /// When the last confirmed fall was raised (cooldown anchor)
    last_fall_at_ms: Option<u64>,
    /// Fall signals suppressed by the cooldown since the last fall
    suppressed_falls: u64,
    /// Most recent observation on any channel (inactivity detection)
    last_activity_ms: Option<u64>,
}

impl SubjectTracker {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            signals: VecDeque::new(),
            posture_changes: VecDeque::new(),
            last_seen_ms: HashMap::new(),
            last_fall_at_ms: None,
            suppressed_falls: 0,
            last_activity_ms: None,
        }
    }

    /// Record an observation's bookkeeping before evaluation.
    ///
    /// Rejects out-of-order timestamps per (subject, channel): observations
    /// are rejected, never reordered. Equal timestamps are accepted
    /// (non-decreasing).
    pub fn record_observation(&mut self, obs: &Observation) -> Result<(), InvalidObservation> {
        if let Some(&last) = self.last_seen_ms.get(&obs.channel) {
            if obs.timestamp_ms < last {
                return Err(InvalidObservation::OutOfOrder {
                    channel: obs.channel,
                    timestamp_ms: obs.timestamp_ms,
                    last_seen_ms: last,
                });
            }
        }
        self.last_seen_ms.insert(obs.channel, obs.timestamp_ms);
        self.last_activity_ms = Some(
            self.last_activity_ms
                .map_or(obs.timestamp_ms, |t| t.max(obs.timestamp_ms)),
        );

        if let ObservationValue::Posture { posture } = obs.value {
            self.record_posture(obs.timestamp_ms, posture);
        }
        Ok(())
    }

    fn record_posture(&mut self, at_ms: u64, posture: Posture) {
        let changed = self
            .posture_changes
            .back()
            .map_or(true, |last| last.posture != posture);
        if changed {
            self.posture_changes.push_back(PostureChange { at_ms, posture });
            if self.posture_changes.len() > MAX_POSTURE_CHANGES {
                self.posture_changes.pop_front();
            }
        }
    }

    /// Append a signal and evict entries that fell out of the window.
    pub fn record_signal(&mut self, signal: ChannelSignal) {
        let horizon = signal
            .observed_at_ms
            .saturating_sub(self.config.window_secs * 1_000);
        self.signals.push_back(signal);
        while let Some(front) = self.signals.front() {
            if front.observed_at_ms < horizon {
                self.signals.pop_front();
            } else {
                break;
            }
        }
    }

    /// Signals observed within `within_ms` of `now_ms`, oldest first.
    pub fn recent_signals(&self, within_ms: u64, now_ms: u64) -> Vec<ChannelSignal> {
        let horizon = now_ms.saturating_sub(within_ms);
        self.signals
            .iter()
            .filter(|s| s.observed_at_ms >= horizon && s.observed_at_ms <= now_ms)
            .cloned()
            .collect()
    }

    /// Latest signal per channel, for dashboard state.
    pub fn latest_by_channel(&self) -> HashMap<Channel, ChannelSignal> {
        let mut latest = HashMap::new();
        for signal in &self.signals {
            latest.insert(signal.channel, signal.clone());
        }
        latest
    }

    /// Current posture, if the vision channel has reported at all.
    pub fn current_posture(&self) -> Option<Posture> {
        self.posture_changes.back().map(|c| c.posture)
    }

    /// Whether the subject recently changed INTO a down posture from an
    /// upright one — the actual fall trigger pattern, as opposed to a
    /// subject who is simply resting in bed.
    pub fn recent_down_transition(&self, now_ms: u64) -> Option<PostureChange> {
        let len = self.posture_changes.len();
        if len < 2 {
            // A first-ever sample of lying has no known prior posture —
            // never treat it as a transition.
            return None;
        }
        let last = self.posture_changes[len - 1];
        let prev = self.posture_changes[len - 2];
        let window_ms = self.config.posture_transition_window_secs * 1_000;
        if last.posture.is_down()
            && prev.posture.is_upright()
            && now_ms.saturating_sub(last.at_ms) <= window_ms
        {
            Some(last)
        } else {
            None
        }
    }

    /// Whether new fall incidents are currently suppressed for this subject.
    pub fn fall_in_cooldown(&self, now_ms: u64) -> bool {
        self.last_fall_at_ms.is_some_and(|at| {
            now_ms.saturating_sub(at) < self.config.fall_cooldown_secs * 1_000
        })
    }

    /// Mark a confirmed fall as raised, starting the quiet period.
    pub fn note_confirmed_fall(&mut self, now_ms: u64) {
        self.last_fall_at_ms = Some(now_ms);
        self.suppressed_falls = 0;
    }

    /// Count a fall-qualifying burst suppressed by the cooldown.
    /// Returns the running count since the last confirmed fall.
    pub fn note_suppressed_fall(&mut self) -> u64 {
        self.suppressed_falls += 1;
        self.suppressed_falls
    }

    /// Milliseconds since the last observation on any channel, if the
    /// inactivity timeout has elapsed. Returns `None` while active, before
    /// the first observation, or when the timeout is disabled (0).
    pub fn inactivity_elapsed_ms(&self, now_ms: u64) -> Option<u64> {
        if self.config.inactivity_timeout_secs == 0 {
            return None;
        }
        let last = self.last_activity_ms?;
        let elapsed = now_ms.saturating_sub(last);
        (elapsed >= self.config.inactivity_timeout_secs * 1_000).then_some(elapsed)
    }

    /// Highest severity currently in the window (dashboard state).
    pub fn peak_severity(&self) -> Severity {
        self.signals
            .iter()
            .map(|s| s.severity)
            .max()
            .unwrap_or(Severity::Safe)
    }

    pub fn suppressed_fall_count(&self) -> u64 {
        self.suppressed_falls
    }

    /// Timestamp of the most recent observation on any channel.
    pub fn last_activity_ms(&self) -> Option<u64> {
        self.last_activity_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AccelSample, Severity};

    fn tracker() -> SubjectTracker {
        SubjectTracker::new(TrackerConfig::default())
    }

    fn posture_obs(at_ms: u64, posture: Posture) -> Observation {
        Observation {
            subject_id: "s1".to_string(),
            channel: Channel::VisionPosture,
            timestamp_ms: at_ms,
            value: ObservationValue::Posture { posture },
            confidence: 0.95,
        }
    }

    fn accel_obs(at_ms: u64, magnitude: f64) -> Observation {
        Observation {
            subject_id: "s1".to_string(),
            channel: Channel::Accelerometer,
            timestamp_ms: at_ms,
            value: ObservationValue::Accelerometer(AccelSample {
                x: 0.0,
                y: 0.0,
                z: magnitude,
                magnitude,
            }),
            confidence: 0.9,
        }
    }

    fn signal(at_ms: u64, channel: Channel, severity: Severity) -> ChannelSignal {
        ChannelSignal {
            subject_id: "s1".to_string(),
            channel,
            severity,
            reason: "test".to_string(),
            observed_at_ms: at_ms,
            confidence: 0.9,
            evaluated_at_ms: at_ms,
        }
    }

    #[test]
    fn test_out_of_order_rejected_per_channel() {
        let mut t = tracker();
        t.record_observation(&accel_obs(2_000, 1.0)).expect("first");
        let err = t.record_observation(&accel_obs(1_000, 1.0)).unwrap_err();
        assert!(matches!(err, InvalidObservation::OutOfOrder { .. }));
        // Equal timestamps are non-decreasing and accepted
        t.record_observation(&accel_obs(2_000, 1.0)).expect("equal");
        // Other channels are tracked independently
        t.record_observation(&posture_obs(500, Posture::Standing))
            .expect("independent channel");
    }

    #[test]
    fn test_window_eviction() {
        let mut t = tracker();
        t.record_signal(signal(1_000, Channel::Accelerometer, Severity::Safe));
        // 61 seconds later: the first signal is outside the 60 s window
        t.record_signal(signal(62_000, Channel::Accelerometer, Severity::Safe));
        assert_eq!(t.recent_signals(120_000, 62_000).len(), 1);
    }

    #[test]
    fn test_recent_signals_filters_by_window() {
        let mut t = tracker();
        t.record_signal(signal(1_000, Channel::Accelerometer, Severity::Warning));
        t.record_signal(signal(5_000, Channel::VisionPosture, Severity::Warning));
        let recent = t.recent_signals(3_000, 6_000);
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].channel, Channel::VisionPosture);
    }

    #[test]
    fn test_down_transition_detected() {
        let mut t = tracker();
        t.record_observation(&posture_obs(1_000, Posture::Standing))
            .expect("standing");
        t.record_observation(&posture_obs(2_500, Posture::Lying))
            .expect("lying");
        let change = t.recent_down_transition(3_000).expect("transition");
        assert_eq!(change.posture, Posture::Lying);
        assert_eq!(change.at_ms, 2_500);
    }

    #[test]
    fn test_steady_lying_is_not_a_transition() {
        let mut t = tracker();
        t.record_observation(&posture_obs(1_000, Posture::Standing))
            .expect("standing");
        t.record_observation(&posture_obs(2_000, Posture::Lying))
            .expect("lying");
        // Ten minutes of steady lying samples later
        for i in 0..10 {
            t.record_observation(&posture_obs(2_000 + (i + 1) * 60_000, Posture::Lying))
                .expect("steady");
        }
        assert!(t.recent_down_transition(602_000).is_none());
    }

    #[test]
    fn test_first_sample_lying_is_not_a_transition() {
        let mut t = tracker();
        t.record_observation(&posture_obs(1_000, Posture::Lying))
            .expect("lying");
        assert!(t.recent_down_transition(1_500).is_none());
    }

    #[test]
    fn test_fall_cooldown_window() {
        let mut t = tracker();
        assert!(!t.fall_in_cooldown(0));
        t.note_confirmed_fall(10_000);
        assert!(t.fall_in_cooldown(10_001));
        // 30 seconds later: still inside the 5 minute quiet period
        assert!(t.fall_in_cooldown(40_000));
        // After the quiet period
        assert!(!t.fall_in_cooldown(10_000 + 300_000));
    }

    #[test]
    fn test_suppressed_fall_counter_resets_on_new_fall() {
        let mut t = tracker();
        t.note_confirmed_fall(10_000);
        assert_eq!(t.note_suppressed_fall(), 1);
        assert_eq!(t.note_suppressed_fall(), 2);
        t.note_confirmed_fall(400_000);
        assert_eq!(t.suppressed_fall_count(), 0);
    }

    #[test]
    fn test_inactivity_detection() {
        let mut t = tracker();
        assert!(t.inactivity_elapsed_ms(10_000_000).is_none());
        t.record_observation(&accel_obs(1_000, 1.0)).expect("obs");
        // 4 hours minus a second: still active
        assert!(t.inactivity_elapsed_ms(1_000 + 14_400_000 - 1_000).is_none());
        // Past the timeout
        assert!(t.inactivity_elapsed_ms(1_000 + 14_400_000).is_some());
    }
}
