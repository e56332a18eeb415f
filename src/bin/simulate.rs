//! Observation Stream Simulation
//!
//! Generates a realistic multi-channel observation stream for testing
//! VIGIL-OS. Simulates a monitored subject going about their day with
//! optional scripted events:
//! - A fall (accelerometer impact + standing→lying posture transition)
//! - A vitals episode (sustained tachycardia + low SpO2)
//! - Wandering (leaving all configured zones)
//!
//! # Usage
//! ```bash
//! ./simulate --subject margaret --minutes 10 --fall-at 120 | ./vigil-os --stdin
//! ```

use clap::Parser;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use std::io::{self, Write};

use vigil_os::types::{Channel, Posture, RawObservation};

// ============================================================================
// Baselines
// ============================================================================

/// Resting accelerometer magnitude (gravity)
const BASE_MAGNITUDE: f64 = 1.0;
/// Resting heart rate (bpm)
const BASE_HEART_RATE: f64 = 72.0;
/// Resting SpO2 (%)
const BASE_SPO2: f64 = 98.0;
/// Resting body temperature (°F)
const BASE_TEMP_F: f64 = 98.6;
/// Resting respiratory rate (breaths/min)
const BASE_RESP_RATE: f64 = 16.0;
/// Resting stress index
const BASE_STRESS: f64 = 35.0;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "simulate")]
#[command(about = "Observation stream simulation for VIGIL-OS testing")]
#[command(version)]
struct Args {
    /// Subject id to emit observations for
    #[arg(long, default_value = "margaret")]
    subject: String,

    /// Stream duration in minutes
    #[arg(short, long, default_value = "10", value_parser = clap::value_parser!(u32).range(1..=1440))]
    minutes: u32,

    /// Seconds between observation rounds
    #[arg(long, default_value = "1")]
    interval_secs: u32,

    /// Pace output in real time instead of emitting as fast as possible
    #[arg(long)]
    realtime: bool,

    /// Script a fall at this many seconds into the stream
    #[arg(long)]
    fall_at: Option<u32>,

    /// Script a vitals episode at this many seconds into the stream
    #[arg(long)]
    vitals_at: Option<u32>,

    /// Script a geofence breach at this many seconds into the stream
    #[arg(long)]
    wander_at: Option<u32>,

    /// Safe zone id the subject is normally inside
    #[arg(long, default_value = "home")]
    home_zone: String,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> io::Result<()> {
    let args = Args::parse();
    let mut rng: StdRng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let jitter = Normal::new(0.0, 1.0).expect("valid stddev");
    let start_ms = chrono::Utc::now().timestamp_millis().max(0) as u64;
    let total_rounds = (args.minutes * 60) / args.interval_secs.max(1);

    let stdout = io::stdout();
    let mut out = stdout.lock();

    let mut posture = Posture::Standing;
    let mut fallen_until: Option<u32> = None;

    for round in 0..total_rounds {
        let elapsed_secs = round * args.interval_secs;
        let ts = start_ms + u64::from(elapsed_secs) * 1_000;

        let falling = args.fall_at.is_some_and(|at| elapsed_secs == at);
        let vitals_episode = args
            .vitals_at
            .is_some_and(|at| elapsed_secs >= at && elapsed_secs < at + 60);
        let wandering = args
            .wander_at
            .is_some_and(|at| elapsed_secs >= at && elapsed_secs < at + 120);

        // Accelerometer: quiet noise around gravity, one sharp spike on a
        // scripted fall.
        let magnitude = if falling {
            16.0 + rng.gen_range(0.0..2.0)
        } else {
            (BASE_MAGNITUDE + 0.05 * jitter.sample(&mut rng)).max(0.0)
        };
        emit(
            &mut out,
            &args.subject,
            Channel::Accelerometer,
            ts,
            serde_json::json!({
                "x": 0.1 * jitter.sample(&mut rng),
                "y": 0.1 * jitter.sample(&mut rng),
                "z": magnitude,
                "magnitude": magnitude,
            }),
            0.85 + rng.gen_range(0.0..0.15),
        )?;

        // Posture: standing/sitting wandering, collapse on a fall, then
        // lying until the stream ends.
        if falling {
            posture = Posture::Lying;
            fallen_until = Some(elapsed_secs + 300);
        } else if fallen_until.is_some_and(|until| elapsed_secs >= until) {
            posture = Posture::Standing;
            fallen_until = None;
        } else if fallen_until.is_none() && round % 30 == 29 {
            posture = if rng.gen_bool(0.5) {
                Posture::Standing
            } else {
                Posture::Sitting
            };
        }
        emit(
            &mut out,
            &args.subject,
            Channel::VisionPosture,
            ts,
            serde_json::json!({"posture": posture}),
            0.90 + rng.gen_range(0.0..0.09),
        )?;

        // Vitals every 3 rounds, elevated during a scripted episode.
        if round % 3 == 0 {
            let (hr, spo2) = if vitals_episode {
                (135.0 + 5.0 * jitter.sample(&mut rng), 88.0)
            } else {
                (
                    BASE_HEART_RATE + 4.0 * jitter.sample(&mut rng),
                    BASE_SPO2 + 0.5 * jitter.sample(&mut rng),
                )
            };
            emit(
                &mut out,
                &args.subject,
                Channel::Vitals,
                ts,
                serde_json::json!({
                    "heart_rate": hr,
                    "spo2": spo2.min(100.0),
                    "temp_f": BASE_TEMP_F + 0.2 * jitter.sample(&mut rng),
                    "resp_rate": BASE_RESP_RATE + jitter.sample(&mut rng),
                    "stress": (BASE_STRESS + 5.0 * jitter.sample(&mut rng)).clamp(0.0, 100.0),
                }),
                1.0,
            )?;
        }

        // Location every 10 rounds.
        if round % 10 == 0 {
            let inside: Vec<&str> = if wandering {
                vec![]
            } else {
                vec![args.home_zone.as_str()]
            };
            emit(
                &mut out,
                &args.subject,
                Channel::Location,
                ts,
                serde_json::json!({
                    "zone_id": if wandering { serde_json::Value::Null } else { serde_json::json!(args.home_zone) },
                    "inside_zones": inside,
                }),
                1.0,
            )?;
        }

        if args.realtime {
            std::thread::sleep(std::time::Duration::from_secs(u64::from(
                args.interval_secs,
            )));
        }
    }

    Ok(())
}

fn emit(
    out: &mut impl Write,
    subject: &str,
    channel: Channel,
    timestamp_ms: u64,
    value: serde_json::Value,
    confidence: f64,
) -> io::Result<()> {
    let raw = RawObservation {
        subject_id: subject.to_string(),
        channel,
        timestamp_ms,
        value,
        confidence: Some(confidence.min(1.0)),
    };
    let line = serde_json::to_string(&raw).map_err(io::Error::other)?;
    writeln!(out, "{line}")
}
