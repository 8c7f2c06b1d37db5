use std::f64::consts::TAU;
use std::time::Duration;

use sha2::{Digest, Sha256};

use crate::store::Sensor;

use super::ChannelMap;

/// Simulator emission period (10 Hz).
pub const TICK: Duration = Duration::from_millis(100);

const NOISE_FRACTION: f64 = 0.01;

/// Per-sensor wave constants derived from a stable hash of the sensor id,
/// so a given sensor set always produces the same waveform.
fn wave_params(sensor_id: &str) -> (f64, f64) {
    let digest = Sha256::digest(sensor_id.as_bytes());
    let a = u16::from_le_bytes([digest[0], digest[1]]) as f64 / f64::from(u16::MAX);
    let b = u16::from_le_bytes([digest[2], digest[3]]) as f64 / f64::from(u16::MAX);
    let frequency = 0.05 + 0.45 * a;
    let phase = b * TAU;
    (frequency, phase)
}

/// Deterministic stand-in for uniform noise: hashed from (sensor, tick) and
/// mapped to [-1, 1]. Replayable in tests.
fn noise_unit(sensor_id: &str, tick: u64) -> f64 {
    let mut hasher = Sha256::new();
    hasher.update(sensor_id.as_bytes());
    hasher.update(tick.to_le_bytes());
    let digest = hasher.finalize();
    let raw = u16::from_le_bytes([digest[0], digest[1]]) as f64 / f64::from(u16::MAX);
    raw * 2.0 - 1.0
}

/// Sample every sensor at wall-clock second `t` (tick indexes the noise).
pub fn sample(sensors: &[Sensor], t: f64, tick: u64) -> ChannelMap {
    sensors
        .iter()
        .map(|sensor| {
            let (frequency, phase) = wave_params(&sensor.sensor_id);
            let span = sensor.max_value - sensor.min_value;
            let base = sensor.min_value
                + span * (0.5 + 0.5 * (TAU * frequency * t + phase).sin());
            let noisy = base + span * NOISE_FRACTION * noise_unit(&sensor.sensor_id, tick);
            let value = noisy.clamp(sensor.min_value, sensor.max_value);
            (sensor.sensor_id.clone(), value)
        })
        .collect()
}
