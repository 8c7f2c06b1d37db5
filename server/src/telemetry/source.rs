use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::{mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::metrics::DashMetrics;
use crate::store::{Sensor, Store};

use super::serial::SerialStatus;
use super::{simulator, ChannelMap, Frame, SourceKind, SourcePreference, TelemetryHub};

/// In `auto`, serial wins while connected and fresher than this.
pub const SERIAL_LIVENESS: Duration = Duration::from_secs(5);

/// How often the preference rule and sensor catalog are re-evaluated.
const EVAL_INTERVAL: Duration = Duration::from_secs(1);

/// `serial` and `simulated` are unconditional; `auto` follows serial
/// liveness.
pub fn select_active(preference: SourcePreference, serial: &SerialStatus) -> SourceKind {
    match preference {
        SourcePreference::Serial => SourceKind::Serial,
        SourcePreference::Simulated => SourceKind::Simulated,
        SourcePreference::Auto => {
            if serial.ever_connected() && serial.is_live(SERIAL_LIVENESS) {
                SourceKind::Serial
            } else {
                SourceKind::Simulated
            }
        }
    }
}

/// Drains the active source into the hub. Exactly one source feeds the hub
/// at any instant; a switch shows up as a `source` flip on the next frame.
pub struct SourceSupervisor {
    pub store: Store,
    pub hub: Arc<TelemetryHub>,
    pub serial_status: Arc<SerialStatus>,
    pub serial_frames: mpsc::Receiver<ChannelMap>,
    pub preference_rx: watch::Receiver<SourcePreference>,
    pub metrics: Arc<DashMetrics>,
}

impl SourceSupervisor {
    pub async fn run(mut self, cancel: CancellationToken) {
        let mut sim_tick = interval(simulator::TICK);
        sim_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut eval_tick = interval(EVAL_INTERVAL);
        eval_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut sensors: Vec<Sensor> = self.load_sensors().await;
        let mut preference = *self.preference_rx.borrow();
        let mut active = select_active(preference, &self.serial_status);
        let mut tick: u64 = 0;
        info!(source = active.as_str(), "telemetry supervisor started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = eval_tick.tick() => {
                    sensors = self.load_sensors().await;
                    let next = select_active(preference, &self.serial_status);
                    if next != active {
                        info!(from = active.as_str(), to = next.as_str(), "telemetry source switched");
                        active = next;
                    }
                }

                changed = self.preference_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    preference = *self.preference_rx.borrow();
                    let next = select_active(preference, &self.serial_status);
                    if next != active {
                        info!(from = active.as_str(), to = next.as_str(), "telemetry source switched");
                        active = next;
                    }
                }

                _ = sim_tick.tick() => {
                    tick += 1;
                    if active == SourceKind::Simulated && !sensors.is_empty() {
                        let channels = simulator::sample(&sensors, now_unix_secs(), tick);
                        self.publish(SourceKind::Simulated, channels);
                    }
                }

                frame = self.serial_frames.recv() => {
                    let Some(channels) = frame else { break };
                    if active == SourceKind::Serial {
                        let enabled: ChannelMap = channels
                            .into_iter()
                            .filter(|(id, _)| sensors.iter().any(|s| &s.sensor_id == id))
                            .collect();
                        if !enabled.is_empty() {
                            self.publish(SourceKind::Serial, enabled);
                        }
                    }
                }
            }
        }

        info!("telemetry supervisor stopped");
    }

    async fn load_sensors(&self) -> Vec<Sensor> {
        match self.store.list_sensors(true).await {
            Ok(sensors) => sensors,
            Err(err) => {
                warn!(error = %err, "failed to load sensor catalog");
                Vec::new()
            }
        }
    }

    fn publish(&self, source: SourceKind, channels: ChannelMap) {
        self.hub.publish(Frame {
            timestamp: now_unix_secs(),
            source,
            channels,
        });
        self.metrics.frame_published();
    }
}

fn now_unix_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::SerialState;

    #[test]
    fn explicit_preferences_are_unconditional() {
        let status = SerialStatus::new();
        assert_eq!(
            select_active(SourcePreference::Serial, &status),
            SourceKind::Serial
        );
        assert_eq!(
            select_active(SourcePreference::Simulated, &status),
            SourceKind::Simulated
        );
    }

    #[test]
    fn auto_falls_back_to_simulator_until_serial_is_live() {
        let status = SerialStatus::new();
        assert_eq!(
            select_active(SourcePreference::Auto, &status),
            SourceKind::Simulated
        );
        assert_eq!(status.state(), SerialState::Disconnected);
    }
}
