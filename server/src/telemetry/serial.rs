use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_serial::SerialPortBuilderExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::store::Store;

use super::codec::{self, BinaryDeframer};
use super::{ChannelMap, DataFormat, SerialSettings};

/// Bytes peeked before the `auto` format decision.
const SNIFF_PEEK: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SerialState {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl SerialState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SerialState::Disconnected => "disconnected",
            SerialState::Connecting => "connecting",
            SerialState::Connected => "connected",
            SerialState::Error => "error",
        }
    }
}

/// Shared, non-blocking view of the reader used by the status endpoint and
/// the source-selection rule.
pub struct SerialStatus {
    state: Mutex<SerialState>,
    frames_received: AtomicU64,
    errors: AtomicU64,
    /// UNIX millis of the last decoded frame; 0 = never.
    last_frame_ms: AtomicU64,
    ever_connected: AtomicBool,
    detected_format: Mutex<Option<DataFormat>>,
}

#[derive(Debug, Serialize)]
pub struct SerialStatusView {
    pub state: SerialState,
    pub frames_received: u64,
    pub errors: u64,
    pub last_frame_time: Option<f64>,
    pub detected_format: Option<DataFormat>,
}

impl SerialStatus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SerialState::Disconnected),
            frames_received: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            last_frame_ms: AtomicU64::new(0),
            ever_connected: AtomicBool::new(false),
            detected_format: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SerialState {
        *self.state.lock().expect("serial state lock poisoned")
    }

    fn set_state(&self, state: SerialState) {
        *self.state.lock().expect("serial state lock poisoned") = state;
    }

    fn mark_connected(&self) {
        self.set_state(SerialState::Connected);
        self.ever_connected.store(true, Ordering::Relaxed);
    }

    fn record_frame(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
        self.last_frame_ms.store(now_unix_ms(), Ordering::Relaxed);
    }

    fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    fn add_errors(&self, count: u64) {
        if count > 0 {
            self.errors.fetch_add(count, Ordering::Relaxed);
        }
    }

    fn set_detected_format(&self, format: DataFormat) {
        *self
            .detected_format
            .lock()
            .expect("serial format lock poisoned") = Some(format);
    }

    pub fn ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::Relaxed)
    }

    pub fn last_frame_time(&self) -> Option<f64> {
        match self.last_frame_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms as f64 / 1000.0),
        }
    }

    /// Connected and produced a frame within `within`.
    pub fn is_live(&self, within: Duration) -> bool {
        if self.state() != SerialState::Connected {
            return false;
        }
        match self.last_frame_ms.load(Ordering::Relaxed) {
            0 => false,
            ms => now_unix_ms().saturating_sub(ms) <= within.as_millis() as u64,
        }
    }

    pub fn snapshot(&self) -> SerialStatusView {
        SerialStatusView {
            state: self.state(),
            frames_received: self.frames_received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            last_frame_time: self.last_frame_time(),
            detected_format: *self
                .detected_format
                .lock()
                .expect("serial format lock poisoned"),
        }
    }
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[derive(Debug)]
pub enum SerialCommand {
    /// Close the port and reopen with the current stored configuration.
    Restart,
}

enum SessionEnd {
    Cancelled,
    Restart,
    Fault,
}

enum Wait {
    Cancelled,
    Proceed,
}

/// Owns the serial port exclusively. Configuration changes arrive as
/// `Restart` commands; the state machine is disconnected → connecting →
/// connected → error → (reconnect_interval) → connecting.
pub struct SerialReader {
    pub store: Store,
    pub status: Arc<SerialStatus>,
    pub frames: mpsc::Sender<ChannelMap>,
    pub commands: mpsc::Receiver<SerialCommand>,
}

impl SerialReader {
    pub async fn run(self, cancel: CancellationToken) {
        let SerialReader {
            store,
            status,
            frames,
            mut commands,
        } = self;
        info!("serial reader started");

        loop {
            if cancel.is_cancelled() {
                break;
            }

            let settings = match store.serial_settings().await {
                Ok(settings) => settings,
                Err(err) => {
                    warn!(error = %err, "failed to load serial settings");
                    status.set_state(SerialState::Error);
                    if let Wait::Cancelled =
                        wait_for_retry(&cancel, &mut commands, 5.0).await
                    {
                        break;
                    }
                    continue;
                }
            };

            status.set_state(SerialState::Connecting);
            let stream = match tokio_serial::new(&settings.port, settings.baud_rate)
                .open_native_async()
            {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(port = %settings.port, error = %err, "serial open failed");
                    status.record_error();
                    status.set_state(SerialState::Error);
                    if let Wait::Cancelled =
                        wait_for_retry(&cancel, &mut commands, settings.reconnect_interval).await
                    {
                        break;
                    }
                    continue;
                }
            };

            info!(port = %settings.port, baud = settings.baud_rate, "serial port opened");
            let end = read_session(
                stream,
                &settings,
                &status,
                &frames,
                &mut commands,
                &cancel,
            )
            .await;

            match end {
                SessionEnd::Cancelled => break,
                SessionEnd::Restart => {
                    status.set_state(SerialState::Disconnected);
                }
                SessionEnd::Fault => {
                    status.set_state(SerialState::Error);
                    if let Wait::Cancelled =
                        wait_for_retry(&cancel, &mut commands, settings.reconnect_interval).await
                    {
                        break;
                    }
                }
            }
        }

        status.set_state(SerialState::Disconnected);
        info!("serial reader stopped");
    }
}

async fn wait_for_retry(
    cancel: &CancellationToken,
    commands: &mut mpsc::Receiver<SerialCommand>,
    seconds: f64,
) -> Wait {
    tokio::select! {
        _ = cancel.cancelled() => Wait::Cancelled,
        command = commands.recv() => match command {
            Some(SerialCommand::Restart) => Wait::Proceed,
            None => Wait::Cancelled,
        },
        _ = tokio::time::sleep(Duration::from_secs_f64(seconds.max(0.1))) => Wait::Proceed,
    }
}

/// Read and decode until timeout, EOF, error, restart, or cancellation.
/// Generic over the byte stream so tests can drive it without a port.
async fn read_session<S: AsyncRead + Unpin>(
    mut stream: S,
    settings: &SerialSettings,
    status: &SerialStatus,
    frames: &mpsc::Sender<ChannelMap>,
    commands: &mut mpsc::Receiver<SerialCommand>,
    cancel: &CancellationToken,
) -> SessionEnd {
    let read_timeout = Duration::from_secs_f64(settings.timeout.max(0.1));
    let mut format = match settings.data_format {
        DataFormat::Auto => None,
        fixed => Some(fixed),
    };
    let mut sniff_buf: Vec<u8> = Vec::new();
    let mut line_buf: Vec<u8> = Vec::new();
    let mut deframer = BinaryDeframer::new();
    let mut seen_crc_errors = 0u64;
    let mut chunk = [0u8; 512];
    let mut connected = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return SessionEnd::Cancelled,
            command = commands.recv() => {
                return match command {
                    Some(SerialCommand::Restart) => SessionEnd::Restart,
                    None => SessionEnd::Cancelled,
                };
            }
            read = tokio::time::timeout(read_timeout, stream.read(&mut chunk)) => {
                let n = match read {
                    Err(_) => {
                        warn!("serial read timed out");
                        status.record_error();
                        return SessionEnd::Fault;
                    }
                    Ok(Ok(0)) => {
                        warn!("serial stream reached EOF");
                        status.record_error();
                        return SessionEnd::Fault;
                    }
                    Ok(Ok(n)) => n,
                    Ok(Err(err)) => {
                        warn!(error = %err, "serial read failed");
                        status.record_error();
                        return SessionEnd::Fault;
                    }
                };

                if !connected {
                    connected = true;
                    status.mark_connected();
                }

                let data: Vec<u8> = match format {
                    Some(_) => chunk[..n].to_vec(),
                    None => {
                        sniff_buf.extend_from_slice(&chunk[..n]);
                        let decidable = sniff_buf.len() >= SNIFF_PEEK
                            || sniff_buf.iter().any(|&b| b == b'\n' || b == b'\r');
                        if !decidable {
                            continue;
                        }
                        let decided = codec::sniff_format(&sniff_buf);
                        info!(format = ?decided, "auto-detected serial data format");
                        status.set_detected_format(decided);
                        format = Some(decided);
                        std::mem::take(&mut sniff_buf)
                    }
                };

                match format.expect("format decided above") {
                    DataFormat::Csv => {
                        consume_csv(&mut line_buf, &data, settings, status, frames);
                    }
                    DataFormat::MotecBinary | DataFormat::Auto => {
                        consume_binary(
                            &mut deframer,
                            &mut seen_crc_errors,
                            &data,
                            settings,
                            status,
                            frames,
                        );
                    }
                }
            }
        }
    }
}

fn consume_csv(
    line_buf: &mut Vec<u8>,
    data: &[u8],
    settings: &SerialSettings,
    status: &SerialStatus,
    frames: &mpsc::Sender<ChannelMap>,
) {
    line_buf.extend_from_slice(data);
    while let Some(pos) = line_buf.iter().position(|&b| b == b'\n') {
        let line: Vec<u8> = line_buf.drain(..=pos).collect();
        let Ok(line) = std::str::from_utf8(&line) else {
            status.record_error();
            continue;
        };
        let channels = codec::decode_csv_line(
            line,
            &settings.csv_channel_order,
            &settings.csv_separator,
        );
        if !channels.is_empty() {
            emit(channels.into_iter().collect(), status, frames);
        }
    }
}

fn consume_binary(
    deframer: &mut BinaryDeframer,
    seen_crc_errors: &mut u64,
    data: &[u8],
    settings: &SerialSettings,
    status: &SerialStatus,
    frames: &mpsc::Sender<ChannelMap>,
) {
    deframer.push(data);
    while let Some(frame) = deframer.next_frame() {
        let channels = codec::payload_channels(&frame, &settings.csv_channel_order);
        if !channels.is_empty() {
            emit(channels.into_iter().collect(), status, frames);
        }
    }
    status.add_errors(deframer.crc_errors - *seen_crc_errors);
    *seen_crc_errors = deframer.crc_errors;
}

fn emit(channels: ChannelMap, status: &SerialStatus, frames: &mpsc::Sender<ChannelMap>) {
    status.record_frame();
    // Never block the reader: if the supervisor is behind, this sample is
    // superseded by the next one anyway.
    if frames.try_send(channels).is_err() {
        debug!("supervisor busy; serial frame dropped");
    }
}
