use anyhow::Result;
use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct DashMetrics {
    registry: Registry,
    login_attempts: IntCounterVec,
    frames_published: IntCounter,
    frames_dropped: IntCounter,
    ws_clients: IntGauge,
    ldx_files_processed: IntCounter,
    injection_rows: IntCounter,
}

impl DashMetrics {
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let login_attempts = IntCounterVec::new(
            Opts::new(
                "dashboard_login_attempts_total",
                "Count of login attempts grouped by outcome",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(login_attempts.clone()))?;

        let frames_published = IntCounter::new(
            "telemetry_frames_published_total",
            "Frames published to the hub",
        )?;
        registry.register(Box::new(frames_published.clone()))?;

        let frames_dropped = IntCounter::new(
            "telemetry_frames_dropped_total",
            "Frames discarded from slow subscriber queues",
        )?;
        registry.register(Box::new(frames_dropped.clone()))?;

        let ws_clients = IntGauge::new(
            "telemetry_ws_clients",
            "Currently connected WebSocket subscribers",
        )?;
        registry.register(Box::new(ws_clients.clone()))?;

        let ldx_files_processed = IntCounter::new(
            "ldx_files_processed_total",
            "LDX files that received an injection",
        )?;
        registry.register(Box::new(ldx_files_processed.clone()))?;

        let injection_rows = IntCounter::new(
            "ldx_injection_rows_total",
            "Entries written into LDX detail blocks",
        )?;
        registry.register(Box::new(injection_rows.clone()))?;

        Ok(Self {
            registry,
            login_attempts,
            frames_published,
            frames_dropped,
            ws_clients,
            ldx_files_processed,
            injection_rows,
        })
    }

    pub fn login_attempt(&self, outcome: &str) {
        self.login_attempts.with_label_values(&[outcome]).inc();
    }

    pub fn frame_published(&self) {
        self.frames_published.inc();
    }

    pub fn frames_dropped(&self, count: u64) {
        self.frames_dropped.inc_by(count);
    }

    pub fn ws_connected(&self) {
        self.ws_clients.inc();
    }

    pub fn ws_disconnected(&self) {
        self.ws_clients.dec();
    }

    pub fn ldx_file_processed(&self, rows: usize) {
        self.ldx_files_processed.inc();
        self.injection_rows.inc_by(rows as u64);
    }

    pub fn render(&self) -> Result<Response> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        let response = Response::builder()
            .status(StatusCode::OK)
            .header(
                header::CONTENT_TYPE,
                HeaderValue::from_static("text/plain; version=0.0.4"),
            )
            .body(Body::from(buffer))?;
        Ok(response)
    }
}
