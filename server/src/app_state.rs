use std::sync::Arc;

use axum::extract::FromRef;
use pitwall_auth::JwtVerifier;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::forms::FormRegistry;
use crate::metrics::DashMetrics;
use crate::store::Store;
use crate::telemetry::{SerialCommand, SerialStatus, SourcePreference, TelemetryHub};
use crate::values::ValueService;

/// Everything the HTTP surface needs, created once at boot.
#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub verifier: Arc<JwtVerifier>,
    pub registry: FormRegistry,
    pub values: Arc<ValueService>,
    pub hub: Arc<TelemetryHub>,
    pub serial_status: Arc<SerialStatus>,
    pub serial_commands: mpsc::Sender<SerialCommand>,
    pub preference_tx: Arc<watch::Sender<SourcePreference>>,
    pub metrics: Arc<DashMetrics>,
    pub config: Arc<ServerConfig>,
    pub shutdown: CancellationToken,
}

impl FromRef<AppState> for Arc<JwtVerifier> {
    fn from_ref(state: &AppState) -> Self {
        state.verifier.clone()
    }
}
