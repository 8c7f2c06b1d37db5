use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use pitwall_auth::{JwtConfig, JwtVerifier};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pitwall_server::app_state::AppState;
use pitwall_server::config::{load_config, ServerConfig};
use pitwall_server::forms::FormRegistry;
use pitwall_server::handlers::{self, user_handlers};
use pitwall_server::ldx::LdxWatcher;
use pitwall_server::metrics::DashMetrics;
use pitwall_server::store::{Sensor, Store};
use pitwall_server::telemetry::{
    SerialReader, SerialStatus, SourceSupervisor, TelemetryHub,
};
use pitwall_server::values::ValueService;

enum Fatal {
    Boot(anyhow::Error),
    Runtime(anyhow::Error),
}

#[tokio::main]
async fn main() -> ExitCode {
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = match load_config() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err:#}");
            return ExitCode::from(1);
        }
    };

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(Fatal::Boot(err)) => {
            eprintln!("boot failure: {err:#}");
            ExitCode::from(1)
        }
        Err(Fatal::Runtime(err)) => {
            eprintln!("fatal runtime error: {err:#}");
            ExitCode::from(2)
        }
    }
}

async fn run(config: ServerConfig) -> Result<(), Fatal> {
    // --- boot: store, bootstrap data, registry -------------------------
    std::fs::create_dir_all(&config.data_dir)
        .with_context(|| format!("cannot create data dir {}", config.data_dir.display()))
        .map_err(Fatal::Boot)?;
    std::fs::create_dir_all(&config.forms_dir)
        .with_context(|| format!("cannot create forms dir {}", config.forms_dir.display()))
        .map_err(Fatal::Boot)?;

    let store = Store::open(&config.database_path())
        .await
        .context("failed to open store")
        .map_err(Fatal::Boot)?;

    bootstrap_admin(&store, &config).await.map_err(Fatal::Boot)?;
    seed_sensors(&store).await.map_err(Fatal::Boot)?;
    adopt_watch_dir(&store, &config).await.map_err(Fatal::Boot)?;

    let registry = FormRegistry::load(&config.forms_dir)
        .context("failed to load form registry")
        .map_err(Fatal::Boot)?;

    let metrics = Arc::new(
        DashMetrics::new()
            .context("failed to initialise metrics")
            .map_err(Fatal::Boot)?,
    );
    let verifier = Arc::new(JwtVerifier::new(JwtConfig::new(config.jwt_secret.clone())));
    let values = Arc::new(ValueService::new(store.clone(), registry.clone()));

    // --- long-running tasks -------------------------------------------
    let cancel = CancellationToken::new();
    let hub = TelemetryHub::new();
    let serial_status = SerialStatus::new();
    let (frames_tx, frames_rx) = mpsc::channel(64);
    let (commands_tx, commands_rx) = mpsc::channel(4);

    let initial_preference = store
        .source_preference()
        .await
        .context("failed to read source preference")
        .map_err(Fatal::Boot)?;
    let (preference_tx, preference_rx) = watch::channel(initial_preference);

    let serial_task = tokio::spawn(
        SerialReader {
            store: store.clone(),
            status: serial_status.clone(),
            frames: frames_tx,
            commands: commands_rx,
        }
        .run(cancel.clone()),
    );

    let supervisor_task = tokio::spawn(
        SourceSupervisor {
            store: store.clone(),
            hub: hub.clone(),
            serial_status: serial_status.clone(),
            serial_frames: frames_rx,
            preference_rx,
            metrics: metrics.clone(),
        }
        .run(cancel.clone()),
    );

    let watcher_task = tokio::spawn(
        LdxWatcher::new(store.clone(), registry.clone(), metrics.clone()).run(cancel.clone()),
    );

    // --- HTTP ----------------------------------------------------------
    let state = AppState {
        store: store.clone(),
        verifier,
        registry,
        values,
        hub,
        serial_status,
        serial_commands: commands_tx,
        preference_tx: Arc::new(preference_tx),
        metrics,
        config: Arc::new(config.clone()),
        shutdown: cancel.clone(),
    };

    let app = handlers::api_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("cannot bind {addr}"))
        .map_err(Fatal::Boot)?;
    info!(%addr, "pitwall server listening");

    let signal_cancel = cancel.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        signal_cancel.cancel();
    });

    let serve_cancel = cancel.clone();
    let result = axum::serve(listener, app)
        .with_graceful_shutdown(async move { serve_cancel.cancelled().await })
        .await;

    // --- shutdown ------------------------------------------------------
    cancel.cancel();
    for (name, task) in [
        ("serial", serial_task),
        ("supervisor", supervisor_task),
        ("watcher", watcher_task),
    ] {
        join_with_deadline(name, task).await;
    }
    store.close().await;
    info!("shutdown complete");

    result.context("http server failed").map_err(Fatal::Runtime)
}

/// Tasks promise to release resources within 2 s of cancellation.
async fn join_with_deadline(name: &str, task: JoinHandle<()>) {
    if tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .is_err()
    {
        warn!(task = name, "task did not stop within deadline");
    }
}

/// Create the first admin from the environment when the user table is empty.
async fn bootstrap_admin(store: &Store, config: &ServerConfig) -> anyhow::Result<()> {
    if store.count_users().await? > 0 {
        return Ok(());
    }

    let (Some(username), Some(password)) = (&config.admin_username, &config.admin_password)
    else {
        anyhow::bail!(
            "no users exist; set ADMIN_USERNAME and ADMIN_PASSWORD to bootstrap the first admin"
        );
    };

    let hash = user_handlers::hash_password(password)
        .map_err(|err| anyhow::anyhow!("invalid bootstrap password: {err}"))?;
    store.create_user(username, &hash, true, &[]).await?;
    info!(%username, "bootstrap admin created");
    Ok(())
}

/// Default channel catalog for a fresh database.
async fn seed_sensors(store: &Store) -> anyhow::Result<()> {
    if store.count_sensors().await? > 0 {
        return Ok(());
    }

    let defaults: &[(&str, &str, &str, f64, f64, &str)] = &[
        ("rpm", "Engine RPM", "rpm", 0.0, 14000.0, "engine"),
        ("speed_kph", "Speed", "km/h", 0.0, 160.0, "dynamics"),
        ("coolant_c", "Coolant temp", "°C", 20.0, 130.0, "engine"),
        ("oil_pressure_kpa", "Oil pressure", "kPa", 0.0, 700.0, "engine"),
        ("tps_pct", "Throttle position", "%", 0.0, 100.0, "engine"),
        ("brake_f_bar", "Brake pressure front", "bar", 0.0, 80.0, "dynamics"),
        ("brake_r_bar", "Brake pressure rear", "bar", 0.0, 80.0, "dynamics"),
        ("steering_deg", "Steering angle", "deg", -120.0, 120.0, "dynamics"),
        ("accel_lat_g", "Lateral accel", "g", -3.0, 3.0, "dynamics"),
        ("accel_long_g", "Longitudinal accel", "g", -3.0, 3.0, "dynamics"),
        ("battery_v", "Battery voltage", "V", 8.0, 16.0, "electrical"),
        ("fuel_pressure_kpa", "Fuel pressure", "kPa", 0.0, 600.0, "engine"),
    ];

    for (index, (sensor_id, name, unit, min_value, max_value, group)) in
        defaults.iter().enumerate()
    {
        store
            .upsert_sensor(&Sensor {
                sensor_id: sensor_id.to_string(),
                name: name.to_string(),
                unit: unit.to_string(),
                min_value: *min_value,
                max_value: *max_value,
                group: group.to_string(),
                sort_order: index as i64,
                enabled: true,
            })
            .await?;
    }
    info!(count = defaults.len(), "seeded default sensors");
    Ok(())
}

/// Take `LDX_WATCH_DIR` only when the store has no watch directory yet.
async fn adopt_watch_dir(store: &Store, config: &ServerConfig) -> anyhow::Result<()> {
    if store.watch_dir().await?.is_none() {
        if let Some(dir) = &config.ldx_watch_dir {
            store.set_watch_dir(Some(dir)).await?;
            info!(dir = %dir, "adopted LDX_WATCH_DIR");
        }
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install ctrl-c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => warn!(error = %err, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
