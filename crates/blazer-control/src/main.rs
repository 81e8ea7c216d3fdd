use std::{path::Path, sync::Arc};

use blazer_agent::{
    Host, JavaLauncher, LauncherSettings, LifecycleManager, LifecycleSettings,
    SeaOrmInstanceStore,
};
use blazer_control::{
    config::ControlSettings, http, namespace::NamespaceClient, state::AppState,
};
use sea_orm_migration::MigratorTrait;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let Some(dir) = log_dir else {
        tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .init();
        return None;
    };

    let (writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "blazer-control.log"));
    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .with(fmt::layer().with_ansi(false).with_writer(writer))
        .init();
    Some(guard)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::warn!(%err, "ctrl-c handler failed; shutting down");
    }
    tracing::info!("shutdown requested");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = ControlSettings::from_env()?;
    let _log_guard = init_tracing(settings.log_dir.as_deref());

    let database_url =
        std::env::var("DATABASE_URL").map_err(|_| anyhow::anyhow!("DATABASE_URL is required"))?;
    let db = Arc::new(blazer_db::connect(&database_url).await?);

    // Apply migrations on boot (idempotent).
    blazer_migration::Migrator::up(&*db, None).await?;

    let launcher = LauncherSettings::from_env();
    let lifecycle = LifecycleSettings::from_env();
    tracing::info!(
        java = %launcher.java_bin,
        artifact = %launcher.artifact_path.display(),
        instances_root = %launcher.instances_root.display(),
        startup_timeout_secs = lifecycle.startup_timeout.as_secs(),
        stop_timeout_secs = lifecycle.stop_timeout.as_secs(),
        read_only = settings.read_only,
        "lifecycle settings"
    );

    let manager = LifecycleManager::new(
        Arc::new(SeaOrmInstanceStore::new(db.clone())),
        Arc::new(JavaLauncher::new(launcher)),
        Host::os(),
        lifecycle,
    );
    let state = AppState {
        manager: Arc::new(manager),
        namespaces: NamespaceClient,
        read_only: settings.read_only,
    };

    let listener = tokio::net::TcpListener::bind(settings.listen_addr).await?;
    tracing::info!(addr = %settings.listen_addr, "blazer-control HTTP listening");
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    match Arc::try_unwrap(db) {
        Ok(db) => db.close().await?,
        Err(_) => tracing::warn!("database connection still shared at shutdown; leaving it open"),
    }
    Ok(())
}
