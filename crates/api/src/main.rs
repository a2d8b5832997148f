use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::oneshot;
use tracing::{error, info, warn};

use rolegate_api::app::{StartupError, build_app, build_services};
use rolegate_infra::config::AppConfig;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            let code = err
                .downcast_ref::<StartupError>()
                .map(StartupError::exit_code)
                .unwrap_or(1);
            error!(error = ?err, code, "rolegate-api exiting");
            eprintln!("rolegate-api: {err:#}");
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let config = AppConfig::load().map_err(StartupError::from)?;
    rolegate_observability::init(&config.log).context("initializing logging")?;
    info!(port = config.server.port, driver = ?config.database.driver, "starting rolegate-api");

    let services = Arc::new(build_services(&config).await?);
    let app = build_app(&config, services);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(addr = %listener.local_addr()?, "listening");

    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let serve = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(async move {
            let _ = stop_rx.await;
        });
    let mut server = tokio::spawn(async move { serve.await });

    tokio::select! {
        joined = &mut server => {
            joined.context("server task failed")?.context("server error")?;
            return Ok(());
        }
        () = shutdown_signal() => {}
    }

    let grace = config.server.shutdown_grace();
    info!(?grace, "shutdown signal received; draining in-flight requests");
    let _ = stop_tx.send(());

    let drained = tokio::time::timeout(grace, &mut server).await;
    match drained {
        Ok(joined) => joined.context("server task failed")?.context("server error")?,
        Err(_) => {
            warn!(?grace, "grace period elapsed; forcing shutdown");
            server.abort();
        }
    }

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
