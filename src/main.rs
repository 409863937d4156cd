use std::process::ExitCode;

use clap::Parser;
use meremail::cli::Cli;
use meremail::config::Config;
use meremail::store::Store;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    init_tracing();

    let cli = Cli::parse();

    if cli.check_config {
        return match meremail::config::validate_required() {
            Ok(()) => {
                info!("configuration OK");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "configuration check failed");
                ExitCode::FAILURE
            }
        };
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let store = match Store::open(&config.database_path).await {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to open database");
            return ExitCode::FAILURE;
        }
    };

    if let Some(rule_id) = cli.apply_rule {
        return run_apply_rule(store, rule_id).await;
    }

    let (stop_tx, stop_rx) = watch::channel(false);
    let mut handles = Vec::new();

    if !cli.no_ingest {
        handles.push(tokio::spawn(meremail::imap_ingest::run_primary(
            config.clone(),
            store.clone(),
            stop_rx.clone(),
        )));
        handles.push(tokio::spawn(meremail::imap_ingest::run_secondary(
            config.clone(),
            store.clone(),
            stop_rx.clone(),
        )));
    }
    if !cli.no_send_queue {
        handles.push(tokio::spawn(meremail::sendqueue::run(
            config.clone(),
            store.clone(),
            stop_rx.clone(),
        )));
    }
    if !cli.no_scheduler {
        handles.push(tokio::spawn(meremail::scheduler::run(
            config.clone(),
            store.clone(),
            stop_rx.clone(),
        )));
    }

    let port = config.port;
    let app = meremail::http::router(store, config);
    let listener = match tokio::net::TcpListener::bind(("0.0.0.0", port)).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, port, "failed to bind HTTP listener");
            let _ = stop_tx.send(true);
            return ExitCode::FAILURE;
        }
    };
    info!(port, "listening");

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = server.await {
        error!(error = %e, "HTTP server error");
    }

    let _ = stop_tx.send(true);
    for handle in handles {
        let _ = handle.await;
    }

    ExitCode::SUCCESS
}

async fn run_apply_rule(store: Store, rule_id: i64) -> ExitCode {
    match store.create_rule_application(rule_id).await {
        Ok(application) => {
            meremail::rules::application::run(store, application.id, rule_id).await;
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, rule_id, "failed to start rule application");
            ExitCode::FAILURE
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => return,
        };
        sigterm.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

fn init_tracing() {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);
}
