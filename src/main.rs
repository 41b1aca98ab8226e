use bmitrack::{
    app::{build_app, serve},
    email::{build_mailer, EmailWorker},
    logging,
    state::AppState,
};
use tokio::sync::watch;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    logging::init("bmitrack=debug,axum=info,tower_http=info");

    let (app_state, backends) = AppState::init().await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(&backends.db).await {
        tracing::warn!(error = %e, "migration failed; continuing");
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let worker = if app_state.config.email.worker_enabled {
        let mailer = build_mailer(&app_state.config.email.smtp)?;
        let worker = EmailWorker::new(backends.queue.clone(), mailer, &app_state.config.email);
        Some(tokio::spawn(worker.run(shutdown_rx)))
    } else {
        tracing::info!("in-process email worker disabled; run the email-worker binary");
        None
    };

    let app = build_app(app_state);
    let served = serve(app).await;

    let _ = shutdown_tx.send(true);
    if let Some(handle) = worker {
        if let Err(e) = handle.await {
            tracing::error!(error = %e, "email worker task failed");
        }
    }
    served
}
