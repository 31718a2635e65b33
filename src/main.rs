use std::{net::SocketAddr, sync::Arc, time::Duration};

use anyhow::Context;
use chrono::Utc;
use tokio::{signal, sync::mpsc};
use tracing::{error, info, warn};

use marketplace_api as api;
use api::services::{
    fulfillment::FulfillmentService,
    gateway::PaystackGateway,
    notifications::{EventNotifier, OrderNotifier},
    payment_split::PaymentGateway,
};

const EXPIRY_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = api::config::load_config().context("failed to load configuration")?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await.map_err(|e| {
            error!("Failed running migrations: {}", e);
            e
        })?;
    }
    let db_arc = Arc::new(db_pool);

    // Init events
    let (event_tx, event_rx) = mpsc::channel(cfg.event_channel_capacity);
    let event_sender = api::events::EventSender::new(event_tx);
    tokio::spawn(api::events::process_events(event_rx));

    let notifier: Arc<dyn OrderNotifier> = Arc::new(EventNotifier::new(event_sender.clone()));
    let gateway: Arc<dyn PaymentGateway> = Arc::new(
        PaystackGateway::new(&cfg.payment_gateway).context("failed to build payment gateway")?,
    );
    if cfg.payment_gateway.webhook_secret.is_none() {
        warn!("No dedicated webhook secret configured; verifying callbacks with the gateway secret key");
    }

    let auth_service = Arc::new(api::auth::AuthService::new(
        cfg.jwt_secret.clone(),
        cfg.jwt_issuer.clone(),
    ));

    let services = api::handlers::AppServices::new(db_arc.clone(), &cfg, gateway, notifier);

    if let Some(expiry) = cfg.order_expiry() {
        info!(
            minutes = expiry.num_minutes(),
            "Unpaid order expiry sweep enabled"
        );
        tokio::spawn(run_expiry_sweep(services.fulfillment.clone(), expiry));
    }

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", cfg.host, cfg.port))?;

    let app_state = api::AppState {
        db: db_arc,
        config: Arc::new(cfg),
        event_sender,
        auth: auth_service,
        services,
    };

    api::handlers::health::init_start_time();
    let app = api::app_router(app_state);

    // Bind and serve
    info!("marketplace-api listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Cancels unpaid orders older than `expiry` once per interval.
async fn run_expiry_sweep(fulfillment: Arc<FulfillmentService>, expiry: chrono::Duration) {
    let mut ticker = tokio::time::interval(EXPIRY_SWEEP_INTERVAL);
    loop {
        ticker.tick().await;
        if let Err(e) = fulfillment.sweep_expired(Utc::now() - expiry).await {
            error!(error = %e, "expiry sweep failed");
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
