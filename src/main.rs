use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use campus_market_api::{
    app_router, config, db, events,
    handlers::AppServices,
    services::{orders::OrderService, payments::PaymentService, paystack::PaystackClient},
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = config::load_config().context("loading configuration")?;
    config::init_tracing(&cfg.log_level, cfg.log_json);

    let db_pool = db::establish_connection(&cfg)
        .await
        .context("connecting to database")?;
    if cfg.auto_migrate {
        db::run_migrations(&db_pool)
            .await
            .context("running migrations")?;
    }
    let db_pool = Arc::new(db_pool);

    let (event_sender, event_rx) = events::channel(1024);
    tokio::spawn(events::process_events(event_rx));
    let event_sender_arc = Arc::new(event_sender.clone());

    let orders = OrderService::new(db_pool.clone(), Some(event_sender_arc.clone()));
    let gateway = Arc::new(PaystackClient::new(&cfg.gateway)?);
    let payments = PaymentService::new(
        db_pool.clone(),
        gateway,
        cfg.gateway.clone(),
        cfg.pricing.clone(),
        orders.clone(),
        Some(event_sender_arc),
    );

    let state = AppState {
        db: db_pool,
        config: cfg.clone(),
        event_sender,
        services: AppServices { orders, payments },
    };

    let app = app_router(state);

    let listener = tokio::net::TcpListener::bind(cfg.server_addr())
        .await
        .with_context(|| format!("binding {}", cfg.server_addr()))?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await.context("serving HTTP")?;

    Ok(())
}
