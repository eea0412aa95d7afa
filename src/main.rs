use siscom_dispatch::config::AppConfig;
use siscom_dispatch::db::{self, pg_store::PgStore};
use siscom_dispatch::http::{self, AppState};
use siscom_dispatch::kafka;
use siscom_dispatch::processor::assignment_manager::AssignmentManager;
use siscom_dispatch::processor::emergency::EmergencyAlertHandler;
use siscom_dispatch::processor::eta::{OsrmRoutingProvider, RouteCalculator};
use siscom_dispatch::processor::geofence::GeofenceEvaluator;
use siscom_dispatch::processor::ingestion::IngestionService;
use siscom_dispatch::processor::notifier::NotificationDispatcher;
use siscom_dispatch::processor::workers;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load()?;

    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .init();

    info!("Starting Siscom Dispatch Service...");

    let pool = db::init_pool(&config.database_url).await?;
    info!("Connected to database");
    let store = PgStore::new(pool);
    store.migrate().await?;
    let stores = store.into_stores();

    let (geofence_tx, geofence_rx) = mpsc::channel(config.geofence_queue_capacity);
    let (eta_tx, eta_rx) = mpsc::channel(config.eta_queue_capacity);

    let provider = Arc::new(OsrmRoutingProvider::new(
        &config.routing_base_url,
        config.routing_timeout(),
    )?);
    let routes = Arc::new(RouteCalculator::new(provider, config.routing_timeout()));
    let notifier = Arc::new(NotificationDispatcher::new(stores.notifications.clone()));

    let ingestion = Arc::new(
        IngestionService::new(
            stores.devices.clone(),
            stores.locations.clone(),
            config.moving_speed_threshold,
            config.online_window(),
        )
        .with_geofence_queue(geofence_tx),
    );
    let manager = Arc::new(
        AssignmentManager::new(stores.clone(), notifier.clone(), routes, config.online_window())
            .with_eta_queue(eta_tx),
    );
    let alerts = Arc::new(EmergencyAlertHandler::new(
        stores.alerts.clone(),
        stores.assignments.clone(),
        notifier.clone(),
    ));
    let evaluator = Arc::new(GeofenceEvaluator::new(stores.geofences.clone()));

    workers::spawn_geofence_worker(geofence_rx, evaluator, manager.clone());
    workers::spawn_eta_worker(eta_rx, manager.clone());

    let state = Arc::new(AppState {
        ingestion: ingestion.clone(),
        assignments: manager,
        alerts,
        notifications: notifier,
    });

    tokio::select! {
        result = kafka::start_kafka_consumer(&config, ingestion) => {
            if let Err(e) = &result {
                error!("Kafka consumer stopped: {}", e);
            }
            result
        }
        result = http::serve(config.http_bind_addr, state) => {
            if let Err(e) = &result {
                error!("HTTP server stopped: {}", e);
            }
            result
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}
