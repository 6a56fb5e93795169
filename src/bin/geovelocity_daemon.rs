use actix_web::{middleware, web, App, HttpServer};
use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use geovelocity::alerting::{AlertDispatcher, AlertQueue};
use geovelocity::api;
use geovelocity::config::Config;
use geovelocity::detection::{DetectionPipeline, TravelClassifier};
use geovelocity::geolocation::{LocationCache, MaxMindResolver};
use geovelocity::persistence::{EventStore, SqliteEventStore};

/// Impossible-travel detection service
#[actix_web::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    log::info!("Starting geovelocity daemon...");

    // Load configuration
    let config_path = env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));
    let config = Config::load(&config_path)?;

    let resolver = MaxMindResolver::new(&config.geoip.database_path).map_err(|e| {
        log::error!("Failed to open GeoIP database: {}", e);
        e
    })?;

    let store = SqliteEventStore::new(&config.storage.database_file).map_err(|e| {
        log::error!("Failed to open event store {:?}: {}", config.storage.database_file, e);
        e
    })?;
    store.ping()?;
    log::info!("Event store ready at {:?}", config.storage.database_file);

    let cache = Arc::new(LocationCache::new(Arc::new(resolver)));
    let mut pipeline = DetectionPipeline::new(cache, Arc::new(store)).with_classifier(
        TravelClassifier::with_threshold(config.detection.speed_threshold_mph),
    );
    if let Some(limit) = config.detection.request_timeout() {
        pipeline = pipeline.with_timeout(limit);
    }

    if config.alerting.enabled {
        let (tx, rx) = AlertDispatcher::create_channel();
        let dispatcher = AlertDispatcher::new(config.alerting.clone());
        actix_web::rt::spawn(dispatcher.run(rx));
        pipeline = pipeline.with_alerts(AlertQueue::new(tx));
        log::info!("Alert dispatch enabled");
    }

    let bind = (config.server.bind_address.clone(), config.server.port);
    log::info!("Listening on {}:{}", bind.0, bind.1);

    let data = web::Data::new(pipeline);
    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .app_data(data.clone())
            .configure(api::configure)
    })
    .bind(bind)?
    .run()
    .await?;

    log::info!("Geovelocity daemon stopped");
    Ok(())
}
