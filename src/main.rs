//! Gateway Guard Service
//!
//! This is the main entry point for the gateway guard service.
//! It wires the engine components together and starts the web server.

use actix_web::{web, App, HttpServer};
use dotenv::dotenv;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use redis::Client;
use std::sync::Arc;
use std::time::Duration;

use gateway_guard_service::api::{self, ApiState};
use gateway_guard_service::config::load_config;
use gateway_guard_service::core::access_lists::{AccessListManager, RedisAccessListStore};
use gateway_guard_service::core::counter_store::{CounterStore, RedisCounterStore};
use gateway_guard_service::core::gateway::Gateway;
use gateway_guard_service::core::rate_limiter::{RateLimiter, RuleSet};
use gateway_guard_service::core::threats::{ThreatAnalyzer, ThreatEventRecorder};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting Gateway Guard Service...");

    // Load configuration
    let config = load_config().expect("Failed to load configuration");
    let config = Arc::new(config);

    if let Err(e) = PrometheusBuilder::new().install() {
        warn!("Failed to install Prometheus exporter: {}", e);
    }

    // Initialize Redis client
    let redis_client = Client::open(config.redis.url.as_str()).expect("Failed to create Redis client");

    // Shared counter store and access lists
    let store: Arc<dyn CounterStore> = Arc::new(RedisCounterStore::new(
        redis_client.clone(),
        Duration::from_millis(config.store_policy.timeout_ms),
    ));
    let access_lists = Arc::new(AccessListManager::new(Arc::new(RedisAccessListStore::new(
        redis_client,
    ))));
    match access_lists.load().await {
        Ok(count) => info!("Loaded {} access list entries", count),
        Err(e) => warn!("Failed to load access list entries: {}", e),
    }

    // Threat pipeline
    let recorder = Arc::new(ThreatEventRecorder::new(
        config.threat.retention_hours,
        config.threat.max_events,
    ));
    let analyzer = Arc::new(ThreatAnalyzer::new(
        recorder.clone(),
        config.threat.thresholds.clone(),
        config.threat.top_ips,
    ));

    // Decision facade
    let rules = RuleSet::from_config(&config.rate_limit, &config.endpoint_limits);
    let limiter = RateLimiter::new(store.clone(), rules, config.store_policy.fail_open);
    let gateway = Arc::new(Gateway::new(access_lists.clone(), limiter, recorder.clone()));

    // Periodic sweep of expired access entries and aged-out threat events
    if config.maintenance.enabled {
        let sweep_lists = access_lists.clone();
        let sweep_recorder = recorder.clone();
        let interval_seconds = config.maintenance.interval_seconds as u64;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_seconds));
            loop {
                interval.tick().await;
                let swept = sweep_lists.sweep_expired().await;
                let pruned = sweep_recorder.prune_expired().await;
                if swept > 0 || pruned > 0 {
                    info!(
                        "maintenance sweep: {} entries expired, {} events pruned",
                        swept, pruned
                    );
                }
            }
        });
    }

    // Create API state
    let state = web::Data::new(ApiState {
        gateway,
        access_lists,
        analyzer,
        store,
        config: config.clone(),
    });

    // Start HTTP server
    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::config))
        .bind((config.server.host.as_str(), config.server.port))?
        .run()
        .await
}
