//! Ingestion Service - live feed pipeline
//!
//! Runs the reconciliation schedule and job queue, and exposes `/health`.

use actix_web::{web, App, HttpResponse, HttpServer};
use anyhow::Context;
use livefeed_core::{
    init_logging, load_dotenv, ConfigLoader, DatabaseConfig, DatabasePool, LogConfig,
    RedisConfig, ServiceConfig,
};
use livefeed_ingestion::{
    ChannelBackfill, FeedCache, FeedReconciler, FeedService, IngestionConfig, IngestionSchedule,
    IngestionWorker, JobQueue, PostgresCatalogRepository, RedisBackend, Scheduler, StatusSweep,
    TwitchHelixProvider, YoutubeDataProvider,
};
use std::sync::Arc;
use tracing::{error, info};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let service = ServiceConfig::from_env()?;
    service.validate()?;
    init_logging(&LogConfig::from_env(service.log_level.clone())?)?;

    let database = DatabaseConfig::from_env()?;
    database.validate()?;
    let redis = RedisConfig::from_env()?;
    redis.validate()?;
    let config = IngestionConfig::from_env()?;
    config.validate()?;

    let pool = DatabasePool::connect(&database)
        .await
        .context("failed to connect to the catalog database")?;
    let catalog = Arc::new(PostgresCatalogRepository::new(pool.pool().clone()));
    catalog
        .ensure_schema()
        .await
        .context("failed to apply the catalog schema")?;

    let backend = RedisBackend::connect(&redis.url)
        .await
        .context("failed to connect to the feed cache")?;
    let cache = FeedCache::new(Arc::new(backend));

    let youtube_key = config
        .youtube_api_key
        .clone()
        .context("LIVEFEED_YOUTUBE_API_KEY must be set")?;
    let (twitch_id, twitch_secret) = config
        .twitch_client_id
        .clone()
        .zip(config.twitch_client_secret.clone())
        .context("LIVEFEED_TWITCH_CLIENT_ID and LIVEFEED_TWITCH_CLIENT_SECRET must be set")?;
    let videos = Arc::new(
        YoutubeDataProvider::new(youtube_key, config.upload_item_cap)?
            .with_local_offset(config.local_offset()),
    );
    let streams = Arc::new(TwitchHelixProvider::new(
        twitch_id,
        twitch_secret,
        config.upload_item_cap,
    )?);

    let queue = JobQueue::new(config.queue.clone());
    let reconciler = Arc::new(FeedReconciler::new(
        catalog.clone(),
        cache.clone(),
        videos.clone(),
        streams.clone(),
        config.clone(),
    ));
    let feed = Arc::new(FeedService::new(
        catalog.clone(),
        cache.clone(),
        queue.clone(),
        config.clone(),
    ));
    let backfill = Arc::new(ChannelBackfill::new(
        catalog.clone(),
        cache.clone(),
        videos.clone(),
        streams.clone(),
    ));
    let sweep = Arc::new(StatusSweep::new(
        catalog.clone(),
        videos,
        streams,
        config.clone(),
    ));

    let worker = Arc::new(IngestionWorker::new(reconciler, feed, backfill, sweep));
    queue.start(worker).await?;

    let scheduler = Scheduler::new(
        queue.clone(),
        IngestionSchedule::default(),
        config.local_offset(),
    );
    tokio::spawn(async move {
        if let Err(e) = scheduler.start().await {
            error!("Scheduler stopped: {}", e);
        }
    });

    info!(
        "Starting Ingestion Service on {}:{}",
        service.host, service.port
    );

    let pool_data = web::Data::new(pool);
    HttpServer::new(move || {
        App::new()
            .app_data(pool_data.clone())
            .route("/health", web::get().to(health_check))
    })
    .bind((service.host.as_str(), service.port))?
    .run()
    .await?;

    Ok(())
}

async fn health_check(pool: web::Data<DatabasePool>) -> HttpResponse {
    let database = pool.probe().await;
    let body = serde_json::json!({
        "status": if database.reachable { "healthy" } else { "degraded" },
        "service": "livefeed-ingestion",
        "version": env!("CARGO_PKG_VERSION"),
        "database": database,
    });

    if database.reachable {
        HttpResponse::Ok().json(body)
    } else {
        HttpResponse::ServiceUnavailable().json(body)
    }
}
