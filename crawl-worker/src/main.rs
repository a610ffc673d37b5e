use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use envconfig::Envconfig;
use eyre::Result;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use common_redis::RedisClient;
use crawl_dedup::{DedupCache, DedupEngine, IndexStore, PgIndexStore};
use crawl_optimizer::{ActionType, PoolOptimizer, SystemSampler};
use crawl_queue::PriorityQueue;
use crawl_recovery::RecoveryManager;
use crawl_scheduler::Scheduler;
use crawl_worker::http::AppContext;
use crawl_worker::{Config, HttpFetcher, PgStorageSink, WorkerManager};
use health::HealthRegistry;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = Config::init_from_env()?;
    let bind = format!("{}:{}", config.host, config.port);

    // Composition root: every subsystem is built once and passed down.
    let redis = Arc::new(
        RedisClient::with_timeouts(
            config.redis_url.clone(),
            Some(Duration::from_millis(config.redis_response_timeout_ms)),
            Some(Duration::from_millis(config.redis_connection_timeout_ms)),
        )
        .await
        .map_err(|e| eyre::eyre!("redis connection failed: {e}"))?,
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.pg_max_connections)
        .connect(&config.database_url)
        .await?;

    let index = Arc::new(PgIndexStore::new(pool.clone()));
    index
        .bootstrap()
        .await
        .map_err(|e| eyre::eyre!("index bootstrap failed: {e}"))?;

    let queue = PriorityQueue::new(redis.clone(), config.queue_config());
    let cache = Arc::new(DedupCache::new(redis.clone(), config.dedup_config()));
    let index_store: Arc<dyn IndexStore> = index.clone();
    let engine = Arc::new(DedupEngine::new(cache, index_store, config.dedup_config()));
    let scheduler = Arc::new(Scheduler::new(config.scheduling_config()));
    let recovery = Arc::new(RecoveryManager::new(config.recovery_config()));
    let fetcher = Arc::new(HttpFetcher::new(&config.fetch_user_agent)?);
    let sink = Arc::new(PgStorageSink::new(pool.clone()));
    let optimizer = Arc::new(PoolOptimizer::new(config.optimizer_config()));

    let manager = Arc::new(WorkerManager::new(
        queue.clone(),
        scheduler.clone(),
        engine.clone(),
        recovery.clone(),
        fetcher,
        sink,
        config.worker_settings(),
    ));
    manager.start(config.worker_count);

    let health = HealthRegistry::new();
    let token = CancellationToken::new();

    // Heartbeat sweeper: reclaim tasks from workers whose heartbeat lapsed.
    {
        let queue = queue.clone();
        let token = token.clone();
        let handle = health.register("heartbeat_sweeper", Duration::from_secs(120));
        let interval = Duration::from_secs(config.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        match queue.sweep_stale_workers().await {
                            Ok(evicted) if evicted > 0 => {
                                info!(evicted, "heartbeat sweep evicted stale workers");
                            }
                            Ok(_) => {}
                            Err(e) => warn!("heartbeat sweep failed: {e}"),
                        }
                        handle.report_healthy();
                    }
                }
            }
        });
    }

    // Queue metrics collector.
    {
        let queue = queue.clone();
        let token = token.clone();
        let handle = health.register("metrics_collector", Duration::from_secs(180));
        let interval = Duration::from_secs(config.metrics_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = queue.collect_metrics().await {
                            warn!("queue metrics collection failed: {e}");
                        }
                        handle.report_healthy();
                    }
                }
            }
        });
    }

    // Dedup context persister.
    {
        let engine = engine.clone();
        let token = token.clone();
        let handle = health.register("context_persister", Duration::from_secs(180));
        let interval = Duration::from_secs(config.context_persist_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Err(e) = engine.persist_contexts().await {
                            warn!("context persistence failed: {e}");
                        }
                        handle.report_healthy();
                    }
                }
            }
        });
    }

    // Pool optimizer: monitor on one cadence, decide on another, clean up on
    // a third. Scaling decisions are applied through the manager.
    {
        let optimizer = optimizer.clone();
        let manager = manager.clone();
        let queue = queue.clone();
        let token = token.clone();
        let handle = health.register("pool_optimizer", Duration::from_secs(180));
        let monitoring_interval = optimizer.config().monitoring_interval;
        let optimization_every =
            (optimizer.config().optimization_interval.as_secs() / monitoring_interval.as_secs())
                .max(1);
        let cleanup_every =
            (optimizer.config().cleanup_interval.as_secs() / monitoring_interval.as_secs()).max(1);
        tokio::spawn(async move {
            let mut sampler = SystemSampler::new();
            let mut ticker = tokio::time::interval(monitoring_interval);
            let mut tick: u64 = 0;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        tick += 1;
                        let system = sampler.sample();
                        match queue.status().await {
                            Ok(queue_status) => {
                                let pool = manager.pool_snapshot(&queue_status);
                                optimizer.observe(system, pool);
                            }
                            Err(e) => warn!("queue status unavailable for optimizer: {e}"),
                        }

                        if tick % optimization_every == 0 {
                            for action in optimizer.optimize(Utc::now()) {
                                match action.action_type {
                                    ActionType::ScaleUp | ActionType::ScaleDown => {
                                        manager.scale_to(action.target_workers).await;
                                    }
                                    ActionType::Rebalance => {
                                        // Waking idle loops lets them absorb
                                        // the skewed backlog.
                                        manager.trigger_immediate_check();
                                    }
                                    ActionType::Cleanup => {
                                        let dropped = optimizer.cleanup(Utc::now());
                                        info!(dropped, "optimizer cleanup pass");
                                    }
                                }
                            }
                        }
                        if tick % cleanup_every == 0 {
                            optimizer.cleanup(Utc::now());
                        }
                        handle.report_healthy();
                    }
                }
            }
        });
    }

    // Scheduler health sweep: stale-worker flags and rebalance hints.
    {
        let scheduler = scheduler.clone();
        let token = token.clone();
        let handle = health.register("scheduler_health", Duration::from_secs(180));
        let interval = Duration::from_secs(scheduler.config().rebalance_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        scheduler.check_worker_health(Utc::now());
                        for recommendation in scheduler.evaluate_rebalance() {
                            info!(?recommendation, "scheduler rebalance recommendation");
                        }
                        handle.report_healthy();
                    }
                }
            }
        });
    }

    // Idle monitor: wakes idle workers once a second.
    {
        let manager = manager.clone();
        let interval = Duration::from_secs(config.idle_check_interval_secs);
        tokio::spawn(async move {
            manager.run_idle_monitor(interval).await;
        });
    }

    let context = Arc::new(AppContext {
        queue: queue.clone(),
        scheduler,
        engine: engine.clone(),
        recovery,
        manager: manager.clone(),
        optimizer,
        health,
        metrics_enabled: true,
    });

    let app = crawl_worker::http::app(context);
    info!(%bind, "crawl worker serving");

    let server = {
        let token = token.clone();
        tokio::spawn(async move {
            if let Err(e) = crawl_worker::http::listen(app, bind).await {
                error!("http server exited: {e}");
                token.cancel();
            }
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    // Stop intake, drain in-flight work, flush state.
    token.cancel();
    manager.stop().await;
    if let Err(e) = engine.persist_contexts().await {
        warn!("final context flush failed: {e}");
    }
    if let Err(e) = queue.collect_metrics().await {
        warn!("final metrics flush failed: {e}");
    }
    server.abort();
    info!("crawl worker stopped");
    Ok(())
}
