use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use common_metrics::setup_metrics_routes;

use crawl_dedup::DedupEngine;
use crawl_optimizer::PoolOptimizer;
use crawl_queue::PriorityQueue;
use crawl_recovery::RecoveryManager;
use crawl_scheduler::Scheduler;
use health::HealthRegistry;

use crate::manager::WorkerManager;

pub struct AppContext {
    pub queue: PriorityQueue,
    pub scheduler: Arc<Scheduler>,
    pub engine: Arc<DedupEngine>,
    pub recovery: Arc<RecoveryManager>,
    pub manager: Arc<WorkerManager>,
    pub optimizer: Arc<PoolOptimizer>,
    pub health: HealthRegistry,
    pub metrics_enabled: bool,
}

pub async fn listen(app: Router, bind: String) -> Result<(), std::io::Error> {
    let listener = tokio::net::TcpListener::bind(bind).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index(State(context): State<Arc<AppContext>>) -> String {
    format!("crawl worker {}", context.manager.manager_id())
}

async fn liveness(State(context): State<Arc<AppContext>>) -> Response {
    context.health.get_status().into_response()
}

/// Queue depths, DLQ depth, metrics snapshot, registry sizes and the
/// connectivity flag, plus the sibling components' views.
async fn status(State(context): State<Arc<AppContext>>) -> Response {
    let queue_status = match context.queue.status().await {
        Ok(status) => status,
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({
                    "error": e.to_string(),
                    "cache_connected": false,
                })),
            )
                .into_response()
        }
    };

    Json(serde_json::json!({
        "queue": queue_status,
        "scheduler": context.scheduler.stats(),
        "workers": context.manager.stats(),
        "dedup": {
            "metrics": context.engine.metrics(),
            "cache": context.engine.cache().stats(),
            "active_contexts": context.engine.active_contexts(),
        },
        "recovery": {
            "metrics": context.recovery.metrics(),
            "circuit_breakers": context.recovery.breakers(),
        },
        "optimizer": context.optimizer.stats(),
    }))
    .into_response()
}

/// 0-1 health score from worker failures, queue backlog and utilization,
/// mapped to healthy / degraded / unhealthy.
async fn health_endpoint(State(context): State<Arc<AppContext>>) -> Response {
    let backlog = match context.queue.status().await {
        Ok(status) => status.queue_depths.values().sum(),
        Err(_) => 0,
    };
    let report = context.scheduler.health_check(backlog);
    let code = match report.status {
        crawl_scheduler::HealthState::Healthy | crawl_scheduler::HealthState::Degraded => {
            StatusCode::OK
        }
        crawl_scheduler::HealthState::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (code, Json(serde_json::json!(report))).into_response()
}

/// External submitters hit this to wake idle loops without waiting out the
/// poll interval.
async fn trigger_check(State(context): State<Arc<AppContext>>) -> Response {
    let woken = context.manager.trigger_immediate_check();
    Json(serde_json::json!({
        "success": true,
        "idle_workers_woken": woken,
    }))
    .into_response()
}

pub fn app(context: Arc<AppContext>) -> Router {
    let metrics_enabled = context.metrics_enabled;
    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(liveness))
        .route("/status", get(status))
        .route("/health", get(health_endpoint))
        .route("/trigger-check", get(trigger_check));

    let router = router.with_state(context);

    // setup_metrics_routes touches global recorder state, so tests disable
    // it.
    if metrics_enabled {
        setup_metrics_routes(router)
    } else {
        router
    }
}
