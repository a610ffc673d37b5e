use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::{DateTime, Utc};
use tracing::warn;

/// Health reporting for the long-running loops of the service.
///
/// The crawl plane runs several concurrent actors (worker loops, the
/// heartbeat sweeper, the pool optimizer, the metrics collector). The process
/// is only trustworthy if all of them keep making progress, so each one
/// registers a component and reports healthy on a deadline:
///   - if any component reported unhealthy, the process is unhealthy
///   - if a component misses its deadline, it is considered stalled and the
///     check fails
///   - otherwise the process is healthy
#[derive(Default, Debug)]
pub struct HealthStatus {
    /// True if every registered component is currently healthy.
    pub healthy: bool,
    /// Per-component status, for display.
    pub components: HashMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let body = format!("{self:?}");
        match self.healthy {
            true => (StatusCode::OK, body),
            false => (StatusCode::INTERNAL_SERVER_ERROR, body),
        }
        .into_response()
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ComponentStatus {
    /// Set when a component is newly registered.
    Starting,
    /// Recently reported healthy, must report again before the deadline.
    HealthyUntil(DateTime<Utc>),
    /// Reported unhealthy.
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_healthy(&self) -> bool {
        match self {
            ComponentStatus::HealthyUntil(until) => *until > Utc::now(),
            _ => false,
        }
    }
}

#[derive(Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

/// Handle held by a single component; cheap to clone into its loop.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Arc<RwLock<HashMap<String, ComponentStatus>>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a component. It starts in `Starting` (counted unhealthy)
    /// until its first report.
    pub fn register(&self, component: impl Into<String>, deadline: Duration) -> HealthHandle {
        let component = component.into();
        match self.components.write() {
            Ok(mut components) => {
                components.insert(component.clone(), ComponentStatus::Starting);
            }
            Err(e) => warn!("health registry lock poisoned on register: {e}"),
        }
        HealthHandle {
            component,
            deadline,
            components: self.components.clone(),
        }
    }

    pub fn get_status(&self) -> HealthStatus {
        let components = match self.components.read() {
            Ok(components) => components.clone(),
            Err(_) => return HealthStatus::default(),
        };
        let healthy = !components.is_empty() && components.values().all(|c| c.is_healthy());
        HealthStatus {
            healthy,
            components,
        }
    }
}

impl HealthHandle {
    /// Report healthy; must be called more often than the deadline.
    pub fn report_healthy(&self) {
        let until = Utc::now()
            + chrono::Duration::from_std(self.deadline).unwrap_or(chrono::Duration::seconds(30));
        self.report_status(ComponentStatus::HealthyUntil(until));
    }

    pub fn report_unhealthy(&self) {
        self.report_status(ComponentStatus::Unhealthy);
    }

    pub fn report_status(&self, status: ComponentStatus) {
        match self.components.write() {
            Ok(mut components) => {
                components.insert(self.component.clone(), status);
            }
            Err(e) => warn!(
                component = self.component,
                "health registry lock poisoned: {e}"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_registry_is_unhealthy() {
        let registry = HealthRegistry::new();
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn test_component_lifecycle() {
        let registry = HealthRegistry::new();
        let handle = registry.register("worker-loop", Duration::from_secs(30));

        // Starting counts as not-yet-healthy.
        assert!(!registry.get_status().healthy);

        handle.report_healthy();
        assert!(registry.get_status().healthy);

        handle.report_unhealthy();
        let status = registry.get_status();
        assert!(!status.healthy);
        assert_eq!(
            status.components.get("worker-loop"),
            Some(&ComponentStatus::Unhealthy)
        );
    }

    #[test]
    fn test_one_unhealthy_component_fails_the_process() {
        let registry = HealthRegistry::new();
        let a = registry.register("sweeper", Duration::from_secs(30));
        let b = registry.register("optimizer", Duration::from_secs(30));
        a.report_healthy();
        b.report_healthy();
        assert!(registry.get_status().healthy);
        b.report_unhealthy();
        assert!(!registry.get_status().healthy);
    }

    #[test]
    fn test_missed_deadline_goes_stale() {
        let registry = HealthRegistry::new();
        let handle = registry.register("collector", Duration::from_secs(0));
        handle.report_status(ComponentStatus::HealthyUntil(
            Utc::now() - chrono::Duration::seconds(1),
        ));
        assert!(!registry.get_status().healthy);
    }
}
