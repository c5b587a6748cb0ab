//! Liveness tracking for the background loops of the pantry services.
//!
//! A loop registers itself as a component with a deadline and keeps reporting
//! healthy more often than that. The process is live while every registered
//! component has a report that has not run out; a component whose report ran
//! out is shown as stalled.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComponentStatus {
    /// Registered, nothing reported yet
    Starting,
    HealthyUntil(Instant),
    Unhealthy,
    /// Last healthy report ran out
    Stalled,
}

impl ComponentStatus {
    fn as_of(self, now: Instant) -> Self {
        match self {
            ComponentStatus::HealthyUntil(until) if until <= now => ComponentStatus::Stalled,
            status => status,
        }
    }

    fn is_healthy(&self) -> bool {
        matches!(self, ComponentStatus::HealthyUntil(_))
    }
}

#[derive(Debug, Default)]
pub struct HealthStatus {
    pub healthy: bool,
    pub components: BTreeMap<String, ComponentStatus>,
}

impl IntoResponse for HealthStatus {
    fn into_response(self) -> Response {
        let status = if self.healthy {
            StatusCode::OK
        } else {
            StatusCode::SERVICE_UNAVAILABLE
        };
        let body = self
            .components
            .iter()
            .map(|(name, component)| format!("{name}: {component:?}\n"))
            .collect::<String>();

        (status, body).into_response()
    }
}

type Components = Arc<Mutex<BTreeMap<String, ComponentStatus>>>;

// Statuses are plain values, a panic while holding the lock cannot leave one half-written.
fn lock(components: &Components) -> MutexGuard<'_, BTreeMap<String, ComponentStatus>> {
    components.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Held by a component to report on itself.
#[derive(Clone)]
pub struct HealthHandle {
    component: String,
    deadline: Duration,
    components: Components,
}

impl HealthHandle {
    /// Healthy until `now + deadline`.
    pub fn report_healthy(&self) {
        self.report_status(ComponentStatus::HealthyUntil(Instant::now() + self.deadline));
    }

    pub fn report_status(&self, status: ComponentStatus) {
        lock(&self.components).insert(self.component.clone(), status);
    }
}

#[derive(Clone)]
pub struct HealthRegistry {
    name: String,
    components: Components,
}

impl HealthRegistry {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            components: Components::default(),
        }
    }

    pub fn register(&self, component: &str, deadline: Duration) -> HealthHandle {
        let handle = HealthHandle {
            component: component.to_owned(),
            deadline,
            components: self.components.clone(),
        };
        handle.report_status(ComponentStatus::Starting);
        handle
    }

    /// Unhealthy until at least one component has registered.
    pub fn get_status(&self) -> HealthStatus {
        let now = Instant::now();
        let components: BTreeMap<String, ComponentStatus> = lock(&self.components)
            .iter()
            .map(|(name, status)| (name.clone(), status.as_of(now)))
            .collect();
        let healthy =
            !components.is_empty() && components.values().all(ComponentStatus::is_healthy);

        if !healthy {
            warn!("{} check failed: {:?}", self.name, components);
        }
        HealthStatus {
            healthy,
            components,
        }
    }
}
