use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::cache::RedisCache;
use crate::store::PgOrderStore;

// ============================================================================
// Health Checks
// ============================================================================
//
// Each backing component reports its own status; the overall status is the
// worst of them. The store is required to answer lookups, so a store failure
// makes the service unhealthy. The cache is an optimization, so a cache
// failure only degrades it.
//
// ============================================================================

/// Health status of a component
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Degraded(String),
    Unhealthy(String),
}

impl HealthStatus {
    pub fn is_unhealthy(&self) -> bool {
        matches!(self, HealthStatus::Unhealthy(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded(_) => "degraded",
            HealthStatus::Unhealthy(_) => "unhealthy",
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            HealthStatus::Healthy => None,
            HealthStatus::Degraded(msg) | HealthStatus::Unhealthy(msg) => Some(msg),
        }
    }
}

/// Health information for a component
#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: &'static str,
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
}

impl ComponentHealth {
    pub fn new(name: &'static str, status: HealthStatus) -> Self {
        Self {
            name,
            status,
            last_check: Utc::now(),
        }
    }
}

#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn check(&self) -> ComponentHealth;
}

#[async_trait]
impl HealthProbe for PgOrderStore {
    async fn check(&self) -> ComponentHealth {
        let status = match self.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Unhealthy(e.to_string()),
        };
        ComponentHealth::new("postgres", status)
    }
}

#[async_trait]
impl HealthProbe for RedisCache {
    async fn check(&self) -> ComponentHealth {
        let status = match self.ping().await {
            Ok(()) => HealthStatus::Healthy,
            Err(e) => HealthStatus::Degraded(e.to_string()),
        };
        ComponentHealth::new("redis", status)
    }
}

// ============================================================================
// System Health
// ============================================================================

#[derive(Debug, Clone)]
pub struct SystemHealth {
    pub overall_status: HealthStatus,
    pub components: Vec<ComponentHealth>,
    pub check_time: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub service: String,
    pub version: String,
    pub checked_at: DateTime<Utc>,
    pub components: Vec<ComponentReport>,
}

#[derive(Debug, Serialize)]
pub struct ComponentReport {
    pub name: &'static str,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub last_check: DateTime<Utc>,
}

impl SystemHealth {
    pub async fn collect(probes: &[std::sync::Arc<dyn HealthProbe>]) -> Self {
        let components = futures_util::future::join_all(probes.iter().map(|p| p.check())).await;
        Self::from_components(components)
    }

    pub fn from_components(components: Vec<ComponentHealth>) -> Self {
        Self {
            overall_status: compute_overall_status(&components),
            components,
            check_time: Utc::now(),
        }
    }

    pub fn report(&self, service: &str, version: &str) -> HealthReport {
        HealthReport {
            status: self.overall_status.as_str(),
            service: service.to_string(),
            version: version.to_string(),
            checked_at: self.check_time,
            components: self
                .components
                .iter()
                .map(|c| ComponentReport {
                    name: c.name,
                    status: c.status.as_str(),
                    reason: c.status.reason().map(str::to_string),
                    last_check: c.last_check,
                })
                .collect(),
        }
    }
}

fn compute_overall_status(components: &[ComponentHealth]) -> HealthStatus {
    let mut degraded_components = Vec::new();
    let mut unhealthy_components = Vec::new();

    for health in components {
        match &health.status {
            HealthStatus::Unhealthy(msg) => {
                unhealthy_components.push(format!("{}: {}", health.name, msg));
            }
            HealthStatus::Degraded(msg) => {
                degraded_components.push(format!("{}: {}", health.name, msg));
            }
            HealthStatus::Healthy => {}
        }
    }

    if !unhealthy_components.is_empty() {
        HealthStatus::Unhealthy(unhealthy_components.join(", "))
    } else if !degraded_components.is_empty() {
        HealthStatus::Degraded(degraded_components.join(", "))
    } else {
        HealthStatus::Healthy
    }
}
