//! Health, readiness, and liveness endpoints.
//!
//! `/health` (and its alias `/api/v1/health`) aggregate discovery and
//! circuit breaker state across every configured service; `/ready` and
//! `/live` stay process-level, matching the Kubernetes probe contract.

use actix_web::{web, HttpResponse, Result};
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;

use crate::discovery::Discovery;
use crate::proxy::GatewayState;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum Status {
    Ok,
    Degraded,
    Down,
}

#[derive(Serialize)]
struct ServiceHealth {
    status: Status,
    instance_count: usize,
    configured_count: usize,
    last_check: String,
}

#[derive(Serialize)]
struct BreakerHealth {
    state: crate::breaker::CircuitState,
}

#[derive(Serialize)]
struct HealthReport {
    status: Status,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    services: HashMap<String, ServiceHealth>,
    circuit_breakers: HashMap<String, BreakerHealth>,
}

fn worse(a: Status, b: Status) -> Status {
    match (a, b) {
        (Status::Down, _) | (_, Status::Down) => Status::Down,
        (Status::Degraded, _) | (_, Status::Degraded) => Status::Degraded,
        _ => Status::Ok,
    }
}

/// Aggregated health across discovery and the breaker registry. This is the
/// handler registered for both `/health` and `/api/v1/health`.
pub async fn health_check(state: web::Data<GatewayState>) -> Result<HttpResponse> {
    let config = state.config.read().await.clone();
    let mut services = HashMap::new();
    let mut overall = Status::Ok;

    for (name, configured) in &config.services {
        let configured_count = configured.len();
        let last_check = chrono::Utc::now().to_rfc3339();
        let instance_count = state
            .discovery
            .get_instances(name)
            .await
            .map(|v| v.len())
            .unwrap_or(0);

        let status = if instance_count == 0 {
            Status::Down
        } else if instance_count < configured_count {
            Status::Degraded
        } else {
            Status::Ok
        };
        overall = worse(overall, status);

        services.insert(
            name.clone(),
            ServiceHealth {
                status,
                instance_count,
                configured_count,
                last_check,
            },
        );
    }

    let mut circuit_breakers = HashMap::new();
    {
        let guard = state.breakers.read().await;
        for (service, breaker) in guard.iter() {
            let breaker_state = breaker.state();
            if breaker_state != crate::breaker::CircuitState::Closed {
                overall = worse(overall, Status::Degraded);
            }
            circuit_breakers.insert(
                service.clone(),
                BreakerHealth {
                    state: breaker_state,
                },
            );
        }
    }

    let report = HealthReport {
        status: overall,
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        services,
        circuit_breakers,
    };

    let http_status = match overall {
        Status::Ok | Status::Degraded => actix_web::http::StatusCode::OK,
        Status::Down => actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
    };

    Ok(HttpResponse::build(http_status).json(report))
}

/// Kubernetes readiness probe: the process is up and its route table is
/// loaded. Does not depend on downstream reachability, matching the
/// process-level contract readiness probes expect.
pub async fn readiness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "ready",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Kubernetes liveness probe: the process can still respond to HTTP at all.
pub async fn liveness_check() -> Result<HttpResponse> {
    Ok(HttpResponse::Ok().json(json!({
        "status": "alive",
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

pub fn configure_health(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health_check))
        .route("/api/v1/health", web::get().to(health_check))
        .route("/ready", web::get().to(readiness_check))
        .route("/live", web::get().to(liveness_check));
}
