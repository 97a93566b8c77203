use std::sync::Arc;

use async_trait::async_trait;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;

use bridgesync_connectors::{Authenticator, SessionCache};
use bridgesync_core::SystemType;
use bridgesync_db::{ping, DbPool};

/// A remote system whose session can be checked end to end.
#[async_trait]
pub trait UpstreamProbe: Send + Sync {
    fn system(&self) -> SystemType;
    async fn validate(&self) -> bool;
}

#[async_trait]
impl<A: Authenticator> UpstreamProbe for SessionCache<A> {
    fn system(&self) -> SystemType {
        SessionCache::system(self)
    }

    async fn validate(&self) -> bool {
        SessionCache::validate(self).await
    }
}

#[derive(Clone)]
pub struct HealthState {
    db_pool: DbPool,
    upstreams: Vec<Arc<dyn UpstreamProbe>>,
}

impl HealthState {
    pub fn new(db_pool: DbPool, upstreams: Vec<Arc<dyn UpstreamProbe>>) -> Self {
        Self { db_pool, upstreams }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: HealthCheck,
    pub database: HealthCheck,
    pub checked_at: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpstreamCheck {
    pub system: SystemType,
    pub status: &'static str,
    pub detail: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct UpstreamsResponse {
    pub status: &'static str,
    pub upstreams: Vec<UpstreamCheck>,
    pub checked_at: String,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/upstreams", get(upstreams))
        .with_state(state)
}

pub async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let database = database_check(&state.db_pool).await;
    let ready = database.status == "ready";

    let payload = HealthResponse {
        status: if ready { "ready" } else { "degraded" },
        service: HealthCheck {
            status: "ready",
            detail: "bridgesync-server runtime initialized".to_string(),
        },
        database,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

/// Logs in (or reuses the cached session) and probes every upstream concurrently.
pub async fn upstreams(State(state): State<HealthState>) -> (StatusCode, Json<UpstreamsResponse>) {
    let checks = join_all(state.upstreams.iter().map(|upstream| async move {
        let system = upstream.system();
        if upstream.validate().await {
            UpstreamCheck { system, status: "ready", detail: "session validated".to_string() }
        } else {
            UpstreamCheck {
                system,
                status: "degraded",
                detail: "login or session probe failed".to_string(),
            }
        }
    }))
    .await;

    let ready = checks.iter().all(|check| check.status == "ready");
    let payload = UpstreamsResponse {
        status: if ready { "ready" } else { "degraded" },
        upstreams: checks,
        checked_at: Utc::now().to_rfc3339(),
    };

    let status_code = if ready { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(payload))
}

async fn database_check(pool: &DbPool) -> HealthCheck {
    match ping(pool).await {
        Ok(()) => HealthCheck { status: "ready", detail: "database query succeeded".to_string() },
        Err(error) => {
            HealthCheck { status: "degraded", detail: format!("database query failed: {error}") }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        extract::State,
        http::{Request, StatusCode},
        Json,
    };
    use bridgesync_core::SystemType;
    use bridgesync_db::connect_with_settings;
    use tower::ServiceExt;

    use crate::health::{health, router, upstreams, HealthState, UpstreamProbe};

    struct FixedProbe {
        system: SystemType,
        healthy: bool,
    }

    #[async_trait]
    impl UpstreamProbe for FixedProbe {
        fn system(&self) -> SystemType {
            self.system
        }

        async fn validate(&self) -> bool {
            self.healthy
        }
    }

    async fn memory_pool() -> bridgesync_db::DbPool {
        connect_with_settings("sqlite::memory:", 1, 5).await.expect("pool should connect")
    }

    fn probes(crm: bool, finance: bool) -> Vec<Arc<dyn UpstreamProbe>> {
        vec![
            Arc::new(FixedProbe { system: SystemType::Crm, healthy: crm }),
            Arc::new(FixedProbe { system: SystemType::Finance, healthy: finance }),
        ]
    }

    #[tokio::test]
    async fn health_returns_ready_when_database_is_reachable() {
        let pool = memory_pool().await;

        let (status, Json(payload)) =
            health(State(HealthState::new(pool.clone(), probes(true, true)))).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(payload.status, "ready");
        assert_eq!(payload.database.status, "ready");
        assert_eq!(payload.service.status, "ready");

        pool.close().await;
    }

    #[tokio::test]
    async fn health_returns_service_unavailable_when_database_is_unavailable() {
        let pool = memory_pool().await;
        pool.close().await;

        let (status, Json(payload)) = health(State(HealthState::new(pool, Vec::new()))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.database.status, "degraded");
        assert_eq!(payload.service.status, "ready");
    }

    #[tokio::test]
    async fn upstreams_degrade_when_any_session_fails() {
        let pool = memory_pool().await;

        let (status, Json(payload)) =
            upstreams(State(HealthState::new(pool.clone(), probes(true, false)))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(payload.status, "degraded");
        assert_eq!(payload.upstreams.len(), 2);
        assert_eq!(payload.upstreams[0].system, SystemType::Crm);
        assert_eq!(payload.upstreams[0].status, "ready");
        assert_eq!(payload.upstreams[1].status, "degraded");

        pool.close().await;
    }

    #[tokio::test]
    async fn upstreams_route_is_served() {
        let pool = memory_pool().await;
        let app = router(HealthState::new(pool.clone(), probes(true, true)));

        let response = app
            .oneshot(Request::builder().uri("/health/upstreams").body(Body::empty()).expect("req"))
            .await
            .expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let payload: serde_json::Value = serde_json::from_slice(&body).expect("json");
        assert_eq!(payload["upstreams"][1]["system"], "finance");

        pool.close().await;
    }
}
