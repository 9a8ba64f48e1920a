//! Authenticated status API.
//!
//! `GET /admin/status` and `GET /admin/channel`, both behind a bearer token.

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::{middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::trace::TraceLayer;

use self::auth::admin_auth_middleware;
use self::handlers::{get_channel, get_status};
use crate::http::server::BridgeState;

#[derive(Clone)]
pub struct AdminState {
    pub bridge: Arc<BridgeState>,
    pub api_key: Arc<str>,
}

pub fn setup_admin_router(bridge: Arc<BridgeState>, api_key: &str) -> Router {
    let state = AdminState {
        bridge,
        api_key: Arc::from(api_key),
    };
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/channel", get(get_channel))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve the admin API on an already-bound listener until shutdown.
pub async fn serve_admin(
    listener: TcpListener,
    router: Router,
    mut shutdown: broadcast::Receiver<()>,
) -> std::io::Result<()> {
    if let Ok(addr) = listener.local_addr() {
        tracing::info!(address = %addr, "Admin API listening");
    }
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::shm::SharedChannel;
    use crate::channel::signal::LocalNotifier;
    use crate::config::BridgeConfig;
    use crate::http::server::BridgeServer;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn router() -> Router {
        let channel = Arc::new(SharedChannel::anonymous().unwrap());
        let server = BridgeServer::new(
            &BridgeConfig::default(),
            channel,
            Arc::new(LocalNotifier::new()),
            None,
        );
        setup_admin_router(server.state(), "secret")
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let response = router()
            .oneshot(Request::get("/admin/status").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn channel_status_reports_rings() {
        let response = router()
            .oneshot(
                Request::get("/admin/channel")
                    .header("Authorization", "Bearer secret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["overflow"], "reject");
        assert_eq!(json["requests"]["capacity"], 16);
        assert_eq!(json["responses"]["depth"], 0);
        assert_eq!(json["in_flight"], 0);
    }
}
