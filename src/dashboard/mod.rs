//! Dashboard: Axum web server for the read-only operator surface.
//!
//! Serves a REST API and a self-contained HTML page.
//! CORS enabled for local development.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    response::Html,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use routes::AppState;

/// The embedded dashboard HTML (compiled into the binary).
const DASHBOARD_HTML: &str = include_str!("templates/index.html");

/// Start the dashboard web server.
///
/// This spawns a background task and doesn't block. Bind or serve
/// failures are logged; the swarm keeps running without a dashboard.
pub fn spawn_dashboard(state: AppState, port: u16) {
    let app = build_router(state);

    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(l) => l,
            Err(e) => {
                error!(port, error = %e, "Failed to bind dashboard port");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        // API routes
        .route("/api/status", get(routes::get_status))
        .route("/api/positions", get(routes::get_positions))
        .route("/api/agents", get(routes::get_agents))
        .route("/api/trades", get(routes::get_trades))
        .route("/api/balance", get(routes::get_balance))
        .route("/api/terminations", get(routes::get_terminations))
        .route("/api/judgments", get(routes::get_judgments))
        .route("/api/help", get(routes::get_help))
        .route("/health", get(routes::health))
        // Dashboard HTML
        .route("/", get(serve_dashboard))
        .layer(cors)
        .with_state(state)
}

/// Serve the embedded HTML dashboard.
async fn serve_dashboard() -> Html<&'static str> {
    Html(DASHBOARD_HTML)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SwarmSnapshot;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use routes::DashboardState;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn test_state() -> AppState {
        Arc::new(DashboardState::new(SwarmSnapshot {
            name: "SWARM-001".into(),
            tokens: vec!["ETH".into()],
            max_agents_per_token: 3,
            ..SwarmSnapshot::default()
        }))
    }

    async fn get_json(uri: &str) -> serde_json::Value {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = axum::body::to_bytes(resp.into_body(), 10_000).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let json = get_json("/api/status").await;
        assert_eq!(json["name"], "SWARM-001");
        assert_eq!(json["active_agents"], 0);
        assert_eq!(json["agents_per_token"]["ETH"], 0);
    }

    #[tokio::test]
    async fn test_list_endpoints_empty() {
        for uri in [
            "/api/positions",
            "/api/agents",
            "/api/trades",
            "/api/terminations",
            "/api/judgments",
        ] {
            let json = get_json(uri).await;
            assert_eq!(json.as_array().map(Vec::len), Some(0), "{uri}");
        }
    }

    #[tokio::test]
    async fn test_balance_endpoint() {
        let json = get_json("/api/balance").await;
        assert!(json["wallet_native"].is_null());
    }

    #[tokio::test]
    async fn test_help_endpoint() {
        let json = get_json("/api/help").await;
        assert!(json.as_array().unwrap().len() >= 6);
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/api/kill").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_dashboard_html() {
        let app = build_router(test_state());
        let resp = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let body = axum::body::to_bytes(resp.into_body(), 100_000).await.unwrap();
        let html = String::from_utf8(body.to_vec()).unwrap();
        assert!(html.contains("SWARM"));
        assert!(html.contains("Dashboard"));
    }
}
