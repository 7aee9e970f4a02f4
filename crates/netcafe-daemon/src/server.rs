//! Web server setup and routing

use anyhow::Result;
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api;
use crate::state::AppState;
use crate::ws;

/// Build the HTTP router
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // API routes
        .route("/api/devices", get(api::list_devices))
        .route("/api/devices/{ip}", get(api::get_device))
        .route("/api/rooms", get(api::list_rooms))
        .route("/api/status", get(api::get_status))
        .route("/api/scan", post(api::trigger_scan))
        .route("/api/reload", post(api::reload_config))
        // WebSocket for real-time updates
        .route("/ws", get(ws::websocket_handler))
        // CORS
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}

/// Run the web server and the presence scheduler until Ctrl-C
pub async fn run(state: Arc<AppState>, bind: &str) -> Result<()> {
    let app = router(state.clone());

    // Start presence polling in background
    let scanner = state.scanner.clone();
    let poller = tokio::spawn(async move {
        scanner.run(shutdown_signal()).await;
    });

    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(address = %bind, protocol = "HTTP", "Starting web server");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poller.await?;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use netcafe_discovery::{
        NeighborSource, NeighborStrategy, PresenceScanner, ReachabilityProbe,
    };
    use std::collections::HashSet;
    use std::net::Ipv4Addr;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct StaticProbe(HashSet<Ipv4Addr>);

    #[async_trait]
    impl ReachabilityProbe for StaticProbe {
        async fn probe(
            &self,
            hosts: &[Ipv4Addr],
        ) -> netcafe_discovery::Result<HashSet<Ipv4Addr>> {
            Ok(hosts.iter().filter(|h| self.0.contains(h)).copied().collect())
        }
    }

    struct EmptyTable;

    #[async_trait]
    impl NeighborSource for EmptyTable {
        fn strategy(&self) -> NeighborStrategy {
            NeighborStrategy::KernelTable
        }

        async fn reachable(&self) -> netcafe_discovery::Result<Vec<Ipv4Addr>> {
            Ok(Vec::new())
        }
    }

    const CONFIG: &str = r#"
[[room]]
name = "Room 38"
computers = ["192.168.1.38", "192.168.1.39"]

[[room]]
name = "Room 40"
computers = ["192.168.1.40"]
"#;

    async fn test_state(dir: &TempDir) -> Arc<AppState> {
        let path = dir.path().join("netcafe.toml");
        std::fs::write(&path, CONFIG).unwrap();
        let config: Config = toml::from_str(CONFIG).unwrap();

        let probe = StaticProbe([Ipv4Addr::new(192, 168, 1, 38)].into_iter().collect());
        let neighbors: Option<Arc<dyn NeighborSource>> = Some(Arc::new(EmptyTable));
        let scanner = PresenceScanner::with_sources(
            config.to_scanner_config(),
            config.to_device_configs(),
            Arc::new(probe),
            neighbors,
        );
        AppState::with_scanner(config, path, scanner).await
    }

    async fn call(app: Router, method: &str, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn test_devices_start_offline() {
        let dir = TempDir::new().unwrap();
        let app = router(test_state(&dir).await);

        let (status, body) = call(app, "GET", "/api/devices").await;
        assert_eq!(status, StatusCode::OK);
        let devices = body.as_array().unwrap();
        assert_eq!(devices.len(), 3);
        assert!(devices.iter().all(|d| d["online"] == false));
    }

    #[tokio::test]
    async fn test_scan_then_rooms() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let (status, body) = call(router(state.clone()), "POST", "/api/scan").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reachable"], 1);
        assert_eq!(body["transitions"].as_array().unwrap().len(), 1);

        let (_, device) = call(router(state.clone()), "GET", "/api/devices/192.168.1.38").await;
        assert_eq!(device["online"], true);
        assert_eq!(device["label"], "Room 38 - 192.168.1.38");

        let (_, rooms) = call(router(state.clone()), "GET", "/api/rooms").await;
        assert_eq!(rooms[0]["occupied"], true);
        assert_eq!(rooms[0]["online"], 1);
        assert_eq!(rooms[1]["occupied"], false);

        let (_, status) = call(router(state), "GET", "/api/status").await;
        assert_eq!(status["strategy"], "kernel_table");
        assert_eq!(status["degraded"], false);
        assert_eq!(status["online"], 1);
        assert_eq!(status["last_cycle"]["total"], 3);
    }

    #[tokio::test]
    async fn test_device_lookup_errors() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;

        let (status, _) = call(router(state.clone()), "GET", "/api/devices/not-an-ip").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(router(state), "GET", "/api/devices/10.9.9.9").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_reload_swaps_devices() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        std::fs::write(
            &state.config_path,
            "[[room]]\nname = \"Room 38\"\ncomputers = [\"192.168.1.38\", \"192.168.1.41\"]\n",
        )
        .unwrap();

        let (status, body) = call(router(state.clone()), "POST", "/api/reload").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["added"], serde_json::json!(["192.168.1.41"]));
        assert_eq!(
            body["removed"],
            serde_json::json!(["192.168.1.39", "192.168.1.40"])
        );

        let (_, rooms) = call(router(state), "GET", "/api/rooms").await;
        assert_eq!(rooms.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_reload_rejects_bad_config() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        std::fs::write(&state.config_path, "[[room]]\nname = 3\n").unwrap();

        let (status, body) = call(router(state.clone()), "POST", "/api/reload").await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().starts_with("Reload failed"));
        assert_eq!(state.devices().await.len(), 3);
    }

    #[tokio::test]
    async fn test_scan_publishes_occupancy() {
        let dir = TempDir::new().unwrap();
        let state = test_state(&dir).await;
        let mut events = state.subscribe();

        let (status, _) = call(router(state.clone()), "POST", "/api/scan").await;
        assert_eq!(status, StatusCode::OK);

        let mut changes = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let crate::state::AppEvent::Occupancy(change) = event {
                changes.push(change);
            }
        }
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].room, "Room 38");
        assert!(changes[0].occupied);
        assert_eq!(changes[0].online, 1);
    }
}
