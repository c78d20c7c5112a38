use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tower_http::cors::CorsLayer;

use crate::api::{self, AppState};
use crate::config::AtelierConfig;
use crate::db::{AtelierDb, DbHandle};
use crate::sandbox::ProcessSandbox;
use crate::status::{StatusHub, spawn_sweeper};
use crate::storage::FsObjectStore;

/// Runtime options for the preview service: CLI flags layered over
/// `atelier.toml` by the command layer.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub storage_dir: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 4700,
            db_path: PathBuf::from(".atelier/atelier.db"),
            storage_dir: PathBuf::from(".atelier/artifacts"),
            dev_mode: false,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router().with_state(state)
}

/// Start the preview service.
pub async fn start_server(config: ServerConfig, app_config: AtelierConfig) -> Result<()> {
    if let Some(parent) = config.db_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create database directory")?;
    }
    std::fs::create_dir_all(&config.storage_dir)
        .context("Failed to create artifact directory")?;

    let db = AtelierDb::new(&config.db_path).context("Failed to initialize database")?;

    let status = Arc::new(StatusHub::new(
        app_config.status.capacity,
        Duration::from_secs(app_config.status.idle_ttl),
    ));
    spawn_sweeper(
        Arc::clone(&status),
        Duration::from_secs(app_config.status.sweep_interval),
    );

    let sandbox = ProcessSandbox::new(Duration::from_secs(app_config.sandbox.command_timeout));

    let state = Arc::new(AppState {
        db: DbHandle::new(db),
        store: Arc::new(FsObjectStore::new(&config.storage_dir)),
        sandbox: Arc::new(sandbox),
        status,
        config: Arc::new(app_config),
    });

    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    println!("Atelier preview service running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    println!("\nShutting down...");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::ScriptedProvider;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    fn test_router() -> Router {
        let db = AtelierDb::new_in_memory().unwrap();
        let storage_dir = std::env::temp_dir().join(format!("atelier-test-{}", uuid::Uuid::new_v4()));
        let state = Arc::new(AppState {
            db: DbHandle::new(db),
            store: Arc::new(FsObjectStore::new(storage_dir)),
            sandbox: Arc::new(ScriptedProvider::new()),
            status: Arc::new(StatusHub::new(50, Duration::from_secs(3600))),
            config: Arc::new(AtelierConfig::default()),
        });
        build_router(state)
    }

    #[tokio::test]
    async fn test_health_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .uri("/health")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = test_router();
        let req = Request::builder()
            .uri("/no/such/route")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_api_create_project_via_full_router() {
        let app = test_router();
        let req = Request::builder()
            .method("POST")
            .uri("/projects")
            .header("content-type", "application/json")
            .body(Body::from(
                serde_json::json!({"name": "router-test"}).to_string(),
            ))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }

    #[test]
    fn test_server_config_default() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 4700);
        assert_eq!(config.db_path, PathBuf::from(".atelier/atelier.db"));
        assert_eq!(config.storage_dir, PathBuf::from(".atelier/artifacts"));
        assert!(!config.dev_mode);
    }
}
