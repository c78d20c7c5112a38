//! Preview service commands: `atelier serve` and `atelier init-db`.

use anyhow::Result;
use std::path::PathBuf;

use atelier::config::AtelierConfig;
use atelier::server::ServerConfig;

/// Layer CLI flags over `atelier.toml` values and built-in defaults.
fn resolve(
    config: &AtelierConfig,
    port: Option<u16>,
    db_path: Option<PathBuf>,
    storage_dir: Option<PathBuf>,
    dev: bool,
) -> ServerConfig {
    let data_dir = PathBuf::from(&config.server.data_dir);
    ServerConfig {
        port: port.unwrap_or(config.server.port),
        db_path: db_path.unwrap_or_else(|| data_dir.join("atelier.db")),
        storage_dir: storage_dir.unwrap_or_else(|| data_dir.join("artifacts")),
        dev_mode: dev,
    }
}

pub async fn cmd_serve(
    port: Option<u16>,
    db_path: Option<PathBuf>,
    storage_dir: Option<PathBuf>,
    dev: bool,
) -> Result<()> {
    let config = AtelierConfig::load(std::path::Path::new("."))?;
    let server_config = resolve(&config, port, db_path, storage_dir, dev);
    atelier::server::start_server(server_config, config).await
}

pub fn cmd_init_db(db_path: Option<PathBuf>) -> Result<()> {
    let config = AtelierConfig::load(std::path::Path::new("."))?;
    let server_config = resolve(&config, None, db_path, None, false);

    if let Some(parent) = server_config.db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::create_dir_all(&server_config.storage_dir)?;
    atelier::db::AtelierDb::new(&server_config.db_path)?;
    println!(
        "Database initialized at {}",
        server_config.db_path.display()
    );
    Ok(())
}
