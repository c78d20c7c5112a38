use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Listener and data layout settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub port: u16,
    /// Directory holding the database and stored artifacts.
    pub data_dir: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            port: 4700,
            data_dir: ".atelier".to_string(),
        }
    }
}

/// Sandbox provisioning and command execution settings.
#[derive(Debug, Clone)]
pub struct SandboxSettings {
    /// Base image requested from the provider. `None` uses the provider's
    /// default environment.
    pub image: Option<String>,
    /// Per-command timeout in seconds. Exceeding it is an infrastructure
    /// failure, not a build failure.
    pub command_timeout: u64,
}

impl Default for SandboxSettings {
    fn default() -> Self {
        Self {
            image: None,
            command_timeout: 600,
        }
    }
}

/// Build pipeline commands and layout.
#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub install_command: String,
    pub typecheck_command: String,
    pub compile_command: String,
    /// Output directory produced by the compile step, relative to the
    /// project root.
    pub dist_dir: String,
    /// The document that must exist in the dist dir for the build to count
    /// as publishable.
    pub entry_document: String,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            install_command: "npm install --no-audit --no-fund".to_string(),
            typecheck_command: "npx tsc --noEmit".to_string(),
            compile_command: "npm run build".to_string(),
            dist_dir: "dist".to_string(),
            entry_document: "index.html".to_string(),
        }
    }
}

/// Preview serving settings.
#[derive(Debug, Clone, Default)]
pub struct PreviewSettings {
    /// External base URL prepended to returned preview links (e.g. behind a
    /// reverse proxy). Links are host-relative when unset.
    pub public_base: Option<String>,
}

/// Status channel retention settings.
#[derive(Debug, Clone)]
pub struct StatusSettings {
    /// Maximum retained entries per request id; older entries are dropped.
    pub capacity: usize,
    /// Idle time after which a request's log is evicted, in seconds.
    pub idle_ttl: u64,
    /// Sweep period for the background eviction task, in seconds.
    pub sweep_interval: u64,
}

impl Default for StatusSettings {
    fn default() -> Self {
        Self {
            capacity: 50,
            idle_ttl: 3600,
            sweep_interval: 60,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone, Default)]
pub struct AtelierConfig {
    pub server: ServerSettings,
    pub sandbox: SandboxSettings,
    pub build: BuildSettings,
    pub preview: PreviewSettings,
    pub status: StatusSettings,
}

/// Raw TOML structure for `atelier.toml`
#[derive(Debug, Deserialize)]
struct AtelierToml {
    server: Option<ServerSection>,
    sandbox: Option<SandboxSection>,
    build: Option<BuildSection>,
    preview: Option<PreviewSection>,
    status: Option<StatusSection>,
}

#[derive(Debug, Deserialize)]
struct ServerSection {
    port: Option<u16>,
    data_dir: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SandboxSection {
    image: Option<String>,
    command_timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct BuildSection {
    install_command: Option<String>,
    typecheck_command: Option<String>,
    compile_command: Option<String>,
    dist_dir: Option<String>,
    entry_document: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PreviewSection {
    public_base: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StatusSection {
    capacity: Option<usize>,
    idle_ttl: Option<u64>,
    sweep_interval: Option<u64>,
}

impl AtelierConfig {
    /// Load config from `atelier.toml` in the given directory.
    /// Returns defaults if the file doesn't exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join("atelier.toml");
        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read {}", config_path.display()))?;

        let toml: AtelierToml = toml::from_str(&content)
            .with_context(|| format!("Failed to parse {}", config_path.display()))?;

        let mut config = Self::default();
        if let Some(section) = toml.server {
            if let Some(port) = section.port {
                config.server.port = port;
            }
            if let Some(dir) = section.data_dir {
                config.server.data_dir = dir;
            }
        }
        if let Some(section) = toml.sandbox {
            if let Some(image) = section.image {
                config.sandbox.image = Some(image);
            }
            if let Some(timeout) = section.command_timeout {
                config.sandbox.command_timeout = timeout;
            }
        }
        if let Some(section) = toml.build {
            if let Some(cmd) = section.install_command {
                config.build.install_command = cmd;
            }
            if let Some(cmd) = section.typecheck_command {
                config.build.typecheck_command = cmd;
            }
            if let Some(cmd) = section.compile_command {
                config.build.compile_command = cmd;
            }
            if let Some(dir) = section.dist_dir {
                config.build.dist_dir = dir;
            }
            if let Some(doc) = section.entry_document {
                config.build.entry_document = doc;
            }
        }
        if let Some(section) = toml.preview {
            if let Some(base) = section.public_base {
                config.preview.public_base = Some(base);
            }
        }
        if let Some(section) = toml.status {
            if let Some(capacity) = section.capacity {
                config.status.capacity = capacity;
            }
            if let Some(ttl) = section.idle_ttl {
                config.status.idle_ttl = ttl;
            }
            if let Some(interval) = section.sweep_interval {
                config.status.sweep_interval = interval;
            }
        }

        Ok(config)
    }
}
