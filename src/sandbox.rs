//! Ephemeral execution environments for builds.
//!
//! The pipeline only ever talks to two traits: `SandboxProvider` hands out
//! sessions, `SandboxSession` is one live environment with file and command
//! access. Providers are black boxes: the built-in `ProcessSandbox` runs
//! sessions in scratch directories on the host, and a remote or
//! containerized fleet plugs into the same seam.
//!
//! Sessions are always used through `with_session`, which guarantees the
//! session is closed exactly once no matter how the scoped work exits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::errors::{PipelineError, SandboxError};
use crate::util::is_safe_rel_path;

/// Result of one command run inside a session.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout and stderr joined for diagnostics.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&self.stderr);
        }
        out
    }
}

/// One live execution environment. All paths are relative to the session's
/// project root.
#[async_trait]
pub trait SandboxSession: Send + Sync {
    fn id(&self) -> &str;

    /// Write a file, creating parent directories and overwriting as needed.
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError>;

    /// Run a shell command in the project root.
    async fn run(&self, command: &str) -> Result<CommandOutput, SandboxError>;

    /// Recursively list files under a directory, as relative paths. A
    /// missing directory lists as empty; the build classifier treats both
    /// as "no output".
    async fn list_files(&self, dir: &str) -> Result<Vec<String>, SandboxError>;

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError>;

    /// Release the environment. Idempotent: closing twice is a no-op.
    async fn close(&self) -> Result<(), SandboxError>;
}

/// Provisions fresh sessions.
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    async fn open(&self, image: Option<&str>) -> Result<Box<dyn SandboxSession>, SandboxError>;
}

/// Open a session, run `f` against it, and always close the session before
/// returning.
///
/// Close runs on success, failure, and early `?` return alike. A close
/// failure is logged and never replaces `f`'s result; releasing the
/// environment is best-effort once the work has an outcome.
pub async fn with_session<T>(
    provider: &dyn SandboxProvider,
    image: Option<&str>,
    f: impl for<'a> FnOnce(&'a dyn SandboxSession) -> BoxFuture<'a, Result<T, PipelineError>>,
) -> Result<T, PipelineError> {
    let session = provider.open(image).await?;
    let result = f(session.as_ref()).await;
    if let Err(e) = session.close().await {
        warn!(session = %session.id(), error = %e, "Failed to close sandbox session");
    }
    result
}

// ── Process-backed provider ───────────────────────────────────────────

/// Provider that runs each session in a scratch directory on the host,
/// executing commands through the local shell. This is the development
/// provider; it ignores image requests since there is no image to pull.
pub struct ProcessSandbox {
    command_timeout: Duration,
}

impl ProcessSandbox {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }
}

#[async_trait]
impl SandboxProvider for ProcessSandbox {
    async fn open(&self, image: Option<&str>) -> Result<Box<dyn SandboxSession>, SandboxError> {
        if let Some(image) = image {
            debug!(image, "Process sandbox has no image support; using host environment");
        }
        let workdir = tempfile::Builder::new()
            .prefix("atelier-sandbox-")
            .tempdir()
            .map_err(|e| SandboxError::Provision(e.into()))?;
        Ok(Box::new(ProcessSession {
            id: format!("proc-{}", Uuid::new_v4()),
            workdir: Mutex::new(Some(workdir)),
            command_timeout: self.command_timeout,
        }))
    }
}

struct ProcessSession {
    id: String,
    /// Some while open; taken on close so the scratch dir is removed once.
    workdir: Mutex<Option<tempfile::TempDir>>,
    command_timeout: Duration,
}

impl ProcessSession {
    fn root(&self) -> Result<PathBuf, SandboxError> {
        let guard = self.workdir.lock().map_err(|_| SandboxError::Closed)?;
        guard
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .ok_or(SandboxError::Closed)
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SandboxError> {
        if !is_safe_rel_path(path) {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }
        Ok(self.root()?.join(path))
    }
}

#[async_trait]
impl SandboxSession for ProcessSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| SandboxError::WriteFailed {
                    path: path.to_string(),
                    source,
                })?;
        }
        tokio::fs::write(&full, content)
            .await
            .map_err(|source| SandboxError::WriteFailed {
                path: path.to_string(),
                source,
            })
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        let root = self.root()?;
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| SandboxError::SpawnFailed {
                command: command.to_string(),
                source,
            })?;

        let output = match tokio::time::timeout(self.command_timeout, child.wait_with_output()).await
        {
            Ok(result) => result.map_err(|source| SandboxError::SpawnFailed {
                command: command.to_string(),
                source,
            })?,
            Err(_) => {
                return Err(SandboxError::Timeout {
                    command: command.to_string(),
                    seconds: self.command_timeout.as_secs(),
                });
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>, SandboxError> {
        let base = self.resolve(dir)?;
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in walkdir::WalkDir::new(&base).sort_by_file_name() {
            let entry = entry.map_err(|e| SandboxError::ReadFailed {
                path: dir.to_string(),
                source: std::io::Error::other(e),
            })?;
            if entry.file_type().is_file() {
                let rel = entry
                    .path()
                    .strip_prefix(&base)
                    .map_err(|e| SandboxError::ReadFailed {
                        path: dir.to_string(),
                        source: std::io::Error::other(e),
                    })?;
                files.push(rel.to_string_lossy().replace('\\', "/"));
            }
        }
        Ok(files)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full)
            .await
            .map_err(|source| SandboxError::ReadFailed {
                path: path.to_string(),
                source,
            })
    }

    async fn close(&self) -> Result<(), SandboxError> {
        let taken = {
            let mut guard = self.workdir.lock().map_err(|_| SandboxError::Closed)?;
            guard.take()
        };
        if let Some(dir) = taken {
            dir.close().map_err(|e| SandboxError::Other(e.into()))?;
        }
        Ok(())
    }
}

// ── Scripted provider ─────────────────────────────────────────────────

/// Canned provider for tests and offline runs: commands are matched against
/// registered substring patterns and return scripted results, optionally
/// materializing files into the session's in-memory filesystem (to mimic a
/// compile step producing its dist tree). Unmatched commands succeed with
/// empty output.
#[derive(Default)]
pub struct ScriptedProvider {
    specs: Vec<CommandSpec>,
    fail_open: bool,
    opens: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

struct CommandSpec {
    pattern: String,
    output: CommandOutput,
    creates: Vec<(String, Vec<u8>)>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the result of any command containing `pattern`.
    pub fn on(self, pattern: &str, exit_code: i32, output: &str) -> Self {
        self.on_with_files(pattern, exit_code, output, &[])
    }

    /// Script a command result that also writes files into the session.
    pub fn on_with_files(
        mut self,
        pattern: &str,
        exit_code: i32,
        output: &str,
        files: &[(&str, &str)],
    ) -> Self {
        self.specs.push(CommandSpec {
            pattern: pattern.to_string(),
            output: CommandOutput {
                exit_code,
                stdout: output.to_string(),
                stderr: String::new(),
            },
            creates: files
                .iter()
                .map(|(p, c)| (p.to_string(), c.as_bytes().to_vec()))
                .collect(),
        });
        self
    }

    /// Make `open` fail, for exercising infrastructure error paths.
    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SandboxProvider for ScriptedProvider {
    async fn open(&self, _image: Option<&str>) -> Result<Box<dyn SandboxSession>, SandboxError> {
        if self.fail_open {
            return Err(SandboxError::Provision(anyhow::anyhow!(
                "scripted provider is configured to fail"
            )));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        let specs = self
            .specs
            .iter()
            .map(|s| CommandSpec {
                pattern: s.pattern.clone(),
                output: s.output.clone(),
                creates: s.creates.clone(),
            })
            .collect();
        Ok(Box::new(ScriptedSession {
            id: format!("scripted-{}", Uuid::new_v4()),
            specs,
            files: Mutex::new(HashMap::new()),
            closed: Mutex::new(false),
            closes: self.closes.clone(),
        }))
    }
}

struct ScriptedSession {
    id: String,
    specs: Vec<CommandSpec>,
    files: Mutex<HashMap<String, Vec<u8>>>,
    closed: Mutex<bool>,
    closes: Arc<AtomicUsize>,
}

impl ScriptedSession {
    fn ensure_open(&self) -> Result<(), SandboxError> {
        let closed = self.closed.lock().map_err(|_| SandboxError::Closed)?;
        if *closed {
            return Err(SandboxError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxSession for ScriptedSession {
    fn id(&self) -> &str {
        &self.id
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SandboxError> {
        self.ensure_open()?;
        if !is_safe_rel_path(path) {
            return Err(SandboxError::InvalidPath(path.to_string()));
        }
        let mut files = self.files.lock().map_err(|_| SandboxError::Closed)?;
        files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, SandboxError> {
        self.ensure_open()?;
        for spec in &self.specs {
            if command.contains(&spec.pattern) {
                if spec.output.success() {
                    let mut files = self.files.lock().map_err(|_| SandboxError::Closed)?;
                    for (path, content) in &spec.creates {
                        files.insert(path.clone(), content.clone());
                    }
                }
                return Ok(spec.output.clone());
            }
        }
        Ok(CommandOutput {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn list_files(&self, dir: &str) -> Result<Vec<String>, SandboxError> {
        self.ensure_open()?;
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        let files = self.files.lock().map_err(|_| SandboxError::Closed)?;
        let mut listed: Vec<String> = files
            .keys()
            .filter_map(|path| path.strip_prefix(&prefix).map(|rel| rel.to_string()))
            .collect();
        listed.sort();
        Ok(listed)
    }

    async fn read_file(&self, path: &str) -> Result<Vec<u8>, SandboxError> {
        self.ensure_open()?;
        let files = self.files.lock().map_err(|_| SandboxError::Closed)?;
        files
            .get(path)
            .cloned()
            .ok_or_else(|| SandboxError::ReadFailed {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
    }

    async fn close(&self) -> Result<(), SandboxError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        let mut closed = self.closed.lock().map_err(|_| SandboxError::Closed)?;
        *closed = true;
        Ok(())
    }
}
