//! Typed error hierarchy for the Atelier pipeline.
//!
//! Four enums cover the subsystems:
//! - `SandboxError`: sandbox provisioning and command execution
//! - `StoreError`: artifact object storage
//! - `BuildFailure`: build outcomes caused by the generated code itself
//! - `PipelineError`: the top-level split the HTTP layer maps to responses

use thiserror::Error;

/// Errors from the sandbox provider and session operations.
///
/// All of these are infrastructure-class: they describe the execution
/// environment failing, not the generated code failing.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Failed to provision sandbox: {0}")]
    Provision(#[source] anyhow::Error),

    #[error("Failed to write {path} into sandbox: {source}")]
    WriteFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path} from sandbox: {source}")]
    ReadFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to spawn command `{command}`: {source}")]
    SpawnFailed {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Command `{command}` exceeded the {seconds}s timeout")]
    Timeout { command: String, seconds: u64 },

    #[error("Path '{0}' escapes the sandbox root")]
    InvalidPath(String),

    #[error("Sandbox session is already closed")]
    Closed,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the artifact object store.
///
/// A missing object is NOT an error: `ObjectStore::get` returns `Ok(None)`
/// for unknown keys so callers can branch on absence without guessing
/// whether a fault occurred.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("Failed to write object {key}: {source}")]
    WriteFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read object {key}: {source}")]
    ReadFailed {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// Build outcomes attributable to the generated code.
///
/// These are recoverable in the product sense: the diagnostics ride up to
/// the caller, which may feed them back into a repair flow.
#[derive(Debug, Error)]
pub enum BuildFailure {
    #[error("Dependency install failed")]
    Install { log: String },

    #[error("Type check failed")]
    Typecheck { diagnostics: String },

    #[error("Compilation failed")]
    Compile { log: String },

    #[error("Build produced no entry document")]
    NoEntryDocument,
}

impl BuildFailure {
    /// Stable machine-readable kind for wire responses.
    pub fn kind(&self) -> &'static str {
        match self {
            BuildFailure::Install { .. } => "install_failed",
            BuildFailure::Typecheck { .. } => "typecheck_failed",
            BuildFailure::Compile { .. } => "compile_failed",
            BuildFailure::NoEntryDocument => "no_entry_document",
        }
    }

    /// Captured tool output, when the failure carries any.
    pub fn diagnostics(&self) -> Option<&str> {
        match self {
            BuildFailure::Install { log } | BuildFailure::Compile { log } => Some(log),
            BuildFailure::Typecheck { diagnostics } => Some(diagnostics),
            BuildFailure::NoEntryDocument => None,
        }
    }
}

/// Top-level pipeline error the HTTP layer maps onto status codes.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Environment faults: sandbox provisioning, storage, database. Fatal
    /// for the invocation; the sandbox is still released by the scope.
    #[error("Infrastructure failure: {0}")]
    Infra(#[source] anyhow::Error),

    /// The generated code failed to build. Carries diagnostics upward.
    #[error(transparent)]
    Build(#[from] BuildFailure),

    /// A referenced entity (project, build, asset) does not exist.
    #[error("{0} not found")]
    NotFound(String),
}

impl From<SandboxError> for PipelineError {
    fn from(err: SandboxError) -> Self {
        PipelineError::Infra(err.into())
    }
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        PipelineError::Infra(err.into())
    }
}
