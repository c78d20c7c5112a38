//! The deterministic build sequence: install → typecheck → compile →
//! collect, with the outcome classified for the caller.
//!
//! Classification policy: exit codes are authoritative. The only exception
//! is `ZERO_EXIT_FAILURE_MARKERS`, an explicit per-step allowlist for tools
//! known to report failure in text while exiting zero. A failing typecheck
//! does not abort the build: compilation is still attempted, and when it
//! succeeds the diagnostics ride along as a partial-success flag.

use tracing::warn;

use crate::config::BuildSettings;
use crate::errors::{BuildFailure, PipelineError};
use crate::models::ArtifactFile;
use crate::sandbox::{CommandOutput, SandboxSession};
use crate::status::StatusHub;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BuildStep {
    Install,
    Typecheck,
    Compile,
}

/// Commands known to report failure in their output while exiting zero.
/// Only the steps listed here get a secondary text scan; a marker hit is
/// treated exactly like a failing exit code.
const ZERO_EXIT_FAILURE_MARKERS: &[(BuildStep, &[&str])] = &[(
    // `npm run build` wraps vite; when a rollup plugin reports the error
    // itself, vite prints it while the npm wrapper can still exit 0.
    BuildStep::Compile,
    &["error during build", "Rollup failed"],
)];

fn step_failed(step: BuildStep, output: &CommandOutput) -> bool {
    if !output.success() {
        return true;
    }
    for (marked_step, markers) in ZERO_EXIT_FAILURE_MARKERS {
        if *marked_step == step {
            let combined = output.combined();
            if markers.iter().any(|marker| combined.contains(marker)) {
                return true;
            }
        }
    }
    false
}

/// Classified result of a build run.
#[derive(Debug)]
pub enum BuildOutcome {
    /// The artifact is publishable. `typecheck_diagnostics` is `Some` when
    /// the typecheck failed but compilation succeeded anyway.
    Success {
        files: Vec<ArtifactFile>,
        typecheck_diagnostics: Option<String>,
    },
    InstallFailed {
        log: String,
    },
    TypecheckFailed {
        diagnostics: String,
    },
    CompileFailed {
        log: String,
    },
    NoEntryDocument,
}

impl BuildOutcome {
    /// Split into publishable files or the matching `BuildFailure`.
    pub fn into_result(self) -> Result<(Vec<ArtifactFile>, Option<String>), BuildFailure> {
        match self {
            BuildOutcome::Success {
                files,
                typecheck_diagnostics,
            } => Ok((files, typecheck_diagnostics)),
            BuildOutcome::InstallFailed { log } => Err(BuildFailure::Install { log }),
            BuildOutcome::TypecheckFailed { diagnostics } => {
                Err(BuildFailure::Typecheck { diagnostics })
            }
            BuildOutcome::CompileFailed { log } => Err(BuildFailure::Compile { log }),
            BuildOutcome::NoEntryDocument => Err(BuildFailure::NoEntryDocument),
        }
    }
}

pub struct BuildRunner {
    settings: BuildSettings,
}

impl BuildRunner {
    pub fn new(settings: BuildSettings) -> Self {
        Self { settings }
    }

    /// Run the full build inside the session, publishing step progress
    /// under `request_id`.
    pub async fn run(
        &self,
        session: &dyn SandboxSession,
        status: &StatusHub,
        request_id: &str,
    ) -> Result<BuildOutcome, PipelineError> {
        status.publish(request_id, "install", "Installing dependencies", Some(25));
        let install = session.run(&self.settings.install_command).await?;
        if step_failed(BuildStep::Install, &install) {
            return Ok(BuildOutcome::InstallFailed {
                log: install.combined(),
            });
        }

        status.publish(request_id, "typecheck", "Type checking", Some(45));
        let typecheck = session.run(&self.settings.typecheck_command).await?;
        let typecheck_diagnostics = if step_failed(BuildStep::Typecheck, &typecheck) {
            warn!("Type check reported errors; attempting compile anyway");
            Some(typecheck.combined())
        } else {
            None
        };

        status.publish(request_id, "compile", "Compiling application", Some(65));
        let compile = session.run(&self.settings.compile_command).await?;
        if step_failed(BuildStep::Compile, &compile) {
            // With a failed typecheck on record, those diagnostics are the
            // actionable signal; the compile log usually restates them.
            return Ok(match typecheck_diagnostics {
                Some(diagnostics) => BuildOutcome::TypecheckFailed { diagnostics },
                None => BuildOutcome::CompileFailed {
                    log: compile.combined(),
                },
            });
        }

        status.publish(request_id, "collect", "Collecting artifact", Some(85));
        let listed = session.list_files(&self.settings.dist_dir).await?;
        if listed.is_empty() {
            return Ok(BuildOutcome::CompileFailed {
                log: format!(
                    "compile exited 0 but produced no output in {}/",
                    self.settings.dist_dir
                ),
            });
        }
        if !listed.iter().any(|path| path == &self.settings.entry_document) {
            return Ok(BuildOutcome::NoEntryDocument);
        }

        let mut files = Vec::with_capacity(listed.len());
        for path in listed {
            let content = session
                .read_file(&format!("{}/{}", self.settings.dist_dir, path))
                .await?;
            files.push(ArtifactFile { path, content });
        }

        Ok(BuildOutcome::Success {
            files,
            typecheck_diagnostics,
        })
    }
}
