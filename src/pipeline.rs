//! End-to-end save pipeline: sandbox → materialize → build → persist →
//! publish.
//!
//! The build record is created only once the sandbox has produced a
//! publishable artifact. A failed install, typecheck, or compile therefore
//! leaves no row behind; failures after the record exists finalize it as
//! `failed` so nothing stays `building` forever.

use std::sync::Arc;
use std::time::Instant;

use tracing::{error, info};

use crate::builder::BuildRunner;
use crate::config::AtelierConfig;
use crate::db::DbHandle;
use crate::errors::PipelineError;
use crate::materializer::Materializer;
use crate::models::{BuildStatus, Project, PublishedBuild, SourceFile};
use crate::sandbox::{SandboxProvider, with_session};
use crate::status::StatusHub;
use crate::storage::{ObjectStore, artifact_hash, artifact_locator, put_artifact};
use crate::util::is_safe_rel_path;

/// Reject a save whose file paths could escape the project root. Runs
/// before any sandbox work, so a bad request costs nothing.
pub fn ensure_safe_paths(files: &[SourceFile]) -> Result<(), String> {
    for file in files {
        if !is_safe_rel_path(&file.path) {
            return Err(format!("Invalid file path '{}'", file.path));
        }
    }
    Ok(())
}

pub struct BuildPipeline {
    db: DbHandle,
    store: Arc<dyn ObjectStore>,
    provider: Arc<dyn SandboxProvider>,
    status: Arc<StatusHub>,
    materializer: Arc<Materializer>,
    runner: Arc<BuildRunner>,
    sandbox_image: Option<String>,
}

impl BuildPipeline {
    pub fn new(
        db: DbHandle,
        store: Arc<dyn ObjectStore>,
        provider: Arc<dyn SandboxProvider>,
        status: Arc<StatusHub>,
        config: &AtelierConfig,
    ) -> Self {
        Self {
            db,
            store,
            provider,
            status,
            materializer: Arc::new(Materializer::embedded()),
            runner: Arc::new(BuildRunner::new(config.build.clone())),
            sandbox_image: config.sandbox.image.clone(),
        }
    }

    /// Run one save end to end and return the published build on success.
    pub async fn run(
        &self,
        project: &Project,
        files: Vec<SourceFile>,
        request_id: &str,
        prompt: Option<&str>,
    ) -> Result<PublishedBuild, PipelineError> {
        let started = Instant::now();
        self.status.publish(
            request_id,
            "sandbox",
            "Provisioning build environment",
            Some(5),
        );

        // Owned clones move into the session future; `files` rides along and
        // comes back out for the source snapshot.
        let materializer = Arc::clone(&self.materializer);
        let runner = Arc::clone(&self.runner);
        let status = Arc::clone(&self.status);
        let rid = request_id.to_string();
        let prompt_owned = prompt.map(str::to_string);

        let session_result = with_session(
            self.provider.as_ref(),
            self.sandbox_image.as_deref(),
            move |session| {
                Box::pin(async move {
                    status.publish(&rid, "materialize", "Preparing project files", Some(15));
                    materializer
                        .materialize(session, &files, prompt_owned.as_deref())
                        .await?;
                    let outcome = runner.run(session, &status, &rid).await?;
                    Ok((outcome, files))
                })
            },
        )
        .await;

        let (outcome, files) = match session_result {
            Ok(pair) => pair,
            Err(err) => {
                self.status.publish(request_id, "error", &err.to_string(), None);
                return Err(err);
            }
        };

        let (artifact, typecheck_diagnostics) = match outcome.into_result() {
            Ok(pair) => pair,
            Err(failure) => {
                self.status
                    .publish(request_id, "error", &failure.to_string(), None);
                return Err(PipelineError::Build(failure));
            }
        };
        let has_issues = typecheck_diagnostics.is_some();

        self.status
            .publish(request_id, "upload", "Publishing artifact", Some(92));

        let build = {
            let project_id = project.id.clone();
            let owner_id = project.owner_id.clone();
            self.db
                .call(move |db| {
                    let build = db.create_build(&project_id, &owner_id)?;
                    if let Err(err) = db.persist_source_snapshot(&build.id, &files) {
                        // Don't leave the fresh record in 'building' when the
                        // snapshot cannot be written.
                        db.finalize_build(
                            &build.id,
                            BuildStatus::Failed,
                            None,
                            None,
                            false,
                            Some(&err.to_string()),
                        )?;
                        return Err(err);
                    }
                    Ok(build)
                })
                .await
                .map_err(PipelineError::Infra)?
        };

        let locator = artifact_locator(&project.owner_id, &project.id, build.version);
        let hash = artifact_hash(&artifact);

        if let Err(err) = put_artifact(self.store.as_ref(), &locator, &artifact).await {
            let build_id = build.id.clone();
            let message = err.to_string();
            let finalize = self
                .db
                .call(move |db| {
                    db.finalize_build(
                        &build_id,
                        BuildStatus::Failed,
                        None,
                        None,
                        false,
                        Some(&message),
                    )
                })
                .await;
            if let Err(e) = finalize {
                error!("Failed to record failed build {}: {:#}", build.id, e);
            }
            self.status
                .publish(request_id, "error", "Failed to store artifact", None);
            return Err(err.into());
        }

        let build = {
            let build_id = build.id.clone();
            let locator = locator.clone();
            let hash = hash.clone();
            self.db
                .call(move |db| {
                    db.finalize_build(
                        &build_id,
                        BuildStatus::Completed,
                        Some(&locator),
                        Some(&hash),
                        has_issues,
                        None,
                    )
                })
                .await
                .map_err(PipelineError::Infra)?
        };

        self.status
            .publish(request_id, "done", "Preview ready", Some(100));
        info!(
            "Published build v{} for project {} in {}ms",
            build.version,
            project.id,
            started.elapsed().as_millis()
        );

        Ok(PublishedBuild {
            build_id: build.id,
            version: build.version,
            artifact_locator: locator,
            artifact_hash: hash,
            has_issues,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::AtelierDb;
    use crate::errors::BuildFailure;
    use crate::sandbox::ScriptedProvider;
    use crate::storage::FsObjectStore;
    use std::time::Duration;

    const DIST: &[(&str, &str)] = &[
        ("dist/index.html", "<html><body>app</body></html>"),
        ("dist/assets/index-abc.js", "console.log('app')"),
    ];

    struct Harness {
        pipeline: BuildPipeline,
        db: DbHandle,
        store: Arc<FsObjectStore>,
        status: Arc<StatusHub>,
        provider: Arc<ScriptedProvider>,
        _storage_dir: tempfile::TempDir,
    }

    fn harness(provider: ScriptedProvider) -> Harness {
        let db = DbHandle::new(AtelierDb::new_in_memory().unwrap());
        let storage_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FsObjectStore::new(storage_dir.path()));
        let status = Arc::new(StatusHub::new(50, Duration::from_secs(3600)));
        let provider = Arc::new(provider);
        let pipeline = BuildPipeline::new(
            db.clone(),
            store.clone(),
            provider.clone(),
            status.clone(),
            &AtelierConfig::default(),
        );
        Harness {
            pipeline,
            db,
            store,
            status,
            provider,
            _storage_dir: storage_dir,
        }
    }

    fn project(h: &Harness) -> Project {
        h.db
            .lock_sync()
            .unwrap()
            .create_project("user-1", "Demo")
            .unwrap()
    }

    fn app_files() -> Vec<SourceFile> {
        vec![SourceFile {
            path: "src/App.tsx".into(),
            content: "export default function App() { return <div>hi</div> }".into(),
        }]
    }

    #[tokio::test]
    async fn test_successful_save_publishes_build() {
        let h = harness(ScriptedProvider::new().on_with_files("npm run build", 0, "built", DIST));
        let project = project(&h);

        let published = h
            .pipeline
            .run(&project, app_files(), "req-1", None)
            .await
            .unwrap();

        assert_eq!(published.version, 1);
        assert!(!published.has_issues);
        assert_eq!(published.artifact_hash.len(), 64);
        assert_eq!(
            published.artifact_locator,
            format!("user-1/{}/v1", project.id)
        );

        let build = h
            .db
            .lock_sync()
            .unwrap()
            .latest_completed_build(&project.id)
            .unwrap()
            .unwrap();
        assert_eq!(build.status, BuildStatus::Completed);
        assert_eq!(build.artifact_locator.as_deref(), Some(published.artifact_locator.as_str()));
        assert!(build.finished_at.is_some());

        let stored = h
            .store
            .get(&format!("{}/index.html", published.artifact_locator))
            .await
            .unwrap();
        assert!(stored.is_some());
        assert_eq!(h.provider.close_count(), 1);
        assert_eq!(h.status.latest("req-1").unwrap().step, "done");
    }

    #[tokio::test]
    async fn test_install_failure_leaves_no_build_row() {
        let h = harness(ScriptedProvider::new().on("npm install", 1, "npm ERR! 404"));
        let project = project(&h);

        let err = h
            .pipeline
            .run(&project, app_files(), "req-2", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Build(BuildFailure::Install { .. })
        ));

        let builds = h.db.lock_sync().unwrap().list_builds(&project.id).unwrap();
        assert!(builds.is_empty());
        assert_eq!(h.provider.close_count(), 1);
        assert_eq!(h.status.latest("req-2").unwrap().step, "error");
    }

    #[tokio::test]
    async fn test_typecheck_issue_marks_has_issues() {
        let h = harness(
            ScriptedProvider::new()
                .on("tsc", 2, "error TS2322")
                .on_with_files("npm run build", 0, "built", DIST),
        );
        let project = project(&h);

        let published = h
            .pipeline
            .run(&project, app_files(), "req-3", None)
            .await
            .unwrap();
        assert!(published.has_issues);

        let build = h
            .db
            .lock_sync()
            .unwrap()
            .latest_completed_build(&project.id)
            .unwrap()
            .unwrap();
        assert!(build.has_issues);
        assert_eq!(build.status, BuildStatus::Completed);
    }

    #[tokio::test]
    async fn test_missing_entry_document_is_build_failure() {
        let h = harness(ScriptedProvider::new().on_with_files(
            "npm run build",
            0,
            "built",
            &[("dist/assets/app.js", "console.log(1)")],
        ));
        let project = project(&h);

        let err = h
            .pipeline
            .run(&project, app_files(), "req-4", None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Build(BuildFailure::NoEntryDocument)
        ));
        assert!(h.db.lock_sync().unwrap().list_builds(&project.id).unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_repeat_saves_increment_version() {
        let h = harness(ScriptedProvider::new().on_with_files("npm run build", 0, "built", DIST));
        let project = project(&h);

        let first = h
            .pipeline
            .run(&project, app_files(), "req-5", None)
            .await
            .unwrap();
        let second = h
            .pipeline
            .run(&project, app_files(), "req-6", None)
            .await
            .unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert!(second.artifact_locator.ends_with("/v2"));

        let head = h
            .db
            .lock_sync()
            .unwrap()
            .latest_completed_build(&project.id)
            .unwrap()
            .unwrap();
        assert_eq!(head.version, 2);
    }

    #[tokio::test]
    async fn test_sandbox_open_failure_is_infra() {
        let h = harness(ScriptedProvider::new().fail_open());
        let project = project(&h);

        let err = h
            .pipeline
            .run(&project, app_files(), "req-7", None)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Infra(_)));
        assert!(h.db.lock_sync().unwrap().list_builds(&project.id).unwrap().is_empty());
        assert_eq!(h.provider.close_count(), 0);
    }

    #[tokio::test]
    async fn test_source_snapshot_persisted_with_build() {
        let h = harness(ScriptedProvider::new().on_with_files("npm run build", 0, "built", DIST));
        let project = project(&h);
        let files = app_files();

        let published = h
            .pipeline
            .run(&project, files.clone(), "req-8", None)
            .await
            .unwrap();

        let snapshot = h
            .db
            .lock_sync()
            .unwrap()
            .source_snapshot(&published.build_id)
            .unwrap();
        assert_eq!(snapshot, files);
    }

    #[test]
    fn test_ensure_safe_paths_rejects_traversal() {
        let files = vec![SourceFile {
            path: "../outside.txt".into(),
            content: "x".into(),
        }];
        assert!(ensure_safe_paths(&files).is_err());
        assert!(ensure_safe_paths(&app_files()).is_ok());
    }
}
