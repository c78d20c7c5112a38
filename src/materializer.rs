//! Project materialization: generated sources into a buildable project.
//!
//! Inside a fresh session the materializer lays down, in order:
//! 1. the fixed scaffold (toolchain config + baseline sources), except
//!    where a generated file claims the same path,
//! 2. the generated files themselves,
//! 3. only the catalog components the generated code actually imports;
//!    the import graph prunes the catalog, nothing is uploaded wholesale.
//!
//! Imports that name the catalog namespace but resolve to no known
//! component are warned about and skipped; the build proceeds and surfaces
//! any real breakage as a typecheck or compile failure.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::catalog::{ComponentCatalog, ScaffoldAssets};
use crate::errors::PipelineError;
use crate::models::SourceFile;
use crate::sandbox::SandboxSession;

// Compile regexes once using LazyLock
static CATALOG_IMPORT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"import\s+[^;]*?from\s+['"]@/components/lib/([A-Za-z0-9_]+)['"]"#).unwrap()
});

/// What a materialization uploaded, for logging and status reporting.
#[derive(Debug)]
pub struct MaterializeSummary {
    pub scaffold_files: usize,
    pub components: Vec<String>,
    pub unresolved: Vec<String>,
}

pub struct Materializer {
    catalog: ComponentCatalog,
}

impl Materializer {
    pub fn new(catalog: ComponentCatalog) -> Self {
        Self { catalog }
    }

    pub fn embedded() -> Self {
        Self::new(ComponentCatalog::embedded())
    }

    /// Upload scaffold, generated files, and referenced catalog components
    /// into the session.
    pub async fn materialize(
        &self,
        session: &dyn SandboxSession,
        files: &[SourceFile],
        prompt: Option<&str>,
    ) -> Result<MaterializeSummary, PipelineError> {
        // Generated files win path collisions with the scaffold: a generated
        // src/App.tsx replaces the baseline one.
        let generated_paths: BTreeSet<&str> = files.iter().map(|f| f.path.as_str()).collect();

        let mut scaffold_files = 0;
        for path in ScaffoldAssets::iter() {
            let path_str = path.as_ref();
            if generated_paths.contains(path_str) {
                continue;
            }
            let Some(asset) = ScaffoldAssets::get(path_str) else {
                continue;
            };
            session.write_file(path_str, &asset.data).await?;
            scaffold_files += 1;
        }

        for file in files {
            session.write_file(&file.path, file.content.as_bytes()).await?;
        }

        let packs = ComponentCatalog::active_packs(prompt);
        let referenced = scan_catalog_imports(files);
        let mut components = Vec::new();
        let mut unresolved = Vec::new();
        for name in &referenced {
            match self.catalog.resolve(name, &packs) {
                Some(component) => {
                    session
                        .write_file(&component.project_path, &component.source)
                        .await?;
                    components.push(name.clone());
                }
                None => {
                    warn!(
                        component = %name,
                        packs = ?packs,
                        "Generated code imports an unknown catalog component; skipping"
                    );
                    unresolved.push(name.clone());
                }
            }
        }

        debug!(
            scaffold = scaffold_files,
            generated = files.len(),
            components = components.len(),
            "Materialized project"
        );
        Ok(MaterializeSummary {
            scaffold_files,
            components,
            unresolved,
        })
    }
}

/// Names of catalog components imported anywhere in the generated files.
/// Only imports from the exact `@/components/lib/` namespace count.
pub fn scan_catalog_imports(files: &[SourceFile]) -> BTreeSet<String> {
    let mut names = BTreeSet::new();
    for file in files {
        for caps in CATALOG_IMPORT_REGEX.captures_iter(&file.content) {
            if let Some(m) = caps.get(1) {
                names.insert(m.as_str().to_string());
            }
        }
    }
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sandbox::{SandboxProvider, ScriptedProvider};

    fn src(path: &str, content: &str) -> SourceFile {
        SourceFile {
            path: path.to_string(),
            content: content.to_string(),
        }
    }

    #[test]
    fn test_scan_finds_default_and_named_imports() {
        let files = vec![src(
            "src/App.tsx",
            r#"
import Header from "@/components/lib/Header";
import { Hero } from '@/components/lib/Hero';
import Navbar, { NavItem } from "@/components/lib/Navbar";
"#,
        )];
        let names = scan_catalog_imports(&files);
        assert_eq!(
            names.into_iter().collect::<Vec<_>>(),
            vec!["Header", "Hero", "Navbar"]
        );
    }

    #[test]
    fn test_scan_ignores_other_namespaces() {
        let files = vec![src(
            "src/App.tsx",
            r#"
import { useToast } from "@/hooks/use-toast";
import { cn } from "@/lib/utils";
import Header from "@/components/custom/Header";
import React from "react";
"#,
        )];
        assert!(scan_catalog_imports(&files).is_empty());
    }

    #[test]
    fn test_scan_handles_multiline_import() {
        let files = vec![src(
            "src/App.tsx",
            "import {\n  Gallery,\n} from \"@/components/lib/Gallery\";\n",
        )];
        let names = scan_catalog_imports(&files);
        assert!(names.contains("Gallery"));
    }

    #[tokio::test]
    async fn test_materialize_uploads_only_referenced_components() {
        let provider = ScriptedProvider::new();
        let session = provider.open(None).await.unwrap();
        let materializer = Materializer::embedded();

        let files = vec![src(
            "src/App.tsx",
            r#"import Header from "@/components/lib/Header";
export default function App() { return <Header title="hi" />; }"#,
        )];
        let summary = materializer
            .materialize(session.as_ref(), &files, None)
            .await
            .unwrap();

        assert_eq!(summary.components, vec!["Header"]);
        assert!(summary.unresolved.is_empty());

        let uploaded = session.list_files("src/components/lib").await.unwrap();
        assert_eq!(uploaded, vec!["Header.tsx"]);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_materialize_unknown_import_warns_and_continues() {
        let provider = ScriptedProvider::new();
        let session = provider.open(None).await.unwrap();
        let materializer = Materializer::embedded();

        let files = vec![src(
            "src/App.tsx",
            r#"import Widget from "@/components/lib/Widget";"#,
        )];
        let summary = materializer
            .materialize(session.as_ref(), &files, None)
            .await
            .unwrap();

        assert!(summary.components.is_empty());
        assert_eq!(summary.unresolved, vec!["Widget"]);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_materialize_domain_pack_requires_prompt_keyword() {
        let provider = ScriptedProvider::new();
        let materializer = Materializer::embedded();
        let files = vec![src(
            "src/App.tsx",
            r#"import PriceChart from "@/components/lib/PriceChart";"#,
        )];

        // Without a finance keyword the component is unresolved.
        let session = provider.open(None).await.unwrap();
        let summary = materializer
            .materialize(session.as_ref(), &files, Some("a portfolio site"))
            .await
            .unwrap();
        assert_eq!(summary.unresolved, vec!["PriceChart"]);
        session.close().await.unwrap();

        // With one, it resolves and uploads.
        let session = provider.open(None).await.unwrap();
        let summary = materializer
            .materialize(session.as_ref(), &files, Some("a crypto dashboard"))
            .await
            .unwrap();
        assert_eq!(summary.components, vec!["PriceChart"]);
        session.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_materialize_generated_file_wins_scaffold_collision() {
        let provider = ScriptedProvider::new();
        let session = provider.open(None).await.unwrap();
        let materializer = Materializer::embedded();

        let files = vec![src("src/App.tsx", "export default function App() { return null; }")];
        materializer
            .materialize(session.as_ref(), &files, None)
            .await
            .unwrap();

        let content = session.read_file("src/App.tsx").await.unwrap();
        assert_eq!(content, b"export default function App() { return null; }");
        // Scaffold files without collisions still land.
        assert!(session.read_file("package.json").await.is_ok());
        assert!(session.read_file("index.html").await.is_ok());
        session.close().await.unwrap();
    }
}
