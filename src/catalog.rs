//! Embedded project scaffold and component catalog.
//!
//! The scaffold is the fixed shell every generated app builds inside:
//! toolchain config plus baseline sources (entry point, error boundary,
//! global styles, utility hooks). The catalog is a library of prebuilt
//! components generated code may import from the `@/components/lib/`
//! namespace; domain packs extend it when the user's prompt matches their
//! keywords.

use rust_embed::RustEmbed;

/// Fixed project shell uploaded at the start of every materialization.
#[derive(RustEmbed)]
#[folder = "templates/scaffold/"]
pub struct ScaffoldAssets;

#[derive(RustEmbed)]
#[folder = "templates/components/"]
struct CatalogAssets;

/// Import prefix that makes an import catalog-relevant.
pub const CATALOG_NAMESPACE: &str = "@/components/lib/";

/// Directory catalog components are uploaded to inside the project.
pub const CATALOG_TARGET_DIR: &str = "src/components/lib";

pub const CORE_PACK: &str = "core";

/// Domain packs and the prompt keywords that activate them.
const DOMAIN_PACKS: &[(&str, &[&str])] = &[(
    "finance",
    &[
        "crypto", "web3", "token", "defi", "wallet", "finance", "trading", "exchange",
    ],
)];

/// One prebuilt component available to generated code.
pub struct CatalogComponent {
    /// Import name, e.g. `Header` for `@/components/lib/Header`.
    pub name: String,
    pub pack: String,
    /// Where the component lands in the project, e.g.
    /// `src/components/lib/Header.tsx`.
    pub project_path: String,
    pub source: Vec<u8>,
}

pub struct ComponentCatalog {
    components: Vec<CatalogComponent>,
}

impl ComponentCatalog {
    /// Load the embedded catalog. Top-level files belong to the core pack;
    /// a subdirectory names the domain pack its files belong to.
    pub fn embedded() -> Self {
        let mut components = Vec::new();
        for path in CatalogAssets::iter() {
            let Some(file) = CatalogAssets::get(&path) else {
                continue;
            };
            let path_str = path.as_ref();
            let (pack, file_name) = match path_str.split_once('/') {
                Some((pack, rest)) => (pack, rest),
                None => (CORE_PACK, path_str),
            };
            let Some(name) = file_name.strip_suffix(".tsx") else {
                continue;
            };
            components.push(CatalogComponent {
                name: name.to_string(),
                pack: pack.to_string(),
                project_path: format!("{}/{}.tsx", CATALOG_TARGET_DIR, name),
                source: file.data.to_vec(),
            });
        }
        components.sort_by(|a, b| a.name.cmp(&b.name));
        Self { components }
    }

    /// Packs activated by a prompt. Core is always active; domain packs
    /// require a keyword match (case-insensitive).
    pub fn active_packs(prompt: Option<&str>) -> Vec<&'static str> {
        let mut packs = vec![CORE_PACK];
        if let Some(prompt) = prompt {
            let lowered = prompt.to_lowercase();
            for (pack, keywords) in DOMAIN_PACKS {
                if keywords.iter().any(|kw| lowered.contains(kw)) {
                    packs.push(pack);
                }
            }
        }
        packs
    }

    /// Look up a component by import name, visible only through the given
    /// packs.
    pub fn resolve(&self, name: &str, packs: &[&str]) -> Option<&CatalogComponent> {
        self.components
            .iter()
            .find(|c| c.name == name && packs.contains(&c.pack.as_str()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.components.iter().map(|c| c.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedded_catalog_loads_core_and_packs() {
        let catalog = ComponentCatalog::embedded();
        assert!(!catalog.is_empty());

        let header = catalog.resolve("Header", &[CORE_PACK]).expect("Header exists");
        assert_eq!(header.pack, CORE_PACK);
        assert_eq!(header.project_path, "src/components/lib/Header.tsx");
        assert!(!header.source.is_empty());

        let chart = catalog
            .resolve("PriceChart", &[CORE_PACK, "finance"])
            .expect("PriceChart exists");
        assert_eq!(chart.pack, "finance");
    }

    #[test]
    fn test_domain_components_hidden_without_pack() {
        let catalog = ComponentCatalog::embedded();
        assert!(catalog.resolve("PriceChart", &[CORE_PACK]).is_none());
        assert!(catalog.resolve("Header", &[CORE_PACK]).is_some());
    }

    #[test]
    fn test_active_packs_keyword_match() {
        assert_eq!(ComponentCatalog::active_packs(None), vec![CORE_PACK]);
        assert_eq!(
            ComponentCatalog::active_packs(Some("a recipe blog")),
            vec![CORE_PACK]
        );
        assert_eq!(
            ComponentCatalog::active_packs(Some("Build me a DeFi dashboard")),
            vec![CORE_PACK, "finance"]
        );
        assert_eq!(
            ComponentCatalog::active_packs(Some("crypto wallet tracker")),
            vec![CORE_PACK, "finance"]
        );
    }

    #[test]
    fn test_scaffold_contains_required_files() {
        for required in [
            "package.json",
            "vite.config.ts",
            "tsconfig.json",
            "index.html",
            "src/main.tsx",
            "src/index.css",
            "src/components/ErrorBoundary.tsx",
        ] {
            assert!(
                ScaffoldAssets::get(required).is_some(),
                "scaffold is missing {}",
                required
            );
        }
    }

    #[test]
    fn test_scaffold_pins_rewritable_base() {
        let config = ScaffoldAssets::get("vite.config.ts").unwrap();
        let text = String::from_utf8_lossy(&config.data);
        assert!(text.contains("/__atelier_base__/"));
    }
}
