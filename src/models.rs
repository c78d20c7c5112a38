use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A project owned by a user. The `{owner_id}/{id}` pair forms the prefix
/// of every artifact locator and preview URL for the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Building,
    Completed,
    Failed,
}

impl BuildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl FromStr for BuildStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "building" => Ok(Self::Building),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(format!("Invalid build status: {}", s)),
        }
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One build of a project. Versions are strictly increasing per project and
/// never reused; the artifact locator is set when the build completes and
/// points at an immutable prefix in object storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Build {
    pub id: String,
    pub project_id: String,
    pub owner_id: String,
    pub version: i64,
    pub status: BuildStatus,
    pub artifact_locator: Option<String>,
    pub artifact_hash: Option<String>,
    pub has_issues: bool,
    pub error: Option<String>,
    pub created_at: String,
    pub finished_at: Option<String>,
}

/// A generated source file as submitted by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceFile {
    pub path: String,
    pub content: String,
}

/// One compiled output file, path relative to the dist root.
#[derive(Debug, Clone, PartialEq)]
pub struct ArtifactFile {
    pub path: String,
    pub content: Vec<u8>,
}

/// A single progress entry on the status channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub step: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u8>,
    pub timestamp_ms: i64,
}

/// Result of a successfully published build, as returned by the pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct PublishedBuild {
    pub build_id: String,
    pub version: i64,
    pub artifact_locator: String,
    pub artifact_hash: String,
    pub has_issues: bool,
}
