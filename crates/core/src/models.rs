//! # Vigil Models
//!
//! Input types for a scan run: the caller's request, the resolved capability
//! map, and the immutable [`ScanContext`] the engine reads from.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Kind of artifact being scanned
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ScanKind {
    /// A single source file or contract
    #[default]
    File,
    /// A whole repository
    Repository,
    /// A diff against a previously scanned revision
    Diff,
}

impl ScanKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanKind::File => "file",
            ScanKind::Repository => "repository",
            ScanKind::Diff => "diff",
        }
    }
}

/// A (profile, model) pair driving one instance of a variable-arity detector
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProfileModel {
    /// Analysis profile (e.g. "security", "gas")
    pub profile: String,
    /// Model identifier passed through to the detector
    pub model: String,
}

impl ProfileModel {
    pub fn new(profile: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            model: model.into(),
        }
    }
}

/// Build status of the compiled artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Built,
    NotBuildable,
}

/// Compiled/build artifact produced outside the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildArtifact {
    pub status: BuildStatus,
    /// Location of the build output, if any
    #[serde(default)]
    pub path: Option<String>,
}

impl BuildArtifact {
    pub fn built(path: impl Into<String>) -> Self {
        Self {
            status: BuildStatus::Built,
            path: Some(path.into()),
        }
    }

    pub fn not_buildable() -> Self {
        Self {
            status: BuildStatus::NotBuildable,
            path: None,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.status == BuildStatus::Built
    }
}

/// What the caller asks the engine to scan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanRequest {
    /// Artifact content
    pub artifact: String,
    /// Kind of artifact
    #[serde(default)]
    pub kind: ScanKind,
    /// (profile, model) pairs for the variable-arity detector families
    #[serde(default)]
    pub profile_models: Vec<ProfileModel>,
    /// Compiled artifact, absent when the caller never built one
    #[serde(default)]
    pub build: Option<BuildArtifact>,
    /// Arbitrary caller metadata made available to the capability resolver
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl ScanRequest {
    pub fn new(artifact: impl Into<String>, kind: ScanKind) -> Self {
        Self {
            artifact: artifact.into(),
            kind,
            profile_models: Vec::new(),
            build: None,
            metadata: HashMap::new(),
        }
    }

    pub fn with_profile_model(mut self, profile: &str, model: &str) -> Self {
        self.profile_models.push(ProfileModel::new(profile, model));
        self
    }

    pub fn with_build(mut self, build: BuildArtifact) -> Self {
        self.build = Some(build);
        self
    }
}

/// Resolved capability map for one run
///
/// A missing key means disabled.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CapabilityMap {
    /// detector or family name -> enabled
    #[serde(default)]
    pub detectors: HashMap<String, bool>,
    /// feature name -> enabled
    #[serde(default)]
    pub features: HashMap<String, bool>,
    /// family name -> batch size override
    #[serde(default)]
    pub batch_sizes: HashMap<String, usize>,
}

impl CapabilityMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable_detector(mut self, name: &str) -> Self {
        self.detectors.insert(name.to_string(), true);
        self
    }

    pub fn enable_feature(mut self, name: &str) -> Self {
        self.features.insert(name.to_string(), true);
        self
    }

    pub fn with_batch_size(mut self, family: &str, size: usize) -> Self {
        self.batch_sizes.insert(family.to_string(), size);
        self
    }

    pub fn detector_enabled(&self, name: &str) -> bool {
        self.detectors.get(name).copied().unwrap_or(false)
    }

    pub fn feature_enabled(&self, name: &str) -> bool {
        self.features.get(name).copied().unwrap_or(false)
    }

    pub fn batch_size(&self, family: &str) -> Option<usize> {
        self.batch_sizes.get(family).copied().filter(|size| *size > 0)
    }
}

/// Immutable input bundle for one scan run
#[derive(Debug, Clone)]
pub struct ScanContext {
    pub artifact: Arc<str>,
    pub kind: ScanKind,
    pub capabilities: CapabilityMap,
    pub profile_models: Vec<ProfileModel>,
    pub build: Option<BuildArtifact>,
}

impl ScanContext {
    pub fn new(request: ScanRequest, capabilities: CapabilityMap) -> Self {
        Self {
            artifact: Arc::from(request.artifact),
            kind: request.kind,
            capabilities,
            profile_models: request.profile_models,
            build: request.build,
        }
    }

    /// Whether a usable build artifact exists
    pub fn has_build(&self) -> bool {
        self.build.as_ref().is_some_and(BuildArtifact::is_usable)
    }
}
