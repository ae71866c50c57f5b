//! Resource profiles and per-request overrides.
//!
//! Profiles are loaded once at startup from a JSON file of the form:
//!
//! ```json
//! {
//!   "defaultResources": { "cpuMillis": 1000, "memoryMiB": 512, "maxRunDurationSeconds": 3600 },
//!   "resourceProfiles": {
//!     "small": { "cpuMillis": 250, "memoryMiB": 256, "maxRunDurationSeconds": 600 }
//!   }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::proto;

/// Concrete compute requirements recorded on a job at submission time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceRequirements {
    pub cpu_millis: i64,
    #[serde(rename = "memoryMiB")]
    pub memory_mib: i64,
    pub max_run_duration_seconds: i64,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            cpu_millis: 1000,
            memory_mib: 512,
            max_run_duration_seconds: 3600,
        }
    }
}

/// Field-level override. `None` keeps the profile value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceOverride {
    pub cpu_millis: Option<i64>,
    pub memory_mib: Option<i64>,
    pub max_run_duration_seconds: Option<i64>,
}

impl From<proto::ResourceOverride> for ResourceOverride {
    fn from(o: proto::ResourceOverride) -> Self {
        Self {
            cpu_millis: o.cpu_millis,
            memory_mib: o.memory_mib,
            max_run_duration_seconds: o.max_run_duration_seconds,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error("Failed to read resource profile file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse resource profile file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Resource profile file has no default profile")]
    MissingDefault,
}

/// Named resource profiles plus the default used for unknown names.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceProfiles {
    default_resources: Option<ResourceRequirements>,
    #[serde(default)]
    resource_profiles: HashMap<String, ResourceRequirements>,
}

impl Default for ResourceProfiles {
    fn default() -> Self {
        Self::new(ResourceRequirements::default())
    }
}

impl ResourceProfiles {
    pub fn new(default_resources: ResourceRequirements) -> Self {
        Self {
            default_resources: Some(default_resources),
            resource_profiles: HashMap::new(),
        }
    }

    pub fn with_profile(mut self, name: impl Into<String>, profile: ResourceRequirements) -> Self {
        self.resource_profiles.insert(name.into(), profile);
        self
    }

    /// Parse profiles from JSON. A missing default profile is rejected here so
    /// that it surfaces at startup rather than on a request.
    pub fn from_json(json: &str) -> Result<Self, ResourceError> {
        let profiles: Self = serde_json::from_str(json)?;
        if profiles.default_resources.is_none() {
            return Err(ResourceError::MissingDefault);
        }
        Ok(profiles)
    }

    pub async fn load(path: &Path) -> Result<Self, ResourceError> {
        let json = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ResourceError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        Self::from_json(&json)
    }

    pub fn default_resources(&self) -> ResourceRequirements {
        self.default_resources.unwrap_or_default()
    }

    pub fn profile(&self, name: &str) -> Option<ResourceRequirements> {
        self.resource_profiles.get(name).copied()
    }

    /// Merge the named profile (or the default for unknown/empty names) with
    /// an optional override.
    pub fn resolve(
        &self,
        profile_name: Option<&str>,
        resource_override: Option<&ResourceOverride>,
    ) -> ResourceRequirements {
        let mut resolved = profile_name
            .filter(|name| !name.is_empty())
            .and_then(|name| self.profile(name))
            .unwrap_or_else(|| self.default_resources());

        if let Some(o) = resource_override {
            if let Some(cpu) = o.cpu_millis {
                resolved.cpu_millis = cpu;
            }
            if let Some(memory) = o.memory_mib {
                resolved.memory_mib = memory;
            }
            if let Some(duration) = o.max_run_duration_seconds {
                resolved.max_run_duration_seconds = duration;
            }
        }

        resolved
    }
}
