//! Core types used by the container management subsystem.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::archive::EntryNaming;

/// Supported container engine front-ends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Runtime {
    /// The `docker` CLI.
    Docker,
    /// The `podman` CLI (docker-compatible arguments).
    Podman,
    /// Any other docker-compatible binary, by name or path.
    Custom(String),
}

impl Runtime {
    pub fn binary(&self) -> &str {
        match self {
            Runtime::Docker => "docker",
            Runtime::Podman => "podman",
            Runtime::Custom(bin) => bin,
        }
    }
}

impl From<&str> for Runtime {
    fn from(value: &str) -> Self {
        match value {
            "docker" => Runtime::Docker,
            "podman" => Runtime::Podman,
            other => Runtime::Custom(other.to_string()),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Runtime::Docker
    }
}

impl fmt::Display for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.binary())
    }
}

/// Parameters of an image build. The context itself is passed separately.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildOptions {
    /// Directory turned into the build context.
    pub context_dir: PathBuf,
    /// Dockerfile name inside the context.
    pub dockerfile: String,
    pub tags: Vec<String>,
    pub build_args: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub naming: EntryNaming,
}

/// Everything needed to create a container. `extra_args` are handed to the
/// engine's `create` verbatim (networking, mounts, resource limits...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub name: Option<String>,
    pub cmd: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub extra_args: Vec<String>,
}

/// Filter used to find images to clean up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImageFilter {
    pub reference: Option<String>,
    pub labels: Vec<String>,
}

impl ImageFilter {
    pub fn is_empty(&self) -> bool {
        self.reference.is_none() && self.labels.is_empty()
    }
}

/// Handle describing a container created for a fixture.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerHandle {
    /// Identifier assigned by the engine.
    pub id: String,
    /// Name requested at creation, if any.
    pub name: Option<String>,
    /// Image the container was created from.
    pub image: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Subset of `inspect` output the fixtures care about.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Running")]
    pub running: bool,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "ExitCode", default)]
    pub exit_code: i64,
}

/// Result of running a command inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Default grace period handed to `stop` before the engine kills the container.
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(10);
