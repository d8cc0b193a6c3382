use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

/// Environment variable overriding [`FixtureConfig::engine`].
pub const ENGINE_ENV_VAR: &str = "FIXTURE_ENGINE";

pub const DEFAULT_ENGINE: &str = "docker";
pub const DEFAULT_STOP_TIMEOUT_SECS: u64 = 10;

fn default_engine() -> String {
    DEFAULT_ENGINE.to_string()
}

fn default_stop_timeout_secs() -> u64 {
    DEFAULT_STOP_TIMEOUT_SECS
}

fn default_true() -> bool {
    true
}

/// Fixture description as read from a TOML file.
///
/// Exactly one image source must be configured: either a `[build]` section
/// (the image is built from a local directory) or a top-level `image` to pull.
///
/// ```toml
/// engine = "podman"
/// name = "api-under-test"
///
/// [build]
/// context = "testdata/api"
/// tags = ["api:test"]
///
/// [build.args]
/// VERSION = "1.4"
///
/// [container]
/// cmd = ["./api", "--port", "8080"]
/// env = { RUST_LOG = "debug" }
///
/// [cleanup]
/// image = false
/// ```
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FixtureConfig {
    /// Engine binary: `docker`, `podman` or a path to a compatible CLI.
    #[serde(default = "default_engine")]
    pub engine: String,
    /// Container name.
    pub name: Option<String>,
    /// Image reference to pull when no `[build]` section is present.
    pub image: Option<String>,
    /// Platform requested when pulling, e.g. `linux/amd64`.
    pub platform: Option<String>,
    pub build: Option<BuildSection>,
    #[serde(default)]
    pub container: ContainerSection,
    #[serde(default)]
    pub cleanup: CleanupSection,
}

/// `[build]`: build the image from a local directory.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    /// Context directory, relative to the configuration file.
    pub context: PathBuf,
    /// Dockerfile name inside the context.
    #[serde(default)]
    pub dockerfile: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub args: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Keep paths relative to the context instead of flattening to base
    /// names.
    #[serde(default)]
    pub relative_paths: bool,
}

/// `[container]`: how the container is created.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ContainerSection {
    #[serde(default)]
    pub cmd: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    /// Passed verbatim to the engine's `create`.
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for ContainerSection {
    fn default() -> Self {
        Self {
            cmd: Vec::new(),
            env: BTreeMap::new(),
            labels: BTreeMap::new(),
            working_dir: None,
            extra_args: Vec::new(),
            stop_timeout_secs: DEFAULT_STOP_TIMEOUT_SECS,
        }
    }
}

/// `[cleanup]`: what is removed once the fixture is done.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CleanupSection {
    #[serde(default = "default_true")]
    pub container: bool,
    #[serde(default = "default_true")]
    pub image: bool,
}

impl Default for CleanupSection {
    fn default() -> Self {
        Self {
            container: true,
            image: true,
        }
    }
}
