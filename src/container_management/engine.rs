use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::types::{BuildOptions, ContainerSpec, ContainerState, ExecOutput, ImageFilter};
use crate::error_handling::types::ContainerError;

/// Build context as handed to [`ContainerEngine::build_image`]: a tar stream,
/// normally a [`TarDirReader`](crate::archive::TarDirReader).
pub type BuildContext = Box<dyn AsyncRead + Send + Unpin>;

/// Operations the fixtures need from a container engine.
///
/// Identifiers are the engine's own (image ids, container ids or names).
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Builds an image from a tar build context and returns its id.
    async fn build_image(
        &self,
        context: BuildContext,
        options: &BuildOptions,
    ) -> Result<String, ContainerError>;

    /// Pulls `reference`, optionally for a specific platform.
    async fn pull_image(&self, reference: &str, platform: Option<&str>)
        -> Result<(), ContainerError>;

    /// Creates (but does not start) a container and returns its id.
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, ContainerError>;

    async fn start_container(&self, id: &str) -> Result<(), ContainerError>;

    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<(), ContainerError>;

    async fn remove_container(&self, id: &str, remove_volumes: bool)
        -> Result<(), ContainerError>;

    async fn inspect_container(&self, id: &str) -> Result<ContainerState, ContainerError>;

    /// Runs `cmd` inside a running container. A non-zero exit is reported in
    /// the output, not as an error.
    async fn exec(&self, id: &str, cmd: &[String]) -> Result<ExecOutput, ContainerError>;

    /// Image ids matching every criterion of `filter`.
    async fn list_images(&self, filter: &ImageFilter) -> Result<Vec<String>, ContainerError>;

    async fn remove_image(&self, id: &str) -> Result<(), ContainerError>;
}
