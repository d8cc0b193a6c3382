//! Container management subsystem.
//!
//! This module exposes the minimal engine API the fixtures need: build or
//! pull an image, create/start/stop/remove a container, exec into it and
//! clean images up. The shipped implementation drives a docker-compatible
//! CLI; anything implementing [`ContainerEngine`] can be plugged in instead.
//!
//! Re-exports:
//! - [`ContainerEngine`], [`BuildContext`]: the engine seam.
//! - [`CliEngine`]: `docker`/`podman` backed implementation.
//! - [`ContainerHandle`], [`ContainerSpec`], [`BuildOptions`], [`Runtime`]...: core types.
//!
//! Example (non-running):
//! ```ignore
//! use fixture_pod::container_management::{CliEngine, ContainerEngine, Runtime};
//!
//! // Fails if `podman` is not installed
//! let engine = CliEngine::new(Runtime::Podman)?;
//! engine.pull_image("redis:7", None).await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod cli_engine;
pub mod engine;
#[cfg(test)]
pub mod mock;
pub mod types;

pub use cli_engine::CliEngine;
pub use engine::{BuildContext, ContainerEngine};
pub use types::{
    BuildOptions, ContainerHandle, ContainerSpec, ContainerState, ExecOutput, ImageFilter,
    Runtime, DEFAULT_STOP_TIMEOUT,
};
