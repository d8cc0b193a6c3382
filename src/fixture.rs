//! Ephemeral container fixtures.
//!
//! A [`Fixture`] gets an image (built from a local directory through a
//! streamed build context, or pulled), creates and starts a container, runs
//! the test logic against it, stops it and finally runs teardown steps such
//! as [`Fixture::cleanup_container`] and [`Fixture::cleanup_image`].
//!
//! Re-exports:
//! - [`Fixture`]: option builder and entry point.
//! - [`FixtureContext`], [`Runner`]: what exec/after steps receive and are.
//! - [`FixtureReport`]: summary of a successful run.

pub mod context;
pub mod lifecycle;
pub mod options;
#[cfg(test)]
mod tests;

pub use context::{FixtureContext, Runner, RunnerFuture};
pub use lifecycle::FixtureReport;
pub use options::Fixture;
