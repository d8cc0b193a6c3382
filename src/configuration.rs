//! Fixture configuration files.
//!
//! A fixture can be described in TOML and loaded with
//! [`FixtureConfig::from_file`]; see [`types::FixtureConfig`] for the format.

pub mod config;
pub mod types;

pub use types::{
    BuildSection, CleanupSection, ContainerSection, FixtureConfig, ENGINE_ENV_VAR,
};
