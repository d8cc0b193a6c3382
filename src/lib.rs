pub mod archive;
pub use archive::{EntryNaming, TarDirReader};

pub mod configuration;
pub use configuration::FixtureConfig;

pub mod container_management;
pub use container_management::{CliEngine, ContainerEngine, Runtime};

pub mod error_handling;
pub use error_handling::types::{ArchiveError, ConfigError, ContainerError, FixtureError};

pub mod fixture;
pub use fixture::{Fixture, FixtureContext, FixtureReport};
