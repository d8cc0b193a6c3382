use std::fmt;
use std::io;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ArchiveError {
    Walk(walkdir::Error),
    NotADirectory(PathBuf),
    Open(PathBuf, io::Error),
    Metadata(PathBuf, io::Error),
    Copy(PathBuf, io::Error),
    Truncated { path: PathBuf, expected: u64, copied: u64 },
    Finish(io::Error),
    Spawn(io::Error),
    ProducerLost,
    Spent,
}

impl ArchiveError {
    /// `io::ErrorKind` used when this error is carried through `Read`/`AsyncRead`.
    pub fn kind(&self) -> io::ErrorKind {
        match self {
            ArchiveError::Walk(e) => e
                .io_error()
                .map(|io| io.kind())
                .unwrap_or(io::ErrorKind::Other),
            ArchiveError::NotADirectory(_) => io::ErrorKind::InvalidInput,
            ArchiveError::Open(_, e) | ArchiveError::Metadata(_, e) | ArchiveError::Copy(_, e) => {
                e.kind()
            }
            ArchiveError::Truncated { .. } => io::ErrorKind::UnexpectedEof,
            ArchiveError::Finish(e) | ArchiveError::Spawn(e) => e.kind(),
            ArchiveError::ProducerLost => io::ErrorKind::BrokenPipe,
            ArchiveError::Spent => io::ErrorKind::Other,
        }
    }
}

impl fmt::Display for ArchiveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchiveError::Walk(e) => write!(f, "Source tree walk failed: {}", e),
            ArchiveError::NotADirectory(p) => {
                write!(f, "Archive root is not a directory: {}", p.display())
            }
            ArchiveError::Open(p, e) => write!(f, "Failed to open {}: {}", p.display(), e),
            ArchiveError::Metadata(p, e) => {
                write!(f, "Failed to stat {}: {}", p.display(), e)
            }
            ArchiveError::Copy(p, e) => {
                write!(f, "Failed to write {} to archive: {}", p.display(), e)
            }
            ArchiveError::Truncated {
                path,
                expected,
                copied,
            } => write!(
                f,
                "File {} shrank while archiving: expected {} bytes, got {}",
                path.display(),
                expected,
                copied
            ),
            ArchiveError::Finish(e) => write!(f, "Failed to finish archive: {}", e),
            ArchiveError::Spawn(e) => write!(f, "Failed to spawn archive producer: {}", e),
            ArchiveError::ProducerLost => {
                write!(f, "Archive producer stopped before the end of the archive")
            }
            ArchiveError::Spent => write!(f, "Archive stream already failed and is spent"),
        }
    }
}

impl std::error::Error for ArchiveError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ArchiveError::Walk(e) => Some(e),
            ArchiveError::Open(_, e)
            | ArchiveError::Metadata(_, e)
            | ArchiveError::Copy(_, e)
            | ArchiveError::Finish(e)
            | ArchiveError::Spawn(e) => Some(e),
            _ => None,
        }
    }
}

impl From<walkdir::Error> for ArchiveError {
    fn from(err: walkdir::Error) -> Self {
        ArchiveError::Walk(err)
    }
}

impl From<ArchiveError> for io::Error {
    fn from(err: ArchiveError) -> Self {
        io::Error::new(err.kind(), err)
    }
}

#[derive(Debug)]
pub enum ContainerError {
    RuntimeNotAvailable(String),
    CommandFailed { command: String, stderr: String },
    IoError(std::io::Error),
    ParseError(String),
    NotFound(String),
}

impl fmt::Display for ContainerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerError::RuntimeNotAvailable(bin) => {
                write!(f, "Container runtime not available: {}", bin)
            }
            ContainerError::CommandFailed { command, stderr } => {
                write!(f, "Container command failed: {}: {}", command, stderr.trim())
            }
            ContainerError::IoError(e) => write!(f, "Container IO error: {}", e),
            ContainerError::ParseError(e) => write!(f, "Container output parse error: {}", e),
            ContainerError::NotFound(e) => write!(f, "Container not found: {}", e),
        }
    }
}

impl std::error::Error for ContainerError {}

impl From<std::io::Error> for ContainerError {
    fn from(err: std::io::Error) -> Self {
        ContainerError::IoError(err)
    }
}

#[derive(Debug)]
pub enum ConfigError {
    IoError(std::io::Error),
    TomlError(String),
    NoImageSource,
    ConflictingImageSource,
    DirectoryDoesNotExist(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {}", e),
            ConfigError::TomlError(e) => write!(f, "TOML parsing error: {}", e),
            ConfigError::NoImageSource => {
                write!(f, "Either a [build] section or an image must be configured")
            }
            ConfigError::ConflictingImageSource => {
                write!(f, "A [build] section and an image cannot both be configured")
            }
            ConfigError::DirectoryDoesNotExist(e) => write!(f, "Directory error: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::IoError(err)
    }
}

#[derive(Debug)]
pub enum FixtureError {
    NoImageSource,
    Container(ContainerError),
    Config(ConfigError),
    IoError(std::io::Error),
    Runner(String),
}

impl fmt::Display for FixtureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FixtureError::NoImageSource => {
                write!(f, "No image build or pull options provided")
            }
            FixtureError::Container(e) => write!(f, "Container error: {}", e),
            FixtureError::Config(e) => write!(f, "Configuration error: {}", e),
            FixtureError::IoError(e) => write!(f, "IO error: {}", e),
            FixtureError::Runner(e) => write!(f, "Runner failed: {}", e),
        }
    }
}

impl std::error::Error for FixtureError {}

impl From<ContainerError> for FixtureError {
    fn from(err: ContainerError) -> Self {
        FixtureError::Container(err)
    }
}

impl From<ConfigError> for FixtureError {
    fn from(err: ConfigError) -> Self {
        FixtureError::Config(err)
    }
}

impl From<std::io::Error> for FixtureError {
    fn from(err: std::io::Error) -> Self {
        FixtureError::IoError(err)
    }
}
