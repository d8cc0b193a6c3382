//! Build-context streaming.
//!
//! [`TarDirReader`] turns a directory into a tar byte stream on the fly, so an
//! image build can start consuming the context before the whole tree has been
//! serialized and without an archive file on disk.
//!
//! Re-exports:
//! - [`TarDirReader`]: the streaming reader.
//! - [`EntryNaming`], [`ReaderState`]: its naming policy and lifecycle view.
//! - [`CHUNK_SIZE`]: largest chunk handed from the producer to the reader.

pub mod channel;
pub mod tar_dir_reader;

pub use channel::CHUNK_SIZE;
pub use tar_dir_reader::{EntryNaming, ReaderState, TarDirReader};
