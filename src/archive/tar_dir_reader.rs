use std::collections::HashSet;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use std::thread;

use log::{debug, error, warn};
use tar::{Builder, EntryType, Header, HeaderMode};
use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc::{self, Receiver};
use walkdir::{DirEntry, WalkDir};

use super::channel::{ChannelWriter, Frame};
use crate::error_handling::types::ArchiveError;

/// How an archived file is named inside the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EntryNaming {
    /// Only the file's base name. Files that share a base name in different
    /// directories end up under the same entry name, and an extractor keeps
    /// the one that comes last in traversal order.
    #[default]
    BaseName,
    /// The path relative to the root, `/`-separated.
    RelativePath,
}

impl EntryNaming {
    /// Built from the raw path components, so names that are not valid
    /// UTF-8 reach the header byte for byte.
    fn entry_name(self, relative: &Path) -> PathBuf {
        match self {
            EntryNaming::BaseName => relative
                .file_name()
                .map(PathBuf::from)
                .unwrap_or_default(),
            EntryNaming::RelativePath => relative
                .components()
                .map(|c| c.as_os_str())
                .collect(),
        }
    }
}

/// Externally visible lifecycle of a [`TarDirReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderState {
    Uninitialized,
    Initializing,
    Streaming,
    Done,
    Failed,
}

enum State {
    Uninitialized,
    Initializing,
    Streaming(Stream),
    Done,
    Failed,
}

/// Receiving side of the archive channel plus the chunk being drained.
struct Stream {
    rx: Receiver<Frame>,
    chunk: Vec<u8>,
    pos: usize,
}

impl Stream {
    fn has_buffered(&self) -> bool {
        self.pos < self.chunk.len()
    }

    fn drain_into(&mut self, buf: &mut [u8]) -> usize {
        let n = buf.len().min(self.chunk.len() - self.pos);
        buf[..n].copy_from_slice(&self.chunk[self.pos..self.pos + n]);
        self.pos += n;
        n
    }
}

enum Step {
    Ready(usize),
    NeedFrame,
}

#[derive(Debug)]
struct PendingEntry {
    path: PathBuf,
    name: PathBuf,
}

/// Presents a directory tree as a tar archive that can be read front to back
/// while it is being produced.
///
/// Nothing touches the filesystem until the first read. That read starts a
/// producer thread which walks the tree once, fixes the list of files to
/// archive and serializes them, in walk order, into a single-slot channel.
/// The first read returns only after the walk, so files added later are never
/// picked up. A walk failure is the first thing the channel delivers. Reads
/// drain that channel. The instance is good for exactly one pass.
///
/// Both [`std::io::Read`] and [`tokio::io::AsyncRead`] are implemented. The
/// blocking `Read` must not be used from inside a tokio runtime worker.
///
/// Dropping the reader before the end closes the channel; a producer parked
/// on a full slot wakes up, stops and releases the file it was copying.
///
/// ```no_run
/// use std::io::Read;
/// use fixture_pod::archive::TarDirReader;
///
/// let mut archive = Vec::new();
/// TarDirReader::new("./context").read_to_end(&mut archive)?;
/// # Ok::<(), std::io::Error>(())
/// ```
pub struct TarDirReader {
    root: PathBuf,
    naming: EntryNaming,
    state: State,
}

impl TarDirReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            naming: EntryNaming::default(),
            state: State::Uninitialized,
        }
    }

    pub fn with_naming(mut self, naming: EntryNaming) -> Self {
        self.naming = naming;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn state(&self) -> ReaderState {
        match self.state {
            State::Uninitialized => ReaderState::Uninitialized,
            State::Initializing => ReaderState::Initializing,
            State::Streaming(_) => ReaderState::Streaming,
            State::Done => ReaderState::Done,
            State::Failed => ReaderState::Failed,
        }
    }

    /// Runs the one-time initialization if it has not happened yet.
    fn ensure_started(&mut self) -> io::Result<()> {
        if !matches!(self.state, State::Uninitialized) {
            return Ok(());
        }
        self.state = State::Initializing;
        match self.start() {
            Ok(stream) => {
                self.state = State::Streaming(stream);
                Ok(())
            }
            Err(e) => {
                error!("Unable to stream {}: {}", self.root.display(), e);
                self.state = State::Failed;
                Err(e.into())
            }
        }
    }

    fn start(&self) -> Result<Stream, ArchiveError> {
        let (tx, rx) = mpsc::channel(1);
        let root = self.root.clone();
        let naming = self.naming;
        thread::Builder::new()
            .name("tar-dir-producer".to_string())
            .spawn(move || produce(&root, naming, ChannelWriter::new(tx)))
            .map_err(ArchiveError::Spawn)?;

        Ok(Stream {
            rx,
            chunk: Vec::new(),
            pos: 0,
        })
    }

    fn step(&mut self, buf: &mut [u8]) -> io::Result<Step> {
        match &mut self.state {
            State::Streaming(stream) if stream.has_buffered() || buf.is_empty() => {
                Ok(Step::Ready(stream.drain_into(buf)))
            }
            State::Streaming(_) => Ok(Step::NeedFrame),
            State::Done => Ok(Step::Ready(0)),
            State::Uninitialized | State::Initializing | State::Failed => {
                Err(ArchiveError::Spent.into())
            }
        }
    }

    /// Applies a frame received from the producer; `None` means the channel closed.
    fn accept(&mut self, frame: Option<Frame>) -> io::Result<()> {
        match frame {
            Some(Frame::Data(chunk)) => {
                if let State::Streaming(stream) = &mut self.state {
                    stream.chunk = chunk;
                    stream.pos = 0;
                }
                Ok(())
            }
            Some(Frame::End) => {
                debug!("Archive of {} fully read", self.root.display());
                self.state = State::Done;
                Ok(())
            }
            Some(Frame::Failed(err)) => {
                self.state = State::Failed;
                Err(err.into())
            }
            None => {
                self.state = State::Failed;
                Err(ArchiveError::ProducerLost.into())
            }
        }
    }
}

impl Read for TarDirReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.ensure_started()?;
        loop {
            if let Step::Ready(n) = self.step(buf)? {
                return Ok(n);
            }
            let frame = match &mut self.state {
                State::Streaming(stream) => stream.rx.blocking_recv(),
                _ => None,
            };
            self.accept(frame)?;
        }
    }
}

impl AsyncRead for TarDirReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        this.ensure_started()?;
        loop {
            if let Step::Ready(n) = this.step(buf.initialize_unfilled())? {
                buf.advance(n);
                return Poll::Ready(Ok(()));
            }
            let frame = match &mut this.state {
                State::Streaming(stream) => ready!(stream.rx.poll_recv(cx)),
                _ => None,
            };
            this.accept(frame)?;
        }
    }
}

/// Walks `root` in pre-order, siblings sorted by file name, and returns the
/// files to archive together with their entry names.
fn pending_queue(root: &Path, naming: EntryNaming) -> Result<Vec<PendingEntry>, ArchiveError> {
    let meta = fs::metadata(root).map_err(|e| ArchiveError::Metadata(root.to_path_buf(), e))?;
    if !meta.is_dir() {
        return Err(ArchiveError::NotADirectory(root.to_path_buf()));
    }

    let mut queue = Vec::new();
    let mut names = HashSet::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if !is_archivable(&entry) {
            continue;
        }
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let name = naming.entry_name(relative);
        if !names.insert(name.clone()) {
            warn!(
                "{} is archived as {}, which an earlier file already uses; extractors keep only the last one",
                entry.path().display(),
                name.display()
            );
        }
        queue.push(PendingEntry {
            path: entry.into_path(),
            name,
        });
    }
    Ok(queue)
}

/// Regular files, and symlinks that resolve to one.
fn is_archivable(entry: &DirEntry) -> bool {
    let file_type = entry.file_type();
    if file_type.is_file() {
        return true;
    }
    if file_type.is_symlink() {
        let resolved = fs::metadata(entry.path())
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !resolved {
            debug!("Skipping symlink {}", entry.path().display());
        }
        return resolved;
    }
    false
}

/// Producer thread body: walks `root`, serializes the queue and closes the
/// channel.
fn produce(root: &Path, naming: EntryNaming, mut writer: ChannelWriter) {
    let queue = match pending_queue(root, naming) {
        Ok(queue) => queue,
        Err(e) => {
            error!("Unable to stream {}: {}", root.display(), e);
            writer.abort(e);
            return;
        }
    };
    debug!(
        "Queued {} files from {} for archiving",
        queue.len(),
        root.display()
    );

    let mut builder = Builder::new(writer);
    builder.mode(HeaderMode::Complete);

    for entry in &queue {
        debug!("writing file to tar {}", entry.path.display());
        if let Err(e) = append_entry(&mut builder, entry) {
            if builder.get_ref().is_closed() {
                debug!("Archive reader went away, producer stops at {}", entry.path.display());
            } else {
                error!("Aborting archive: {}", e);
                builder.get_mut().abort(e);
            }
            return;
        }
    }

    if let Err(e) = builder.finish() {
        error!("Aborting archive: {}", e);
        builder.get_mut().abort(ArchiveError::Finish(e));
        return;
    }
    match builder.into_inner() {
        Ok(mut writer) => match writer.finish() {
            Ok(()) => debug!("writing complete, {} files archived", queue.len()),
            Err(e) => debug!("Archive reader went away before the end marker: {}", e),
        },
        Err(e) => error!("Failed to release archive writer: {}", e),
    }
}

/// Writes one file as header plus content, then flushes it to the reader.
/// The file handle is released when this returns, whatever the outcome.
fn append_entry(builder: &mut Builder<ChannelWriter>, entry: &PendingEntry) -> Result<(), ArchiveError> {
    let file = File::open(&entry.path).map_err(|e| ArchiveError::Open(entry.path.clone(), e))?;
    let meta = file
        .metadata()
        .map_err(|e| ArchiveError::Metadata(entry.path.clone(), e))?;

    let mut header = Header::new_gnu();
    header.set_metadata_in_mode(&meta, HeaderMode::Complete);
    header.set_entry_type(EntryType::Regular);
    header.set_size(meta.len());

    let mut content = ExactReader::new(file, meta.len());
    match builder.append_data(&mut header, &entry.name, &mut content) {
        Ok(()) => {}
        Err(_) if content.is_short() => {
            return Err(ArchiveError::Truncated {
                path: entry.path.clone(),
                expected: meta.len(),
                copied: content.copied,
            })
        }
        Err(e) => return Err(ArchiveError::Copy(entry.path.clone(), e)),
    }

    builder
        .get_mut()
        .flush()
        .map_err(|e| ArchiveError::Copy(entry.path.clone(), e))
}

/// Yields exactly `expected` bytes of `inner`, failing if it ends sooner.
/// Bytes past `expected` (a file growing mid-copy) are not read.
struct ExactReader<R> {
    inner: R,
    expected: u64,
    copied: u64,
    short: bool,
}

impl<R: Read> ExactReader<R> {
    fn new(inner: R, expected: u64) -> Self {
        Self {
            inner,
            expected,
            copied: 0,
            short: false,
        }
    }

    fn is_short(&self) -> bool {
        self.short
    }
}

impl<R: Read> Read for ExactReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.expected - self.copied;
        if remaining == 0 || buf.is_empty() {
            return Ok(0);
        }
        let max = buf.len().min(usize::try_from(remaining).unwrap_or(usize::MAX));
        let n = self.inner.read(&mut buf[..max])?;
        if n == 0 {
            self.short = true;
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "file shrank while archiving",
            ));
        }
        self.copied += n as u64;
        Ok(n)
    }
}
