//! Single-slot handoff between the archive producer thread and the reader.
//!
//! The producer owns a [`ChannelWriter`] and hands chunks of at most
//! [`CHUNK_SIZE`] bytes to the reader through a `tokio::sync::mpsc` channel of
//! capacity one. `blocking_send` parks the producer until the reader has taken
//! the previous chunk, so at most a few chunks are alive at any time no matter
//! how large the source tree is.

use std::io::{self, Write};
use std::mem;

use log::trace;
use tokio::sync::mpsc::Sender;

use crate::error_handling::types::ArchiveError;

/// Upper bound on the size of a single chunk handed to the reader.
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Unit of transfer on the archive channel.
#[derive(Debug)]
pub(crate) enum Frame {
    Data(Vec<u8>),
    Failed(ArchiveError),
    End,
}

/// `Write` half of the archive channel, used as the sink of a `tar::Builder`.
pub(crate) struct ChannelWriter {
    tx: Option<Sender<Frame>>,
    pending: Vec<u8>,
}

impl ChannelWriter {
    pub(crate) fn new(tx: Sender<Frame>) -> Self {
        Self {
            tx: Some(tx),
            pending: Vec::with_capacity(CHUNK_SIZE),
        }
    }

    /// True once the reader went away or the stream was ended or aborted.
    pub(crate) fn is_closed(&self) -> bool {
        self.tx.is_none()
    }

    fn send(&mut self, frame: Frame) -> io::Result<()> {
        let delivered = match &self.tx {
            Some(tx) => tx.blocking_send(frame).is_ok(),
            None => false,
        };
        if delivered {
            Ok(())
        } else {
            self.tx = None;
            Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "archive reader is gone",
            ))
        }
    }

    fn send_pending(&mut self) -> io::Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let chunk = mem::replace(&mut self.pending, Vec::with_capacity(CHUNK_SIZE));
        trace!("handing {} archive bytes to reader", chunk.len());
        self.send(Frame::Data(chunk))
    }

    /// Delivers whatever is pending, then the error, then closes the channel.
    pub(crate) fn abort(&mut self, err: ArchiveError) {
        let _ = self.send_pending();
        let _ = self.send(Frame::Failed(err));
        self.tx = None;
    }

    /// Delivers whatever is pending and the end marker, then closes the channel.
    pub(crate) fn finish(&mut self) -> io::Result<()> {
        self.send_pending()?;
        self.send(Frame::End)?;
        self.tx = None;
        Ok(())
    }
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "archive channel is closed",
            ));
        }
        let n = buf.len().min(CHUNK_SIZE - self.pending.len());
        self.pending.extend_from_slice(&buf[..n]);
        if self.pending.len() == CHUNK_SIZE {
            self.send_pending()?;
        }
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_pending()
    }
}
