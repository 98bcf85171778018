//! FASTQ record output and the bounded in-memory byte pipe.
//!
//! The pipeline's producer writes kept reads through a gzip encoder into a
//! [`PipeWriter`]; the upload consumer drains the matching receiver. The
//! channel is bounded, so a slow consumer applies backpressure to the
//! filter instead of letting chunks pile up in memory.

use std::io::{self, Write};
use std::mem;

use crossbeam_channel::{bounded, Receiver, Sender};

/// Bytes accumulated before a chunk is pushed down the pipe.
pub const PIPE_CHUNK_SIZE: usize = 8 * 1024;

/// Chunks the pipe holds before the writer blocks.
pub const PIPE_DEPTH: usize = 8;

/// Creates the bounded pipe: a `Write` half for the compressor and a chunk
/// receiver for the uploader.
pub fn pipe() -> (PipeWriter, Receiver<Vec<u8>>) {
    let (tx, rx) = bounded(PIPE_DEPTH);
    (
        PipeWriter {
            tx,
            buf: Vec::with_capacity(PIPE_CHUNK_SIZE),
        },
        rx,
    )
}

/// `Write` adapter that sends buffered chunks into a bounded channel.
pub struct PipeWriter {
    tx: Sender<Vec<u8>>,
    buf: Vec<u8>,
}

impl PipeWriter {
    fn send_chunk(&mut self) -> io::Result<()> {
        if self.buf.is_empty() {
            return Ok(());
        }
        let chunk = mem::replace(&mut self.buf, Vec::with_capacity(PIPE_CHUNK_SIZE));
        self.tx
            .send(chunk)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "pipe reader disconnected"))
    }

    /// Flushes the remainder and closes the pipe. The receiver sees
    /// end-of-stream once this returns.
    pub fn finish(mut self) -> io::Result<()> {
        self.send_chunk()
    }
}

impl Write for PipeWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(data);
        if self.buf.len() >= PIPE_CHUNK_SIZE {
            self.send_chunk()?;
        }
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.send_chunk()
    }
}

impl Drop for PipeWriter {
    fn drop(&mut self) {
        let _ = self.send_chunk();
    }
}

/// Writes one read in the four-line FASTQ form. Records without qualities
/// (FASTA input) get a uniform placeholder so the output stays parseable.
pub fn write_record<W: Write>(
    out: &mut W,
    id: &[u8],
    seq: &[u8],
    qual: Option<&[u8]>,
) -> io::Result<()> {
    out.write_all(b"@")?;
    out.write_all(id)?;
    out.write_all(b"\n")?;
    out.write_all(seq)?;
    out.write_all(b"\n+\n")?;
    match qual {
        Some(qual) => out.write_all(qual)?,
        None => {
            for _ in 0..seq.len() {
                out.write_all(b"I")?;
            }
        }
    }
    out.write_all(b"\n")
}
