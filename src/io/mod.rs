//! Read and write plumbing for the sample pipeline.

pub mod fastq;

pub use fastq::{pipe, write_record, PipeWriter, PIPE_CHUNK_SIZE, PIPE_DEPTH};
