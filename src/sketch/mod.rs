//! Sequence sketching.
//!
//! Bottom-k MinHash sketches summarise the canonical k-mer content of a
//! sequence in a fixed number of hash values, allowing cheap Jaccard-style
//! similarity estimates between a read and each amplicon reference.

pub mod minhash;

pub use minhash::{MinHash, SketchError};
