//! Amplicon scheme resolution and read classification.
//!
//! An [`AmpliconSet`] holds the amplicons of one resolved primer scheme,
//! each carrying the reference subsequence spanned by its outermost primers
//! and a MinHash sketch of that subsequence. Reads are classified by
//! comparing their sketch against every amplicon and taking the best
//! Jaccard-like score.

pub mod cache;
pub mod manifest;
pub mod resolve;

pub use cache::AmpliconCache;
pub use manifest::{Manifest, ManifestError, SchemeMetadata};
pub use resolve::SchemeResolver;

use std::collections::BTreeMap;

use thiserror::Error;

use crate::bio::KmerError;
use crate::sketch::{MinHash, SketchError};

/// K-mer width used for all sketches in a deployment.
pub const KMER_SIZE: usize = 7;

/// Number of hash values retained per sketch.
pub const SKETCH_SIZE: usize = 24;

#[derive(Error, Debug)]
pub enum AmpliconError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("manifest error: {0}")]
    Manifest(#[from] ManifestError),

    #[error("malformed primer record: {0}")]
    MalformedPrimer(String),

    #[error("primer parse error: {0}")]
    PrimerParse(#[from] csv::Error),

    #[error("reference parse error: {0}")]
    ReferenceParse(String),

    #[error("reference sequence {0} not found (needed by amplicon {1})")]
    UnknownReference(String, String),

    #[error("amplicon {0} spans no sequence after primer resolution")]
    EmptyInterval(String),

    #[error("k-mer error: {0}")]
    Kmer(#[from] KmerError),

    #[error("sketch error: {0}")]
    Sketch(#[from] SketchError),
}

/// One amplicon: a named interval on a reference sequence, bounded by the
/// leftmost forward primer start and the rightmost reverse primer end.
#[derive(Debug, Clone)]
pub struct Amplicon {
    pub reference_id: String,
    /// 0-based inclusive start (5' end of the leftmost forward primer).
    pub start: i64,
    /// Exclusive end (3' end of the rightmost reverse primer).
    pub end: i64,
    /// Reference subsequence over `start..end`.
    pub sequence: Vec<u8>,
    pub sketch: MinHash,
}

impl Amplicon {
    pub fn size(&self) -> i64 {
        self.end - self.start
    }
}

/// The amplicons of one resolved scheme, keyed by amplicon name.
/// Immutable after construction; names iterate in sorted order.
#[derive(Debug, Clone)]
pub struct AmpliconSet {
    amplicons: BTreeMap<String, Amplicon>,
    mean_size: i64,
}

impl AmpliconSet {
    pub fn new(amplicons: BTreeMap<String, Amplicon>) -> Self {
        let mean_size = if amplicons.is_empty() {
            0
        } else {
            let total: i64 = amplicons.values().map(Amplicon::size).sum();
            total / amplicons.len() as i64
        };
        AmpliconSet {
            amplicons,
            mean_size,
        }
    }

    /// Mean amplicon length, truncated to whole bases.
    pub fn mean_size(&self) -> i64 {
        self.mean_size
    }

    pub fn len(&self) -> usize {
        self.amplicons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amplicons.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Amplicon> {
        self.amplicons.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.amplicons.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Amplicon)> {
        self.amplicons.iter().map(|(name, amp)| (name.as_str(), amp))
    }

    /// Sketches a read and returns the best-scoring amplicon with its
    /// score. `None` when the read yields no hashes (for example a read
    /// that is all ambiguity codes, or one shorter than the k-mer width)
    /// or when the set is empty. Equal scores resolve to the first name
    /// in sorted order.
    pub fn top_hit(&self, read: &[u8]) -> Result<Option<(&str, f64)>, AmpliconError> {
        let read_sketch = match MinHash::of_sequence(read, KMER_SIZE, SKETCH_SIZE) {
            Ok(sketch) => sketch,
            Err(KmerError::BadK { .. }) => return Ok(None),
        };
        if read_sketch.is_empty() {
            return Ok(None);
        }
        let mut best: Option<(&str, f64)> = None;
        for (name, amplicon) in &self.amplicons {
            let score = amplicon.sketch.similarity(&read_sketch)?;
            match best {
                Some((_, top)) if score <= top => {}
                _ => best = Some((name, score)),
            }
        }
        Ok(best)
    }
}
