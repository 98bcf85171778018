//! Streaming per-read filter.
//!
//! Reads are gated on length against a window around the scheme's mean
//! amplicon size, then classified by sketch similarity against every
//! amplicon. Only reads whose best score clears the keep threshold survive.

use crate::amplicons::{AmpliconError, AmpliconSet};

/// Minimum Jaccard-like score for a read to be kept.
pub const SCORE_THRESHOLD: f64 = 0.7;

/// Half-width of the length window, as a fraction of the mean amplicon size.
pub const LENGTH_TOLERANCE: f64 = 0.2;

/// Outcome of filtering one read.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict<'a> {
    /// Read length falls outside the window around the mean amplicon size.
    OffLength,
    /// Read yielded no k-mer hashes (ambiguous bases, or shorter than k).
    Unsketchable,
    /// Best amplicon score fell below the keep threshold.
    OffTarget { score: f64 },
    /// Read matched an amplicon well enough to keep.
    Keep { amplicon: &'a str, score: f64 },
}

impl Verdict<'_> {
    pub fn kept(&self) -> bool {
        matches!(self, Verdict::Keep { .. })
    }
}

/// Per-scheme read filter with precomputed length bounds.
pub struct ReadFilter<'a> {
    set: &'a AmpliconSet,
    length_min: i64,
    length_max: i64,
}

impl<'a> ReadFilter<'a> {
    pub fn new(set: &'a AmpliconSet) -> Self {
        let mean = set.mean_size();
        let spread = (LENGTH_TOLERANCE * mean as f64).round() as i64;
        ReadFilter {
            set,
            length_min: mean - spread,
            length_max: mean + spread,
        }
    }

    pub fn length_min(&self) -> i64 {
        self.length_min
    }

    pub fn length_max(&self) -> i64 {
        self.length_max
    }

    pub fn classify(&self, seq: &[u8]) -> Result<Verdict<'a>, AmpliconError> {
        let len = seq.len() as i64;
        if len < self.length_min || len > self.length_max {
            return Ok(Verdict::OffLength);
        }
        match self.set.top_hit(seq)? {
            None => Ok(Verdict::Unsketchable),
            Some((_, score)) if score < SCORE_THRESHOLD => Ok(Verdict::OffTarget { score }),
            Some((amplicon, score)) => Ok(Verdict::Keep { amplicon, score }),
        }
    }
}
