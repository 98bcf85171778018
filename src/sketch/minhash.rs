//! Bottom-k MinHash implementation.

use std::collections::{BinaryHeap, HashMap, HashSet};

use thiserror::Error;

use crate::bio::{CanonicalKmerHashes, KmerError};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SketchError {
    #[error("incompatible sketches: {0} does not match ({1} vs {2})")]
    Incompatible(&'static str, usize, usize),
}

/// A bottom-k sketch of 64-bit hash values.
///
/// The sketch is maintained as a max-heap so the largest retained hash sits
/// at the root: while the heap is below capacity every new distinct hash is
/// pushed, and once full a smaller candidate replaces the root.
#[derive(Debug, Clone)]
pub struct MinHash {
    kmer_size: usize,
    sketch_size: usize,
    heap: BinaryHeap<u64>,
    members: HashSet<u64>,
}

impl MinHash {
    /// Creates an empty sketch ready to receive hashed k-mers.
    pub fn new(kmer_size: usize, sketch_size: usize) -> Self {
        MinHash {
            kmer_size,
            sketch_size,
            heap: BinaryHeap::with_capacity(sketch_size),
            members: HashSet::with_capacity(sketch_size),
        }
    }

    /// Sketches a whole sequence with the crate's canonical hasher.
    pub fn of_sequence(seq: &[u8], kmer_size: usize, sketch_size: usize) -> Result<Self, KmerError> {
        let mut mh = MinHash::new(kmer_size, sketch_size);
        mh.add(CanonicalKmerHashes::new(seq, kmer_size)?);
        Ok(mh)
    }

    /// Folds a stream of hashes into the sketch, keeping the smallest
    /// distinct values seen so far.
    pub fn add(&mut self, hashes: impl IntoIterator<Item = u64>) {
        for hash in hashes {
            if self.members.contains(&hash) {
                continue;
            }
            if self.heap.len() < self.sketch_size {
                self.heap.push(hash);
                self.members.insert(hash);
            } else if let Some(mut top) = self.heap.peek_mut() {
                if *top > hash {
                    self.members.remove(&*top);
                    self.members.insert(hash);
                    *top = hash;
                }
            }
        }
    }

    /// Current sketch values, sorted ascending.
    pub fn snapshot(&self) -> Vec<u64> {
        let mut sketch: Vec<u64> = self.heap.iter().copied().collect();
        sketch.sort_unstable();
        sketch
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn kmer_size(&self) -> usize {
        self.kmer_size
    }

    pub fn sketch_size(&self) -> usize {
        self.sketch_size
    }

    /// Jaccard-like similarity between two completed sketches: the number of
    /// shared values over the size of the larger sketch. Sketches built with
    /// different parameters cannot be compared.
    pub fn similarity(&self, other: &MinHash) -> Result<f64, SketchError> {
        if self.kmer_size != other.kmer_size {
            return Err(SketchError::Incompatible(
                "k-mer size",
                self.kmer_size,
                other.kmer_size,
            ));
        }
        if self.sketch_size != other.sketch_size {
            return Err(SketchError::Incompatible(
                "sketch size",
                self.sketch_size,
                other.sketch_size,
            ));
        }
        let mut minimums: HashMap<u64, u32> = HashMap::with_capacity(self.heap.len());
        for &value in self.heap.iter() {
            *minimums.entry(value).or_insert(0) += 1;
        }
        let mut intersect = 0u32;
        for &value in other.heap.iter() {
            if let Some(count) = minimums.get_mut(&value) {
                if *count > 0 {
                    intersect += 1;
                    *count -= 1;
                }
            }
        }
        let max_len = self.heap.len().max(other.heap.len());
        if max_len == 0 {
            return Ok(0.0);
        }
        Ok(f64::from(intersect) / max_len as f64)
    }
}
