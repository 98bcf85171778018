//! Rolling canonical k-mer hashing.
//!
//! [`CanonicalKmerHashes`] walks a byte sequence and yields one 64-bit hash
//! per k-mer window, computed with a rolling recurrence so each step is
//! constant time. The emitted value is the minimum of the forward hash and
//! the reverse-complement hash, which makes a sequence and its reverse
//! complement hash identically. Windows containing a non-ACGT byte yield
//! nothing.

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum KmerError {
    #[error("bad k-mer size: k = {k} for sequence of length {len}")]
    BadK { k: usize, len: usize },
}

// Per-base seeds, shared with other rolling-hash implementations so sketches
// built elsewhere with the same scheme stay comparable.
const SEED_A: u64 = 0x3c8b_fbb3_95c6_0474;
const SEED_C: u64 = 0x3193_c185_62a0_2b4c;
const SEED_G: u64 = 0x2032_3ed0_8257_2324;
const SEED_T: u64 = 0x2955_49f5_4be2_4456;

#[inline]
fn seed(base: u8) -> Option<u64> {
    match base.to_ascii_uppercase() {
        b'A' => Some(SEED_A),
        b'C' => Some(SEED_C),
        b'G' => Some(SEED_G),
        b'T' => Some(SEED_T),
        _ => None,
    }
}

#[inline]
fn comp_seed(base: u8) -> Option<u64> {
    match base.to_ascii_uppercase() {
        b'A' => Some(SEED_T),
        b'C' => Some(SEED_G),
        b'G' => Some(SEED_C),
        b'T' => Some(SEED_A),
        _ => None,
    }
}

/// Lazy iterator of canonical k-mer hashes over a byte sequence.
pub struct CanonicalKmerHashes<'a> {
    seq: &'a [u8],
    k: usize,
    // start of the window to emit next
    pos: usize,
    // (forward, reverse-complement) hashes of the window at `pos`;
    // None forces a from-scratch computation
    state: Option<(u64, u64)>,
}

impl<'a> CanonicalKmerHashes<'a> {
    pub fn new(seq: &'a [u8], k: usize) -> Result<Self, KmerError> {
        if k == 0 || k > seq.len() {
            return Err(KmerError::BadK { k, len: seq.len() });
        }
        Ok(CanonicalKmerHashes {
            seq,
            k,
            pos: 0,
            state: None,
        })
    }

    // Computes the window at `pos` from scratch. On a non-base byte, jumps
    // `pos` past the rightmost offender and returns None.
    fn init_window(&mut self) -> Option<(u64, u64)> {
        let start = self.pos;
        for i in (start..start + self.k).rev() {
            if seed(self.seq[i]).is_none() {
                self.pos = i + 1;
                return None;
            }
        }
        let mut fwd = 0u64;
        let mut rc = 0u64;
        for j in 0..self.k {
            let base = self.seq[start + j];
            fwd ^= seed(base).unwrap().rotate_left((self.k - 1 - j) as u32);
            rc ^= comp_seed(base).unwrap().rotate_left(j as u32);
        }
        Some((fwd, rc))
    }
}

impl<'a> Iterator for CanonicalKmerHashes<'a> {
    type Item = u64;

    fn next(&mut self) -> Option<u64> {
        while self.pos + self.k <= self.seq.len() {
            let (fwd, rc) = match self.state.take() {
                Some(state) => state,
                None => match self.init_window() {
                    Some(state) => state,
                    None => continue,
                },
            };
            let hash = fwd.min(rc);

            // roll into the next window before yielding
            let next = self.pos + 1;
            if next + self.k <= self.seq.len() {
                let incoming = self.seq[next + self.k - 1];
                match (seed(incoming), comp_seed(incoming)) {
                    (Some(seed_in), Some(comp_in)) => {
                        let outgoing = self.seq[self.pos];
                        let seed_out = seed(outgoing).unwrap();
                        let comp_out = comp_seed(outgoing).unwrap();
                        self.state = Some((
                            fwd.rotate_left(1) ^ seed_out.rotate_left(self.k as u32) ^ seed_in,
                            rc.rotate_right(1)
                                ^ comp_out.rotate_right(1)
                                ^ comp_in.rotate_left((self.k - 1) as u32),
                        ));
                        self.pos = next;
                    }
                    _ => {
                        // incoming byte is not a base; no window covering it
                        // produces a hash
                        self.state = None;
                        self.pos = next + self.k;
                    }
                }
            } else {
                self.state = None;
                self.pos = next;
            }
            return Some(hash);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bio::reverse_complement;

    // from-scratch reference for cross-checking the rolling updates
    fn naive(seq: &[u8], k: usize) -> Vec<u64> {
        let mut out = Vec::new();
        'window: for start in 0..=(seq.len() - k) {
            let mut fwd = 0u64;
            let mut rc = 0u64;
            for j in 0..k {
                let base = seq[start + j];
                if seed(base).is_none() {
                    continue 'window;
                }
                fwd ^= seed(base).unwrap().rotate_left((k - 1 - j) as u32);
                rc ^= comp_seed(base).unwrap().rotate_left(j as u32);
            }
            out.push(fwd.min(rc));
        }
        out
    }

    #[test]
    fn bad_k_rejected() {
        assert_eq!(
            CanonicalKmerHashes::new(b"ACGT", 0).err(),
            Some(KmerError::BadK { k: 0, len: 4 })
        );
        assert_eq!(
            CanonicalKmerHashes::new(b"ACGT", 5).err(),
            Some(KmerError::BadK { k: 5, len: 4 })
        );
    }

    #[test]
    fn window_count() {
        let hashes: Vec<u64> = CanonicalKmerHashes::new(b"ACGTACGTAC", 7)
            .unwrap()
            .collect();
        assert_eq!(hashes.len(), 4);
    }

    #[test]
    fn rolling_matches_from_scratch() {
        let seq = b"GATTACAGATTACACCGGTTAACCTTGGACGTACGT";
        for k in [3usize, 5, 7, 11] {
            let rolled: Vec<u64> = CanonicalKmerHashes::new(seq, k).unwrap().collect();
            assert_eq!(rolled, naive(seq, k), "k = {k}");
        }
    }

    #[test]
    fn reverse_complement_invariant() {
        let seq = b"CCGGTTAACCTTGGACGTACGTGATTACA";
        let rc = reverse_complement(seq);
        let fwd: Vec<u64> = CanonicalKmerHashes::new(seq, 7).unwrap().collect();
        let mut rev: Vec<u64> = CanonicalKmerHashes::new(&rc, 7).unwrap().collect();
        // mirrored positions carry the same canonical hash
        rev.reverse();
        assert_eq!(fwd, rev);
    }

    #[test]
    fn case_insensitive() {
        let upper: Vec<u64> = CanonicalKmerHashes::new(b"ACGTACGT", 5).unwrap().collect();
        let lower: Vec<u64> = CanonicalKmerHashes::new(b"acgtacgt", 5).unwrap().collect();
        assert_eq!(upper, lower);
    }

    #[test]
    fn ambiguous_windows_are_skipped() {
        // windows touching the N (starts 2..=4) must be absent
        let with_n = b"ACGTNACGTA";
        let hashes: Vec<u64> = CanonicalKmerHashes::new(with_n, 3).unwrap().collect();
        assert_eq!(hashes.len(), 5);
        let clean = naive(b"ACGTA", 3);
        assert_eq!(&hashes[..2], &naive(b"ACGT", 3)[..]);
        assert_eq!(&hashes[2..], &clean[..]);
    }

    #[test]
    fn all_ambiguous_yields_nothing() {
        let hashes: Vec<u64> = CanonicalKmerHashes::new(b"NNNNNNNN", 3).unwrap().collect();
        assert!(hashes.is_empty());
    }
}
