//! Scheme resolution: manifest, primer coordinates, reference sequence.
//!
//! Primer coordinates arrive as a headerless tab-separated stream with the
//! fields `ref, start, end, name, pool, strand`. Primer names carry the
//! amplicon name as the second underscore-delimited field, so
//! `nCoV-2019_17_LEFT_alt` belongs to amplicon `17`. Forward primers pull
//! an amplicon's start left; reverse primers push its end right.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Cursor;
use std::time::Duration;

use log::{debug, info};
use rayon::prelude::*;
use reqwest::blocking::Client;
use reqwest::header;

use super::{
    Amplicon, AmpliconError, AmpliconSet, Manifest, ManifestError, KMER_SIZE, SKETCH_SIZE,
};
use crate::sketch::MinHash;

const FETCH_TIMEOUT: Duration = Duration::from_secs(60);

// Running extent of one amplicon while primer rows are folded in.
struct Extent {
    reference_id: String,
    start: i64,
    end: i64,
}

/// Downloads and assembles amplicon sets from a scheme registry.
pub struct SchemeResolver {
    client: Client,
}

impl SchemeResolver {
    pub fn new() -> Result<Self, AmpliconError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::USER_AGENT,
            header::HeaderValue::from_static("ampligate/0.1"),
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(FETCH_TIMEOUT)
            .build()?;
        Ok(SchemeResolver { client })
    }

    /// Downloads and parses the scheme registry document.
    pub fn fetch_manifest(&self, location: &str) -> Result<Manifest, AmpliconError> {
        info!("fetching scheme manifest from {}", location);
        let bytes = self.fetch(location)?;
        Ok(Manifest::parse(&bytes)?)
    }

    /// Resolves `(scheme, version)` against the manifest into a fully
    /// sketched [`AmpliconSet`].
    pub fn resolve(
        &self,
        manifest: &Manifest,
        scheme: &str,
        version: i64,
    ) -> Result<AmpliconSet, AmpliconError> {
        let (canonical, metadata) = manifest.resolve(scheme, version)?;
        let primer_url = metadata
            .primer_url(version)
            .ok_or_else(|| ManifestError::MissingUrl {
                scheme: canonical.to_string(),
                kind: "primer",
                version,
            })?;
        let reference_url =
            metadata
                .reference_url(version)
                .ok_or_else(|| ManifestError::MissingUrl {
                    scheme: canonical.to_string(),
                    kind: "reference",
                    version,
                })?;

        info!(
            "resolving amplicon set for {} v{} ({} primers, {} reference)",
            canonical, version, primer_url, reference_url
        );
        let extents = parse_primer_extents(&self.fetch(primer_url)?)?;
        let reference = index_reference(&self.fetch(reference_url)?)?;

        let mut amplicons = Vec::with_capacity(extents.len());
        for (name, extent) in extents {
            let sequence = reference
                .get(&extent.reference_id)
                .ok_or_else(|| {
                    AmpliconError::UnknownReference(extent.reference_id.clone(), name.clone())
                })?;
            if extent.end as usize > sequence.len() {
                return Err(AmpliconError::ReferenceParse(format!(
                    "amplicon {} ends at {} but reference {} is {} bases",
                    name,
                    extent.end,
                    extent.reference_id,
                    sequence.len()
                )));
            }
            let subsequence = sequence[extent.start as usize..extent.end as usize].to_vec();
            amplicons.push((
                name,
                Amplicon {
                    reference_id: extent.reference_id,
                    start: extent.start,
                    end: extent.end,
                    sequence: subsequence,
                    sketch: MinHash::new(KMER_SIZE, SKETCH_SIZE),
                },
            ));
        }

        // sketching each amplicon is independent work
        let sketched: Result<Vec<(String, Amplicon)>, AmpliconError> = amplicons
            .into_par_iter()
            .map(|(name, mut amplicon)| {
                amplicon.sketch =
                    MinHash::of_sequence(&amplicon.sequence, KMER_SIZE, SKETCH_SIZE)?;
                Ok((name, amplicon))
            })
            .collect();
        let set = AmpliconSet::new(sketched?.into_iter().collect());
        info!(
            "resolved {} amplicons for {} v{} (mean size {})",
            set.len(),
            canonical,
            version,
            set.mean_size()
        );
        Ok(set)
    }

    // Remote locations go through the HTTP client; anything else is read
    // from the filesystem so schemes can be mirrored locally.
    fn fetch(&self, location: &str) -> Result<Vec<u8>, AmpliconError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            debug!("GET {}", location);
            let response = self.client.get(location).send()?.error_for_status()?;
            Ok(response.bytes()?.to_vec())
        } else {
            Ok(fs::read(location)?)
        }
    }
}

/// Folds primer records into per-amplicon extents.
fn parse_primer_extents(bytes: &[u8]) -> Result<BTreeMap<String, Extent>, AmpliconError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(bytes);

    let mut extents: BTreeMap<String, Extent> = BTreeMap::new();
    for row in reader.records() {
        let row = row?;
        if row.len() < 6 {
            return Err(AmpliconError::MalformedPrimer(format!(
                "expected 6 fields, got {}: {:?}",
                row.len(),
                row
            )));
        }
        let reference_id = row[0].to_string();
        let start: i64 = row[1]
            .parse()
            .map_err(|_| AmpliconError::MalformedPrimer(format!("bad start: {}", &row[1])))?;
        let end: i64 = row[2]
            .parse()
            .map_err(|_| AmpliconError::MalformedPrimer(format!("bad end: {}", &row[2])))?;
        let amplicon_name = row[3]
            .split('_')
            .nth(1)
            .filter(|field| !field.is_empty())
            .ok_or_else(|| {
                AmpliconError::MalformedPrimer(format!("no amplicon name in: {}", &row[3]))
            })?
            .to_string();

        let extent = extents.entry(amplicon_name).or_insert_with(|| Extent {
            reference_id,
            start: i64::MAX,
            end: 0,
        });
        match &row[5] {
            "+" => extent.start = extent.start.min(start),
            "-" => extent.end = extent.end.max(end),
            strand => {
                return Err(AmpliconError::MalformedPrimer(format!(
                    "unknown strand {} in: {}",
                    strand, &row[3]
                )))
            }
        }
    }

    for (name, extent) in &extents {
        if extent.start == i64::MAX || extent.end == 0 || extent.start >= extent.end {
            return Err(AmpliconError::EmptyInterval(name.clone()));
        }
    }
    Ok(extents)
}

/// Indexes a FASTA stream by the first whitespace-delimited token of each
/// record header.
fn index_reference(bytes: &[u8]) -> Result<HashMap<String, Vec<u8>>, AmpliconError> {
    let mut reader = needletail::parse_fastx_reader(Cursor::new(bytes.to_vec()))
        .map_err(|e| AmpliconError::ReferenceParse(e.to_string()))?;
    let mut index = HashMap::new();
    while let Some(record) = reader.next() {
        let record = record.map_err(|e| AmpliconError::ReferenceParse(e.to_string()))?;
        let id = String::from_utf8_lossy(record.id())
            .split_ascii_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        if id.is_empty() {
            return Err(AmpliconError::ReferenceParse(
                "reference record with an empty id".to_string(),
            ));
        }
        index.insert(id, record.seq().to_vec());
    }
    if index.is_empty() {
        return Err(AmpliconError::ReferenceParse(
            "reference stream held no records".to_string(),
        ));
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;

    // two amplicons on one reference, with an alt primer thrown in
    const PRIMERS: &str = "\
ref1\t0\t10\tscheme_01_LEFT\t1\t+
ref1\t90\t100\tscheme_01_RIGHT\t1\t-
ref1\t80\t92\tscheme_02_LEFT\t2\t+
ref1\t190\t200\tscheme_02_RIGHT\t2\t-
ref1\t82\t92\tscheme_02_LEFT_alt\t2\t+
";

    fn reference_fasta(len: usize) -> Vec<u8> {
        let seq = super::super::test_support::synthetic_sequence(99, len);
        let mut fasta = b">ref1 test reference\n".to_vec();
        fasta.extend_from_slice(&seq);
        fasta.push(b'\n');
        fasta
    }

    #[test]
    fn primer_rows_fold_into_extents() {
        let extents = parse_primer_extents(PRIMERS.as_bytes()).unwrap();
        assert_eq!(extents.len(), 2);
        let one = &extents["01"];
        assert_eq!((one.start, one.end), (0, 100));
        let two = &extents["02"];
        assert_eq!((two.start, two.end), (80, 200));
    }

    #[test]
    fn bad_strand_is_malformed() {
        let rows = "ref1\t0\t10\tscheme_01_LEFT\t1\t*\n";
        assert!(matches!(
            parse_primer_extents(rows.as_bytes()),
            Err(AmpliconError::MalformedPrimer(_))
        ));
    }

    #[test]
    fn unpaired_primer_is_an_empty_interval() {
        let rows = "ref1\t0\t10\tscheme_01_LEFT\t1\t+\n";
        assert!(matches!(
            parse_primer_extents(rows.as_bytes()),
            Err(AmpliconError::EmptyInterval(_))
        ));
    }

    #[test]
    fn nameless_primer_is_malformed() {
        let rows = "ref1\t0\t10\tscheme\t1\t+\n";
        assert!(matches!(
            parse_primer_extents(rows.as_bytes()),
            Err(AmpliconError::MalformedPrimer(_))
        ));
    }

    #[test]
    fn reference_index_keys_on_first_token() {
        let index = index_reference(&reference_fasta(200)).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index["ref1"].len(), 200);
    }

    #[test]
    fn resolve_assembles_and_sketches() {
        let dir = tempfile::tempdir().unwrap();
        let primer_path = dir.path().join("primer.bed");
        let reference_path = dir.path().join("reference.fasta");
        fs::write(&primer_path, PRIMERS).unwrap();
        fs::write(&reference_path, reference_fasta(200)).unwrap();

        let doc = serde_json::json!({
            "schemes": {
                "test": {
                    "aliases": ["test", "t"],
                    "latest_version": 1,
                    "primer_urls": {"1": primer_path.to_str().unwrap()},
                    "reference_urls": {"1": reference_path.to_str().unwrap()},
                }
            }
        });
        let manifest = Manifest::parse(doc.to_string().as_bytes()).unwrap();

        let resolver = SchemeResolver::new().unwrap();
        let set = resolver.resolve(&manifest, "t", 1).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.mean_size(), 110);
        for (_, amplicon) in set.iter() {
            assert!(amplicon.start < amplicon.end);
            assert_eq!(amplicon.sequence.len(), amplicon.size() as usize);
            assert_eq!(amplicon.sketch.len(), SKETCH_SIZE);
        }
    }

    #[test]
    fn resolve_rejects_overhanging_amplicons() {
        let dir = tempfile::tempdir().unwrap();
        let primer_path = dir.path().join("primer.bed");
        let reference_path = dir.path().join("reference.fasta");
        fs::write(&primer_path, PRIMERS).unwrap();
        // reference shorter than amplicon 02's end
        fs::write(&reference_path, reference_fasta(150)).unwrap();

        let doc = serde_json::json!({
            "schemes": {
                "test": {
                    "aliases": ["test"],
                    "latest_version": 1,
                    "primer_urls": {"1": primer_path.to_str().unwrap()},
                    "reference_urls": {"1": reference_path.to_str().unwrap()},
                }
            }
        });
        let manifest = Manifest::parse(doc.to_string().as_bytes()).unwrap();
        let resolver = SchemeResolver::new().unwrap();
        assert!(matches!(
            resolver.resolve(&manifest, "test", 1),
            Err(AmpliconError::ReferenceParse(_))
        ));
    }

    // Live registry checks, kept out of the default run.

    const ARTIC_MANIFEST: &str =
        "https://raw.githubusercontent.com/artic-network/primer-schemes/master/schemes_manifest.json";

    #[test]
    #[ignore = "fetches the live ARTIC registry"]
    fn live_artic_v3_resolves() {
        let resolver = SchemeResolver::new().unwrap();
        let manifest = resolver.fetch_manifest(ARTIC_MANIFEST).unwrap();
        let (canonical, _) = manifest.resolve("scov2", 3).unwrap();
        assert_eq!(canonical, "sars-cov-2");

        let set = resolver.resolve(&manifest, "scov2", 3).unwrap();
        assert_eq!(set.len(), 98);
        assert_eq!(set.mean_size(), 393);
        for (_, amplicon) in set.iter() {
            assert_eq!(amplicon.sketch.len(), SKETCH_SIZE);
        }
    }
}
