//! Shared fixtures for the integration suites: a locally mirrored primer
//! scheme and small FASTQ inputs.

// not every suite uses every helper
#![allow(dead_code)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::thread;
use std::time::{Duration, Instant};

use tempfile::TempDir;

use ampligate::config::Config;
use ampligate::service::{ProcessRequest, SampleInfo, Service, API_VERSION};

/// Deterministic pseudo-random base sequence.
pub fn synthetic_sequence(seed: u64, len: usize) -> Vec<u8> {
    let mut state = seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1;
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            b"ACGT"[(state % 4) as usize]
        })
        .collect()
}

/// A scratch deployment: scheme files on disk, a config pointing at them.
///
/// The scheme has two amplicons on a 600-base reference, `01` spanning
/// 0..400 and `02` spanning 150..550, so the mean amplicon size is 400 and
/// the filter's length window is [320, 480].
pub struct Fixture {
    pub dir: TempDir,
    pub config: Config,
    reference: Vec<u8>,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let reference = synthetic_sequence(99, 600);

        let reference_path = dir.path().join("reference.fasta");
        let mut fasta = b">ref1 local test reference\n".to_vec();
        fasta.extend_from_slice(&reference);
        fasta.push(b'\n');
        std::fs::write(&reference_path, fasta).unwrap();

        let primer_path = dir.path().join("primer.bed");
        let primers = "\
ref1\t0\t20\ttestscheme_01_LEFT\t1\t+
ref1\t380\t400\ttestscheme_01_RIGHT\t1\t-
ref1\t150\t170\ttestscheme_02_LEFT\t2\t+
ref1\t530\t550\ttestscheme_02_RIGHT\t2\t-
";
        std::fs::write(&primer_path, primers).unwrap();

        let manifest_path = dir.path().join("manifest.json");
        let manifest = serde_json::json!({
            "schemes": {
                "test-scheme": {
                    "aliases": ["test-scheme", "ts"],
                    "latest_version": 2,
                    "primer_urls": {"1": primer_path.to_str().unwrap()},
                    "reference_urls": {"1": reference_path.to_str().unwrap()},
                }
            }
        });
        std::fs::write(&manifest_path, manifest.to_string()).unwrap();

        let config = Config {
            address: "127.0.0.1".to_string(),
            port: 0,
            num_workers: 2,
            db_path: dir.path().join("db"),
            manifest_url: manifest_path.to_string_lossy().into_owned(),
            bucket_name: None,
            bucket_region: "eu-west-2".to_string(),
            out_dir: dir.path().join("out"),
        };

        Fixture {
            dir,
            config,
            reference,
        }
    }

    /// Slice of the fixture reference, i.e. a perfect amplicon read.
    pub fn amplicon(&self, start: usize, end: usize) -> Vec<u8> {
        self.reference[start..end].to_vec()
    }

    /// Writes reads as four-line FASTQ and returns the file path.
    pub fn write_fastq(&self, name: &str, reads: &[Vec<u8>]) -> String {
        let path = self.dir.path().join(name);
        let mut file = BufWriter::new(File::create(&path).unwrap());
        for (i, read) in reads.iter().enumerate() {
            writeln!(file, "@read{}", i).unwrap();
            file.write_all(read).unwrap();
            writeln!(file).unwrap();
            writeln!(file, "+").unwrap();
            writeln!(file, "{}", "I".repeat(read.len())).unwrap();
        }
        file.flush().unwrap();
        path.to_string_lossy().into_owned()
    }

    /// A submission against the fixture scheme, via its alias.
    pub fn request<S: AsRef<str>>(&self, id: &str, files: &[S]) -> ProcessRequest {
        ProcessRequest {
            api_version: API_VERSION.to_string(),
            sample_id: id.to_string(),
            input_fastq_files: files.iter().map(|f| f.as_ref().to_string()).collect(),
            scheme: "ts".to_string(),
            scheme_version: 1,
            endpoint: String::new(),
        }
    }
}

/// Polls the store until the sample reaches a terminal state.
pub fn await_terminal(service: &Service, id: &str) -> SampleInfo {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        if let Ok(sample) = service.sample(id) {
            if sample.state.is_terminal() {
                return sample;
            }
        }
        assert!(
            Instant::now() < deadline,
            "sample {id} did not reach a terminal state in time"
        );
        thread::sleep(Duration::from_millis(25));
    }
}
