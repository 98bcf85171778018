//! Sample submission and tracking types.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::amplicons::AmpliconSet;
use crate::filter::ReadFilter;

/// A request to screen one sample, as submitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRequest {
    pub api_version: String,
    #[serde(rename = "sampleID")]
    pub sample_id: String,
    #[serde(rename = "inputFASTQfiles")]
    pub input_fastq_files: Vec<String>,
    /// Scheme name or alias; rewritten to the canonical name during
    /// validation.
    pub scheme: String,
    pub scheme_version: i64,
    #[serde(default)]
    pub endpoint: String,
}

/// Acknowledgement returned for an accepted submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessResponse {
    pub api_version: String,
    pub id: String,
}

/// Lifecycle state of a sample. SUCCESS, ERROR and CANCELLED are terminal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    #[default]
    Unknown,
    Running,
    Success,
    Error,
    Cancelled,
}

impl State {
    pub fn is_terminal(self) -> bool {
        matches!(self, State::Success | State::Error | State::Cancelled)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Unknown => "UNKNOWN",
            State::Running => "RUNNING",
            State::Success => "SUCCESS",
            State::Error => "ERROR",
            State::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// Read-level counters collected while a sample is processed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleStats {
    pub total_reads: u64,
    pub kept_reads: u64,
    pub mean_amplicon_size: i64,
    pub length_min: i64,
    pub length_max: i64,
    /// Kept-read count per amplicon; keys are exactly the scheme's
    /// amplicon names.
    pub amplicon_coverage: BTreeMap<String, u64>,
}

impl SampleStats {
    /// Zeroed counters for a resolved scheme, with the length window
    /// precomputed from the mean amplicon size.
    pub fn for_amplicon_set(set: &AmpliconSet) -> Self {
        let filter = ReadFilter::new(set);
        SampleStats {
            total_reads: 0,
            kept_reads: 0,
            mean_amplicon_size: set.mean_size(),
            length_min: filter.length_min(),
            length_max: filter.length_max(),
            amplicon_coverage: set.names().map(|name| (name.to_string(), 0)).collect(),
        }
    }

    /// Returns `(covered amplicons, total amplicons, mean coverage)`.
    pub fn coverage_summary(&self) -> (usize, usize, f64) {
        let total = self.amplicon_coverage.len();
        let covered = self
            .amplicon_coverage
            .values()
            .filter(|&&count| count != 0)
            .count();
        let sum: u64 = self.amplicon_coverage.values().sum();
        let mean = if total == 0 {
            0.0
        } else {
            sum as f64 / total as f64
        };
        (covered, total, mean)
    }
}

/// Everything the service knows about one sample. Created at submission,
/// owned by a single worker while running, rewritten once in terminal form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleInfo {
    #[serde(rename = "sampleID")]
    pub sample_id: String,
    pub request: ProcessRequest,
    pub state: State,
    pub errors: Vec<String>,
    pub files_discovered: u32,
    /// Unix seconds at submission.
    pub start_time: i64,
    /// Unix seconds at the terminal transition; zero until then.
    pub end_time: i64,
    /// Upload location once the sample finished successfully.
    pub endpoint: String,
    pub process_stats: Option<SampleStats>,
}

impl SampleInfo {
    pub fn new(request: ProcessRequest) -> Self {
        SampleInfo {
            sample_id: request.sample_id.clone(),
            files_discovered: request.input_fastq_files.len() as u32,
            request,
            state: State::Unknown,
            errors: Vec::new(),
            start_time: unix_now(),
            end_time: 0,
            endpoint: String::new(),
            process_stats: None,
        }
    }

    /// Appends a processing error to the record.
    pub fn record_error(&mut self, err: impl fmt::Display) {
        self.errors.push(err.to_string());
    }

    /// Marks the record terminal.
    pub fn finish(&mut self, state: State) {
        debug_assert!(state.is_terminal());
        self.state = state;
        self.end_time = unix_now();
    }

    pub fn processing_seconds(&self) -> i64 {
        self.end_time - self.start_time
    }
}

pub(crate) fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
