//! Submission validation and the per-sample pipeline stage.

use std::fs::File;
use std::io;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::Receiver;
use flate2::write::GzEncoder;
use flate2::Compression;
use log::{debug, error, info};

use super::sample::{ProcessRequest, ProcessResponse, SampleInfo, SampleStats, State};
use super::{lock, Service, ServiceError};
use crate::amplicons::{AmpliconError, AmpliconSet};
use crate::filter::{ReadFilter, Verdict};
use crate::io::fastq;

impl Service {
    /// Validates a submission, persists its initial record, and enqueues it
    /// for processing. The request's scheme name is rewritten to its
    /// canonical form on the way in.
    pub fn process(&self, mut request: ProcessRequest) -> Result<ProcessResponse, ServiceError> {
        self.check_api(&request.api_version)?;
        if !self.is_open() {
            return Err(ServiceError::ShuttingDown);
        }
        if self.store.has(&request.sample_id)? {
            return Err(ServiceError::AlreadyExists(request.sample_id));
        }
        // validation may resolve a scheme over the network, so it runs
        // outside the admission lock; the duplicate check repeats under it
        self.validate(&mut request)?;

        let sample = SampleInfo::new(request);
        let id = sample.sample_id.clone();
        {
            let _admission = lock(&self.admission);
            if self.store.has(&id)? {
                return Err(ServiceError::AlreadyExists(id));
            }
            self.store.put(&sample)?;
            self.enqueue(sample)?;
        }
        info!("sample {} accepted", id);
        Ok(ProcessResponse {
            api_version: self.api_version().to_string(),
            id,
        })
    }

    // Checks the inputs exist, the scheme is known, and its amplicon set is
    // resolved into the cache. Rewrites the scheme name to canonical form.
    fn validate(&self, request: &mut ProcessRequest) -> Result<(), ServiceError> {
        if request.sample_id.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "sample requires an ID to be provided".to_string(),
            ));
        }
        if request.input_fastq_files.is_empty() {
            return Err(ServiceError::InvalidArgument(
                "no input FASTQ files provided".to_string(),
            ));
        }
        for file in &request.input_fastq_files {
            File::open(file).map_err(|e| {
                ServiceError::InvalidArgument(format!("can't open input file {}: {}", file, e))
            })?;
        }

        let (canonical, _) = self
            .manifest
            .resolve(&request.scheme, request.scheme_version)
            .map_err(|e| ServiceError::InvalidArgument(e.to_string()))?;
        let canonical = canonical.to_string();

        if self.cache.get(&canonical, request.scheme_version).is_none() {
            let set = self
                .resolver
                .resolve(&self.manifest, &canonical, request.scheme_version)
                .map_err(|e| match e {
                    AmpliconError::Manifest(m) => ServiceError::InvalidArgument(m.to_string()),
                    other => ServiceError::Resolve(other),
                })?;
            self.cache.insert(&canonical, request.scheme_version, set);
        }
        request.scheme = canonical;
        Ok(())
    }

    /// Worker loop: consume samples until the submission channel closes.
    pub(crate) fn run_worker(self: Arc<Self>, rx: Receiver<SampleInfo>) {
        while let Ok(mut sample) = rx.recv() {
            let was_cancelled = {
                let mut cancel = lock(&self.cancel_state);
                if cancel.requested.remove(&sample.sample_id) {
                    true
                } else {
                    cancel.running.insert(sample.sample_id.clone());
                    false
                }
            };
            if was_cancelled {
                info!("sample {} cancelled before processing", sample.sample_id);
                sample.finish(State::Cancelled);
            } else {
                // record the RUNNING transition so the request surface can
                // tell a dequeued sample from a queued one
                sample.state = State::Running;
                if let Err(e) = self.store.put(&sample) {
                    error!(
                        "failed to record running state for {}: {}",
                        sample.sample_id, e
                    );
                }
                self.run_pipeline(&mut sample);
                lock(&self.cancel_state).running.remove(&sample.sample_id);
            }
            // a store failure leaves this sample's terminal state unrecorded;
            // the service itself keeps serving
            if let Err(e) = self.store.put(&sample) {
                error!(
                    "failed to store terminal record for {}: {}",
                    sample.sample_id, e
                );
                continue;
            }
            self.publish(&sample);
        }
        debug!("worker exiting: submission queue closed");
    }

    // The pipeline stage for one sample: stream input records through the
    // filter into a gzip writer feeding the uploader, then decide the
    // terminal state.
    fn run_pipeline(&self, sample: &mut SampleInfo) {
        let set = match self
            .cache
            .get(&sample.request.scheme, sample.request.scheme_version)
        {
            Some(set) => set,
            None => {
                // validation resolves every scheme before enqueueing
                sample.record_error(format!(
                    "amplicon set for {} v{} missing from the cache",
                    sample.request.scheme, sample.request.scheme_version
                ));
                sample.finish(State::Error);
                return;
            }
        };

        info!(
            "processing sample {} against {} v{}",
            sample.sample_id, sample.request.scheme, sample.request.scheme_version
        );
        let mut stats = SampleStats::for_amplicon_set(&set);
        let upload = self.filter_and_upload(sample, &set, &mut stats);

        let kept = stats.kept_reads;
        let total = stats.total_reads;
        sample.process_stats = Some(stats);
        match upload {
            Ok(endpoint) => {
                sample.endpoint = endpoint;
                // partial results are allowed: errors only fail the sample
                // when nothing was salvaged
                if !sample.errors.is_empty() && kept == 0 {
                    sample.finish(State::Error);
                } else {
                    sample.finish(State::Success);
                }
            }
            Err(e) => {
                sample.record_error(format!("upload failed: {}", e));
                sample.finish(State::Error);
            }
        }
        info!(
            "sample {} finished {} ({}/{} reads kept)",
            sample.sample_id, sample.state, kept, total
        );
    }

    // Runs the producer (read, filter, compress) against the upload
    // consumer, coupled by the bounded pipe.
    fn filter_and_upload(
        &self,
        sample: &mut SampleInfo,
        set: &AmpliconSet,
        stats: &mut SampleStats,
    ) -> Result<String, io::Error> {
        let filter = ReadFilter::new(set);
        let (writer, chunks) = fastq::pipe();
        let key = sample.sample_id.clone();
        let files = sample.request.input_fastq_files.clone();

        thread::scope(|scope| {
            let consumer = scope.spawn(move || self.uploader.upload(chunks, &key));

            let mut encoder = GzEncoder::new(writer, Compression::default());
            'files: for file in &files {
                // a zero-byte input holds zero records; it is not a failure
                if std::fs::metadata(file).map(|m| m.len() == 0).unwrap_or(false) {
                    continue;
                }
                let mut reader = match needletail::parse_fastx_file(file) {
                    Ok(reader) => reader,
                    Err(e) => {
                        sample.record_error(format!("could not read {}: {}", file, e));
                        continue;
                    }
                };
                while let Some(record) = reader.next() {
                    let record = match record {
                        Ok(record) => record,
                        Err(e) => {
                            sample.record_error(format!("parse error in {}: {}", file, e));
                            continue 'files;
                        }
                    };
                    stats.total_reads += 1;
                    let seq = record.seq();
                    match filter.classify(&seq) {
                        Ok(Verdict::Keep { amplicon, .. }) => {
                            if let Some(count) = stats.amplicon_coverage.get_mut(amplicon) {
                                *count += 1;
                            }
                            stats.kept_reads += 1;
                            if let Err(e) =
                                fastq::write_record(&mut encoder, record.id(), &seq, record.qual())
                            {
                                // the pipe only breaks when the uploader died
                                sample.record_error(format!(
                                    "write to upload stream failed: {}",
                                    e
                                ));
                                break 'files;
                            }
                        }
                        Ok(_) => {}
                        Err(e) => {
                            sample.record_error(format!("read classification failed: {}", e));
                        }
                    }
                }
            }
            match encoder.finish() {
                Ok(writer) => {
                    if let Err(e) = writer.finish() {
                        sample.record_error(format!("closing the upload stream failed: {}", e));
                    }
                }
                Err(e) => {
                    sample.record_error(format!("compressor shutdown failed: {}", e));
                }
            }

            match consumer.join() {
                Ok(result) => result.map_err(|e| io::Error::new(io::ErrorKind::Other, e)),
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::Other,
                    "uploader thread panicked",
                )),
            }
        })
    }
}
