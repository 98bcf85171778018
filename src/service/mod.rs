//! The sample-screening service: request surface, worker pool, fan-out.
//!
//! [`Service::start`] opens the durable store, fetches the scheme manifest,
//! builds the upload target, and spins up the worker pool. Submissions are
//! validated on the caller's thread and handed to the workers through an
//! unbounded channel; workers own their sample until its terminal record is
//! written, then publish it to the attached watcher, if any.

pub mod process;
pub mod sample;
pub mod watch;

pub use sample::{ProcessRequest, ProcessResponse, SampleInfo, SampleStats, State};
pub use watch::{WatchBatch, WatchRequest};

use std::collections::HashSet;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Receiver, Sender};
use log::{error, info, warn};
use thiserror::Error;

use crate::amplicons::{AmpliconCache, AmpliconError, Manifest, SchemeResolver};
use crate::bucket::{Bucket, BucketError, Uploader};
use crate::config::{Config, ConfigError};
use crate::store::{SampleStore, StoreError};

/// Version of the request surface implemented by this build.
pub const API_VERSION: &str = "1";

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error(
        "unsupported API version requested: this service implements version \
         '{server}', but version '{requested}' was requested"
    )]
    Unimplemented { server: String, requested: String },

    #[error("duplicate sample can't be added to the database ({0})")]
    AlreadyExists(String),

    #[error("request failed validation: {0}")]
    InvalidArgument(String),

    #[error("scheme resolution failed: {0}")]
    Resolve(#[from] AmpliconError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("bucket error: {0}")]
    Bucket(#[from] BucketError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("service is shutting down")]
    ShuttingDown,
}

impl ServiceError {
    /// Stable error code used on the wire.
    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::Unimplemented { .. } => "Unimplemented",
            ServiceError::AlreadyExists(_) => "AlreadyExists",
            ServiceError::InvalidArgument(_) | ServiceError::Config(_) => "InvalidArgument",
            ServiceError::Resolve(_) => "Resolve",
            ServiceError::Store(_) => "Store",
            ServiceError::Bucket(_) => "Upload",
            ServiceError::Io(_) => "Internal",
            ServiceError::ShuttingDown => "Unavailable",
        }
    }
}

type WatcherSlot = Option<(u64, Sender<SampleInfo>)>;

/// Cancellation bookkeeping. Both sets live under one lock so the
/// queued-versus-running distinction stays atomic with the workers'
/// dequeue.
#[derive(Default)]
pub(crate) struct CancelState {
    /// Queued samples flagged for cancellation at dequeue.
    pub(crate) requested: HashSet<String>,
    /// Samples currently owned by a worker.
    pub(crate) running: HashSet<String>,
}

/// The running service. Shared across the transport threads via `Arc`.
pub struct Service {
    pub(crate) config: Config,
    pub(crate) store: SampleStore,
    pub(crate) manifest: Manifest,
    pub(crate) resolver: SchemeResolver,
    pub(crate) cache: AmpliconCache,
    pub(crate) uploader: Uploader,
    submit_tx: Mutex<Option<Sender<SampleInfo>>>,
    // serializes the duplicate check against the initial record write
    pub(crate) admission: Mutex<()>,
    watcher: Mutex<WatcherSlot>,
    watcher_seq: AtomicU64,
    pub(crate) cancel_state: Mutex<CancelState>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    open: AtomicBool,
}

impl Service {
    /// Builds the service and starts its worker pool. Any failure here is a
    /// startup failure: missing credentials, unreachable store path, or an
    /// unusable manifest.
    pub fn start(config: Config) -> Result<Arc<Service>, ServiceError> {
        config.validate()?;
        let resolver = SchemeResolver::new()?;
        let manifest = resolver.fetch_manifest(&config.manifest_url)?;
        let store = SampleStore::open(&config.db_path)?;
        let uploader = match &config.bucket_name {
            Some(name) => Uploader::Bucket(Bucket::new(name, &config.bucket_region)?),
            None => Uploader::LocalDir(config.out_dir.clone()),
        };

        let (submit_tx, submit_rx) = unbounded();
        let service = Arc::new(Service {
            store,
            manifest,
            resolver,
            cache: AmpliconCache::new(),
            uploader,
            submit_tx: Mutex::new(Some(submit_tx)),
            admission: Mutex::new(()),
            watcher: Mutex::new(None),
            watcher_seq: AtomicU64::new(0),
            cancel_state: Mutex::new(CancelState::default()),
            workers: Mutex::new(Vec::new()),
            open: AtomicBool::new(true),
            config,
        });

        let mut handles = Vec::with_capacity(service.config.num_workers);
        for i in 0..service.config.num_workers {
            let worker = Arc::clone(&service);
            let rx: Receiver<SampleInfo> = submit_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("ampligate-worker-{i}"))
                .spawn(move || worker.run_worker(rx))?;
            handles.push(handle);
        }
        *lock(&service.workers) = handles;
        info!(
            "service started with {} workers, store at {}",
            service.config.num_workers,
            service.config.db_path.display()
        );
        Ok(service)
    }

    pub fn api_version(&self) -> &str {
        API_VERSION
    }

    /// Looks up a sample's current record.
    pub fn sample(&self, id: &str) -> Result<SampleInfo, StoreError> {
        self.store.get(id)
    }

    pub(crate) fn check_api(&self, requested: &str) -> Result<(), ServiceError> {
        if requested != API_VERSION {
            return Err(ServiceError::Unimplemented {
                server: API_VERSION.to_string(),
                requested: requested.to_string(),
            });
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Hands a validated sample to the worker pool. Never blocks: the
    /// submission channel is unbounded.
    pub(crate) fn enqueue(&self, sample: SampleInfo) -> Result<(), ServiceError> {
        match lock(&self.submit_tx).as_ref() {
            Some(tx) => tx.send(sample).map_err(|_| ServiceError::ShuttingDown),
            None => Err(ServiceError::ShuttingDown),
        }
    }

    /// Installs a new live-completion subscriber, replacing any previous
    /// one. Returns the receiving half and a token used to uninstall.
    pub(crate) fn subscribe(&self) -> (u64, Receiver<SampleInfo>) {
        let id = self.watcher_seq.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = unbounded();
        let mut slot = lock(&self.watcher);
        if slot.is_some() {
            warn!("replacing an existing watch subscriber");
        }
        *slot = Some((id, tx));
        (id, rx)
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        let mut slot = lock(&self.watcher);
        if matches!(slot.as_ref(), Some((current, _)) if *current == id) {
            *slot = None;
        }
    }

    /// Sends a terminal record to the attached subscriber. With nobody
    /// attached the publication is dropped; either way the caller never
    /// blocks.
    pub(crate) fn publish(&self, sample: &SampleInfo) {
        let slot = lock(&self.watcher);
        if let Some((_, tx)) = slot.as_ref() {
            let _ = tx.send(sample.clone());
        }
    }

    /// Flags a queued sample for cancellation. Samples that a worker has
    /// already taken ownership of are not cancellable.
    pub fn cancel(&self, api_version: &str, sample_id: &str) -> Result<(), ServiceError> {
        self.check_api(api_version)?;
        // the lock is held across the store read so a worker cannot begin
        // this sample between the state check and the flag
        let mut cancel = lock(&self.cancel_state);
        if cancel.running.contains(sample_id) {
            return Err(ServiceError::InvalidArgument(format!(
                "sample {sample_id} is already running and can no longer be cancelled"
            )));
        }
        let record = self
            .store
            .get(sample_id)
            .map_err(|_| ServiceError::InvalidArgument(format!("unknown sample {sample_id}")))?;
        if record.state != State::Unknown {
            return Err(ServiceError::InvalidArgument(format!(
                "sample {} is {} and can no longer be cancelled",
                sample_id, record.state
            )));
        }
        cancel.requested.insert(sample_id.to_string());
        Ok(())
    }

    /// Graceful stop: drain the queue, join the workers, detach any
    /// watcher, then sync and close the store. Safe to call more than
    /// once.
    pub fn shutdown(&self) -> Result<(), ServiceError> {
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("shutting down: draining submission queue");
        lock(&self.submit_tx).take();
        let handles = std::mem::take(&mut *lock(&self.workers));
        for handle in handles {
            if handle.join().is_err() {
                error!("a worker thread panicked during shutdown");
            }
        }
        lock(&self.watcher).take();
        self.store.sync()?;
        self.store.close()?;
        info!("shutdown complete");
        Ok(())
    }
}

// Mutex poisoning only happens after a panic elsewhere; keep going with the
// inner value rather than compounding the failure.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
