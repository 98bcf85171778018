//! Streaming completed samples to a subscriber.

use std::io;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::sample::{SampleInfo, State};
use super::{Service, ServiceError};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchRequest {
    pub api_version: String,
    /// Replay already-successful samples from the store before streaming
    /// live completions.
    #[serde(default)]
    pub send_finished: bool,
}

/// One message on the watch stream. The replay arrives as a single batch;
/// live completions arrive one sample per batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchBatch {
    pub api_version: String,
    pub samples: Vec<SampleInfo>,
}

impl Service {
    /// Attaches a subscriber and feeds it batches through `sink` until the
    /// subscriber disconnects (the sink errors) or the service shuts down.
    /// A newer subscriber displaces the current one, whose stream then ends
    /// cleanly.
    pub fn watch<F>(&self, request: &WatchRequest, mut sink: F) -> Result<(), ServiceError>
    where
        F: FnMut(&WatchBatch) -> io::Result<()>,
    {
        self.check_api(&request.api_version)?;
        if !self.is_open() {
            return Err(ServiceError::ShuttingDown);
        }
        info!("watch subscriber attached (send_finished: {})", request.send_finished);

        // subscribe before the replay scan so completions that land during
        // the scan are queued, keeping replay strictly first
        let (token, live) = self.subscribe();
        let result = self.feed_watcher(request, &mut sink, &live);
        self.unsubscribe(token);
        debug!("watch subscriber detached");
        result
    }

    fn feed_watcher<F>(
        &self,
        request: &WatchRequest,
        sink: &mut F,
        live: &crossbeam_channel::Receiver<SampleInfo>,
    ) -> Result<(), ServiceError>
    where
        F: FnMut(&WatchBatch) -> io::Result<()>,
    {
        if request.send_finished {
            let mut samples = Vec::new();
            for record in self.store.samples() {
                let record = record?;
                if record.state == State::Success {
                    samples.push(record);
                }
            }
            let replay = WatchBatch {
                api_version: self.api_version().to_string(),
                samples,
            };
            if sink(&replay).is_err() {
                return Ok(());
            }
        }

        // ends when the subscriber drops, a newer subscriber displaces this
        // one, or shutdown closes the channel
        for sample in live {
            let batch = WatchBatch {
                api_version: self.api_version().to_string(),
                samples: vec![sample],
            };
            if sink(&batch).is_err() {
                break;
            }
        }
        Ok(())
    }
}
