use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::config::{format_time, CheckpointStore, DeviceConfig};
use crate::container::{decode_container, BlockCodec};
use crate::remote::{RemoteClient, RetrieveError};
use crate::samples::decode_samples;
use crate::schedule::{FileKind, RemoteFile, Schedule};
use crate::signals::Signals;
use crate::sink::SampleSink;
use crate::skiplist::SkipList;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SweepOutcome {
    /// Schedule exhausted, checkpoint advanced.
    Complete,
    /// Session could not be opened; retried per retry_delay.
    ConnectFailed,
    /// Transport failure mid-sweep; session aborted, error signal raised.
    Transport,
    /// Stop signal observed between retrievals.
    Stopped,
}

/// One device's retrieval engine.
///
/// Owns every piece of mutable per-device state (sweep checkpoint, skip
/// list); only the shared stop/error signals cross worker boundaries, and
/// those are polled before each retrieval, during cooldown and between
/// sweeps. An in-flight transfer is never cancelled.
pub struct DeviceWorker<C: RemoteClient> {
    device: DeviceConfig,
    client: C,
    signals: Arc<Signals>,
    checkpoint: Box<dyn CheckpointStore>,
    sink: Arc<dyn SampleSink>,
    codec: Arc<dyn BlockCodec>,
    skip_list: SkipList,
    start_time: DateTime<Utc>,
    clock: Box<dyn Fn() -> DateTime<Utc> + Send>,
}

impl<C: RemoteClient> DeviceWorker<C> {
    /// Build a worker for one device. Fails when the device has no usable
    /// start time, in which case the worker never starts.
    pub fn new(
        device: DeviceConfig,
        client: C,
        signals: Arc<Signals>,
        checkpoint: Box<dyn CheckpointStore>,
        sink: Arc<dyn SampleSink>,
        codec: Arc<dyn BlockCodec>,
    ) -> Result<Self> {
        fs::create_dir_all(&device.download_folder)?;
        // A checkpoint from an earlier run supersedes the settings value.
        let start_time = match checkpoint.load() {
            Some(ts) => {
                tracing::debug!(host = %device.host, start = %format_time(ts), "resuming from checkpoint");
                ts
            }
            None => device.parsed_start_time()?,
        };
        let skip_list = SkipList::load(&device.download_folder);
        Ok(Self {
            device,
            client,
            signals,
            checkpoint,
            sink,
            codec,
            skip_list,
            start_time,
            clock: Box::new(Utc::now),
        })
    }

    pub fn run(mut self) {
        let host = self.device.host.clone();
        tracing::info!(host = %host, "device worker started");

        while !self.signals.stop_requested() {
            // The skip list is reloaded once per sweep attempt.
            self.skip_list = SkipList::load(&self.device.download_folder);

            if !self.client.probe() {
                tracing::info!(host = %host, "connectivity probe failed");
                if self.cooldown() {
                    continue;
                }
                break;
            }

            if self.run_sweep() == SweepOutcome::Stopped {
                break;
            }
            if !self.cooldown() {
                break;
            }
        }

        tracing::info!(host = %host, "device worker stopped");
    }

    fn run_sweep(&mut self) -> SweepOutcome {
        let host = self.device.host.clone();
        let sweep_start = (self.clock)();

        if let Err(err) = self.client.connect() {
            tracing::error!(host = %host, error = %err, "session connect failed");
            return SweepOutcome::ConnectFailed;
        }
        tracing::info!(host = %host, "session connected");

        let schedule = Schedule::new(
            sweep_start,
            self.start_time,
            &self.device.remote_prefix,
            self.device.file_duration,
        );

        let mut outcome = SweepOutcome::Complete;
        for file in schedule {
            if self.signals.stop_requested() {
                outcome = SweepOutcome::Stopped;
                break;
            }

            let path = file.path();
            if self.skip_list.contains(&path) {
                tracing::debug!(host = %host, path = %path, "in skip list");
                continue;
            }
            if self.exists_locally(&file) {
                tracing::debug!(host = %host, path = %path, "already downloaded");
                continue;
            }

            match self.client.retrieve(&path) {
                Ok(data) => {
                    tracing::info!(host = %host, path = %path, bytes = data.len(), "transferred");
                    self.handle_payload(&file, &data);
                }
                Err(RetrieveError::Absent(_)) => {
                    tracing::debug!(host = %host, path = %path, "confirmed absent");
                    if self.skip_list.insert(path) {
                        if let Err(err) = self.skip_list.persist() {
                            tracing::error!(host = %host, error = %err, "skip list persist failed");
                        }
                    }
                }
                Err(err @ RetrieveError::Transport { .. }) => {
                    tracing::error!(host = %host, error = %err, "transport failure; aborting session");
                    self.signals.raise_error();
                    outcome = SweepOutcome::Transport;
                    break;
                }
            }
        }

        self.client.disconnect();
        if outcome == SweepOutcome::Complete {
            self.complete_sweep(sweep_start);
        }
        outcome
    }

    /// Advance the checkpoint, then clear the skip list. The order matters:
    /// a crash in between loses at worst redundant skip-list knowledge,
    /// never sweep progress.
    fn complete_sweep(&mut self, sweep_start: DateTime<Utc>) {
        let host = &self.device.host;
        let new_start =
            sweep_start - chrono::Duration::minutes(i64::from(self.device.file_duration));

        match self.checkpoint.save(new_start) {
            Ok(()) => {
                tracing::debug!(
                    host = %host,
                    checkpoint = %format_time(new_start),
                    "sweep complete; checkpoint advanced"
                );
                self.skip_list.clear();
                if let Err(err) = self.skip_list.persist() {
                    tracing::error!(host = %host, error = %err, "skip list persist failed");
                }
            }
            Err(err) => {
                tracing::error!(host = %host, error = %err, "checkpoint persist failed; skip list retained");
            }
        }
        self.start_time = new_start;
    }

    fn handle_payload(&mut self, file: &RemoteFile, data: &[u8]) {
        let host = self.device.host.clone();

        // The raw file is persisted regardless of what decoding makes of it.
        let local = self.local_path(file);
        if let Some(parent) = local.parent() {
            let _ = fs::create_dir_all(parent);
        }
        if let Err(err) = fs::write(&local, data) {
            tracing::error!(host = %host, path = %local.display(), error = %err, "failed to persist raw file");
        }

        if !self.device.data_parsing || file.kind != FileKind::Regular {
            return;
        }

        let payload = match decode_container(data, self.codec.as_ref()) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::error!(host = %host, file = file.name(), error = %err, "container decode failed; raw file kept");
                return;
            }
        };

        let samples = decode_samples(
            &payload,
            self.device.remote_range,
            self.device.data_width,
            self.device.timestamp_field,
        );
        if samples.is_empty() {
            tracing::error!(host = %host, file = file.name(), "sample decode produced no records");
            return;
        }

        if let Err(err) = self.sink.emit(&host, file.name(), &samples) {
            tracing::error!(host = %host, file = file.name(), error = %err, "output sink failed");
        }
    }

    fn local_path(&self, file: &RemoteFile) -> PathBuf {
        let (folder, name) = file.local_components();
        self.device.download_folder.join(folder).join(name)
    }

    fn exists_locally(&mut self, file: &RemoteFile) -> bool {
        let local = self.local_path(file);
        if let Some(parent) = local.parent() {
            if !parent.exists() {
                let _ = fs::create_dir_all(parent);
                return false;
            }
        }
        local.exists()
    }

    /// Sleep `retry_delay` seconds in 1-second slices, bailing out early if
    /// the stop signal is raised. Returns false when retry is disabled; the
    /// worker then stops instead of looping.
    fn cooldown(&self) -> bool {
        if self.device.retry_delay == 0 {
            return false;
        }
        for _ in 0..self.device.retry_delay {
            if self.signals.stop_requested() {
                break;
            }
            thread::sleep(Duration::from_secs(1));
        }
        true
    }
}
