use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};

use crate::config::{CheckpointFile, Settings};
use crate::container::Lz4Codec;
use crate::remote::FtpClient;
use crate::signals::Signals;
use crate::sink::{LogSink, SampleSink};
use crate::worker::DeviceWorker;

/// Spawn one worker thread per configured device and wait for them all.
///
/// A device with an invalid configuration is logged and skipped; the rest
/// still run. The supervisor polls the shared signals once a second: a
/// worker raising the error signal stops every device, as does Ctrl-C.
pub async fn run(settings: Settings, signals: Arc<Signals>) -> Result<()> {
    let sink: Arc<dyn SampleSink> = Arc::new(LogSink);
    let codec = Arc::new(Lz4Codec);

    let mut handles = Vec::new();
    for device in settings.devices {
        if let Err(err) = device.validate() {
            tracing::error!(host = %device.host, error = %err, "invalid device config; skipping");
            continue;
        }
        let host = device.host.clone();
        let client = FtpClient::new(&device);
        let checkpoint = Box::new(CheckpointFile::new(&device.download_folder));
        let worker = match DeviceWorker::new(
            device,
            client,
            signals.clone(),
            checkpoint,
            sink.clone(),
            codec.clone(),
        ) {
            Ok(worker) => worker,
            Err(err) => {
                tracing::error!(host = %host, error = %err, "worker init failed; skipping");
                continue;
            }
        };
        let handle = thread::Builder::new()
            .name(format!("device-{host}"))
            .spawn(move || worker.run())?;
        handles.push(handle);
    }

    if handles.is_empty() {
        bail!("no runnable devices configured");
    }
    tracing::info!(workers = handles.len(), "supervisor running");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                signals.request_stop();
                break;
            }
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                if signals.error_raised() && !signals.stop_requested() {
                    tracing::warn!("worker raised the error signal; stopping all devices");
                    signals.request_stop();
                }
                if handles.iter().all(|handle| handle.is_finished()) {
                    break;
                }
            }
        }
    }

    for handle in handles {
        if handle.join().is_err() {
            tracing::error!("worker thread panicked");
        }
    }
    tracing::info!("all device workers stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_settings;
    use tempfile::TempDir;

    #[tokio::test]
    async fn empty_device_list_is_an_error() {
        let mut settings = default_settings();
        settings.devices.clear();
        assert!(run(settings, Signals::new()).await.is_err());
    }

    #[tokio::test]
    async fn invalid_devices_are_skipped() {
        let mut settings = default_settings();
        settings.devices.truncate(1);
        settings.devices[0].remote_prefix = "TOO_LONG_PREFIX".to_string();
        assert!(run(settings, Signals::new()).await.is_err());
    }

    #[tokio::test]
    async fn supervisor_drains_when_workers_finish() {
        let dir = TempDir::new().unwrap();
        let mut settings = default_settings();
        settings.devices.truncate(1);
        // An unresolvable host fails the probe immediately; retry disabled
        // means the worker stops after the first attempt.
        settings.devices[0].host = "does-not-resolve.invalid".to_string();
        settings.devices[0].retry_delay = 0;
        settings.devices[0].download_folder = dir.path().to_path_buf();
        assert!(run(settings, Signals::new()).await.is_ok());
    }
}
