use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

const SETTINGS_ENV: &str = "ADXL_SETTINGS";
const SETTINGS_FILE: &str = "settings.json";
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Timestamp format used by the settings file and checkpoint artifacts,
/// parsed as UTC.
pub const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub name: String,
    pub version: String,
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub host: String,
    pub user: String,
    pub password: String,
    pub download_folder: PathBuf,
    /// Sweep checkpoint, [`TIME_FORMAT`] in UTC. Overridden at startup by a
    /// newer per-device checkpoint file when one exists.
    pub start_time: String,
    /// Seconds between retries; 0 disables retry entirely.
    pub retry_delay: u64,
    /// Transfer chunk size in bytes.
    pub buffer_size: usize,
    /// Remote file interval in minutes; must divide 60.
    pub file_duration: u32,
    pub passive_mode: bool,
    pub remote_folder: String,
    /// At most 5 characters, embedded in every remote filename.
    pub remote_prefix: String,
    /// Sensor full-scale range in g, 2 or 4.
    pub remote_range: u8,
    /// Bits per axis in the raw records: 16, 24 or 32.
    #[serde(default = "default_data_width")]
    pub data_width: u8,
    /// Whether records carry a leading 2-byte logger timestamp.
    #[serde(default = "default_true")]
    pub timestamp_field: bool,
    /// Decode downloaded raw files inline and hand them to the output sink.
    #[serde(default)]
    pub data_parsing: bool,
}

fn default_data_width() -> u8 {
    16
}

fn default_true() -> bool {
    true
}

impl DeviceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            bail!("host must not be empty");
        }
        if self.remote_prefix.len() > 5 {
            bail!(
                "remote_prefix {:?} exceeds 5 characters",
                self.remote_prefix
            );
        }
        if self.file_duration == 0 || 60 % self.file_duration != 0 {
            bail!(
                "file_duration {} must be a divisor of 60",
                self.file_duration
            );
        }
        if !matches!(self.remote_range, 2 | 4) {
            bail!("remote_range {} must be 2 or 4", self.remote_range);
        }
        if !matches!(self.data_width, 16 | 24 | 32) {
            bail!("data_width {} must be 16, 24 or 32", self.data_width);
        }
        if self.buffer_size == 0 {
            bail!("buffer_size must be positive");
        }
        self.parsed_start_time()?;
        Ok(())
    }

    pub fn parsed_start_time(&self) -> Result<DateTime<Utc>> {
        parse_time(&self.start_time)
            .with_context(|| format!("malformed start_time {:?}", self.start_time))
    }
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    Ok(NaiveDateTime::parse_from_str(raw.trim(), TIME_FORMAT)?.and_utc())
}

pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.format(TIME_FORMAT).to_string()
}

/// Load the settings file named by `ADXL_SETTINGS` (default
/// `./settings.json`). When the file does not exist yet, the built-in
/// defaults are written to it and returned.
pub fn load_settings() -> Result<Settings> {
    let path = PathBuf::from(
        env::var(SETTINGS_ENV).unwrap_or_else(|_| SETTINGS_FILE.to_string()),
    );
    match fs::read_to_string(&path) {
        Ok(raw) => serde_json::from_str(&raw)
            .with_context(|| format!("parse {}", path.display())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let defaults = default_settings();
            tracing::info!(path = %path.display(), "settings file missing; writing defaults");
            fs::write(&path, serde_json::to_vec_pretty(&defaults)?)
                .with_context(|| format!("write {}", path.display()))?;
            Ok(defaults)
        }
        Err(err) => Err(err).with_context(|| format!("read {}", path.display())),
    }
}

pub fn default_settings() -> Settings {
    let device = |host: &str, folder: &str, prefix: &str| DeviceConfig {
        host: host.to_string(),
        user: "Kopri".to_string(),
        password: "KopriW5500".to_string(),
        download_folder: PathBuf::from(folder),
        start_time: "2025-03-19 00:00:00".to_string(),
        retry_delay: 300,
        buffer_size: 1024,
        file_duration: 2,
        passive_mode: false,
        remote_folder: "SUBSAMPLING_DATA".to_string(),
        remote_prefix: prefix.to_string(),
        remote_range: 4,
        data_width: 16,
        timestamp_field: true,
        data_parsing: false,
    };
    Settings {
        name: "ADXL collector settings".to_string(),
        version: "20250319".to_string(),
        devices: vec![
            device("192.168.0.200", "./Saved_Data_KOA", "KOA"),
            device("192.168.0.201", "./Saved_Data_KOB", "KOB"),
        ],
    }
}

/// Durable sweep-checkpoint capability. The store is private to one device's
/// worker; losing a write is logged and tolerated, never fatal.
pub trait CheckpointStore: Send {
    fn load(&self) -> Option<DateTime<Utc>>;
    fn save(&self, checkpoint: DateTime<Utc>) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDisk {
    start_time: String,
}

/// JSON checkpoint file in the device's download folder.
pub struct CheckpointFile {
    path: PathBuf,
}

impl CheckpointFile {
    pub fn new(download_folder: &Path) -> Self {
        Self {
            path: download_folder.join(CHECKPOINT_FILE),
        }
    }
}

impl CheckpointStore for CheckpointFile {
    fn load(&self) -> Option<DateTime<Utc>> {
        let raw = fs::read_to_string(&self.path).ok()?;
        let disk: CheckpointDisk = match serde_json::from_str(&raw) {
            Ok(disk) => disk,
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "corrupt checkpoint ignored");
                return None;
            }
        };
        match parse_time(&disk.start_time) {
            Ok(ts) => Some(ts),
            Err(err) => {
                tracing::warn!(path = %self.path.display(), error = %err, "corrupt checkpoint ignored");
                None
            }
        }
    }

    fn save(&self, checkpoint: DateTime<Utc>) -> Result<()> {
        let disk = CheckpointDisk {
            start_time: format_time(checkpoint),
        };
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec_pretty(&disk)?)
            .with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("rename {}", self.path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    #[test]
    fn default_devices_validate() {
        for device in default_settings().devices {
            device.validate().unwrap();
        }
    }

    #[test]
    fn start_time_parses_as_utc() {
        let device = default_settings().devices[0].clone();
        let parsed = device.parsed_start_time().unwrap();
        assert_eq!(parsed, Utc.with_ymd_and_hms(2025, 3, 19, 0, 0, 0).unwrap());
    }

    #[test]
    fn malformed_start_time_is_rejected() {
        let mut device = default_settings().devices[0].clone();
        device.start_time = "19/03/2025".to_string();
        assert!(device.validate().is_err());
    }

    #[test]
    fn file_duration_must_divide_sixty() {
        let mut device = default_settings().devices[0].clone();
        device.file_duration = 7;
        assert!(device.validate().is_err());
        device.file_duration = 0;
        assert!(device.validate().is_err());
        device.file_duration = 15;
        device.validate().unwrap();
    }

    #[test]
    fn long_prefix_is_rejected() {
        let mut device = default_settings().devices[0].clone();
        device.remote_prefix = "TOOLONG".to_string();
        assert!(device.validate().is_err());
    }

    #[test]
    fn settings_round_trip_through_json() {
        let settings = default_settings();
        let raw = serde_json::to_string(&settings).unwrap();
        let parsed: Settings = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed.devices.len(), 2);
        assert_eq!(parsed.devices[1].remote_prefix, "KOB");
    }

    #[test]
    fn optional_fields_default_when_missing() {
        let raw = r#"{
            "host": "192.168.0.200",
            "user": "u",
            "password": "p",
            "download_folder": "./data",
            "start_time": "2025-03-19 00:00:00",
            "retry_delay": 300,
            "buffer_size": 1024,
            "file_duration": 2,
            "passive_mode": true,
            "remote_folder": "SUBSAMPLING_DATA",
            "remote_prefix": "KOA",
            "remote_range": 4
        }"#;
        let device: DeviceConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(device.data_width, 16);
        assert!(device.timestamp_field);
        assert!(!device.data_parsing);
    }

    #[test]
    fn checkpoint_round_trip() {
        let dir = TempDir::new().unwrap();
        let store = CheckpointFile::new(dir.path());
        assert!(store.load().is_none());

        let ts = Utc.with_ymd_and_hms(2025, 3, 19, 13, 58, 0).unwrap();
        store.save(ts).unwrap();
        assert_eq!(store.load(), Some(ts));
    }

    #[test]
    fn corrupt_checkpoint_ignored() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(CHECKPOINT_FILE), b"nope").unwrap();
        let store = CheckpointFile::new(dir.path());
        assert!(store.load().is_none());
    }
}
