use chrono::{DateTime, Duration, Timelike, Utc};

const REGULAR_SUFFIX: &str = "20";

/// Whether a remote file is a per-interval raw capture or the hourly solar
/// aggregate the logger writes alongside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Solar,
}

/// One expected remote file, derived from a cursor position and the device
/// prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteFile {
    pub kind: FileKind,
    folder: String,
    name: String,
}

impl RemoteFile {
    fn regular(prefix: &str, cursor: DateTime<Utc>) -> Self {
        Self {
            kind: FileKind::Regular,
            folder: cursor.format("%Y%m%d").to_string(),
            name: format!(
                "{}_{}_{}.dat",
                prefix,
                cursor.format("%y%m%d_%H%M"),
                REGULAR_SUFFIX
            ),
        }
    }

    fn solar(prefix: &str, cursor: DateTime<Utc>) -> Self {
        Self {
            kind: FileKind::Solar,
            folder: cursor.format("%Y%m%d").to_string(),
            name: format!("{}_{}_solar.csv", prefix, cursor.format("%y%m%d_%H")),
        }
    }

    /// Remote path relative to the device's data root, e.g.
    /// `/20250319/KOA_250319_1406_20.dat`.
    pub fn path(&self) -> String {
        format!("/{}/{}", self.folder, self.name)
    }

    /// Path components for the local mirror, date folder then file name.
    pub fn local_components(&self) -> (&str, &str) {
        (&self.folder, &self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Lazy, finite, single-use schedule of expected remote filenames for one
/// sweep, walking backward from the sampled start time.
///
/// `now` is captured once at construction, so the produced sequence is a pure
/// function of the captured inputs but is NOT deterministic across separate
/// sweeps started at different wall-clock times. Construct a fresh `Schedule`
/// per sweep; it cannot be restarted in place.
pub struct Schedule {
    now: DateTime<Utc>,
    stop: DateTime<Utc>,
    prefix: String,
    step: Duration,
    cursor: Option<DateTime<Utc>>,
    pending: Option<RemoteFile>,
}

impl Schedule {
    pub fn new(
        now: DateTime<Utc>,
        stop: DateTime<Utc>,
        prefix: &str,
        file_duration_minutes: u32,
    ) -> Self {
        let step = Duration::minutes(i64::from(file_duration_minutes.max(1)));
        let cursor = if now < stop {
            tracing::warn!(%now, %stop, "sweep start is earlier than stop time; empty schedule");
            None
        } else {
            Some(align_cursor(now - step, file_duration_minutes.max(1)))
        };
        Self {
            now,
            stop,
            prefix: prefix.to_string(),
            step,
            cursor,
            pending: None,
        }
    }
}

/// Walk back minute by minute until the cursor minute is a multiple of the
/// file duration, then truncate to the whole minute.
fn align_cursor(mut cursor: DateTime<Utc>, file_duration_minutes: u32) -> DateTime<Utc> {
    while cursor.minute() % file_duration_minutes != 0 {
        cursor -= Duration::minutes(1);
    }
    cursor
        .with_second(0)
        .and_then(|c| c.with_nanosecond(0))
        .unwrap_or(cursor)
}

impl Iterator for Schedule {
    type Item = RemoteFile;

    fn next(&mut self) -> Option<RemoteFile> {
        if let Some(file) = self.pending.take() {
            return Some(file);
        }
        let cursor = self.cursor?;

        let regular = RemoteFile::regular(&self.prefix, cursor);
        let solar = cursor.minute() == 0
            && self.now.signed_duration_since(cursor) > Duration::minutes(60);

        let next = cursor - self.step;
        self.cursor = (next > self.stop).then_some(next);

        if solar {
            self.pending = Some(regular);
            Some(RemoteFile::solar(&self.prefix, cursor))
        } else {
            Some(regular)
        }
    }
}
