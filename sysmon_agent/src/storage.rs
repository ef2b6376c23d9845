//! One round-robin file per (probe, channel).

use std::path::{Path, PathBuf};

use sysmon_rrd::{Aggregation, ArchiveSpec, Database, RrdError, UpdateOutcome, DEFAULT_XFF};
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub struct StorageSettings {
    pub archives: Vec<ArchiveSpec>,
    pub xff: f32,
    pub aggregation: Aggregation,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            archives: sysmon_rrd::default_archives(),
            xff: DEFAULT_XFF,
            aggregation: Aggregation::Average,
        }
    }
}

pub struct ProbeStore {
    channels: Vec<Database>,
}

/// `<data_dir>/<kind>/<name>/<channel>.rrd`
pub fn channel_path(data_dir: &Path, kind: &str, name: &str, channel: usize) -> PathBuf {
    data_dir.join(kind).join(name).join(format!("{channel}.rrd"))
}

impl ProbeStore {
    /// Create (or reuse) the files for every channel.
    pub fn open(
        data_dir: &Path,
        kind: &str,
        name: &str,
        channels: usize,
        settings: &StorageSettings,
    ) -> Result<Self, RrdError> {
        let channels = (0..channels)
            .map(|i| {
                let path = channel_path(data_dir, kind, name, i);
                let existed = path.exists();
                let db = Database::create(
                    &path,
                    &settings.archives,
                    settings.xff,
                    settings.aggregation,
                    false,
                )?;
                if existed {
                    debug!(path = %path.display(), "reusing time series");
                }
                Ok(db)
            })
            .collect::<Result<Vec<_>, RrdError>>()?;
        Ok(Self { channels })
    }

    /// Write every present value at `ts` (epoch seconds). Absent values write nothing.
    pub fn write(&mut self, values: &[Option<f64>], ts: i64) {
        for (db, value) in self.channels.iter_mut().zip(values) {
            let Some(value) = value else { continue };
            match db.update(*value, ts) {
                Ok(UpdateOutcome::Written { .. }) => {}
                Ok(outcome) => debug!(path = %db.path().display(), ?outcome, ts, "point not stored"),
                Err(e) => warn!("time series write failed: {e}"),
            }
        }
    }
}
