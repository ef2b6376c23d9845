//! Probes: named measurement sources producing a fixed number of channels per sample.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::metrics::CpuSource;
use crate::serial::FrameCache;
use crate::storage::{ProbeStore, StorageSettings};
use crate::types::{Measurement, ProbeDescription};

pub type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Wall clock in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub enum ProbeKind {
    /// One channel per logical core.
    CpuCores(Mutex<Box<dyn CpuSource>>),
    /// Overall utilization since the previous sample. The first sample after start may be
    /// a meaningless baseline.
    CpuTotal(Mutex<Box<dyn CpuSource>>),
    /// One key of the sensor frame on `port`.
    Sensor {
        cache: Arc<FrameCache>,
        port: String,
        baud: u32,
        key: String,
    },
}

impl ProbeKind {
    pub fn cpu_cores(source: Box<dyn CpuSource>) -> Self {
        ProbeKind::CpuCores(Mutex::new(source))
    }

    pub fn cpu_total(source: Box<dyn CpuSource>) -> Self {
        ProbeKind::CpuTotal(Mutex::new(source))
    }

    pub fn sensor(cache: Arc<FrameCache>, port: impl Into<String>, baud: u32, key: impl Into<String>) -> Self {
        ProbeKind::Sensor {
            cache,
            port: port.into(),
            baud,
            key: key.into(),
        }
    }

    /// Directory name used for this kind's time-series files.
    pub fn label(&self) -> &'static str {
        match self {
            ProbeKind::CpuCores(_) => "cpu_cores",
            ProbeKind::CpuTotal(_) => "cpu_total",
            ProbeKind::Sensor { .. } => "sensor",
        }
    }

    pub fn channel_count(&self) -> usize {
        match self {
            ProbeKind::CpuCores(source) => source
                .lock()
                .map(|s| s.core_count())
                .unwrap_or_else(|p| p.into_inner().core_count())
                .max(1),
            ProbeKind::CpuTotal(_) | ProbeKind::Sensor { .. } => 1,
        }
    }
}

/// Display hints and sampling policy shared by every kind.
#[derive(Debug, Clone)]
pub struct ProbeOptions {
    pub label: Option<String>,
    pub min_interval: Duration,
    pub extent: [f64; 2],
    pub height: Option<u32>,
    pub colors: Option<Vec<String>>,
}

impl Default for ProbeOptions {
    fn default() -> Self {
        Self {
            label: None,
            min_interval: Duration::from_millis(500),
            extent: [0.0, 100.0],
            height: None,
            colors: None,
        }
    }
}

pub struct Probe {
    pub(crate) name: String,
    pub(crate) kind: ProbeKind,
    pub(crate) description: ProbeDescription,
    pub(crate) min_interval: Duration,
    pub(crate) clock: Clock,
    // Held for the whole measure-and-store step, so one probe never measures twice at once.
    pub(crate) store: tokio::sync::Mutex<ProbeStore>,
    pub(crate) last: Mutex<Option<Measurement>>,
}

impl Probe {
    pub fn new(name: impl Into<String>, kind: ProbeKind, options: ProbeOptions, store: ProbeStore) -> Self {
        let name = name.into();
        let description = ProbeDescription {
            name: options.label.unwrap_or_else(|| name.clone()),
            value_count: kind.channel_count(),
            extent: options.extent,
            height: options.height,
            colors: options.colors,
        };
        Self {
            name,
            kind,
            description,
            min_interval: options.min_interval,
            clock: Arc::new(now_ms),
            store: tokio::sync::Mutex::new(store),
            last: Mutex::new(None),
        }
    }

    /// Build the probe and create or reuse its time-series files under `data_dir`.
    pub fn open(
        name: impl Into<String>,
        kind: ProbeKind,
        options: ProbeOptions,
        data_dir: &Path,
        settings: &StorageSettings,
    ) -> Result<Self, sysmon_rrd::RrdError> {
        let name = name.into();
        let store = ProbeStore::open(data_dir, kind.label(), &name, kind.channel_count(), settings)?;
        Ok(Self::new(name, kind, options, store))
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &ProbeKind {
        &self.kind
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    pub fn channel_count(&self) -> usize {
        self.description.value_count
    }

    pub fn describe(&self) -> &ProbeDescription {
        &self.description
    }

    /// Most recent measurement without waiting on an in-flight one.
    pub fn last_measurement(&self) -> Option<Measurement> {
        self.last
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sample the source. Always exactly `channel_count` slots; unreadable channels are `None`.
    pub async fn produce_values(&self) -> Vec<Option<f64>> {
        let n = self.channel_count();
        let mut values = match &self.kind {
            ProbeKind::CpuCores(source) => sample_cpu(source, |s| s.per_core()),
            ProbeKind::CpuTotal(source) => sample_cpu(source, |s| vec![s.overall()]),
            ProbeKind::Sensor {
                cache,
                port,
                baud,
                key,
            } => match cache.get_value(port, *baud, key).await {
                Ok(v) => vec![v],
                Err(e) => {
                    debug!(probe = %self.name, "sensor unreadable: {e}");
                    vec![None]
                }
            },
        };
        values.resize(n, None);
        values
    }
}

// Kept out of the async body so the guard never lives across an await.
fn sample_cpu(
    source: &Mutex<Box<dyn CpuSource>>,
    read: impl FnOnce(&mut dyn CpuSource) -> Vec<f32>,
) -> Vec<Option<f64>> {
    let mut guard = source.lock().unwrap_or_else(PoisonError::into_inner);
    read(&mut **guard).into_iter().map(|v| Some(v as f64)).collect()
}
