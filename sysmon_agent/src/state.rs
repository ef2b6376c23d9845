//! Shared agent state: the probe set, the viewer registry, and the precomputed greeting.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::info;

use crate::config::{AgentConfig, ConfigError, ProbeKindConfig};
use crate::metrics::CpuSource;
use crate::probe::{Probe, ProbeKind};
use crate::serial::{FrameCache, SerialTransport};
use crate::subscribers::SubscriberRegistry;
use crate::types::ConfigurationMessage;

#[derive(Clone)]
pub struct AppState {
    pub probes: Arc<[Arc<Probe>]>,
    pub subscribers: Arc<SubscriberRegistry>,
    // `{"configuration": {...}}`, serialized once; descriptions never change.
    pub configuration: Arc<str>,
}

impl AppState {
    pub fn new(probes: Vec<Arc<Probe>>, subscribers: Arc<SubscriberRegistry>) -> Self {
        let configuration: BTreeMap<_, _> = probes
            .iter()
            .map(|p| (p.name().to_string(), p.describe().clone()))
            .collect();
        let configuration = serde_json::to_string(&ConfigurationMessage { configuration })
            .unwrap_or_else(|_| r#"{"configuration":{}}"#.to_string());
        Self {
            probes: probes.into(),
            subscribers,
            configuration: Arc::from(configuration),
        }
    }

    /// Validate `config`, create every probe and its time-series files. Any error here is a
    /// startup failure.
    pub fn from_config(
        config: &AgentConfig,
        transport: Arc<dyn SerialTransport>,
        mut cpu_source: impl FnMut() -> Box<dyn CpuSource>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let data_dir = config.data_dir();
        let cache = Arc::new(FrameCache::new(transport, config.serial.cache_settings()));

        let mut probes = Vec::with_capacity(config.probes.len());
        for pc in &config.probes {
            let kind = match &pc.kind {
                ProbeKindConfig::CpuCores => ProbeKind::cpu_cores(cpu_source()),
                ProbeKindConfig::CpuTotal => ProbeKind::cpu_total(cpu_source()),
                ProbeKindConfig::Sensor { key, device, baud } => ProbeKind::sensor(
                    cache.clone(),
                    device.clone().unwrap_or_else(|| config.serial.device.clone()),
                    baud.unwrap_or(config.serial.baud),
                    key.clone(),
                ),
            };
            let storage = config.storage_for(pc)?;
            let probe = Probe::open(pc.name.clone(), kind, pc.options(), &data_dir, &storage)?;
            info!(
                probe = %probe.name(),
                kind = probe.kind().label(),
                channels = probe.channel_count(),
                min_interval = ?probe.min_interval(),
                "probe ready"
            );
            probes.push(Arc::new(probe));
        }

        Ok(Self::new(probes, Arc::new(SubscriberRegistry::default())))
    }
}
