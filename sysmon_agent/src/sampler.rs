//! Background sampler: every tick, measure each probe through its throttle and push one
//! JSON snapshot to all viewers.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Duration, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use crate::probe::Probe;
use crate::state::AppState;
use crate::types::{DataMessage, Measurement};

/// Runs one measurement task per probe. A probe still busy when the tick's deadline passes
/// keeps its task for the next tick and is represented by its last measurement meanwhile.
pub struct Sampler {
    probes: Vec<Arc<Probe>>,
    in_flight: HashMap<usize, JoinHandle<Measurement>>,
}

impl Sampler {
    pub fn new(probes: Vec<Arc<Probe>>) -> Self {
        Self {
            probes,
            in_flight: HashMap::new(),
        }
    }

    pub async fn collect(&mut self, budget: Duration) -> BTreeMap<String, Measurement> {
        for (i, probe) in self.probes.iter().enumerate() {
            self.in_flight.entry(i).or_insert_with(|| {
                let probe = probe.clone();
                tokio::spawn(async move { probe.get_data().await })
            });
        }

        let deadline = Instant::now() + budget;
        let mut snapshot = BTreeMap::new();
        for (i, probe) in self.probes.iter().enumerate() {
            let result = match self.in_flight.get_mut(&i) {
                Some(handle) => timeout_at(deadline, handle).await,
                None => continue,
            };
            match result {
                Ok(Ok(measurement)) => {
                    self.in_flight.remove(&i);
                    snapshot.insert(probe.name().to_string(), measurement);
                }
                Ok(Err(e)) => {
                    self.in_flight.remove(&i);
                    warn!(probe = %probe.name(), "measurement task failed: {e}");
                }
                Err(_) => {
                    debug!(probe = %probe.name(), "still measuring; serving last value");
                    if let Some(last) = probe.last_measurement() {
                        snapshot.insert(probe.name().to_string(), last);
                    }
                }
            }
        }
        snapshot
    }
}

pub fn spawn_sampler(state: AppState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sampler = Sampler::new(state.probes.to_vec());
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            let data = sampler.collect(period).await;
            // Probes are sampled regardless, so their history keeps filling with no viewers.
            if state.subscribers.is_empty() {
                continue;
            }
            match serde_json::to_string(&DataMessage { data }) {
                Ok(js) => {
                    let delivered = state.subscribers.broadcast(Arc::from(js));
                    debug!(delivered, "snapshot sent");
                }
                Err(e) => warn!("snapshot serialization failed: {e}"),
            }
        }
    })
}
