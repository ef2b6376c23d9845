//! Per-port frame cache. Probes that read different keys of the same device share one
//! serial round-trip per cache window, and at most one blocking read per port runs at a time.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{read_device_frame, Frame, SerialError, SerialTransport};

#[derive(Debug, Clone, Copy)]
pub struct CacheSettings {
    /// How long a frame is served without touching the device.
    pub window: Duration,
    /// Upper bound a caller waits for a read; the read itself keeps running.
    pub read_timeout: Duration,
    /// After the device fails to open, callers get `DeviceUnavailable` until this elapses.
    pub retry_delay: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            window: Duration::from_secs(1),
            read_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_secs(10),
        }
    }
}

#[derive(Default)]
struct PortSlot {
    frame: Option<(Instant, Arc<Frame>)>,
    unavailable: Option<(Instant, String)>,
    // Completion time travels with the frame so an adopted read keeps its real age.
    pending: Option<JoinHandle<Result<(Instant, Frame), SerialError>>>,
}

pub struct FrameCache {
    transport: Arc<dyn SerialTransport>,
    settings: CacheSettings,
    ports: Mutex<HashMap<String, Arc<tokio::sync::Mutex<PortSlot>>>>,
}

impl FrameCache {
    pub fn new(transport: Arc<dyn SerialTransport>, settings: CacheSettings) -> Self {
        Self {
            transport,
            settings,
            ports: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, port: &str) -> Arc<tokio::sync::Mutex<PortSlot>> {
        let mut ports = self.ports.lock().unwrap_or_else(PoisonError::into_inner);
        ports.entry(port.to_string()).or_default().clone()
    }

    /// Latest frame for `port`, read from the device only when the cached one is stale.
    pub async fn get_frame(&self, port: &str, baud: u32) -> Result<Arc<Frame>, SerialError> {
        let slot = self.slot(port);
        let mut slot = slot.lock().await;

        let now = Instant::now();
        if let Some((at, frame)) = &slot.frame {
            if now.duration_since(*at) < self.settings.window {
                return Ok(frame.clone());
            }
        }
        if let Some((until, reason)) = &slot.unavailable {
            if now < *until {
                return Err(SerialError::DeviceUnavailable {
                    port: port.to_string(),
                    reason: reason.clone(),
                });
            }
        }

        // Adopt a read that outlived its caller instead of opening the device twice. If it
        // finished longer than a window ago its frame is stale and one fresh read is made.
        let mut adopted = slot.pending.take();
        loop {
            let reused = adopted.is_some();
            let mut handle = match adopted.take() {
                Some(handle) => handle,
                None => {
                    let transport = self.transport.clone();
                    let owned = port.to_string();
                    tokio::task::spawn_blocking(move || {
                        read_device_frame(&*transport, &owned, baud).map(|f| (Instant::now(), f))
                    })
                }
            };

            let joined = match tokio::time::timeout(self.settings.read_timeout, &mut handle).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!(port, timeout = ?self.settings.read_timeout, "serial read still running");
                    slot.pending = Some(handle);
                    return Err(SerialError::Timeout {
                        port: port.to_string(),
                    });
                }
            };

            return match joined.unwrap_or_else(|e| Err(SerialError::Io(io::Error::other(e)))) {
                Ok((read_at, _)) if reused && read_at.elapsed() >= self.settings.window => {
                    debug!(port, age = ?read_at.elapsed(), "adopted frame too old; reading again");
                    continue;
                }
                Ok((read_at, frame)) => {
                    debug!(port, keys = frame.len(), "serial frame read");
                    let frame = Arc::new(frame);
                    slot.frame = Some((read_at, frame.clone()));
                    slot.unavailable = None;
                    Ok(frame)
                }
                Err(SerialError::DeviceUnavailable { port, reason }) => {
                    warn!(
                        %port,
                        %reason,
                        retry_in = ?self.settings.retry_delay,
                        "device not available"
                    );
                    slot.unavailable = Some((Instant::now() + self.settings.retry_delay, reason.clone()));
                    Err(SerialError::DeviceUnavailable { port, reason })
                }
                Err(e) => {
                    warn!(port, "serial read failed: {e}");
                    Err(e)
                }
            };
        }
    }

    /// One key of the latest frame; `Ok(None)` when the device did not report it.
    pub async fn get_value(&self, port: &str, baud: u32, key: &str) -> Result<Option<f64>, SerialError> {
        Ok(self.get_frame(port, baud).await?.get(key))
    }
}
