//! sysmon agent: samples host CPU and serial-attached sensors, records every channel in a
//! round-robin time series, and streams live readings to WebSocket viewers.

pub mod config;
pub mod metrics;
pub mod probe;
pub mod sampler;
pub mod serial;
pub mod state;
pub mod storage;
pub mod subscribers;
pub mod throttle;
pub mod types;
pub mod ws;
