//! Data types sent to viewers over WebSocket.
//! Keep this module minimal and stable; it defines the wire format.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// One sample of a probe: one slot per channel, `None` where nothing was read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub values: Vec<Option<f64>>,
    // epoch milliseconds
    pub timestamp: i64,
}

/// Static per-probe metadata, sent once when a viewer connects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeDescription {
    pub name: String,
    pub value_count: usize,
    pub extent: [f64; 2],
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub colors: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationMessage {
    pub configuration: BTreeMap<String, ProbeDescription>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataMessage {
    pub data: BTreeMap<String, Measurement>,
}
