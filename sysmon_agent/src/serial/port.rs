//! Real serial devices via the `serialport` crate.

use std::io::BufReader;
use std::time::Duration;

use super::{Latin1Lines, LineSource, SerialError, SerialTransport};

/// Opens the OS device. Each blocking line read gives up after `read_timeout`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemSerial {
    read_timeout: Duration,
}

impl SystemSerial {
    pub fn new(read_timeout: Duration) -> Self {
        Self { read_timeout }
    }
}

impl Default for SystemSerial {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl SerialTransport for SystemSerial {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn LineSource>, SerialError> {
        let device = serialport::new(port, baud)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| SerialError::DeviceUnavailable {
                port: port.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Box::new(Latin1Lines::new(BufReader::new(device))))
    }
}
