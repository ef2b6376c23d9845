//! Sensor link: the `>` / `key:value` / `<` line protocol, the device transport, and the
//! per-port frame cache shared by every probe reading the same device.

pub mod cache;
pub mod fake;
pub mod frame;
pub mod port;

use std::io::{self, BufRead};

use thiserror::Error;

pub use cache::{CacheSettings, FrameCache};
pub use frame::{parse_line, read_device_frame, read_frame, Frame, Line, ParseSkip};
pub use port::SystemSerial;

#[derive(Debug, Error)]
pub enum SerialError {
    #[error("device {port} unavailable: {reason}")]
    DeviceUnavailable { port: String, reason: String },

    #[error("timed out reading a frame from {port}")]
    Timeout { port: String },

    #[error("stream ended before the frame was complete")]
    Closed,

    #[error("serial i/o: {0}")]
    Io(#[from] io::Error),
}

/// Blocking, line-at-a-time reader over an open device.
pub trait LineSource: Send {
    /// Next line, trimmed and without its terminator; `Ok(None)` at end of stream.
    fn read_line(&mut self) -> io::Result<Option<String>>;
}

/// Opens a device at a baud rate.
pub trait SerialTransport: Send + Sync + 'static {
    fn open(&self, port: &str, baud: u32) -> Result<Box<dyn LineSource>, SerialError>;
}

/// Decodes bytes as ISO-8859-1 so a noisy line never fails to decode.
pub struct Latin1Lines<R> {
    inner: R,
    buf: Vec<u8>,
}

impl<R: BufRead> Latin1Lines<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(64),
        }
    }
}

impl<R: BufRead + Send> LineSource for Latin1Lines<R> {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        self.buf.clear();
        if self.inner.read_until(b'\n', &mut self.buf)? == 0 {
            return Ok(None);
        }
        let line: String = self.buf.iter().map(|&b| b as char).collect();
        Ok(Some(line.trim().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn latin1_lines_trim_and_decode() {
        let raw: &[u8] = b">\r\ntemp:21.5\r\n\xb0C:1\n<";
        let mut lines = Latin1Lines::new(Cursor::new(raw));
        assert_eq!(lines.read_line().unwrap().as_deref(), Some(">"));
        assert_eq!(lines.read_line().unwrap().as_deref(), Some("temp:21.5"));
        assert_eq!(lines.read_line().unwrap().as_deref(), Some("\u{b0}C:1"));
        assert_eq!(lines.read_line().unwrap().as_deref(), Some("<"));
        assert_eq!(lines.read_line().unwrap(), None);
    }
}
