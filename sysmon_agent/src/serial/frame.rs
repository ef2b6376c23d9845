//! Frame assembly from the device's line stream.

use tracing::{debug, trace};

use super::{LineSource, SerialError, SerialTransport};

/// Sensor readings from one `>` ... `<` cycle, in the order first seen.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    entries: Vec<(String, f64)>,
}

impl Frame {
    /// Insert or replace; a repeated key keeps its first position and the last value.
    pub fn insert(&mut self, key: impl Into<String>, value: f64) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<f64> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| *v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseSkip {
    NoSeparator,
    EmptyKey,
    BadValue,
}

/// One classified protocol line.
#[derive(Debug, Clone, PartialEq)]
pub enum Line {
    Start,
    End,
    Pair(String, f64),
    Skipped(ParseSkip),
}

pub fn parse_line(raw: &str) -> Line {
    let line = raw.trim();
    match line {
        ">" => return Line::Start,
        "<" => return Line::End,
        _ => {}
    }
    let Some((key, value)) = line.split_once(':') else {
        return Line::Skipped(ParseSkip::NoSeparator);
    };
    let key = key.trim();
    if key.is_empty() {
        return Line::Skipped(ParseSkip::EmptyKey);
    }
    match value.trim().parse::<f64>() {
        Ok(v) if v.is_finite() => Line::Pair(key.to_string(), v),
        _ => Line::Skipped(ParseSkip::BadValue),
    }
}

fn next_line(source: &mut dyn LineSource) -> Result<String, SerialError> {
    source.read_line()?.ok_or(SerialError::Closed)
}

/// Read one complete frame. Lines before the first `>` are discarded; malformed lines
/// inside the frame are dropped; a second `>` before `<` restarts the frame.
pub fn read_frame(source: &mut dyn LineSource) -> Result<Frame, SerialError> {
    let mut skipped = 0usize;
    while parse_line(&next_line(source)?) != Line::Start {
        skipped += 1;
    }
    if skipped > 0 {
        trace!(skipped, "resynchronized on frame start");
    }

    let mut frame = Frame::default();
    loop {
        let raw = next_line(source)?;
        match parse_line(&raw) {
            Line::End => return Ok(frame),
            Line::Pair(key, value) => frame.insert(key, value),
            Line::Start => {
                debug!("frame restarted before end marker");
                frame = Frame::default();
            }
            Line::Skipped(why) => debug!(line = %raw, ?why, "dropping sensor line"),
        }
    }
}

/// Open `port` and read one frame from it.
pub fn read_device_frame(
    transport: &dyn SerialTransport,
    port: &str,
    baud: u32,
) -> Result<Frame, SerialError> {
    let mut source = transport.open(port, baud)?;
    read_frame(source.as_mut())
}
