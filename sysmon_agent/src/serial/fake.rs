//! Scripted transport used in tests and demos: replays a fixed line stream on every open.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::{LineSource, SerialError, SerialTransport};

#[derive(Clone)]
pub struct FakeTransport {
    inner: Arc<Inner>,
}

struct Inner {
    lines: Vec<String>,
    line_delay: Option<Duration>,
    available: AtomicBool,
    opens: AtomicUsize,
}

impl FakeTransport {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(lines.into_iter().map(Into::into).collect(), None)
    }

    /// Every line read sleeps `delay` first, to imitate a slow or stalled device.
    pub fn with_line_delay<I, S>(lines: I, delay: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::build(lines.into_iter().map(Into::into).collect(), Some(delay))
    }

    fn build(lines: Vec<String>, line_delay: Option<Duration>) -> Self {
        Self {
            inner: Arc::new(Inner {
                lines,
                line_delay,
                available: AtomicBool::new(true),
                opens: AtomicUsize::new(0),
            }),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.inner.available.store(available, Ordering::SeqCst);
    }

    /// Number of open attempts so far, successful or not.
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }
}

impl SerialTransport for FakeTransport {
    fn open(&self, port: &str, _baud: u32) -> Result<Box<dyn LineSource>, SerialError> {
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        if !self.inner.available.load(Ordering::SeqCst) {
            return Err(SerialError::DeviceUnavailable {
                port: port.to_string(),
                reason: "not connected".into(),
            });
        }
        Ok(Box::new(FakeLines {
            lines: self.inner.lines.iter().cloned().collect(),
            delay: self.inner.line_delay,
        }))
    }
}

struct FakeLines {
    lines: VecDeque<String>,
    delay: Option<Duration>,
}

impl LineSource for FakeLines {
    fn read_line(&mut self) -> io::Result<Option<String>> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        Ok(self.lines.pop_front().map(|l| l.trim().to_string()))
    }
}
