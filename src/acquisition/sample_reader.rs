//! Line-oriented sample stream from the serial detector link.
//!
//! The device emits one `"<generator>,<detector>\n"` line per sample. The
//! reader turns the byte stream into an infinite, order-preserving sequence
//! of [`Sample`]s:
//!
//! - Malformed lines are logged at `debug!` and skipped; they never surface as
//!   errors and never produce a sample.
//! - Reading is a cooperative poll. When the device has no bytes queued the
//!   iterator sleeps for `poll_interval` and asks again.
//! - The partial-line buffer and parsed-but-unconsumed samples live in the
//!   reader, not in the iterator, so an iterator can be dropped and a new one
//!   resumes exactly where the previous one stopped.
//! - A [`CancelToken`] ends the iterator from another thread.
//!
//! The device is held open by a [`SampleSession`] guard that closes it on drop.

use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::SerialDevice;
use serde::Serialize;
use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Longest line kept while waiting for its newline.
const MAX_LINE_LEN: usize = 256;

/// Bytes read from the device per poll.
const READ_CHUNK: usize = 4096;

/// One `(generator, detector)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Sample {
    /// Reference generator channel
    pub generator: f64,
    /// Photodetector channel
    pub detector: f64,
}

impl Sample {
    /// Create a sample.
    pub fn new(generator: f64, detector: f64) -> Self {
        Self {
            generator,
            detector,
        }
    }
}

/// Why a line was rejected.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LineError {
    #[error("line is not valid UTF-8")]
    Decode,
    #[error("empty line")]
    Empty,
    #[error("expected 2 comma-separated fields, found {0}")]
    FieldCount(usize),
    #[error("could not convert '{0}' to float")]
    Number(String),
    #[error("non-finite value '{0}'")]
    NonFinite(String),
}

fn parse_field(field: &str) -> Result<f64, LineError> {
    let field = field.trim();
    let value: f64 = field
        .parse()
        .map_err(|_| LineError::Number(field.to_string()))?;
    if !value.is_finite() {
        return Err(LineError::NonFinite(field.to_string()));
    }
    Ok(value)
}

/// Parse one line (without its terminating newline).
pub fn parse_line(line: &[u8]) -> Result<Sample, LineError> {
    let text = std::str::from_utf8(line).map_err(|_| LineError::Decode)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(LineError::Empty);
    }

    let fields: Vec<&str> = text.split(',').collect();
    match fields.as_slice() {
        [generator, detector] => Ok(Sample::new(parse_field(generator)?, parse_field(detector)?)),
        other => Err(LineError::FieldCount(other.len())),
    }
}

/// Cooperative cancellation flag shared with a [`SampleReader`].
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Clear a previous cancellation.
    pub fn reset(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Reader state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReaderPhase {
    /// Device closed
    Closed,
    /// Waiting for bytes from the device
    Polling,
    /// Handing out already parsed samples
    Draining,
    /// Stopped by the cancel token
    Cancelled,
    /// Stopped by a device error, see [`SampleReader::take_error`]
    Failed,
}

/// Pull-based sample reader over a [`SerialDevice`].
pub struct SampleReader<D: SerialDevice> {
    device: D,
    poll_interval: Duration,
    phase: ReaderPhase,
    partial: Vec<u8>,
    pending: VecDeque<Sample>,
    chunk: Vec<u8>,
    cancel: CancelToken,
    error: Option<DaqError>,
    rejected_lines: u64,
    // Inside an overlong line, discarding up to the next newline
    skipping: bool,
}

impl<D: SerialDevice> std::fmt::Debug for SampleReader<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleReader")
            .field("phase", &self.phase)
            .field("poll_interval", &self.poll_interval)
            .field("pending", &self.pending.len())
            .field("partial_len", &self.partial.len())
            .field("rejected_lines", &self.rejected_lines)
            .finish()
    }
}

impl<D: SerialDevice> SampleReader<D> {
    /// Wrap a (closed) device.
    pub fn new(device: D, poll_interval: Duration) -> Self {
        Self {
            device,
            poll_interval,
            phase: ReaderPhase::Closed,
            partial: Vec::with_capacity(MAX_LINE_LEN),
            pending: VecDeque::new(),
            chunk: vec![0; READ_CHUNK],
            cancel: CancelToken::new(),
            error: None,
            rejected_lines: 0,
            skipping: false,
        }
    }

    /// Open the device and return a guard that closes it on drop.
    ///
    /// State left over from a previous session is discarded.
    pub fn open(&mut self) -> AppResult<SampleSession<'_, D>> {
        self.device.open()?;
        self.partial.clear();
        self.pending.clear();
        self.skipping = false;
        self.error = None;
        self.phase = ReaderPhase::Polling;
        Ok(SampleSession { reader: self })
    }

    fn close(&mut self) -> AppResult<()> {
        self.phase = ReaderPhase::Closed;
        self.device.close()
    }

    /// Discard bytes queued in the device and any partial line.
    pub fn flush(&mut self) -> AppResult<()> {
        self.device.clear_input()?;
        self.partial.clear();
        self.pending.clear();
        self.skipping = false;
        if self.phase == ReaderPhase::Draining {
            self.phase = ReaderPhase::Polling;
        }
        Ok(())
    }

    /// Infinite sample iterator. Ends only on cancellation, device error, or
    /// when the device is closed.
    pub fn samples(&mut self) -> Samples<'_, D> {
        Samples { reader: self }
    }

    /// Token that ends the iterator when cancelled.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Device error that ended the iterator, if any.
    pub fn take_error(&mut self) -> Option<DaqError> {
        self.error.take()
    }

    /// Current phase
    pub fn phase(&self) -> ReaderPhase {
        self.phase
    }

    /// Lines dropped as malformed since construction
    pub fn rejected_lines(&self) -> u64 {
        self.rejected_lines
    }

    /// Underlying device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Underlying device, mutably
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Unwrap the device.
    pub fn into_inner(self) -> D {
        self.device
    }

    /// Next sample, polling the device as needed.
    pub fn next_sample(&mut self) -> Option<Sample> {
        loop {
            if self.cancel.is_cancelled() {
                self.phase = ReaderPhase::Cancelled;
                return None;
            }
            match self.phase {
                ReaderPhase::Closed | ReaderPhase::Failed => return None,
                ReaderPhase::Cancelled => self.phase = ReaderPhase::Polling,
                ReaderPhase::Polling | ReaderPhase::Draining => {}
            }

            if let Some(sample) = self.pending.pop_front() {
                self.phase = if self.pending.is_empty() {
                    ReaderPhase::Polling
                } else {
                    ReaderPhase::Draining
                };
                return Some(sample);
            }

            match self.poll_device() {
                Ok(0) => std::thread::sleep(self.poll_interval),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Serial read failed, sample stream stopped");
                    self.phase = ReaderPhase::Failed;
                    self.error = Some(e);
                    return None;
                }
            }
        }
    }

    /// Read whatever is queued and split it into lines. Returns bytes read.
    fn poll_device(&mut self) -> AppResult<usize> {
        let available = self.device.bytes_available()?;
        if available == 0 {
            return Ok(0);
        }

        let want = available.min(self.chunk.len());
        let read = self.device.read_available(&mut self.chunk[..want])?;

        for i in 0..read {
            let byte = self.chunk[i];
            if byte == b'\n' {
                if self.skipping {
                    self.skipping = false;
                } else {
                    self.finish_line();
                }
            } else if self.skipping {
                continue;
            } else if self.partial.len() < MAX_LINE_LEN {
                self.partial.push(byte);
            } else {
                tracing::debug!(len = self.partial.len(), "Dropping overlong serial line");
                self.partial.clear();
                self.rejected_lines += 1;
                self.skipping = true;
            }
        }
        Ok(read)
    }

    fn finish_line(&mut self) {
        match parse_line(&self.partial) {
            Ok(sample) => self.pending.push_back(sample),
            Err(LineError::Empty) => {}
            Err(reason) => {
                self.rejected_lines += 1;
                tracing::debug!(
                    line = %String::from_utf8_lossy(&self.partial),
                    %reason,
                    "Skipping malformed serial line"
                );
            }
        }
        self.partial.clear();
    }
}

/// Open device guard. Closes the device when dropped.
pub struct SampleSession<'a, D: SerialDevice> {
    reader: &'a mut SampleReader<D>,
}

impl<D: SerialDevice> SampleSession<'_, D> {
    /// Close the device now, reporting any error.
    pub fn close(self) -> AppResult<()> {
        let mut session = std::mem::ManuallyDrop::new(self);
        session.reader.close()
    }
}

impl<D: SerialDevice> Deref for SampleSession<'_, D> {
    type Target = SampleReader<D>;

    fn deref(&self) -> &SampleReader<D> {
        self.reader
    }
}

impl<D: SerialDevice> DerefMut for SampleSession<'_, D> {
    fn deref_mut(&mut self) -> &mut SampleReader<D> {
        self.reader
    }
}

impl<D: SerialDevice> Drop for SampleSession<'_, D> {
    fn drop(&mut self) {
        if let Err(e) = self.reader.close() {
            tracing::warn!(error = %e, "Failed to close serial device");
        }
    }
}

/// Iterator returned by [`SampleReader::samples`].
pub struct Samples<'a, D: SerialDevice> {
    reader: &'a mut SampleReader<D>,
}

impl<D: SerialDevice> Iterator for Samples<'_, D> {
    type Item = Sample;

    fn next(&mut self) -> Option<Sample> {
        self.reader.next_sample()
    }
}
