//! Synchronized acquisition controller.
//!
//! Sequences one observation:
//!
//! ```text
//! Idle -> WaitingForTrigger -> Capturing -> Aggregating -> Idle
//! ```
//!
//! - **WaitingForTrigger**: the serial stream is opened and flushed, and a
//!   blocking worker feeds generator values to the [`EdgeDetector`] until it
//!   fires.
//! - **Capturing**: the worker arms the frame sink at the trigger sample and
//!   keeps reading, collecting M detector values. The controller polls the
//!   sink until it holds N frames.
//! - **Aggregating**: frames are drained, the sink is reset and per-frame
//!   totals are computed.
//!
//! Each wait can be bounded. On expiry the worker is cancelled, the sink is
//! reset, the serial session closes and [`DaqError::Timeout`] is returned.
//!
//! Dropping a `calibrate` or `calc_state` future part-way cancels its worker.
//! The next call (or `shutdown`) joins it and takes the serial reader back.
//!
//! The controller owns the camera and the serial reader. Capture starts at
//! construction and stops in [`AcquisitionController::shutdown`] (also run on
//! drop).

use crate::acquisition::sample_reader::{CancelToken, SampleReader};
use crate::acquisition::trigger::{
    Calibration, CalibrationSettings, Calibrator, Clock, DeviceIntensityTrace, EdgeDetector,
    MonotonicClock, Threshold,
};
use crate::data::frame::{CropWindow, FrameBatch};
use crate::data::frame_sink::{ArmHandle, FrameSink};
use crate::data::visibility;
use crate::error::{AppResult, DaqError, Stage};
use crate::hardware::capabilities::{CameraDriver, SensorMode, SerialDevice};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Controller parameters.
#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    /// Frames per observation (N)
    pub n_frames: usize,
    /// Detector samples per observation (M)
    pub trace_len: usize,
    /// Camera exposure
    pub exposure_ms: f64,
    /// Camera readout mode
    pub sensor_mode: SensorMode,
    /// Horizontal crop applied at hand-off
    pub crop: Option<CropWindow>,
    /// Edge detector window size
    pub window_size: usize,
    /// Threshold calibration parameters
    pub calibration: CalibrationSettings,
    /// Frame sink poll period
    pub poll_interval: Duration,
    /// Sleep between serial reads when no bytes are queued
    pub serial_poll_interval: Duration,
    /// Bound on the wait for a trigger edge, `None` waits forever
    pub trigger_timeout: Option<Duration>,
    /// Bound on the capture window (frames and trace), `None` waits forever
    pub capture_timeout: Option<Duration>,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            n_frames: 16,
            trace_len: 120,
            exposure_ms: 1.0,
            sensor_mode: SensorMode::Raw8,
            crop: None,
            window_size: EdgeDetector::DEFAULT_WINDOW,
            calibration: CalibrationSettings::default(),
            poll_interval: Duration::from_millis(1),
            serial_poll_interval: Duration::from_millis(1),
            trigger_timeout: None,
            capture_timeout: None,
        }
    }
}

/// Controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionState {
    /// No acquisition in progress
    Idle,
    /// Serial stream open, waiting for a generator edge
    WaitingForTrigger,
    /// Sink armed, frames and detector samples accumulating
    Capturing,
    /// Building the observation
    Aggregating,
}

/// One time-aligned observation.
#[derive(Debug, Clone, Serialize)]
pub struct Observation {
    /// N frames and their total intensities
    pub frames: FrameBatch,
    /// M detector samples over the same window
    pub device_trace: DeviceIntensityTrace,
    /// Completion time
    pub captured_at: DateTime<Utc>,
}

impl Observation {
    /// Per-frame total intensities.
    pub fn camera_intensities(&self) -> &[u64] {
        self.frames.intensities()
    }

    /// Fringe visibility seen by the camera.
    pub fn camera_visibility(&self) -> Option<f64> {
        visibility::camera_visibility(self.camera_intensities())
    }

    /// Fringe visibility seen by the photodetector.
    pub fn device_visibility(&self, k: usize, offset: f64) -> Option<f64> {
        visibility::device_visibility(&self.device_trace.samples, k, offset)
    }
}

/// What a serial worker hands back besides the reader.
enum WorkerOutput {
    Calibration(AppResult<Calibration>),
    Trace(AppResult<DeviceIntensityTrace>),
}

impl WorkerOutput {
    fn into_calibration(self) -> AppResult<Calibration> {
        match self {
            Self::Calibration(result) => result,
            Self::Trace(_) => Err(DaqError::Worker("Expected a calibration result".into())),
        }
    }

    fn into_trace(self) -> AppResult<DeviceIntensityTrace> {
        match self {
            Self::Trace(result) => result,
            Self::Calibration(_) => Err(DaqError::Worker("Expected a detector trace".into())),
        }
    }
}

type Worker<D> = JoinHandle<(SampleReader<D>, WorkerOutput)>;

/// Cancels the serial worker and disarms the sink when an acquisition future
/// is dropped before completing.
struct AbandonGuard {
    cancel: CancelToken,
    arm: ArmHandle,
    active: bool,
}

impl AbandonGuard {
    fn new(cancel: CancelToken, arm: ArmHandle) -> Self {
        Self {
            cancel,
            arm,
            active: true,
        }
    }

    fn defuse(mut self) {
        self.active = false;
    }
}

impl Drop for AbandonGuard {
    fn drop(&mut self) {
        if self.active {
            warn!("Acquisition abandoned, cancelling serial worker");
            self.cancel.cancel();
            self.arm.disarm();
        }
    }
}

/// Orchestrates trigger, frame sink and detector sampling.
pub struct AcquisitionController<C: CameraDriver, D: SerialDevice + 'static> {
    camera: C,
    sink: FrameSink,
    reader: Option<SampleReader<D>>,
    worker: Option<Worker<D>>,
    cancel: CancelToken,
    settings: AcquisitionSettings,
    threshold: Option<Threshold>,
    state: AcquisitionState,
    clock: Arc<dyn Clock>,
    released: bool,
}

impl<C: CameraDriver, D: SerialDevice + 'static> std::fmt::Debug for AcquisitionController<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcquisitionController")
            .field("state", &self.state)
            .field("threshold", &self.threshold)
            .field("sink", &self.sink)
            .field("worker_pending", &self.worker.is_some())
            .field("released", &self.released)
            .finish()
    }
}

impl<C: CameraDriver, D: SerialDevice + 'static> AcquisitionController<C, D> {
    /// Configure the camera and start continuous capture into a fresh sink.
    ///
    /// Fails with [`DaqError::Configuration`] if `n_frames` or `trace_len` is
    /// zero.
    pub fn new(mut camera: C, device: D, settings: AcquisitionSettings) -> AppResult<Self> {
        if settings.n_frames == 0 {
            return Err(DaqError::Configuration("n_frames must be at least 1".into()));
        }
        if settings.trace_len == 0 {
            return Err(DaqError::Configuration("trace_len must be at least 1".into()));
        }

        camera.set_sensor_mode(settings.sensor_mode)?;
        camera.set_exposure_ms(settings.exposure_ms)?;

        let (sink, handler) = FrameSink::new(settings.n_frames, settings.crop);
        camera.start_capture(handler)?;

        let (width, height) = camera.resolution();
        info!(
            width,
            height,
            n_frames = settings.n_frames,
            trace_len = settings.trace_len,
            "Acquisition controller ready"
        );

        let reader = SampleReader::new(device, settings.serial_poll_interval);
        Ok(Self {
            camera,
            sink,
            cancel: reader.cancel_token(),
            reader: Some(reader),
            worker: None,
            settings,
            threshold: None,
            state: AcquisitionState::Idle,
            clock: Arc::new(MonotonicClock::default()),
            released: false,
        })
    }

    /// Replace the calibration time source.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Current state
    ///
    /// An abandoned acquisition whose worker is winding down reports `Idle`.
    pub fn state(&self) -> AcquisitionState {
        if self.worker.is_some() && self.cancel.is_cancelled() {
            AcquisitionState::Idle
        } else {
            self.state
        }
    }

    /// Calibrated threshold, if any
    pub fn threshold(&self) -> Option<Threshold> {
        self.threshold
    }

    /// Use a previously calibrated threshold.
    pub fn set_threshold(&mut self, threshold: Threshold) {
        self.threshold = Some(threshold);
    }

    /// Parameters
    pub fn settings(&self) -> &AcquisitionSettings {
        &self.settings
    }

    /// Frame sink (live preview, drop counters)
    pub fn sink(&self) -> &FrameSink {
        &self.sink
    }

    /// Camera driver
    pub fn camera(&self) -> &C {
        &self.camera
    }

    /// Serial device, unless a worker currently holds it
    pub fn serial_device(&self) -> Option<&D> {
        self.reader.as_ref().map(SampleReader::device)
    }

    fn transition(&mut self, next: AcquisitionState) {
        if self.state != next {
            info!(from = ?self.state, to = ?next, "Acquisition state changed");
            self.state = next;
        }
    }

    /// Join a worker left behind by a dropped acquisition future.
    async fn reclaim(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        warn!("Reclaiming serial reader from an abandoned acquisition");
        self.cancel.cancel();
        match worker.await {
            Ok((reader, _)) => self.reader = Some(reader),
            Err(e) => warn!(error = %e, "Abandoned serial worker failed"),
        }
        self.sink.reset();
        self.transition(AcquisitionState::Idle);
    }

    async fn take_reader(&mut self) -> AppResult<SampleReader<D>> {
        if self.released {
            return Err(DaqError::Worker("Acquisition controller is shut down".into()));
        }
        self.reclaim().await;
        let reader = self
            .reader
            .take()
            .ok_or_else(|| DaqError::Worker("Serial reader lost by a failed worker".into()))?;
        self.cancel.reset();
        Ok(reader)
    }

    /// Derive the trigger threshold from the generator signal.
    ///
    /// Fails with [`DaqError::CalibrationFailed`] if no generator value below
    /// the outlier cutoff arrives. With a trigger timeout configured, the run
    /// is bounded by the calibration duration plus that timeout.
    #[instrument(skip(self))]
    pub async fn calibrate(&mut self) -> AppResult<Calibration> {
        let guard = AbandonGuard::new(self.cancel.clone(), self.sink.arm_handle());
        let result = self.run_calibrate().await;
        guard.defuse();
        result
    }

    async fn run_calibrate(&mut self) -> AppResult<Calibration> {
        let mut reader = self.take_reader().await?;
        let calibrator = Calibrator::new(self.settings.calibration);
        let clock = Arc::clone(&self.clock);
        self.worker = Some(tokio::task::spawn_blocking(move || {
            let result = run_calibration(&mut reader, &calibrator, clock.as_ref());
            (reader, WorkerOutput::Calibration(result))
        }));

        let limit = self
            .settings
            .trigger_timeout
            .map(|t| t + self.settings.calibration.duration);
        let calibration = self
            .join_worker(limit, Stage::Trigger)
            .await?
            .into_calibration()?;

        let threshold = calibration
            .threshold()
            .ok_or(DaqError::CalibrationFailed {
                samples_seen: calibration.samples_seen,
                rejected: calibration.rejected,
            })?;
        info!(%threshold, max_value = calibration.max_value, "Trigger calibrated");
        self.threshold = Some(threshold);
        Ok(calibration)
    }

    /// Acquire one observation.
    #[instrument(skip(self))]
    pub async fn calc_state(&mut self) -> AppResult<Observation> {
        let guard = AbandonGuard::new(self.cancel.clone(), self.sink.arm_handle());
        let result = self.run_observation().await;
        guard.defuse();
        result
    }

    async fn run_observation(&mut self) -> AppResult<Observation> {
        let threshold = self.threshold.ok_or(DaqError::NotCalibrated)?;
        let mut reader = self.take_reader().await?;

        self.sink.reset();
        let arm = self.sink.arm_handle();
        let (trigger_tx, trigger_rx) = oneshot::channel();
        let detector = EdgeDetector::new(threshold, self.settings.window_size);
        let trace_len = self.settings.trace_len;

        self.transition(AcquisitionState::WaitingForTrigger);
        self.worker = Some(tokio::task::spawn_blocking(move || {
            let result = run_cycle(&mut reader, detector, trace_len, &arm, trigger_tx);
            (reader, WorkerOutput::Trace(result))
        }));

        let triggered = match self.settings.trigger_timeout {
            None => trigger_rx.await.is_ok(),
            Some(limit) => match tokio::time::timeout(limit, trigger_rx).await {
                Ok(fired) => fired.is_ok(),
                Err(_) => return Err(self.abort(Stage::Trigger, limit).await),
            },
        };
        if !triggered {
            // Worker gave up before the edge; surface its error.
            let err = match self.join_worker(None, Stage::Trigger).await {
                Err(e) => e,
                Ok(output) => match output.into_trace() {
                    Err(e) => e,
                    Ok(_) => DaqError::Worker("Trigger signal lost".into()),
                },
            };
            self.sink.reset();
            self.transition(AcquisitionState::Idle);
            return Err(err);
        }
        self.transition(AcquisitionState::Capturing);

        let deadline = self
            .settings
            .capture_timeout
            .map(|t| (tokio::time::Instant::now() + t, t));
        while !self.sink.is_ready() {
            if let Some((at, limit)) = deadline {
                if tokio::time::Instant::now() >= at {
                    return Err(self.abort(Stage::Frames, limit).await);
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }
        debug!(frames = self.sink.len(), "Frame batch complete");

        let remaining =
            deadline.map(|(at, _)| at.saturating_duration_since(tokio::time::Instant::now()));
        let trace = match self
            .join_worker(remaining, Stage::DeviceTrace)
            .await
            .and_then(WorkerOutput::into_trace)
        {
            Ok(trace) => trace,
            Err(e) => {
                self.sink.reset();
                self.transition(AcquisitionState::Idle);
                return Err(e);
            }
        };

        self.transition(AcquisitionState::Aggregating);
        let frames = self.sink.drain();
        self.sink.reset();
        let batch = FrameBatch::from_frames(frames, self.settings.n_frames);
        self.transition(AcquisitionState::Idle);

        let observation = Observation {
            frames: batch?,
            device_trace: trace,
            captured_at: Utc::now(),
        };
        info!(
            frames = observation.frames.len(),
            samples = observation.device_trace.len(),
            second_cycle_index = ?observation.device_trace.second_cycle_index,
            dropped = self.sink.dropped_frames(),
            "Observation acquired"
        );
        Ok(observation)
    }

    /// Join the running serial worker, recovering the reader.
    ///
    /// On timeout the worker is cancelled, the sink reset and the state
    /// returned to idle.
    async fn join_worker(
        &mut self,
        limit: Option<Duration>,
        stage: Stage,
    ) -> AppResult<WorkerOutput> {
        let Some(worker) = self.worker.as_mut() else {
            return Err(DaqError::Worker("No serial worker running".into()));
        };
        let joined = match limit {
            None => worker.await,
            Some(limit) => {
                let waited = tokio::time::timeout(limit, worker).await;
                match waited {
                    Ok(joined) => joined,
                    Err(_) => return Err(self.abort(stage, limit).await),
                }
            }
        };
        self.worker = None;

        match joined {
            Ok((reader, output)) => {
                self.reader = Some(reader);
                Ok(output)
            }
            Err(e) => {
                self.transition(AcquisitionState::Idle);
                Err(DaqError::Worker(format!("Serial worker failed: {e}")))
            }
        }
    }

    /// Cancel a stalled worker and return the controller to idle.
    async fn abort(&mut self, stage: Stage, after: Duration) -> DaqError {
        warn!(%stage, ?after, "Acquisition timed out, cancelling serial worker");
        self.cancel.cancel();
        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok((reader, _)) => self.reader = Some(reader),
                Err(e) => warn!(error = %e, "Serial worker failed during cancellation"),
            }
        }
        self.sink.reset();
        self.transition(AcquisitionState::Idle);
        DaqError::Timeout { stage, after }
    }

    /// Stop capture and close the serial device. Idempotent.
    ///
    /// A worker left by an abandoned acquisition is cancelled; its session
    /// closes the device as it exits.
    pub fn shutdown(&mut self) -> AppResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.cancel.cancel();
        if self.worker.take().is_some() {
            debug!("Cancelled pending serial worker");
        }
        self.sink.reset();

        let mut errors = Vec::new();
        if let Err(e) = self.camera.stop_capture() {
            errors.push(e);
        }
        if let Some(reader) = self.reader.as_mut() {
            if let Err(e) = reader.device_mut().close() {
                errors.push(e);
            }
        }
        self.transition(AcquisitionState::Idle);

        if errors.is_empty() {
            info!("Acquisition controller shut down");
            Ok(())
        } else {
            Err(DaqError::ShutdownFailed(errors))
        }
    }
}

impl<C: CameraDriver, D: SerialDevice + 'static> Drop for AcquisitionController<C, D> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Acquisition controller shutdown failed");
        }
    }
}

fn run_calibration<D: SerialDevice>(
    reader: &mut SampleReader<D>,
    calibrator: &Calibrator,
    clock: &dyn Clock,
) -> AppResult<Calibration> {
    let mut session = reader.open()?;
    let calibration = calibrator.calibrate(session.samples(), clock);
    if let Some(e) = session.take_error() {
        return Err(e);
    }
    session.close()?;
    Ok(calibration)
}

/// Serial side of one observation: wait for the edge, arm the sink, collect
/// the trace.
fn run_cycle<D: SerialDevice>(
    reader: &mut SampleReader<D>,
    mut detector: EdgeDetector,
    trace_len: usize,
    arm: &ArmHandle,
    trigger: oneshot::Sender<()>,
) -> AppResult<DeviceIntensityTrace> {
    let mut session = reader.open()?;
    session.flush()?;

    let Some(consumed) = detector.wait_for_edge(session.samples()) else {
        return Err(session.take_error().unwrap_or(DaqError::Cancelled));
    };
    arm.arm();
    debug!(consumed, "Trigger edge detected, sink armed");
    let _ = trigger.send(());

    let trace = DeviceIntensityTrace::collect(session.samples(), &mut detector, trace_len);
    if trace.len() < trace_len {
        return Err(session.take_error().unwrap_or(DaqError::Cancelled));
    }
    session.close()?;
    Ok(trace)
}
