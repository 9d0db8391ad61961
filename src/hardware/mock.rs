//! Mock Hardware Implementations
//!
//! Provides simulated hardware for tests and for running the pipeline without
//! the optical bench attached.
//!
//! # Available Mocks
//!
//! - `MockCamera` - camera with a native delivery thread producing fringe frames
//! - `MockLease` - frame lease that counts its releases
//! - `MockSerialDevice` - detector link fed from a script or a synthetic waveform
//! - `MockMotorController` - in-memory actuator axes with instant motion
//!
//! # Timing
//!
//! - MockCamera: 200 fps by default, brightness modulated with a 50 ms period
//! - MockSerialDevice (synthetic): 1 kHz samples by default, 50 ms generator period

use crate::data::frame_sink::FrameHandler;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::{
    CameraDriver, FrameLease, MotorController, SensorMode, SerialDevice,
};
use async_trait::async_trait;
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

// =============================================================================
// MockLease - Driver Frame Buffer
// =============================================================================

/// Frame lease backed by an owned buffer.
///
/// Every lease shares a release counter with the camera that produced it so
/// tests can check that no buffer is leaked.
#[derive(Debug)]
pub struct MockLease {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
    releases: Arc<AtomicU64>,
    released: bool,
}

impl MockLease {
    /// Create a lease over `pixels`, counting releases in `releases`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>, releases: Arc<AtomicU64>) -> Self {
        Self {
            width,
            height,
            pixels,
            releases,
            released: false,
        }
    }

    /// Uniform frame with every pixel set to `value`.
    pub fn uniform(width: u32, height: u32, value: u8, releases: Arc<AtomicU64>) -> Self {
        Self::new(
            width,
            height,
            vec![value; width as usize * height as usize],
            releases,
        )
    }
}

impl FrameLease for MockLease {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }
}

// =============================================================================
// MockCamera - Simulated Camera
// =============================================================================

/// Mock camera with a native delivery thread.
///
/// Renders vertical fringes whose overall brightness follows a cosine with a
/// configurable period, so per-frame total intensity oscillates the way it
/// does when a mirror is scanned.
///
/// # Example
///
/// ```rust,ignore
/// let (sink, handler) = FrameSink::new(16, None);
/// let mut camera = MockCamera::new(64, 64);
/// camera.start_capture(handler)?;
/// ```
pub struct MockCamera {
    resolution: (u32, u32),
    frame_interval: Duration,
    brightness_period: Duration,
    sensor_mode: SensorMode,
    exposure_ms: f64,
    streaming: Arc<AtomicBool>,
    frame_count: Arc<AtomicU64>,
    releases: Arc<AtomicU64>,
    delivery: Option<JoinHandle<()>>,
}

impl MockCamera {
    /// Create new mock camera with specified resolution
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            resolution: (width, height),
            frame_interval: Duration::from_millis(5),
            brightness_period: Duration::from_millis(50),
            sensor_mode: SensorMode::Raw8,
            exposure_ms: 1.0,
            streaming: Arc::new(AtomicBool::new(false)),
            frame_count: Arc::new(AtomicU64::new(0)),
            releases: Arc::new(AtomicU64::new(0)),
            delivery: None,
        }
    }

    /// Set the delivery rate in frames per second.
    #[must_use]
    pub fn with_frame_rate(mut self, fps: f64) -> Self {
        self.frame_interval = Duration::from_secs_f64(1.0 / fps.max(0.001));
        self
    }

    /// Set the brightness modulation period.
    #[must_use]
    pub fn with_brightness_period(mut self, period: Duration) -> Self {
        self.brightness_period = period;
        self
    }

    /// Frames delivered since construction
    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::SeqCst)
    }

    /// Leases released since construction
    pub fn release_count(&self) -> u64 {
        self.releases.load(Ordering::SeqCst)
    }

    /// Check if the delivery thread is running
    pub fn is_streaming(&self) -> bool {
        self.streaming.load(Ordering::SeqCst)
    }

    /// Current sensor mode
    pub fn sensor_mode(&self) -> SensorMode {
        self.sensor_mode
    }

    /// Current exposure in milliseconds
    pub fn exposure_ms(&self) -> f64 {
        self.exposure_ms
    }
}

/// Render one fringe frame at modulation phase `phase`.
fn render_fringes(width: u32, height: u32, phase: f64) -> Vec<u8> {
    let brightness = 0.5 * (1.0 + 0.8 * phase.cos());
    let fringe_px = (f64::from(width) / 4.0).max(1.0);
    let row: Vec<u8> = (0..width)
        .map(|x| {
            let fringe = 0.5 + 0.5 * (TAU * f64::from(x) / fringe_px).cos();
            (255.0 * brightness * fringe).round().clamp(0.0, 255.0) as u8
        })
        .collect();
    row.repeat(height as usize)
}

impl Default for MockCamera {
    fn default() -> Self {
        Self::new(64, 64)
    }
}

impl CameraDriver for MockCamera {
    fn set_sensor_mode(&mut self, mode: SensorMode) -> AppResult<()> {
        self.sensor_mode = mode;
        Ok(())
    }

    fn set_exposure_ms(&mut self, exposure_ms: f64) -> AppResult<()> {
        if exposure_ms <= 0.0 {
            return Err(DaqError::Camera("Exposure must be positive".into()));
        }
        self.exposure_ms = exposure_ms;
        Ok(())
    }

    fn start_capture(&mut self, mut handler: FrameHandler) -> AppResult<()> {
        if self.streaming.swap(true, Ordering::SeqCst) {
            return Err(DaqError::Camera("MockCamera: Already streaming".into()));
        }

        let streaming = Arc::clone(&self.streaming);
        let frame_count = Arc::clone(&self.frame_count);
        let releases = Arc::clone(&self.releases);
        let (width, height) = self.resolution;
        let interval = self.frame_interval;
        let period = self.brightness_period.as_secs_f64().max(1e-6);

        let delivery = std::thread::Builder::new()
            .name("mock-camera-delivery".into())
            .spawn(move || {
                let epoch = Instant::now();
                while streaming.load(Ordering::SeqCst) {
                    let phase = TAU * epoch.elapsed().as_secs_f64() / period;
                    let pixels = render_fringes(width, height, phase);
                    handler.handle(MockLease::new(width, height, pixels, Arc::clone(&releases)));
                    frame_count.fetch_add(1, Ordering::SeqCst);
                    std::thread::sleep(interval);
                }
            })
            .map_err(|e| {
                self.streaming.store(false, Ordering::SeqCst);
                DaqError::Camera(format!("Failed to spawn delivery thread: {e}"))
            })?;

        self.delivery = Some(delivery);
        tracing::debug!(width, height, "MockCamera: Stream started");
        Ok(())
    }

    fn stop_capture(&mut self) -> AppResult<()> {
        self.streaming.store(false, Ordering::SeqCst);
        if let Some(delivery) = self.delivery.take() {
            delivery
                .join()
                .map_err(|_| DaqError::Camera("MockCamera: delivery thread panicked".into()))?;
            tracing::debug!("MockCamera: Stream stopped");
        }
        Ok(())
    }

    fn resolution(&self) -> (u32, u32) {
        self.resolution
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        let _ = self.stop_capture();
    }
}

// =============================================================================
// MockSerialDevice - Simulated Detector Link
// =============================================================================

/// Generator/detector waveform emitted by a synthetic [`MockSerialDevice`].
#[derive(Debug, Clone)]
pub struct SyntheticSignal {
    /// Samples per second
    pub sample_rate_hz: f64,
    /// Generator period (one physical cycle)
    pub period: Duration,
    /// Generator minimum
    pub generator_floor: f64,
    /// Generator maximum
    pub generator_peak: f64,
    /// Detector mean level
    pub detector_mean: f64,
    /// Detector modulation amplitude
    pub detector_amplitude: f64,
    /// Uniform noise half-width added to the detector channel
    pub noise: f64,
}

impl Default for SyntheticSignal {
    fn default() -> Self {
        Self {
            sample_rate_hz: 1000.0,
            period: Duration::from_millis(50),
            generator_floor: 0.0,
            generator_peak: 20.0,
            detector_mean: 50.0,
            detector_amplitude: 30.0,
            noise: 0.0,
        }
    }
}

impl SyntheticSignal {
    /// `(generator, detector)` at time `t` seconds.
    #[must_use]
    pub fn sample_at(&self, t: f64) -> (f64, f64) {
        let phase = TAU * t / self.period.as_secs_f64().max(1e-9);
        let generator = self.generator_floor
            + (self.generator_peak - self.generator_floor) * 0.5 * (1.0 - phase.cos());
        let mut detector = self.detector_mean + self.detector_amplitude * phase.sin();
        if self.noise > 0.0 {
            detector += rand::thread_rng().gen_range(-self.noise..=self.noise);
        }
        (generator, detector)
    }
}

/// Counters shared with a [`MockSerialDevice`].
#[derive(Debug, Default)]
pub struct MockSerialStats {
    /// Successful `open` calls
    pub opens: AtomicU64,
    /// `close` calls on an open device
    pub closes: AtomicU64,
    /// `clear_input` calls
    pub flushes: AtomicU64,
}

#[derive(Debug)]
enum MockSource {
    Scripted,
    Synthetic {
        signal: SyntheticSignal,
        epoch: Instant,
        emitted: u64,
    },
    Silent,
}

/// Upper bound on samples rendered per poll, mimicking a device FIFO.
const MAX_SYNTHETIC_BACKLOG: u64 = 4096;

/// Simulated serial link.
///
/// - `scripted()` serves bytes queued with [`MockSerialDevice::push_line`] /
///   [`MockSerialDevice::push_bytes`]; the queue survives close/reopen.
/// - `synthetic(signal)` renders `"g,d\n"` lines in real time from a waveform.
/// - `silent()` never produces data (hardware stall).
#[derive(Debug)]
pub struct MockSerialDevice {
    open: bool,
    queue: VecDeque<u8>,
    source: MockSource,
    stats: Arc<MockSerialStats>,
}

impl MockSerialDevice {
    fn with_source(source: MockSource) -> Self {
        Self {
            open: false,
            queue: VecDeque::new(),
            source,
            stats: Arc::new(MockSerialStats::default()),
        }
    }

    /// Device serving scripted bytes.
    pub fn scripted() -> Self {
        Self::with_source(MockSource::Scripted)
    }

    /// Device streaming a synthetic waveform.
    pub fn synthetic(signal: SyntheticSignal) -> Self {
        Self::with_source(MockSource::Synthetic {
            signal,
            epoch: Instant::now(),
            emitted: 0,
        })
    }

    /// Device that never produces data.
    pub fn silent() -> Self {
        Self::with_source(MockSource::Silent)
    }

    /// Queue one line (a trailing newline is added).
    pub fn push_line(&mut self, line: &str) {
        self.queue.extend(line.as_bytes());
        self.queue.push_back(b'\n');
    }

    /// Queue raw bytes.
    pub fn push_bytes(&mut self, bytes: &[u8]) {
        self.queue.extend(bytes);
    }

    /// Shared open/close/flush counters.
    pub fn stats(&self) -> Arc<MockSerialStats> {
        Arc::clone(&self.stats)
    }

    fn render_due_samples(&mut self) {
        let MockSource::Synthetic {
            signal,
            epoch,
            emitted,
        } = &mut self.source
        else {
            return;
        };

        let due = (epoch.elapsed().as_secs_f64() * signal.sample_rate_hz) as u64;
        if due.saturating_sub(*emitted) > MAX_SYNTHETIC_BACKLOG {
            *emitted = due - MAX_SYNTHETIC_BACKLOG;
        }
        while *emitted < due {
            let t = *emitted as f64 / signal.sample_rate_hz;
            let (generator, detector) = signal.sample_at(t);
            self.queue
                .extend(format!("{generator:.4},{detector:.4}\n").as_bytes());
            *emitted += 1;
        }
    }

    fn ensure_open(&self) -> AppResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DaqError::SerialPortNotConnected)
        }
    }
}

impl SerialDevice for MockSerialDevice {
    fn open(&mut self) -> AppResult<()> {
        self.open = true;
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) -> AppResult<()> {
        if self.open {
            self.open = false;
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn bytes_available(&mut self) -> AppResult<usize> {
        self.ensure_open()?;
        if matches!(self.source, MockSource::Silent) {
            return Ok(0);
        }
        self.render_due_samples();
        Ok(self.queue.len())
    }

    fn read_available(&mut self, buf: &mut [u8]) -> AppResult<usize> {
        self.ensure_open()?;
        let n = buf.len().min(self.queue.len());
        for (slot, byte) in buf.iter_mut().zip(self.queue.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn clear_input(&mut self) -> AppResult<()> {
        self.ensure_open()?;
        self.render_due_samples();
        self.queue.clear();
        self.stats.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// =============================================================================
// MockMotorController - Simulated Actuator Axes
// =============================================================================

#[derive(Debug, Clone, Copy, Default)]
struct AxisState {
    position: i64,
    home: i64,
    target: i64,
}

/// Mock motor controller with instant motion.
///
/// Unknown axes are created at position 0 on first use.
#[derive(Debug, Default)]
pub struct MockMotorController {
    axes: RwLock<HashMap<u8, AxisState>>,
    moves: AtomicU64,
}

impl MockMotorController {
    /// Create a controller with no axes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a controller whose axes start at the given home positions.
    pub fn with_homes(homes: &[(u8, i64)]) -> Self {
        let axes = homes
            .iter()
            .map(|&(id, home)| {
                (
                    id,
                    AxisState {
                        position: home,
                        home,
                        target: home,
                    },
                )
            })
            .collect();
        Self {
            axes: RwLock::new(axes),
            moves: AtomicU64::new(0),
        }
    }

    /// Number of move commands received
    pub fn move_count(&self) -> u64 {
        self.moves.load(Ordering::SeqCst)
    }

    async fn axis(&self, motor_id: u8) -> AxisState {
        self.axes
            .read()
            .await
            .get(&motor_id)
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl MotorController for MockMotorController {
    async fn move_relative(&self, motor_id: u8, steps: i64) -> AppResult<()> {
        let mut axes = self.axes.write().await;
        let axis = axes.entry(motor_id).or_default();
        axis.position += steps;
        axis.target = axis.position;
        self.moves.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(motor_id, steps, position = axis.position, "MockMotor: relative move");
        Ok(())
    }

    async fn move_absolute(&self, motor_id: u8, steps: i64) -> AppResult<()> {
        let mut axes = self.axes.write().await;
        let axis = axes.entry(motor_id).or_default();
        axis.position = steps;
        axis.target = steps;
        self.moves.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(motor_id, steps, "MockMotor: absolute move");
        Ok(())
    }

    async fn position(&self, motor_id: u8) -> AppResult<i64> {
        Ok(self.axis(motor_id).await.position)
    }

    async fn home_position(&self, motor_id: u8) -> AppResult<i64> {
        Ok(self.axis(motor_id).await.home)
    }

    async fn set_home_position(&self, motor_id: u8, steps: i64) -> AppResult<()> {
        self.axes.write().await.entry(motor_id).or_default().home = steps;
        Ok(())
    }

    async fn target(&self, motor_id: u8) -> AppResult<i64> {
        Ok(self.axis(motor_id).await.target)
    }

    async fn is_done(&self, _motor_id: u8) -> AppResult<bool> {
        Ok(true)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
