//! Hardware Collaborator Interfaces
//!
//! The acquisition core talks to three kinds of hardware, each through a small
//! trait so that simulated devices can stand in for the real ones:
//!
//! - [`CameraDriver`] + [`FrameLease`]: a camera whose SDK delivers frames on its
//!   own background thread through a registered callback, and requires each
//!   native frame buffer to be released explicitly.
//! - [`SerialDevice`]: a byte-oriented serial link with a non-blocking "bytes
//!   available" query and an input-queue flush.
//! - [`MotorController`] / [`CommandTransport`]: the mirror and lens actuators,
//!   driven by a command/response text protocol. The acquisition core does not
//!   use them; [`crate::hardware::MirrorAxes`] and the `nudge` command do.
//!
//! # Threading
//!
//! Camera and serial drivers are synchronous: the camera callback runs on a
//! native delivery thread, and serial polling runs on a blocking worker. The
//! motor interface is async, like the rest of the orchestration.

use crate::data::frame_sink::FrameHandler;
use crate::error::{AppResult, DaqError, Stage};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A native frame buffer lent by the camera driver.
///
/// The driver must not reuse the buffer until [`FrameLease::release`] is called.
/// [`FrameHandler::handle`] guarantees exactly one release per lease.
pub trait FrameLease {
    /// Frame width in pixels
    fn width(&self) -> u32;
    /// Frame height in pixels
    fn height(&self) -> u32;
    /// Row-major 8-bit pixel data (at least `width * height` bytes)
    fn pixels(&self) -> &[u8];
    /// Hand the buffer back to the driver.
    fn release(&mut self);
}

/// Sensor readout mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SensorMode {
    /// Raw 8-bit Bayer/mono readout
    #[default]
    Raw8,
    /// 8-bit mono after on-sensor debayering
    Mono8,
}

/// Capability: continuous capture with callback delivery.
///
/// # Contract
/// - `start_capture` spawns (or binds) the driver's delivery thread and calls
///   [`FrameHandler::handle`] once per frame until `stop_capture`.
/// - `stop_capture` joins the delivery thread; it is idempotent.
/// - Setters may be called before or between captures.
pub trait CameraDriver: Send {
    /// Select the sensor readout mode.
    fn set_sensor_mode(&mut self, mode: SensorMode) -> AppResult<()>;

    /// Set the exposure time in milliseconds.
    fn set_exposure_ms(&mut self, exposure_ms: f64) -> AppResult<()>;

    /// Start continuous capture, delivering frames to `handler`.
    fn start_capture(&mut self, handler: FrameHandler) -> AppResult<()>;

    /// Stop continuous capture and join the delivery thread.
    fn stop_capture(&mut self) -> AppResult<()>;

    /// Sensor resolution `(width, height)`.
    fn resolution(&self) -> (u32, u32);
}

/// Capability: polled byte-stream serial link.
///
/// # Contract
/// - `bytes_available` never blocks.
/// - `read_available` reads at most the bytes currently queued and may return 0.
/// - `clear_input` drops everything queued in the device input buffer.
/// - All I/O on a closed device fails with [`DaqError::SerialPortNotConnected`].
pub trait SerialDevice: Send {
    /// Open (or reopen) the device.
    fn open(&mut self) -> AppResult<()>;

    /// Close the device. Closing a closed device is a no-op.
    fn close(&mut self) -> AppResult<()>;

    /// Whether the device is open.
    fn is_open(&self) -> bool;

    /// Number of bytes waiting in the input queue.
    fn bytes_available(&mut self) -> AppResult<usize>;

    /// Read queued bytes into `buf`, returning how many were read.
    fn read_available(&mut self, buf: &mut [u8]) -> AppResult<usize>;

    /// Discard the input queue.
    fn clear_input(&mut self) -> AppResult<()>;
}

/// Capability: command/response transport for the motor controller bus.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    /// Send one command. Queries return the controller's reply line, other
    /// commands return an empty string.
    async fn command(&self, command: &str) -> AppResult<String>;
}

/// Capability: stepper/picomotor axis control.
///
/// Positions are in device steps. Motion commands initiate a move and return
/// before it completes; use [`MotorController::wait_until_idle`].
#[async_trait]
pub trait MotorController: Send + Sync {
    /// Move relative to the current position.
    async fn move_relative(&self, motor_id: u8, steps: i64) -> AppResult<()>;

    /// Move to an absolute position.
    async fn move_absolute(&self, motor_id: u8, steps: i64) -> AppResult<()>;

    /// Current position.
    async fn position(&self, motor_id: u8) -> AppResult<i64>;

    /// Stored home position.
    async fn home_position(&self, motor_id: u8) -> AppResult<i64>;

    /// Define the home position.
    async fn set_home_position(&self, motor_id: u8, steps: i64) -> AppResult<()>;

    /// Target of the last absolute move.
    async fn target(&self, motor_id: u8) -> AppResult<i64>;

    /// Whether the axis has finished moving.
    async fn is_done(&self, motor_id: u8) -> AppResult<bool>;

    /// Poll [`MotorController::is_done`] until the axis is idle.
    ///
    /// `timeout = None` waits indefinitely.
    async fn wait_until_idle(
        &self,
        motor_id: u8,
        poll_interval: Duration,
        timeout: Option<Duration>,
    ) -> AppResult<()> {
        let poll = async {
            while !self.is_done(motor_id).await? {
                tokio::time::sleep(poll_interval).await;
            }
            Ok::<(), DaqError>(())
        };
        match timeout {
            None => poll.await,
            Some(limit) => tokio::time::timeout(limit, poll)
                .await
                .map_err(|_| DaqError::Timeout {
                    stage: Stage::Motion,
                    after: limit,
                })?,
        }
    }
}
