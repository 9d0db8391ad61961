//! # Interferometer DAQ Core Library
//!
//! Synchronized acquisition for an interferometer bench: a camera and a
//! serial photodetector observe the same fringe pattern while a reference
//! generator marks the start of each physical cycle. One call to
//! [`AcquisitionController::calc_state`] returns N camera frames and M
//! detector samples captured over the same cycle.
//!
//! ## Crate Structure
//!
//! - **`acquisition`**: the serial sample stream, trigger calibration and edge
//!   detection, and the controller state machine.
//! - **`data`**: frames, the lock-free frame sink fed by the camera delivery
//!   thread, and the visibility estimators.
//! - **`hardware`**: capability traits for the camera, serial link and mirror
//!   motors, the `serialport` and Newport backends, and mock hardware.
//! - **`config`**: figment-based configuration (TOML + environment).
//! - **`logging`**: `tracing-subscriber` initialization.
//! - **`error`**: the crate-wide `DaqError`.

pub mod acquisition;
pub mod config;
pub mod data;
pub mod error;
pub mod hardware;
pub mod logging;

pub use acquisition::{AcquisitionController, AcquisitionSettings, AcquisitionState, Observation};
pub use config::InterfConfig;
pub use error::{AppResult, DaqError};
