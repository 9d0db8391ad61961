//! Configuration System using Figment
//!
//! Configuration is loaded from:
//! 1. `config/interf.toml` (base configuration, optional)
//! 2. Environment variables prefixed with `INTERF_DAQ_`, nested with `__`
//!
//! Every section has defaults, so an empty file is a valid configuration.
//!
//! # Example
//! ```no_run
//! use interf_daq::config::InterfConfig;
//!
//! let config = InterfConfig::load()?;
//! config.validate()?;
//! println!("Frames per observation: {}", config.camera.n_frames);
//! # Ok::<(), interf_daq::error::DaqError>(())
//! ```
//!
//! Environment override: `INTERF_DAQ_CAMERA__N_FRAMES=32`.

use crate::acquisition::controller::AcquisitionSettings;
use crate::acquisition::trigger::CalibrationSettings;
use crate::data::frame::CropWindow;
use crate::error::{AppResult, DaqError};
use crate::hardware::capabilities::SensorMode;
use crate::hardware::mock::SyntheticSignal;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// Default configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "config/interf.toml";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "INTERF_DAQ_";

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InterfConfig {
    /// Application settings
    pub application: ApplicationConfig,
    /// Camera settings
    pub camera: CameraSettings,
    /// Detector serial link
    pub serial: SerialSettings,
    /// Trigger calibration and edge detection
    pub trigger: TriggerSettings,
    /// Acquisition loop
    pub acquisition: AcquisitionConfig,
    /// Visibility estimation
    pub visibility: VisibilitySettings,
    /// Mirror motors
    pub motors: MotorSettings,
    /// Simulated hardware
    pub mock: MockSettings,
}

/// Application-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationConfig {
    /// Application name
    pub name: String,
    /// Logging level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl Default for ApplicationConfig {
    fn default() -> Self {
        Self {
            name: "interf-daq".to_string(),
            log_level: "info".to_string(),
        }
    }
}

/// Camera configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    /// Frames per observation (N)
    pub n_frames: usize,
    /// Exposure time in milliseconds
    pub exposure_ms: f64,
    /// Horizontal crop applied at hand-off
    pub crop: Option<CropWindow>,
    /// Sensor readout mode
    pub sensor_mode: SensorMode,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            n_frames: 16,
            exposure_ms: 1.0,
            crop: None,
            sensor_mode: SensorMode::Raw8,
        }
    }
}

/// Detector serial link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialSettings {
    /// Port name (e.g., "/dev/ttyACM0", "COM3")
    pub port: String,
    /// Baud rate
    pub baud_rate: u32,
    /// Sleep between polls when no bytes are queued
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for SerialSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyACM0".to_string(),
            baud_rate: 115_200,
            poll_interval: Duration::from_millis(1),
        }
    }
}

/// Trigger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TriggerSettings {
    /// Edge detector window size
    pub window_size: usize,
    /// Fraction of the calibrated maximum used as threshold
    pub threshold_coefficient: f64,
    /// Calibration duration
    #[serde(with = "humantime_serde")]
    pub calibration: Duration,
    /// Generator values at or above this are ignored during calibration
    pub outlier_cutoff: f64,
}

impl Default for TriggerSettings {
    fn default() -> Self {
        Self {
            window_size: 2,
            threshold_coefficient: 0.9,
            calibration: Duration::from_secs(5),
            outlier_cutoff: 1000.0,
        }
    }
}

/// Acquisition loop configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AcquisitionConfig {
    /// Detector samples per observation (M)
    pub trace_len: usize,
    /// Sink poll period
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Bound on the wait for a trigger edge (unbounded if absent)
    #[serde(with = "humantime_serde")]
    pub trigger_timeout: Option<Duration>,
    /// Bound on the capture window (unbounded if absent)
    #[serde(with = "humantime_serde")]
    pub capture_timeout: Option<Duration>,
}

impl Default for AcquisitionConfig {
    fn default() -> Self {
        Self {
            trace_len: 120,
            poll_interval: Duration::from_millis(1),
            trigger_timeout: None,
            capture_timeout: None,
        }
    }
}

/// Visibility estimation configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisibilitySettings {
    /// Samples averaged into each robust extremum
    pub k: usize,
    /// Dark-current offset subtracted from the denominator
    pub dark_offset: f64,
}

impl Default for VisibilitySettings {
    fn default() -> Self {
        Self {
            k: 30,
            dark_offset: 0.0,
        }
    }
}

/// Mirror motor mapping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotorSettings {
    /// Motor controller serial port
    pub port: String,
    /// Motor controller baud rate
    pub baud_rate: u32,
    /// Motor driving mirror 1, horizontal screw
    pub mirror1_x: u8,
    /// Motor driving mirror 1, vertical screw
    pub mirror1_y: u8,
    /// Motor driving mirror 2, horizontal screw
    pub mirror2_x: u8,
    /// Motor driving mirror 2, vertical screw
    pub mirror2_y: u8,
    /// Steps corresponding to a normalised screw position of 1.0
    pub max_screw_value: i64,
}

impl Default for MotorSettings {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 19_200,
            mirror1_x: 1,
            mirror1_y: 2,
            mirror2_x: 3,
            mirror2_y: 4,
            max_screw_value: 10_000,
        }
    }
}

/// Simulated hardware used with `--mock`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MockSettings {
    /// Simulated sensor width
    pub width: u32,
    /// Simulated sensor height
    pub height: u32,
    /// Simulated frame rate
    pub frame_rate: f64,
    /// Simulated serial sample rate
    pub sample_rate_hz: f64,
    /// Generator period
    #[serde(with = "humantime_serde")]
    pub period: Duration,
    /// Detector noise half-width
    pub noise: f64,
}

impl Default for MockSettings {
    fn default() -> Self {
        Self {
            width: 64,
            height: 64,
            frame_rate: 200.0,
            sample_rate_hz: 1000.0,
            period: Duration::from_millis(50),
            noise: 0.5,
        }
    }
}

impl MockSettings {
    /// Waveform for a synthetic serial device.
    pub fn signal(&self) -> SyntheticSignal {
        SyntheticSignal {
            sample_rate_hz: self.sample_rate_hz,
            period: self.period,
            noise: self.noise,
            ..SyntheticSignal::default()
        }
    }
}

impl InterfConfig {
    /// Load configuration from `config/interf.toml` and environment variables.
    pub fn load() -> AppResult<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    /// Load configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and the environment apply.
    pub fn load_from<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let config = Self::figment(path.as_ref()).extract()?;
        Ok(config)
    }

    /// Figment used by [`InterfConfig::load_from`].
    pub fn figment(path: &Path) -> Figment {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Validate configuration after loading.
    pub fn validate(&self) -> AppResult<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.application.log_level.to_lowercase().as_str()) {
            return Err(invalid(format!(
                "Invalid log_level '{}'. Must be one of: {}",
                self.application.log_level,
                valid_levels.join(", ")
            )));
        }

        if self.camera.n_frames == 0 {
            return Err(invalid("camera.n_frames must be greater than 0"));
        }
        if self.camera.exposure_ms <= 0.0 {
            return Err(invalid("camera.exposure_ms must be positive"));
        }
        if let Some(crop) = self.camera.crop {
            if crop.width == 0 {
                return Err(invalid("camera.crop.width must be greater than 0"));
            }
        }

        if self.serial.baud_rate == 0 {
            return Err(invalid("serial.baud_rate must be greater than 0"));
        }

        if self.trigger.window_size < 2 {
            return Err(invalid(format!(
                "trigger.window_size must be at least 2, got {}",
                self.trigger.window_size
            )));
        }
        let coefficient = self.trigger.threshold_coefficient;
        if !(coefficient > 0.0 && coefficient <= 1.0) {
            return Err(invalid(format!(
                "trigger.threshold_coefficient must be in (0, 1], got {coefficient}"
            )));
        }
        if self.trigger.calibration.is_zero() {
            return Err(invalid("trigger.calibration must be longer than 0s"));
        }

        if self.acquisition.trace_len == 0 {
            return Err(invalid("acquisition.trace_len must be greater than 0"));
        }
        if self.visibility.k == 0 || self.visibility.k > self.acquisition.trace_len {
            return Err(invalid(format!(
                "visibility.k must be in 1..={}, got {}",
                self.acquisition.trace_len, self.visibility.k
            )));
        }

        let m = &self.motors;
        let ids = [m.mirror1_x, m.mirror1_y, m.mirror2_x, m.mirror2_y];
        let unique: HashSet<u8> = ids.iter().copied().collect();
        if unique.len() != ids.len() {
            return Err(invalid(format!("Duplicate motor ids in {ids:?}")));
        }
        if m.max_screw_value <= 0 {
            return Err(invalid("motors.max_screw_value must be positive"));
        }

        Ok(())
    }

    /// Controller parameters derived from this configuration.
    pub fn acquisition_settings(&self) -> AcquisitionSettings {
        AcquisitionSettings {
            n_frames: self.camera.n_frames,
            trace_len: self.acquisition.trace_len,
            exposure_ms: self.camera.exposure_ms,
            sensor_mode: self.camera.sensor_mode,
            crop: self.camera.crop,
            window_size: self.trigger.window_size,
            calibration: CalibrationSettings {
                duration: self.trigger.calibration,
                coefficient: self.trigger.threshold_coefficient,
                outlier_cutoff: self.trigger.outlier_cutoff,
            },
            poll_interval: self.acquisition.poll_interval,
            serial_poll_interval: self.serial.poll_interval,
            trigger_timeout: self.acquisition.trigger_timeout,
            capture_timeout: self.acquisition.capture_timeout,
        }
    }
}

fn invalid(message: impl Into<String>) -> DaqError {
    DaqError::Configuration(message.into())
}
