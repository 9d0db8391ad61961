//! Synchronized acquisition: serial sample stream, cycle trigger and the
//! controller that aligns camera frames with detector samples.

pub mod controller;
pub mod sample_reader;
pub mod trigger;

pub use controller::{AcquisitionController, AcquisitionSettings, AcquisitionState, Observation};
pub use sample_reader::{parse_line, CancelToken, LineError, Sample, SampleReader, SampleSession};
pub use trigger::{
    Calibration, CalibrationSettings, Calibrator, Clock, DeviceIntensityTrace, EdgeDetector,
    ManualClock, MonotonicClock, Threshold,
};
