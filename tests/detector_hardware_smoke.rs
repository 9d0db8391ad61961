#![cfg(all(feature = "hardware_tests", feature = "instrument_serial"))]

//! Detector serial link smoke test.
//!
//! Run with:
//! `DETECTOR_SMOKE_TEST=1 DETECTOR_PORT=/dev/ttyACM0 cargo test --test detector_hardware_smoke --features hardware_tests -- --nocapture`

use anyhow::{Context, Result};
use interf_daq::acquisition::{Calibrator, CalibrationSettings, MonotonicClock, SampleReader};
use interf_daq::hardware::SerialPortDevice;
use std::time::Duration;

#[test]
fn detector_hardware_smoke() -> Result<()> {
    if std::env::var("DETECTOR_SMOKE_TEST").unwrap_or_default() != "1" {
        eprintln!("Skipping detector_hardware_smoke (set DETECTOR_SMOKE_TEST=1 to enable)");
        return Ok(());
    }

    let port = std::env::var("DETECTOR_PORT").unwrap_or_else(|_| "/dev/ttyACM0".to_string());
    let device = SerialPortDevice::new(&port, 115_200);
    let mut reader = SampleReader::new(device, Duration::from_millis(1));

    let mut session = reader.open().with_context(|| format!("open {port}"))?;
    session.flush().context("flush detector input")?;

    let samples: Vec<_> = session.samples().take(100).collect();
    if let Some(e) = session.take_error() {
        return Err(e).context("read detector samples");
    }
    println!("Read {} samples, first: {:?}", samples.len(), samples.first());
    anyhow::ensure!(samples.len() == 100, "detector stream ended early");

    let calibrator = Calibrator::new(CalibrationSettings {
        duration: Duration::from_secs(1),
        ..CalibrationSettings::default()
    });
    let calibration = calibrator.calibrate(session.samples(), &MonotonicClock::default());
    println!("Calibration: {:?}", calibration);
    anyhow::ensure!(calibration.is_valid(), "no usable generator values");

    session.close()?;
    Ok(())
}
