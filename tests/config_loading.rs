//! Tests for layered configuration loading (TOML file + environment).
//!
//! Environment-mutating tests are serialized with `serial_test`.

use interf_daq::config::{InterfConfig, DEFAULT_CONFIG_PATH};
use interf_daq::hardware::SensorMode;
use serial_test::serial;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

#[test]
#[serial]
fn test_shipped_config_matches_defaults() {
    let config = InterfConfig::load_from(DEFAULT_CONFIG_PATH).unwrap();
    assert_eq!(config, InterfConfig::default());
    assert!(config.validate().is_ok());
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    let config = InterfConfig::load_from("does/not/exist.toml").unwrap();
    assert_eq!(config, InterfConfig::default());
}

#[test]
#[serial]
fn test_partial_file_overrides_selected_keys() {
    let file = write_config(
        r#"
[camera]
n_frames = 32
sensor_mode = "mono8"
crop = { x_offset = 10, width = 20 }

[trigger]
calibration = "750ms"

[acquisition]
trigger_timeout = "2s"
"#,
    );

    let config = InterfConfig::load_from(file.path()).unwrap();

    assert_eq!(config.camera.n_frames, 32);
    assert_eq!(config.camera.sensor_mode, SensorMode::Mono8);
    assert_eq!(config.camera.crop.map(|c| c.width), Some(20));
    assert_eq!(config.trigger.calibration, Duration::from_millis(750));
    assert_eq!(config.acquisition.trigger_timeout, Some(Duration::from_secs(2)));
    assert_eq!(config.acquisition.capture_timeout, None);
    // Untouched sections keep their defaults
    assert_eq!(config.serial.baud_rate, 115_200);
    assert_eq!(config.visibility.k, 30);

    let settings = config.acquisition_settings();
    assert_eq!(settings.n_frames, 32);
    assert_eq!(settings.calibration.duration, Duration::from_millis(750));
}

#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = write_config("[camera]\nn_frames = 32\n");
    std::env::set_var("INTERF_DAQ_CAMERA__N_FRAMES", "8");
    std::env::set_var("INTERF_DAQ_SERIAL__PORT", "/dev/ttyACM3");

    let result = InterfConfig::load_from(file.path());

    std::env::remove_var("INTERF_DAQ_CAMERA__N_FRAMES");
    std::env::remove_var("INTERF_DAQ_SERIAL__PORT");

    let config = result.unwrap();
    assert_eq!(config.camera.n_frames, 8);
    assert_eq!(config.serial.port, "/dev/ttyACM3");
}

#[test]
#[serial]
fn test_malformed_value_is_config_error() {
    let file = write_config("[camera]\nn_frames = \"many\"\n");
    let err = InterfConfig::load_from(file.path()).unwrap_err();
    assert!(err.to_string().contains("n_frames"), "unexpected error: {err}");
}

#[test]
#[serial]
fn test_loaded_config_is_validated_separately() {
    let file = write_config("[visibility]\nk = 500\n");
    let config = InterfConfig::load_from(file.path()).unwrap();
    assert!(config.validate().is_err());
}

#[test]
fn test_effective_config_serializes_to_toml() {
    let mut config = InterfConfig::default();
    config.acquisition.capture_timeout = Some(Duration::from_secs(4));

    let rendered = toml::to_string_pretty(&config).unwrap();

    assert!(rendered.contains("[acquisition]"));
    assert!(rendered.contains("capture_timeout = \"4s\""));
    assert!(rendered.contains("calibration = \"5s\""));
}
