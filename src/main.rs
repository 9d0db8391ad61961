//! CLI Entry Point for interf-daq
//!
//! Provides command-line interface for:
//! - Calibrating the cycle trigger against the reference generator
//! - Acquiring synchronized observations and printing fringe visibility
//! - Nudging the mirror screws
//! - Printing the effective configuration
//!
//! # Usage
//!
//! Calibrate against the simulated bench:
//! ```bash
//! interf-daq --mock calibrate
//! ```
//!
//! Acquire five observations as JSON lines:
//! ```bash
//! interf-daq acquire --count 5 --json
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use interf_daq::config::{InterfConfig, DEFAULT_CONFIG_PATH};
use interf_daq::hardware::{
    MirrorAxes, MirrorAxis, MockCamera, MockMotorController, MockSerialDevice, MotorController,
    NewportController, SerialCommandTransport, SerialDevice, SerialPortDevice,
};
use interf_daq::logging::{self, LoggingConfig, OutputFormat};
use interf_daq::{AcquisitionController, Observation};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "interf-daq")]
#[command(about = "Trigger-synchronized interferometer acquisition", long_about = None)]
struct Cli {
    /// Configuration file (TOML)
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Use simulated detector and motors instead of serial hardware
    #[arg(long, global = true)]
    mock: bool,

    /// Log output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Pretty)]
    log_format: OutputFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Calibrate the trigger threshold and print it
    Calibrate,

    /// Calibrate, then acquire observations and print their visibility
    Acquire {
        /// Number of observations
        #[arg(long, default_value_t = 1)]
        count: usize,

        /// Print each observation as a JSON line
        #[arg(long)]
        json: bool,
    },

    /// Shift one mirror screw by a normalised amount
    Nudge {
        /// Screw to move
        #[arg(long, value_enum)]
        axis: AxisArg,

        /// Normalised shift (the full screw range is -1..1)
        #[arg(long, allow_hyphen_values = true)]
        delta: f64,
    },

    /// Print the effective configuration as TOML
    Config,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum AxisArg {
    Mirror1X,
    Mirror1Y,
    Mirror2X,
    Mirror2Y,
}

impl From<AxisArg> for MirrorAxis {
    fn from(axis: AxisArg) -> Self {
        match axis {
            AxisArg::Mirror1X => MirrorAxis::Mirror1X,
            AxisArg::Mirror1Y => MirrorAxis::Mirror1Y,
            AxisArg::Mirror2X => MirrorAxis::Mirror2X,
            AxisArg::Mirror2Y => MirrorAxis::Mirror2Y,
        }
    }
}

#[derive(Serialize)]
struct ObservationReport<'a> {
    #[serde(flatten)]
    observation: &'a Observation,
    camera_visibility: Option<f64>,
    device_visibility: Option<f64>,
    dropped_frames: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = InterfConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    config.validate().context("Invalid configuration")?;

    let level = logging::parse_log_level(&config.application.log_level)?;
    logging::init(LoggingConfig::new(level).with_format(cli.log_format))?;

    let simulated = cli.mock || !cfg!(feature = "instrument_serial");

    match cli.command {
        Commands::Config => {
            print!("{}", toml::to_string_pretty(&config)?);
            Ok(())
        }
        Commands::Nudge { axis, delta } => {
            if simulated {
                nudge(MockMotorController::new(), &config, axis.into(), delta).await
            } else {
                let mut transport =
                    SerialCommandTransport::new(&config.motors.port, config.motors.baud_rate);
                transport
                    .connect()
                    .with_context(|| format!("Failed to open {}", config.motors.port))?;
                nudge(NewportController::new(transport), &config, axis.into(), delta).await
            }
        }
        command => {
            let json = matches!(command, Commands::Acquire { json: true, .. });
            if !json {
                println!("🔬 interf-daq - Synchronized Interferometer Acquisition");
                println!();
            }

            // No vendor camera backend is linked; frames come from the simulated sensor.
            let camera = MockCamera::new(config.mock.width, config.mock.height)
                .with_frame_rate(config.mock.frame_rate)
                .with_brightness_period(config.mock.period);

            if simulated {
                if !json {
                    println!("🔧 Simulated detector ({:?} period)", config.mock.period);
                }
                let device = MockSerialDevice::synthetic(config.mock.signal());
                run(camera, device, &config, command).await
            } else {
                if !json {
                    println!(
                        "🔌 Detector on {} @ {} baud",
                        config.serial.port, config.serial.baud_rate
                    );
                }
                let device = SerialPortDevice::new(&config.serial.port, config.serial.baud_rate);
                run(camera, device, &config, command).await
            }
        }
    }
}

async fn run<D: SerialDevice + 'static>(
    camera: MockCamera,
    device: D,
    config: &InterfConfig,
    command: Commands,
) -> Result<()> {
    let (count, json) = match command {
        Commands::Acquire { count, json } => (count, json),
        _ => (0, false),
    };

    let mut controller = AcquisitionController::new(camera, device, config.acquisition_settings())
        .context("Failed to start acquisition")?;

    if !json {
        println!("🎯 Calibrating trigger for {:?}...", config.trigger.calibration);
    }
    let calibration = match controller.calibrate().await {
        Ok(calibration) => calibration,
        Err(e) => {
            eprintln!("❌ Calibration failed: {}", e);
            controller.shutdown()?;
            return Err(e.into());
        }
    };

    if json {
        if count == 0 {
            println!("{}", serde_json::to_string(&calibration)?);
        }
    } else {
        println!("✅ Trigger calibrated");
        println!("   Generator maximum: {:.4}", calibration.max_value);
        if let Some(threshold) = calibration.threshold() {
            println!("   Threshold: {}", threshold);
        }
        println!(
            "   Samples: {} seen, {} rejected",
            calibration.samples_seen, calibration.rejected
        );
    }

    for index in 1..=count {
        let observation = match controller.calc_state().await {
            Ok(observation) => observation,
            Err(e) => {
                eprintln!("❌ Acquisition {} failed: {}", index, e);
                controller.shutdown()?;
                return Err(e.into());
            }
        };
        let report = ObservationReport {
            observation: &observation,
            camera_visibility: observation.camera_visibility(),
            device_visibility: observation
                .device_visibility(config.visibility.k, config.visibility.dark_offset),
            dropped_frames: controller.sink().dropped_frames(),
        };

        if json {
            println!("{}", serde_json::to_string(&report)?);
        } else {
            println!();
            println!("📸 Observation {}/{}", index, count);
            println!("   Frames: {}", observation.frames.len());
            println!("   Detector samples: {}", observation.device_trace.len());
            println!(
                "   Camera visibility: {}",
                format_visibility(report.camera_visibility)
            );
            println!(
                "   Detector visibility: {}",
                format_visibility(report.device_visibility)
            );
        }
    }

    controller.shutdown()?;
    if !json {
        println!();
        println!("👋 Done");
    }
    Ok(())
}

async fn nudge<M: MotorController>(
    motors: M,
    config: &InterfConfig,
    axis: MirrorAxis,
    delta: f64,
) -> Result<()> {
    let mut mirrors = MirrorAxes::new(Arc::new(motors), &config.motors);
    mirrors
        .load_home_positions()
        .await
        .context("Failed to read mirror home positions")?;

    let before = mirrors.position(axis);
    let target = mirrors.apply_normalized(axis, delta).await?;
    mirrors
        .wait_for_motors(Duration::from_millis(50), Some(Duration::from_secs(30)))
        .await
        .context("Mirror motors did not settle")?;

    println!(
        "🪞 {:?} (motor {}): {:.4} -> {:.4} (target {} steps)",
        axis,
        mirrors.motor_id(axis),
        before,
        mirrors.position(axis),
        target
    );
    Ok(())
}

fn format_visibility(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:.4}", v),
        None => "undefined".to_string(),
    }
}
