//! Hardware Abstraction Layer
//!
//! Capability traits for the camera, the serial detector link and the mirror
//! motors, plus their concrete backends.
//!
//! # Modules
//!
//! - `capabilities` - `CameraDriver`, `SerialDevice`, `MotorController`
//! - `serial_port` - `serialport` backend for the detector link
//! - `newport` - Newport picomotor protocol and serial command transport
//! - `mirrors` - normalised mirror screw axes on top of a motor controller
//! - `mock` - simulated camera, serial link and motors

pub mod capabilities;
pub mod mirrors;
pub mod mock;
pub mod newport;
pub mod serial_port;

pub use capabilities::{
    CameraDriver, CommandTransport, FrameLease, MotorController, SensorMode, SerialDevice,
};
pub use mirrors::{MirrorAxes, MirrorAxis};
pub use mock::{MockCamera, MockMotorController, MockSerialDevice, SyntheticSignal};
pub use newport::{NewportController, SerialCommandTransport};
pub use serial_port::SerialPortDevice;
