//! Frame data, the camera hand-off buffer and visibility reducers.
pub mod frame;
pub mod frame_sink;
pub mod visibility;

pub use frame::{CropWindow, Frame, FrameBatch};
pub use frame_sink::{ArmHandle, FrameHandler, FrameSink};
