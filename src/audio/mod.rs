//! Audio subsystem: formats, buffering, rendering and output

pub mod buffer;
pub mod device;
pub mod engine;
pub mod format;
pub mod output;

pub use buffer::{BufferWriter, PlaybackBuffer};
pub use device::{get_output_device, list_output_devices, OutputDeviceInfo};
pub use engine::{EngineStatsSnapshot, PlaybackEngine, RenderOutcome};
pub use format::{FormatDescriptor, SampleEncoding};
pub use output::{CpalOutput, NullOutput, OutputDriver, PullOutput};
