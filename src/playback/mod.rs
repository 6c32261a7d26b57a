//! Streamed audio playback: resampling, scheduling and output devices

pub mod driver;
pub mod output;
#[cfg(feature = "pulse")]
pub mod pulse;
pub mod resample;
pub mod scheduler;

pub use driver::PlaybackHandle;
pub use output::{OutputDevice, ScheduledBuffer, VirtualOutput};
pub use scheduler::{PlaybackCursor, PlaybackEdge, PlaybackScheduler, ScheduledChunk, SourceFormat};
