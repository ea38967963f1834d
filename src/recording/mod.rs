mod buffer;
mod recorder;
mod sampler;

pub use buffer::{AppendOutcome, RecordingBuffer, SessionMeta};
pub use recorder::Recorder;
pub use sampler::{ContextLabels, Sampler};
