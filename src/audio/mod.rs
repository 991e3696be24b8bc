//! Real-time audio capture pipeline
//!
//! Samples flow: peripheral interrupt -> [`SampleRing`] (producer side) ->
//! [`RecordingWriter`] (consumer side, draining under lock) -> optional
//! [`adpcm`] compression -> persisted WAV container on storage.

pub mod adpcm;
pub mod buffer;
pub mod capture;
pub mod wav;
pub mod writer;

pub use adpcm::AdpcmState;
pub use buffer::SampleRing;
pub use capture::{CaptureSession, SampleSource};
pub use wav::WavHeader;
pub use writer::{FinalizeOutcome, RecordingMeta, RecordingWriter};
