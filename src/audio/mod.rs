pub mod codec;
pub mod convert;
pub mod file;
pub mod output;
pub mod playback;
pub mod speaker;

pub use codec::{AudioChunk, AudioEncoding, CAPTURE_SAMPLE_RATE, PLAYBACK_SAMPLE_RATE};
pub use file::AudioFile;
pub use output::{NullOutput, OutputFactory, OutputTarget, WavOutput};
pub use playback::{AudioOutput, PlaybackScheduler, PlaybackSourceHandle, ScheduledSource};
pub use speaker::SpeakerOutput;
