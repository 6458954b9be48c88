//! Audio decoding, resampling and device output

pub mod decode;
pub mod output;
pub mod resampler;

pub use decode::{AudioDecoder, DecodedTrack};
pub use output::{AudioOutput, OutputVoice, VoiceTable};
pub use resampler::Resampler;
