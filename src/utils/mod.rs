pub mod audio;
pub mod language;

pub use audio::{WIRE_SAMPLE_RATE, f32_to_i16, i16_to_f32, pack_s16le, unpack_s16le};
pub use language::{DetectedLanguage, classify_language};
