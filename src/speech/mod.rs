//! Speech output: VOICEVOX synthesis, voice resolution, playback.
//!
//! Components:
//! - `voicevox`: HTTP client for the VOICEVOX engine (voice directory + synthesis)
//! - `speakers`: voice name → style id resolution with a process-local cache
//! - `player`: audio player selection and subprocess playback
//! - `stream`: sentence-level synthesis/playback pipelining

pub mod player;
pub mod speakers;
pub mod stream;
pub mod voicevox;
