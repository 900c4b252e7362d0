pub mod cache;
pub mod player;
pub mod prefetch;
pub mod projection;
pub mod sequencer;
pub mod source;
pub mod tts;
pub mod voices;
