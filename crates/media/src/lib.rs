//! Media helpers shared by channel handlers and the agent bridge: audio MIME
//! inference from payload bytes and scoped temp files for uploads.

pub mod error;
pub mod mime;
pub mod temp;

pub use {
    error::{Error, Result},
    mime::{FALLBACK_AUDIO_MIME, extension_for_mime, sniff_audio_mime},
    temp::TempAudio,
};
