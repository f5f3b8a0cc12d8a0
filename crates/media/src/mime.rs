//! Audio MIME inference from magic bytes.

/// MIME type used when the payload does not identify itself.
pub const FALLBACK_AUDIO_MIME: &str = "audio/wav";

/// Infer an audio MIME type from the first bytes of `data`.
///
/// Returns `None` when no known container signature matches; callers decide
/// whether to fall back to [`FALLBACK_AUDIO_MIME`].
pub fn sniff_audio_mime(data: &[u8]) -> Option<&'static str> {
    if data.starts_with(b"OggS") {
        return Some("audio/ogg");
    }
    if data.len() >= 12 && data.starts_with(b"RIFF") && &data[8..12] == b"WAVE" {
        return Some("audio/wav");
    }
    if data.starts_with(b"ID3") {
        return Some("audio/mpeg");
    }
    // MPEG audio frame sync (MP3 without an ID3 tag).
    if data.len() >= 2 && data[0] == 0xFF && matches!(data[1], 0xFB | 0xF3 | 0xF2) {
        return Some("audio/mpeg");
    }
    if data.starts_with(b"fLaC") {
        return Some("audio/flac");
    }
    if data.len() >= 8 && &data[4..8] == b"ftyp" {
        return Some("audio/mp4");
    }
    if data.starts_with(&[0x1A, 0x45, 0xDF, 0xA3]) {
        return Some("audio/webm");
    }
    if data.starts_with(b"#!AMR") {
        return Some("audio/amr");
    }
    None
}

/// File extension for an audio MIME type, ignoring parameters.
pub fn extension_for_mime(mime: &str) -> &'static str {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    match essence.to_ascii_lowercase().as_str() {
        "audio/ogg" | "audio/opus" => "ogg",
        "audio/mpeg" | "audio/mp3" => "mp3",
        "audio/flac" | "audio/x-flac" => "flac",
        "audio/mp4" | "audio/m4a" | "audio/x-m4a" | "audio/aac" => "m4a",
        "audio/webm" => "webm",
        "audio/amr" => "amr",
        _ => "wav",
    }
}
