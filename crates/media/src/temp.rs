//! Scoped temp files for audio uploads.

use std::path::{Path, PathBuf};

use {tempfile::NamedTempFile, tracing::debug};

use crate::{Error, Result, mime};

/// Audio written to a private temp file.
///
/// The file is created with owner-only permissions and removed when the value
/// is dropped, whichever way the owning future exits.
#[derive(Debug)]
pub struct TempAudio {
    file: NamedTempFile,
    mime_type: String,
    len: usize,
}

impl TempAudio {
    /// Write `data` to a new temp file in `dir` (the system temp dir when
    /// `None`). The MIME type is inferred from the payload, falling back to
    /// `audio/wav`.
    pub fn write(data: &[u8], dir: Option<&Path>) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::invalid_input("audio payload is empty"));
        }
        let mime_type = mime::sniff_audio_mime(data).unwrap_or(mime::FALLBACK_AUDIO_MIME);
        let suffix = format!(".{}", mime::extension_for_mime(mime_type));

        let mut builder = tempfile::Builder::new();
        builder.prefix("switchboard-audio-").suffix(&suffix);
        let file = match dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| Error::io("failed to create temp audio file", e))?;

        std::fs::write(file.path(), data)
            .map_err(|e| Error::io("failed to write audio to temp file", e))?;
        debug!(path = %file.path().display(), mime_type, bytes = data.len(), "wrote temp audio");

        Ok(Self {
            file,
            mime_type: mime_type.to_string(),
            len: data.len(),
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// File name to use for the upload part.
    pub fn file_name(&self) -> String {
        self.file
            .path()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| format!("audio.{}", mime::extension_for_mime(&self.mime_type)))
    }

    /// Open the file for async streaming.
    pub async fn open(&self) -> Result<tokio::fs::File> {
        tokio::fs::File::open(self.path())
            .await
            .map_err(|e| Error::io("failed to open temp audio file", e))
    }

    pub fn path_buf(&self) -> PathBuf {
        self.file.path().to_path_buf()
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let audio = TempAudio::write(b"OggS\0\x02payload", Some(dir.path())).unwrap();
        let path = audio.path_buf();
        assert!(path.exists());
        assert_eq!(audio.mime_type(), "audio/ogg");
        assert!(audio.file_name().ends_with(".ogg"));
        assert_eq!(std::fs::read(&path).unwrap(), b"OggS\0\x02payload");

        drop(audio);
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn unknown_payload_falls_back_to_wav() {
        let dir = tempfile::tempdir().unwrap();
        let audio = TempAudio::write(b"not audio", Some(dir.path())).unwrap();
        assert_eq!(audio.mime_type(), "audio/wav");
        assert!(audio.path().to_string_lossy().ends_with(".wav"));
    }

    #[test]
    fn empty_payload_is_rejected() {
        assert!(TempAudio::write(b"", None).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let audio = TempAudio::write(b"ID3data", Some(dir.path())).unwrap();
        let mode = std::fs::metadata(audio.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o077, 0);
    }

    #[tokio::test]
    async fn open_streams_contents() {
        use tokio::io::AsyncReadExt;

        let audio = TempAudio::write(b"fLaCdata", None).unwrap();
        let mut file = audio.open().await.unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"fLaCdata");
    }
}
