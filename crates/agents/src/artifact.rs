use std::fmt;

use bytes::Bytes;

/// What the agent backend produced.
#[derive(Clone, PartialEq, Eq)]
pub enum AgentArtifact {
    Text { content: String },
    AudioBytes { content: Bytes, mime_type: String },
    AudioUrl { content: String, mime_type: String },
}

impl AgentArtifact {
    pub fn text(content: impl Into<String>) -> Self {
        Self::Text {
            content: content.into(),
        }
    }

    /// Stable name, used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::AudioBytes { .. } => "audio_bytes",
            Self::AudioUrl { .. } => "audio_url",
        }
    }
}

impl fmt::Debug for AgentArtifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text { content } => f.debug_struct("Text").field("content", content).finish(),
            Self::AudioBytes { content, mime_type } => f
                .debug_struct("AudioBytes")
                .field("bytes", &content.len())
                .field("mime_type", mime_type)
                .finish(),
            Self::AudioUrl { content, mime_type } => f
                .debug_struct("AudioUrl")
                .field("content", content)
                .field("mime_type", mime_type)
                .finish(),
        }
    }
}
