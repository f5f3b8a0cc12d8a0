use std::{fmt, str::FromStr};

use {
    async_trait::async_trait,
    bytes::Bytes,
    http::HeaderMap,
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{
    Error, Result,
    instance::{ChannelType, ConnectionState, InstanceConfig},
};

// ── Inbound ────────────────────────────────────────────────────────────────

/// Kind of inbound message, as recorded on the trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Audio,
    Image,
    Video,
    Document,
    Sticker,
    Location,
    Contact,
    Other,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Audio => "audio",
            Self::Image => "image",
            Self::Video => "video",
            Self::Document => "document",
            Self::Sticker => "sticker",
            Self::Location => "location",
            Self::Contact => "contact",
            Self::Other => "other",
        }
    }

    /// Classify a MIME type (`audio/ogg; codecs=opus`, `image/png`, ...).
    pub fn from_mime(mime: &str) -> Self {
        match MediaKind::from_mime(mime) {
            MediaKind::Audio => Self::Audio,
            MediaKind::Image => Self::Image,
            MediaKind::Video => Self::Video,
            MediaKind::Document => Self::Document,
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(match s {
            "text" => Self::Text,
            "audio" => Self::Audio,
            "image" => Self::Image,
            "video" => Self::Video,
            "document" => Self::Document,
            "sticker" => Self::Sticker,
            "location" => Self::Location,
            "contact" => Self::Contact,
            "other" => Self::Other,
            other => return Err(Error::invalid_input(format!("unknown message type: {other}"))),
        })
    }
}

/// Media category used for outbound sends and inbound attachments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
    Audio,
    Document,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::Document => "document",
        }
    }

    pub fn from_mime(mime: &str) -> Self {
        let top = mime.split('/').next().unwrap_or_default().trim();
        match top.to_ascii_lowercase().as_str() {
            "audio" => Self::Audio,
            "image" => Self::Image,
            "video" => Self::Video,
            _ => Self::Document,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where media content lives.
#[derive(Clone, PartialEq, Eq)]
pub enum MediaSource {
    Url(String),
    /// Base64 payload embedded in the webhook.
    Base64(String),
    Bytes(Bytes),
}

impl fmt::Debug for MediaSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Url(u) => f.debug_tuple("Url").field(u).finish(),
            Self::Base64(b) => write!(f, "Base64({} chars)", b.len()),
            Self::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
        }
    }
}

/// Media attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMedia {
    pub kind: MediaKind,
    pub source: MediaSource,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
}

/// Channel-independent view of an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    /// Channel-native message id, used for redelivery protection.
    pub channel_message_id: String,
    /// Sender identity; phone number (with `+`) for WhatsApp.
    pub sender_id: String,
    pub sender_name: Option<String>,
    /// Conversation to reply into.
    pub chat_id: String,
    pub message_type: MessageType,
    pub text: Option<String>,
    pub media: Option<InboundMedia>,
    /// Channel timestamp in epoch milliseconds, when provided.
    pub timestamp: Option<i64>,
}

impl NormalizedMessage {
    pub fn has_media(&self) -> bool {
        self.media.is_some()
    }

    /// Attached audio, if the message carries any.
    pub fn audio(&self) -> Option<&InboundMedia> {
        self.media.as_ref().filter(|m| m.kind == MediaKind::Audio)
    }
}

/// Outcome of normalizing a raw webhook event.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Message(NormalizedMessage),
    /// Event the gateway does not act on (receipts, own messages, bot echoes).
    Ignored { reason: String },
    /// Protocol handshake; the ingress answers with `response` verbatim.
    Handshake { response: serde_json::Value },
}

impl Normalized {
    pub fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

// ── Outbound ───────────────────────────────────────────────────────────────

/// Conversation context for an outbound send.
#[derive(Debug, Clone, Copy)]
pub struct ChannelSession<'a> {
    pub instance: &'a InstanceConfig,
    pub chat_id: &'a str,
    /// Message being replied to, when the channel supports threading.
    pub reply_to: Option<&'a str>,
}

impl<'a> ChannelSession<'a> {
    pub fn new(instance: &'a InstanceConfig, chat_id: &'a str) -> Self {
        Self {
            instance,
            chat_id,
            reply_to: None,
        }
    }

    pub fn replying_to(mut self, message_id: &'a str) -> Self {
        self.reply_to = Some(message_id);
        self
    }
}

/// Longest upstream error body kept in a [`SendResult`] or on a trace.
pub const MAX_ERROR_EXCERPT_CHARS: usize = 200;

/// The first [`MAX_ERROR_EXCERPT_CHARS`] characters of an upstream error body.
pub fn error_excerpt(body: &str) -> &str {
    match body.char_indices().nth(MAX_ERROR_EXCERPT_CHARS) {
        Some((i, _)) => &body[..i],
        None => body,
    }
}

/// Result of a send. Failures are values, not errors: the dispatcher records
/// them on the trace and never retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SendResult {
    pub fn ok(message_id: Option<String>) -> Self {
        Self {
            success: true,
            message_id,
            error: None,
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            success: false,
            message_id: None,
            error: Some(error.to_string()),
        }
    }
}

/// Connection state plus a human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ConnectionStatus {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            owner_id: None,
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_owner(mut self, owner_id: Option<String>) -> Self {
        self.owner_id = owner_id;
        self
    }
}

// ── Handler trait ──────────────────────────────────────────────────────────

/// Capability set every channel implements.
///
/// Handlers hold no per-tenant state: credentials and timeouts come from the
/// `InstanceConfig` passed into each call, so a config update takes effect on
/// the next message.
#[async_trait]
pub trait ChannelHandler: Send + Sync {
    fn channel_type(&self) -> ChannelType;

    /// Authenticate a raw inbound request before it is parsed. Accepts
    /// everything unless the channel signs its webhooks.
    fn verify_request(
        &self,
        _instance: &InstanceConfig,
        _headers: &HeaderMap,
        _body: &[u8],
    ) -> Result<()> {
        Ok(())
    }

    /// Turn a raw webhook event into a [`NormalizedMessage`], or report that
    /// the event is ignored. Malformed events are errors.
    fn normalize(&self, instance: &InstanceConfig, raw: &serde_json::Value) -> Result<Normalized>;

    /// Resolve inbound media into bytes.
    async fn fetch_media(&self, instance: &InstanceConfig, source: &MediaSource) -> Result<Bytes>;

    async fn send_text(&self, session: &ChannelSession<'_>, text: &str) -> SendResult;

    async fn send_media(
        &self,
        session: &ChannelSession<'_>,
        media: &MediaSource,
        kind: MediaKind,
        caption: Option<&str>,
    ) -> SendResult;

    async fn send_audio(
        &self,
        session: &ChannelSession<'_>,
        audio: &MediaSource,
        mime_type: &str,
    ) -> SendResult;

    async fn connection_status(&self, instance: &InstanceConfig) -> Result<ConnectionStatus>;

    async fn connect(&self, instance: &InstanceConfig) -> Result<ConnectionStatus>;

    async fn disconnect(&self, instance: &InstanceConfig) -> Result<ConnectionStatus>;

    /// Disconnect then connect. A failing disconnect (already logged out,
    /// bridge has no session) does not stop the reconnect.
    async fn restart(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        if let Err(e) = self.disconnect(instance).await {
            debug!(
                instance = %instance.name,
                error = %e,
                "disconnect before restart failed, reconnecting anyway"
            );
        }
        self.connect(instance).await
    }
}
