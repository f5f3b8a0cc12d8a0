use serde::{Deserialize, Serialize};

/// Dispatch name of a new message.
pub const MESSAGE_CREATE: &str = "MESSAGE_CREATE";

/// Discord's own epoch (2015-01-01) in Unix milliseconds.
pub const DISCORD_EPOCH_MS: i64 = 1_420_070_400_000;

/// Maximum message length accepted by the API.
pub const MAX_MESSAGE_LEN: usize = 2000;

/// Flag set on voice messages.
pub const FLAG_IS_VOICE_MESSAGE: u64 = 1 << 13;

/// Forwarded gateway dispatch.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayDispatch {
    #[serde(default)]
    pub op: Option<u8>,
    #[serde(default)]
    pub t: Option<String>,
    #[serde(default)]
    pub d: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Message {
    pub id: String,
    pub channel_id: String,
    #[serde(default)]
    pub guild_id: Option<String>,
    pub author: User,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub flags: u64,
    #[serde(default)]
    pub webhook_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub global_name: Option<String>,
    #[serde(default)]
    pub bot: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub url: String,
    #[serde(default)]
    pub filename: Option<String>,
    #[serde(default)]
    pub content_type: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MessageReference<'a> {
    pub message_id: &'a str,
    /// Do not fail the send when the referenced message is gone.
    pub fail_if_not_exists: bool,
}

#[derive(Debug, Serialize)]
pub struct CreateMessage<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_reference: Option<MessageReference<'a>>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentRef<'a>>,
}

#[derive(Debug, Serialize)]
pub struct AttachmentRef<'a> {
    pub id: u32,
    pub filename: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct CreatedMessage {
    pub id: String,
}
