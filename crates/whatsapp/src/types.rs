//! Bridge webhook and REST payloads.

use serde::{Deserialize, Serialize};

/// Event name of an inbound (or echoed outbound) message.
pub const EVENT_MESSAGES_UPSERT: &str = "messages.upsert";

/// Webhook envelope posted by the bridge.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub event: String,
    #[serde(default)]
    pub instance: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// `data` of a `messages.upsert` event.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageData {
    pub key: MessageKey,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub message: Option<serde_json::Value>,
    /// Seconds since the epoch; bridges send either a number or a string.
    #[serde(default)]
    pub message_timestamp: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: String,
    #[serde(default)]
    pub from_me: bool,
    pub id: String,
    /// Actual sender inside a group chat.
    #[serde(default)]
    pub participant: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct QuotedKey<'a> {
    pub id: &'a str,
}

#[derive(Debug, Serialize)]
pub struct Quoted<'a> {
    pub key: QuotedKey<'a>,
}

#[derive(Debug, Serialize)]
pub struct SendTextRequest<'a> {
    pub number: &'a str,
    pub text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted: Option<Quoted<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMediaRequest<'a> {
    pub number: &'a str,
    pub mediatype: &'a str,
    /// URL or base64 payload.
    pub media: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub caption: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted: Option<Quoted<'a>>,
}

#[derive(Debug, Serialize)]
pub struct SendAudioRequest<'a> {
    pub number: &'a str,
    /// URL or base64 payload.
    pub audio: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quoted: Option<Quoted<'a>>,
}

/// Response of the send endpoints; only the key is of interest.
#[derive(Debug, Default, Deserialize)]
pub struct SendResponse {
    #[serde(default)]
    pub key: Option<SentKey>,
}

#[derive(Debug, Deserialize)]
pub struct SentKey {
    pub id: Option<String>,
}

/// `GET /instance/connectionState/{instance}`.
#[derive(Debug, Deserialize)]
pub struct ConnectionStateResponse {
    pub instance: BridgeInstanceState,
}

#[derive(Debug, Deserialize)]
pub struct BridgeInstanceState {
    #[serde(default)]
    pub state: String,
}

/// `GET /instance/connect/{instance}`; pairing data while waiting for a scan.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResponse {
    #[serde(default)]
    pub pairing_code: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub instance: Option<BridgeInstanceState>,
}
