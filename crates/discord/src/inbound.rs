//! Forwarded gateway event normalization.

use serde_json::Value;

use switchboard_channels::{
    Error, InboundMedia, InstanceConfig, MediaKind, MediaSource, MessageType, Normalized,
    NormalizedMessage, Result,
};

use crate::{
    markdown::strip_mentions,
    types::{DISCORD_EPOCH_MS, FLAG_IS_VOICE_MESSAGE, GatewayDispatch, MESSAGE_CREATE, Message},
};

pub fn normalize(_instance: &InstanceConfig, raw: &Value) -> Result<Normalized> {
    let dispatch: GatewayDispatch = serde_json::from_value(raw.clone())
        .map_err(|e| Error::invalid_input(format!("malformed discord event: {e}")))?;

    if dispatch.op.is_some_and(|op| op != 0) {
        return Ok(Normalized::ignored("non-dispatch gateway opcode"));
    }
    match dispatch.t.as_deref() {
        Some(MESSAGE_CREATE) => {},
        Some(other) => return Ok(Normalized::ignored(format!("event {other}"))),
        None => return Err(Error::invalid_input("discord event without type")),
    }

    let msg: Message = serde_json::from_value(dispatch.d)
        .map_err(|e| Error::invalid_input(format!("malformed discord message: {e}")))?;

    // Skip bot and webhook authors to prevent reply loops.
    if msg.author.bot || msg.webhook_id.is_some() {
        return Ok(Normalized::ignored("bot message"));
    }

    let text = strip_mentions(&msg.content);
    let attachment = msg.attachments.first();
    if text.is_empty() && attachment.is_none() {
        return Ok(Normalized::ignored("empty message"));
    }

    let media = attachment.map(|a| {
        let mime = a.content_type.as_deref().unwrap_or("application/octet-stream");
        InboundMedia {
            kind: if msg.flags & FLAG_IS_VOICE_MESSAGE != 0 {
                MediaKind::Audio
            } else {
                MediaKind::from_mime(mime)
            },
            source: MediaSource::Url(a.url.clone()),
            mime_type: a.content_type.clone(),
            file_name: a.filename.clone(),
        }
    });
    let message_type = match &media {
        Some(m) if m.kind == MediaKind::Audio => MessageType::Audio,
        Some(m) => MessageType::from_mime(m.mime_type.as_deref().unwrap_or_default()),
        None => MessageType::Text,
    };

    Ok(Normalized::Message(NormalizedMessage {
        timestamp: snowflake_ms(&msg.id),
        channel_message_id: msg.id,
        sender_id: msg.author.id,
        sender_name: msg.author.global_name.or(msg.author.username),
        chat_id: msg.channel_id,
        message_type,
        text: (!text.is_empty()).then_some(text),
        media,
    }))
}

/// Creation time embedded in a snowflake id.
pub fn snowflake_ms(id: &str) -> Option<i64> {
    let raw: u64 = id.parse().ok()?;
    i64::try_from(raw >> 22).ok().map(|ms| ms + DISCORD_EPOCH_MS)
}
