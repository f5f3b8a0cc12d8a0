//! Events API normalization.

use {serde_json::Value, tracing::debug};

use switchboard_channels::{
    Error, InboundMedia, InstanceConfig, MediaKind, MediaSource, MessageType, Normalized,
    NormalizedMessage, Result,
};

use crate::types::{Envelope, MessageEvent};

/// Subtypes that still carry a user-authored message.
const USER_SUBTYPES: &[&str] = &["file_share", "thread_broadcast"];

pub fn normalize(instance: &InstanceConfig, raw: &Value) -> Result<Normalized> {
    let envelope: Envelope = serde_json::from_value(raw.clone())
        .map_err(|e| Error::invalid_input(format!("malformed slack payload: {e}")))?;

    let event = match envelope {
        Envelope::UrlVerification { challenge } => {
            return Ok(Normalized::Handshake {
                response: serde_json::json!({ "challenge": challenge }),
            });
        },
        Envelope::EventCallback { event, .. } => event,
        Envelope::Other => return Ok(Normalized::ignored("unsupported envelope")),
    };

    let kind = event.get("type").and_then(Value::as_str).unwrap_or_default();
    if kind != "message" && kind != "app_mention" {
        return Ok(Normalized::ignored(format!("event {kind}")));
    }

    let msg: MessageEvent = serde_json::from_value(event)
        .map_err(|e| Error::invalid_input(format!("malformed slack message: {e}")))?;

    if msg.bot_id.is_some() {
        return Ok(Normalized::ignored("bot message"));
    }
    if let Some(subtype) = msg.subtype.as_deref()
        && !USER_SUBTYPES.contains(&subtype)
    {
        debug!(instance = %instance.name, subtype, "ignoring slack message subtype");
        return Ok(Normalized::ignored(format!("subtype {subtype}")));
    }
    let Some(user) = msg.user.clone() else {
        return Err(Error::invalid_input("slack message without user"));
    };

    let text = msg
        .text
        .as_deref()
        .map(strip_user_mentions)
        .filter(|t| !t.is_empty());
    let media = msg.files.iter().find_map(|f| {
        let url = f.url_private_download.as_ref().or(f.url_private.as_ref())?;
        let mime = f.mimetype.as_deref().unwrap_or("application/octet-stream");
        Some(InboundMedia {
            kind: MediaKind::from_mime(mime),
            source: MediaSource::Url(url.clone()),
            mime_type: f.mimetype.clone(),
            file_name: f.name.clone(),
        })
    });
    if text.is_none() && media.is_none() {
        return Ok(Normalized::ignored("empty message"));
    }

    let message_type = match &media {
        Some(m) => MessageType::from_mime(m.mime_type.as_deref().unwrap_or_default()),
        None => MessageType::Text,
    };

    Ok(Normalized::Message(NormalizedMessage {
        timestamp: ts_ms(&msg.ts),
        channel_message_id: msg.ts,
        sender_id: user,
        sender_name: None,
        chat_id: msg.channel,
        message_type,
        text,
        media,
    }))
}

/// `1700000000.000100` → epoch milliseconds.
pub fn ts_ms(ts: &str) -> Option<i64> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let frac: String = frac.chars().take(3).collect();
    let millis: i64 = format!("{frac:0<3}").parse().unwrap_or(0);
    Some(secs * 1000 + millis)
}

/// Drop `<@U123>` mention tokens.
fn strip_user_mentions(text: &str) -> String {
    text.split_whitespace()
        .filter(|w| !(w.starts_with("<@") && w.ends_with('>')))
        .collect::<Vec<_>>()
        .join(" ")
}
