//! Bridge webhook normalization.

use {serde_json::Value, tracing::debug};

use switchboard_channels::{
    Error, InboundMedia, InstanceConfig, MediaKind, MediaSource, MessageType, Normalized,
    NormalizedMessage, Result,
};

use crate::types::{EVENT_MESSAGES_UPSERT, MessageData, WebhookEvent};

const USER_SUFFIX: &str = "@s.whatsapp.net";
const GROUP_SUFFIX: &str = "@g.us";
const STATUS_BROADCAST: &str = "status@broadcast";

/// Normalize a bridge webhook body.
pub fn normalize(instance: &InstanceConfig, raw: &Value) -> Result<Normalized> {
    let event: WebhookEvent = serde_json::from_value(raw.clone())
        .map_err(|e| Error::invalid_input(format!("malformed whatsapp webhook: {e}")))?;

    // Bridges emit dotted or upper-snake event names depending on version.
    let event_name = event.event.to_ascii_lowercase().replace('_', ".");
    if event_name != EVENT_MESSAGES_UPSERT {
        return Ok(Normalized::ignored(format!("event {}", event.event)));
    }

    let data: MessageData = serde_json::from_value(event.data)
        .map_err(|e| Error::invalid_input(format!("malformed whatsapp message: {e}")))?;

    if data.key.from_me {
        return Ok(Normalized::ignored("own message"));
    }
    if data.key.remote_jid == STATUS_BROADCAST {
        return Ok(Normalized::ignored("status broadcast"));
    }
    if data.key.id.trim().is_empty() {
        return Err(Error::invalid_input("whatsapp message without id"));
    }

    let chat_id = data.key.remote_jid.clone();
    let sender_jid = if chat_id.ends_with(GROUP_SUFFIX) {
        data.key
            .participant
            .as_deref()
            .ok_or_else(|| Error::invalid_input("group message without participant"))?
    } else {
        chat_id.as_str()
    };

    let message = data.message.clone().unwrap_or(Value::Null);
    let Some((message_type, text, media)) = classify(&data, &message) else {
        debug!(
            instance = %instance.name,
            message_type = ?data.message_type,
            "ignoring unsupported whatsapp message"
        );
        return Ok(Normalized::ignored(format!(
            "unsupported message type {}",
            data.message_type.as_deref().unwrap_or("unknown")
        )));
    };

    Ok(Normalized::Message(NormalizedMessage {
        channel_message_id: data.key.id.clone(),
        sender_id: phone_from_jid(sender_jid),
        sender_name: data.push_name.clone().filter(|n| !n.is_empty()),
        chat_id,
        message_type,
        text,
        media,
        timestamp: data.message_timestamp.as_ref().and_then(epoch_ms),
    }))
}

/// `15550001@s.whatsapp.net` (or `15550001:12@s.whatsapp.net`) → `+15550001`.
pub fn phone_from_jid(jid: &str) -> String {
    let user = jid.split('@').next().unwrap_or(jid);
    let user = user.split(':').next().unwrap_or(user);
    if user.starts_with('+') {
        user.to_string()
    } else {
        format!("+{user}")
    }
}

/// Accept either a bare number (`15550001`) or a JID as an outbound target.
pub fn normalize_target(chat_id: &str) -> &str {
    chat_id.strip_suffix(USER_SUFFIX).unwrap_or(chat_id)
}

type Classified = (MessageType, Option<String>, Option<InboundMedia>);

fn classify(data: &MessageData, message: &Value) -> Option<Classified> {
    let kind = data
        .message_type
        .clone()
        .or_else(|| first_content_key(message))?;

    match kind.as_str() {
        "conversation" => {
            let text = message.get("conversation").and_then(Value::as_str)?;
            Some((MessageType::Text, Some(text.to_string()), None))
        },
        "extendedTextMessage" => {
            let text = message
                .pointer("/extendedTextMessage/text")
                .and_then(Value::as_str)?;
            Some((MessageType::Text, Some(text.to_string()), None))
        },
        "audioMessage" => media(message, "audioMessage", MediaKind::Audio, MessageType::Audio),
        "imageMessage" => media(message, "imageMessage", MediaKind::Image, MessageType::Image),
        "videoMessage" => media(message, "videoMessage", MediaKind::Video, MessageType::Video),
        "documentMessage" | "documentWithCaptionMessage" => media(
            message,
            "documentMessage",
            MediaKind::Document,
            MessageType::Document,
        ),
        "stickerMessage" => media(message, "stickerMessage", MediaKind::Image, MessageType::Sticker),
        "locationMessage" => {
            let loc = message.get("locationMessage")?;
            let text = match (
                loc.get("degreesLatitude").and_then(Value::as_f64),
                loc.get("degreesLongitude").and_then(Value::as_f64),
            ) {
                (Some(lat), Some(lon)) => Some(format!("{lat},{lon}")),
                _ => None,
            };
            Some((MessageType::Location, text, None))
        },
        "contactMessage" => {
            let text = message
                .pointer("/contactMessage/vcard")
                .and_then(Value::as_str)
                .map(str::to_string);
            Some((MessageType::Contact, text, None))
        },
        _ => None,
    }
}

fn media(
    message: &Value,
    key: &str,
    kind: MediaKind,
    message_type: MessageType,
) -> Option<Classified> {
    let body = message.get(key).or_else(|| {
        message.pointer(&format!("/documentWithCaptionMessage/message/{key}"))
    })?;
    let mime_type = body
        .get("mimetype")
        .and_then(Value::as_str)
        .map(str::to_string);
    let caption = body
        .get("caption")
        .and_then(Value::as_str)
        .filter(|c| !c.is_empty())
        .map(str::to_string);

    // Inline base64 (bridge "webhook base64" mode) beats a media URL.
    let source = if let Some(b64) = message.get("base64").and_then(Value::as_str) {
        MediaSource::Base64(b64.to_string())
    } else if let Some(url) = message
        .get("mediaUrl")
        .or_else(|| body.get("url"))
        .and_then(Value::as_str)
    {
        MediaSource::Url(url.to_string())
    } else {
        return Some((message_type, caption, None));
    };

    Some((
        message_type,
        caption,
        Some(InboundMedia {
            kind,
            source,
            mime_type,
            file_name: body
                .get("fileName")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
    ))
}

fn first_content_key(message: &Value) -> Option<String> {
    message
        .as_object()?
        .keys()
        .find(|k| k.as_str() != "messageContextInfo" && k.as_str() != "base64")
        .cloned()
}

fn epoch_ms(value: &Value) -> Option<i64> {
    let secs = match value {
        Value::Number(n) => n.as_i64()?,
        Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    Some(secs * 1000)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    use crate::plugin::tests::instance;

    fn upsert(data: Value) -> Value {
        json!({"event": "messages.upsert", "instance": "acme", "data": data})
    }

    fn message(n: Normalized) -> NormalizedMessage {
        match n {
            Normalized::Message(m) => m,
            other => panic!("expected message, got {other:?}"),
        }
    }

    #[test]
    fn text_message() {
        let raw = upsert(json!({
            "key": {"remoteJid": "15550001@s.whatsapp.net", "fromMe": false, "id": "ABC1"},
            "pushName": "Ana",
            "messageType": "conversation",
            "message": {"conversation": "hello"},
            "messageTimestamp": 1_700_000_000
        }));
        let msg = message(normalize(&instance("http://bridge"), &raw).unwrap());
        assert_eq!(msg.channel_message_id, "ABC1");
        assert_eq!(msg.sender_id, "+15550001");
        assert_eq!(msg.sender_name.as_deref(), Some("Ana"));
        assert_eq!(msg.chat_id, "15550001@s.whatsapp.net");
        assert_eq!(msg.message_type, MessageType::Text);
        assert_eq!(msg.text.as_deref(), Some("hello"));
        assert_eq!(msg.timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn group_sender_is_participant() {
        let raw = upsert(json!({
            "key": {
                "remoteJid": "1203630@g.us",
                "fromMe": false,
                "id": "G1",
                "participant": "4479000:3@s.whatsapp.net"
            },
            "message": {"extendedTextMessage": {"text": "hi all"}},
        }));
        let msg = message(normalize(&instance("http://bridge"), &raw).unwrap());
        assert_eq!(msg.sender_id, "+4479000");
        assert_eq!(msg.chat_id, "1203630@g.us");
        assert_eq!(msg.text.as_deref(), Some("hi all"));
    }

    #[test]
    fn audio_with_inline_base64() {
        let raw = upsert(json!({
            "key": {"remoteJid": "1555@s.whatsapp.net", "id": "A1"},
            "messageType": "audioMessage",
            "message": {
                "audioMessage": {"mimetype": "audio/ogg; codecs=opus", "ptt": true, "url": "https://mmg/enc"},
                "base64": "T2dnUw=="
            }
        }));
        let msg = message(normalize(&instance("http://bridge"), &raw).unwrap());
        assert_eq!(msg.message_type, MessageType::Audio);
        let audio = msg.audio().unwrap();
        assert_eq!(audio.source, MediaSource::Base64("T2dnUw==".into()));
        assert_eq!(audio.mime_type.as_deref(), Some("audio/ogg; codecs=opus"));
    }

    #[test]
    fn image_with_url_and_caption() {
        let raw = upsert(json!({
            "key": {"remoteJid": "1555@s.whatsapp.net", "id": "I1"},
            "messageType": "imageMessage",
            "message": {"imageMessage": {"url": "https://cdn/img", "mimetype": "image/jpeg", "caption": "look"}}
        }));
        let msg = message(normalize(&instance("http://bridge"), &raw).unwrap());
        assert_eq!(msg.message_type, MessageType::Image);
        assert_eq!(msg.text.as_deref(), Some("look"));
        assert_eq!(
            msg.media.unwrap().source,
            MediaSource::Url("https://cdn/img".into())
        );
    }

    #[test]
    fn ignored_events() {
        let inst = instance("http://bridge");
        let own = upsert(json!({
            "key": {"remoteJid": "1555@s.whatsapp.net", "fromMe": true, "id": "X"},
            "message": {"conversation": "echo"}
        }));
        assert!(matches!(normalize(&inst, &own).unwrap(), Normalized::Ignored { .. }));

        let receipt = json!({"event": "messages.update", "data": {"status": "READ"}});
        assert!(matches!(normalize(&inst, &receipt).unwrap(), Normalized::Ignored { .. }));

        let reaction = upsert(json!({
            "key": {"remoteJid": "1555@s.whatsapp.net", "id": "R"},
            "messageType": "reactionMessage",
            "message": {"reactionMessage": {"text": "👍"}}
        }));
        assert!(matches!(normalize(&inst, &reaction).unwrap(), Normalized::Ignored { .. }));

        let upper = json!({"event": "CONNECTION_UPDATE", "data": {}});
        assert!(matches!(normalize(&inst, &upper).unwrap(), Normalized::Ignored { .. }));
    }

    #[test]
    fn malformed_events_are_errors() {
        let inst = instance("http://bridge");
        assert!(normalize(&inst, &json!({"data": {}})).is_err());
        let no_key = upsert(json!({"message": {"conversation": "x"}}));
        assert!(normalize(&inst, &no_key).is_err());
        let group_without_participant = upsert(json!({
            "key": {"remoteJid": "1203@g.us", "id": "G"},
            "message": {"conversation": "x"}
        }));
        assert!(normalize(&inst, &group_without_participant).is_err());
    }

    #[test]
    fn jid_helpers() {
        assert_eq!(phone_from_jid("15550001@s.whatsapp.net"), "+15550001");
        assert_eq!(phone_from_jid("+4412"), "+4412");
        assert_eq!(normalize_target("15550001@s.whatsapp.net"), "15550001");
        assert_eq!(normalize_target("1203@g.us"), "1203@g.us");
    }
}
