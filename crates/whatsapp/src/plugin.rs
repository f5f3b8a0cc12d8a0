//! [`ChannelHandler`] implementation for the WhatsApp bridge.

use {async_trait::async_trait, bytes::Bytes, serde_json::Value};

use switchboard_channels::{
    ChannelHandler, ChannelSession, ChannelType, ConnectionStatus, InstanceConfig, MediaKind,
    MediaSource, Normalized, Result, SendResult, fetch::resolve_media,
};

use crate::{
    inbound,
    outbound::{Bridge, media_payload},
    types::{Quoted, QuotedKey, SendAudioRequest, SendMediaRequest, SendTextRequest},
};

/// WhatsApp handler. Stateless; every call reads the tenant's bridge
/// credentials from the [`InstanceConfig`] it is given.
#[derive(Debug, Clone, Default)]
pub struct WhatsAppHandler {
    client: reqwest::Client,
}

impl WhatsAppHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn bridge<'a>(&'a self, instance: &'a InstanceConfig) -> Result<Bridge<'a>> {
        Bridge::new(&self.client, instance)
    }
}

fn quoted<'a>(session: &ChannelSession<'a>) -> Option<Quoted<'a>> {
    session.reply_to.map(|id| Quoted {
        key: QuotedKey { id },
    })
}

#[async_trait]
impl ChannelHandler for WhatsAppHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::WhatsApp
    }

    fn normalize(&self, instance: &InstanceConfig, raw: &Value) -> Result<Normalized> {
        inbound::normalize(instance, raw)
    }

    async fn fetch_media(&self, instance: &InstanceConfig, source: &MediaSource) -> Result<Bytes> {
        resolve_media(&self.client, source, None, instance.channel.timeout()).await
    }

    async fn send_text(&self, session: &ChannelSession<'_>, text: &str) -> SendResult {
        let bridge = match self.bridge(session.instance) {
            Ok(b) => b,
            Err(e) => return SendResult::failed(e),
        };
        let body = SendTextRequest {
            number: inbound::normalize_target(session.chat_id),
            text,
            quoted: quoted(session),
        };
        bridge.send("sendText", &body).await
    }

    async fn send_media(
        &self,
        session: &ChannelSession<'_>,
        media: &MediaSource,
        kind: MediaKind,
        caption: Option<&str>,
    ) -> SendResult {
        let bridge = match self.bridge(session.instance) {
            Ok(b) => b,
            Err(e) => return SendResult::failed(e),
        };
        let body = SendMediaRequest {
            number: inbound::normalize_target(session.chat_id),
            mediatype: kind.as_str(),
            media: media_payload(media),
            mimetype: None,
            caption,
            quoted: quoted(session),
        };
        bridge.send("sendMedia", &body).await
    }

    async fn send_audio(
        &self,
        session: &ChannelSession<'_>,
        audio: &MediaSource,
        mime_type: &str,
    ) -> SendResult {
        let bridge = match self.bridge(session.instance) {
            Ok(b) => b,
            Err(e) => return SendResult::failed(e),
        };
        // Voice notes must be sent through the dedicated endpoint; anything
        // else is delivered as an audio attachment.
        if mime_type.starts_with("audio/ogg") || matches!(audio, MediaSource::Url(_)) {
            let body = SendAudioRequest {
                number: inbound::normalize_target(session.chat_id),
                audio: media_payload(audio),
                quoted: quoted(session),
            };
            bridge.send("sendWhatsAppAudio", &body).await
        } else {
            let body = SendMediaRequest {
                number: inbound::normalize_target(session.chat_id),
                mediatype: MediaKind::Audio.as_str(),
                media: media_payload(audio),
                mimetype: Some(mime_type),
                caption: None,
                quoted: quoted(session),
            };
            bridge.send("sendMedia", &body).await
        }
    }

    async fn connection_status(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        self.bridge(instance)?.connection_state().await
    }

    async fn connect(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        self.bridge(instance)?.connect().await
    }

    async fn disconnect(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        self.bridge(instance)?.logout().await
    }
}
