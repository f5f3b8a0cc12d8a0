use {
    async_trait::async_trait, bytes::Bytes, http::HeaderMap, secrecy::ExposeSecret,
    serde_json::Value, tracing::debug,
};

use switchboard_channels::{
    ChannelHandler, ChannelSession, ChannelType, ConnectionState, ConnectionStatus,
    InstanceConfig, MediaKind, MediaSource, Normalized, Result, SendResult, fetch::resolve_media,
};

use crate::{inbound, outbound::SlackApi, signature};

/// Slack Events API handler.
#[derive(Debug, Clone, Default)]
pub struct SlackHandler {
    client: reqwest::Client,
}

impl SlackHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn upload(
        &self,
        session: &ChannelSession<'_>,
        source: &MediaSource,
        mime_type: &str,
        base_name: &str,
        comment: Option<&str>,
    ) -> SendResult {
        let api = match SlackApi::new(&self.client, session.instance) {
            Ok(api) => api,
            Err(e) => return SendResult::failed(e),
        };
        let bytes = match self.fetch_media(session.instance, source).await {
            Ok(b) => b,
            Err(e) => return SendResult::failed(e),
        };
        let filename = format!(
            "{base_name}.{}",
            switchboard_media::extension_for_mime(mime_type)
        );
        api.upload_file(
            session.chat_id,
            bytes,
            filename,
            mime_type,
            comment,
            session.reply_to,
        )
        .await
    }
}

#[async_trait]
impl ChannelHandler for SlackHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Slack
    }

    fn verify_request(
        &self,
        instance: &InstanceConfig,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<()> {
        let Some(secret) = &instance.slack()?.signing_secret else {
            debug!(instance = %instance.name, "no slack signing secret, skipping verification");
            return Ok(());
        };
        let now_secs = switchboard_common::now_ms() / 1000;
        signature::verify(secret.expose_secret(), headers, body, now_secs)
    }

    fn normalize(&self, instance: &InstanceConfig, raw: &Value) -> Result<Normalized> {
        inbound::normalize(instance, raw)
    }

    async fn fetch_media(&self, instance: &InstanceConfig, source: &MediaSource) -> Result<Bytes> {
        // `url_private` downloads require the bot token.
        let token = instance.slack()?.bot_token.expose_secret().as_str();
        resolve_media(&self.client, source, Some(token), instance.channel.timeout()).await
    }

    async fn send_text(&self, session: &ChannelSession<'_>, text: &str) -> SendResult {
        match SlackApi::new(&self.client, session.instance) {
            Ok(api) => {
                api.post_message(session.chat_id, text, session.reply_to)
                    .await
            },
            Err(e) => SendResult::failed(e),
        }
    }

    async fn send_media(
        &self,
        session: &ChannelSession<'_>,
        media: &MediaSource,
        kind: MediaKind,
        caption: Option<&str>,
    ) -> SendResult {
        if let MediaSource::Url(url) = media {
            let text = match caption {
                Some(c) if !c.is_empty() => format!("{c}\n{url}"),
                _ => url.clone(),
            };
            return self.send_text(session, &text).await;
        }
        let mime_type = match kind {
            MediaKind::Image => "image/png",
            MediaKind::Video => "video/mp4",
            MediaKind::Audio => "audio/mpeg",
            MediaKind::Document => "application/octet-stream",
        };
        self.upload(session, media, mime_type, kind.as_str(), caption)
            .await
    }

    async fn send_audio(
        &self,
        session: &ChannelSession<'_>,
        audio: &MediaSource,
        mime_type: &str,
    ) -> SendResult {
        if let MediaSource::Url(url) = audio {
            return self.send_text(session, url).await;
        }
        self.upload(session, audio, mime_type, "reply", None).await
    }

    async fn connection_status(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        SlackApi::new(&self.client, instance)?.auth_test().await
    }

    async fn connect(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        // Events are pushed by Slack; connecting means the token works.
        SlackApi::new(&self.client, instance)?.auth_test().await
    }

    async fn disconnect(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        instance.slack()?;
        Ok(ConnectionStatus::new(ConnectionState::Disconnected))
    }
}
