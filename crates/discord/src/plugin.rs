use {async_trait::async_trait, bytes::Bytes, serde_json::Value};

use switchboard_channels::{
    ChannelHandler, ChannelSession, ChannelType, ConnectionState, ConnectionStatus,
    InstanceConfig, MediaKind, MediaSource, Normalized, Result, SendResult, fetch::resolve_media,
};

use crate::{
    inbound,
    outbound::{DiscordApi, Upload},
};

/// Discord handler over the REST API.
#[derive(Debug, Clone, Default)]
pub struct DiscordHandler {
    client: reqwest::Client,
}

impl DiscordHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    async fn upload_bytes(
        &self,
        session: &ChannelSession<'_>,
        source: &MediaSource,
        mime_type: &str,
        base_name: &str,
        caption: Option<&str>,
    ) -> SendResult {
        let api = match DiscordApi::new(&self.client, session.instance) {
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
        let upload = Upload {
            bytes,
            filename: &filename,
            mime_type,
        };
        api.send_file(session.chat_id, upload, caption, session.reply_to)
            .await
    }
}

#[async_trait]
impl ChannelHandler for DiscordHandler {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Discord
    }

    fn normalize(&self, instance: &InstanceConfig, raw: &Value) -> Result<Normalized> {
        inbound::normalize(instance, raw)
    }

    async fn fetch_media(&self, instance: &InstanceConfig, source: &MediaSource) -> Result<Bytes> {
        resolve_media(&self.client, source, None, instance.channel.timeout()).await
    }

    async fn send_text(&self, session: &ChannelSession<'_>, text: &str) -> SendResult {
        match DiscordApi::new(&self.client, session.instance) {
            Ok(api) => api.send_text(session.chat_id, text, session.reply_to).await,
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
        // Discord unfurls URLs itself; only payloads need uploading.
        if let MediaSource::Url(url) = media {
            let content = match caption {
                Some(c) if !c.is_empty() => format!("{c}\n{url}"),
                _ => url.clone(),
            };
            return self.send_text(session, &content).await;
        }
        let mime_type = match kind {
            MediaKind::Image => "image/png",
            MediaKind::Video => "video/mp4",
            MediaKind::Audio => "audio/mpeg",
            MediaKind::Document => "application/octet-stream",
        };
        self.upload_bytes(session, media, mime_type, kind.as_str(), caption)
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
        self.upload_bytes(session, audio, mime_type, "reply", None)
            .await
    }

    async fn connection_status(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        DiscordApi::new(&self.client, instance)?.current_user().await
    }

    async fn connect(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        // The gateway session lives in the forwarder; connecting validates
        // the token the replies will use.
        DiscordApi::new(&self.client, instance)?.current_user().await
    }

    async fn disconnect(&self, instance: &InstanceConfig) -> Result<ConnectionStatus> {
        instance.discord()?;
        Ok(ConnectionStatus::new(ConnectionState::Disconnected))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use {
        super::*,
        secrecy::Secret,
        serde_json::json,
        switchboard_channels::{
            AgentBackendConfig, ChannelCredentials, ConnectionSnapshot, DiscordCredentials,
        },
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{body_partial_json, body_string_contains, header, method, path},
        },
    };

    pub(crate) fn instance(api_base: &str) -> InstanceConfig {
        InstanceConfig {
            name: "guild".into(),
            is_default: false,
            channel: ChannelCredentials::Discord(DiscordCredentials {
                bot_token: Secret::new("bot-token".into()),
                api_base: api_base.into(),
                timeout_secs: 5,
            }),
            agent: AgentBackendConfig {
                url: "http://agent".into(),
                api_key: None,
                timeout_secs: 5,
            },
            connection: ConnectionSnapshot::default(),
        }
    }

    #[tokio::test]
    async fn send_text_replies_to_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/C1/messages"))
            .and(header("authorization", "Bot bot-token"))
            .and(body_partial_json(json!({
                "content": "hello",
                "message_reference": {"message_id": "M1"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "M2"})))
            .expect(1)
            .mount(&server)
            .await;

        let inst = instance(&server.uri());
        let session = ChannelSession::new(&inst, "C1").replying_to("M1");
        let result = DiscordHandler::new().send_text(&session, "hello").await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.message_id.as_deref(), Some("M2"));
    }

    #[tokio::test]
    async fn long_text_is_chunked() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/C1/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "M"})))
            .expect(2)
            .mount(&server)
            .await;

        let inst = instance(&server.uri());
        let session = ChannelSession::new(&inst, "C1");
        let result = DiscordHandler::new()
            .send_text(&session, &"z".repeat(3000))
            .await;
        assert!(result.success);
    }

    #[tokio::test]
    async fn audio_bytes_are_uploaded_as_file() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/C1/messages"))
            .and(body_string_contains("name=\"files[0]\""))
            .and(body_string_contains("filename=\"reply.ogg\""))
            .and(body_string_contains("payload_json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "F1"})))
            .expect(1)
            .mount(&server)
            .await;

        let inst = instance(&server.uri());
        let session = ChannelSession::new(&inst, "C1");
        let audio = MediaSource::Bytes(Bytes::from_static(b"OggS-voice"));
        let result = DiscordHandler::new()
            .send_audio(&session, &audio, "audio/ogg")
            .await;
        assert!(result.success, "{result:?}");
        assert_eq!(result.message_id.as_deref(), Some("F1"));
    }

    #[tokio::test]
    async fn media_url_is_posted_as_link() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/channels/C1/messages"))
            .and(body_partial_json(json!({"content": "hear this\nhttps://cdn/a.mp3"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "L1"})))
            .expect(1)
            .mount(&server)
            .await;

        let inst = instance(&server.uri());
        let session = ChannelSession::new(&inst, "C1");
        let media = MediaSource::Url("https://cdn/a.mp3".into());
        let result = DiscordHandler::new()
            .send_media(&session, &media, MediaKind::Audio, Some("hear this"))
            .await;
        assert!(result.success, "{result:?}");
    }

    #[tokio::test]
    async fn rejected_send_is_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Missing Access"))
            .mount(&server)
            .await;

        let inst = instance(&server.uri());
        let session = ChannelSession::new(&inst, "C1");
        let result = DiscordHandler::new().send_text(&session, "x").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("Missing Access"));
    }

    #[tokio::test]
    async fn status_validates_token() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .and(header("authorization", "Bot bot-token"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"id": "B1", "username": "helper"})),
            )
            .mount(&server)
            .await;

        let inst = instance(&server.uri());
        let handler = DiscordHandler::new();
        let status = handler.connection_status(&inst).await.unwrap();
        assert_eq!(status.state, ConnectionState::Connected);
        assert_eq!(status.owner_id.as_deref(), Some("B1"));

        let status = handler.disconnect(&inst).await.unwrap();
        assert_eq!(status.state, ConnectionState::Disconnected);
        let status = handler.restart(&inst).await.unwrap();
        assert_eq!(status.state, ConnectionState::Connected);
    }

    #[tokio::test]
    async fn bad_token_is_error_state() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/@me"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;

        let inst = instance(&server.uri());
        let status = DiscordHandler::new().connect(&inst).await.unwrap();
        assert_eq!(status.state, ConnectionState::Error);
    }
}
