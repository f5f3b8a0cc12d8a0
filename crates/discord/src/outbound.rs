//! Discord REST client.

use {
    bytes::Bytes,
    reqwest::{
        Client, RequestBuilder, StatusCode,
        multipart::{Form, Part},
    },
    secrecy::ExposeSecret,
    serde_json::Value,
    tracing::{debug, warn},
};

use switchboard_channels::{
    ConnectionState, ConnectionStatus, DiscordCredentials, Error, InstanceConfig, Result,
    SendResult, error_excerpt,
};

use crate::types::{
    AttachmentRef, CreateMessage, CreatedMessage, MAX_MESSAGE_LEN, MessageReference,
};

pub(crate) struct DiscordApi<'a> {
    client: &'a Client,
    creds: &'a DiscordCredentials,
    timeout: std::time::Duration,
}

/// File to upload alongside a message.
pub(crate) struct Upload<'a> {
    pub bytes: Bytes,
    pub filename: &'a str,
    pub mime_type: &'a str,
}

impl<'a> DiscordApi<'a> {
    pub(crate) fn new(client: &'a Client, instance: &'a InstanceConfig) -> Result<Self> {
        Ok(Self {
            client,
            creds: instance.discord()?,
            timeout: instance.channel.timeout(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> RequestBuilder {
        let base = self.creds.api_base.trim_end_matches('/');
        self.client
            .request(method, format!("{base}{path}"))
            .header(
                "Authorization",
                format!("Bot {}", self.creds.bot_token.expose_secret()),
            )
            .timeout(self.timeout)
    }

    /// Send text, split into API-sized chunks. Only the first chunk replies
    /// to `reply_to`; the id of the last chunk is returned.
    pub(crate) async fn send_text(
        &self,
        channel_id: &str,
        text: &str,
        reply_to: Option<&str>,
    ) -> SendResult {
        let mut last = SendResult::failed("empty message");
        for (i, chunk) in crate::markdown::chunk_message(text, MAX_MESSAGE_LEN)
            .into_iter()
            .enumerate()
        {
            let body = CreateMessage {
                content: Some(chunk),
                message_reference: reply_to.filter(|_| i == 0).map(reference),
                attachments: Vec::new(),
            };
            last = self.create_message(channel_id, Payload::Json(&body)).await;
            if !last.success {
                break;
            }
        }
        last
    }

    pub(crate) async fn send_file(
        &self,
        channel_id: &str,
        upload: Upload<'_>,
        caption: Option<&str>,
        reply_to: Option<&str>,
    ) -> SendResult {
        let body = CreateMessage {
            content: caption,
            message_reference: reply_to.map(reference),
            attachments: vec![AttachmentRef {
                id: 0,
                filename: upload.filename,
            }],
        };
        let payload_json = match serde_json::to_string(&body) {
            Ok(s) => s,
            Err(e) => return SendResult::failed(e),
        };
        let part = match Part::bytes(upload.bytes.to_vec())
            .file_name(upload.filename.to_string())
            .mime_str(upload.mime_type)
        {
            Ok(p) => p,
            Err(e) => return SendResult::failed(format!("invalid attachment mime type: {e}")),
        };
        let form = Form::new()
            .text("payload_json", payload_json)
            .part("files[0]", part);
        self.create_message(channel_id, Payload::Multipart(form)).await
    }

    async fn create_message(&self, channel_id: &str, payload: Payload<'_>) -> SendResult {
        let req = self.request(
            reqwest::Method::POST,
            &format!("/channels/{channel_id}/messages"),
        );
        let req = match payload {
            Payload::Json(body) => req.json(body),
            Payload::Multipart(form) => req.multipart(form),
        };
        let resp = match req.send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(channel_id, error = %e, "discord send failed");
                return SendResult::failed(format!("discord request failed: {e}"));
            },
        };
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(channel_id, %status, "discord rejected message");
            return SendResult::failed(format!(
                "discord returned HTTP {status}: {}",
                error_excerpt(&body)
            ));
        }
        match resp.json::<CreatedMessage>().await {
            Ok(created) => {
                debug!(channel_id, message_id = %created.id, "discord message sent");
                SendResult::ok(Some(created.id))
            },
            Err(_) => SendResult::ok(None),
        }
    }

    /// Validate the bot token against `/users/@me`.
    pub(crate) async fn current_user(&self) -> Result<ConnectionStatus> {
        let resp = self
            .request(reqwest::Method::GET, "/users/@me")
            .send()
            .await
            .map_err(|e| Error::external("discord /users/@me", e))?;
        match resp.status() {
            s if s.is_success() => {
                let user: Value = resp
                    .json()
                    .await
                    .map_err(|e| Error::external("discord /users/@me body", e))?;
                let id = user.get("id").and_then(Value::as_str).map(str::to_string);
                let name = user
                    .get("username")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                Ok(ConnectionStatus::new(ConnectionState::Connected)
                    .with_owner(id)
                    .with_detail(format!("bot {name}")))
            },
            StatusCode::UNAUTHORIZED => Ok(ConnectionStatus::new(ConnectionState::Error)
                .with_detail("bot token rejected")),
            s => Err(Error::unavailable(format!(
                "discord /users/@me returned HTTP {s}"
            ))),
        }
    }
}

enum Payload<'a> {
    Json(&'a CreateMessage<'a>),
    Multipart(Form),
}

fn reference(message_id: &str) -> MessageReference<'_> {
    MessageReference {
        message_id,
        fail_if_not_exists: false,
    }
}
