//! Bridge REST client used for sends and lifecycle calls.

use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    reqwest::{Client, Method, RequestBuilder, Response, StatusCode},
    secrecy::ExposeSecret,
    serde::Serialize,
    tracing::{debug, warn},
};

use switchboard_channels::{
    ConnectionState, ConnectionStatus, Error, InstanceConfig, MediaSource, Result, SendResult,
    WhatsAppCredentials, error_excerpt,
};

use crate::types::{ConnectResponse, ConnectionStateResponse, SendResponse};

/// One tenant's view of the bridge.
pub(crate) struct Bridge<'a> {
    client: &'a Client,
    creds: &'a WhatsAppCredentials,
    /// Account name on the bridge side.
    account: &'a str,
    timeout: std::time::Duration,
}

impl<'a> Bridge<'a> {
    pub(crate) fn new(client: &'a Client, instance: &'a InstanceConfig) -> Result<Self> {
        let creds = instance.whatsapp()?;
        Ok(Self {
            client,
            creds,
            account: creds.bridge_instance.as_deref().unwrap_or(&instance.name),
            timeout: instance.channel.timeout(),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let base = self.creds.bridge_url.trim_end_matches('/');
        self.client
            .request(method, format!("{base}/{path}/{}", self.account))
            .header("apikey", self.creds.api_key.expose_secret())
            .timeout(self.timeout)
    }

    /// POST a send payload and turn the reply into a [`SendResult`].
    pub(crate) async fn send<B: Serialize>(&self, endpoint: &str, body: &B) -> SendResult {
        let resp = match self
            .request(Method::POST, &format!("message/{endpoint}"))
            .json(body)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!(account = self.account, endpoint, error = %e, "whatsapp bridge send failed");
                return SendResult::failed(format!("bridge request failed: {e}"));
            },
        };

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            warn!(account = self.account, endpoint, %status, "whatsapp bridge rejected send");
            return SendResult::failed(format!(
                "bridge returned HTTP {status}: {}",
                error_excerpt(&body)
            ));
        }

        let sent: SendResponse = resp.json().await.unwrap_or_default();
        let message_id = sent.key.and_then(|k| k.id);
        debug!(account = self.account, endpoint, ?message_id, "whatsapp message sent");
        SendResult::ok(message_id)
    }

    pub(crate) async fn connection_state(&self) -> Result<ConnectionStatus> {
        let resp = self.call("instance/connectionState").await?;
        let body: ConnectionStateResponse = resp
            .json()
            .await
            .map_err(|e| Error::external("whatsapp bridge connectionState body", e))?;
        Ok(status_from_bridge(&body.instance.state))
    }

    pub(crate) async fn connect(&self) -> Result<ConnectionStatus> {
        let resp = self.call("instance/connect").await?;
        let body: ConnectResponse = resp.json().await.unwrap_or_default();

        if let Some(inst) = &body.instance
            && inst.state == "open"
        {
            return Ok(ConnectionStatus::new(ConnectionState::Connected));
        }
        let detail = match (&body.pairing_code, &body.code) {
            (Some(code), _) => format!("pairing code {code}"),
            (None, Some(_)) => "waiting for QR code scan".to_string(),
            (None, None) => "connecting".to_string(),
        };
        Ok(ConnectionStatus::new(ConnectionState::Connecting).with_detail(detail))
    }

    pub(crate) async fn logout(&self) -> Result<ConnectionStatus> {
        let resp = self
            .request(Method::DELETE, "instance/logout")
            .send()
            .await
            .map_err(|e| Error::external("whatsapp bridge logout", e))?;
        match resp.status() {
            s if s.is_success() => Ok(ConnectionStatus::new(ConnectionState::Disconnected)),
            // The bridge answers 400/404 when the account has no live session.
            StatusCode::BAD_REQUEST | StatusCode::NOT_FOUND => {
                Ok(ConnectionStatus::new(ConnectionState::Disconnected)
                    .with_detail("already disconnected"))
            },
            s => Err(Error::unavailable(format!(
                "whatsapp bridge logout returned HTTP {s}"
            ))),
        }
    }

    async fn call(&self, path: &str) -> Result<Response> {
        let resp = self
            .request(Method::GET, path)
            .send()
            .await
            .map_err(|e| Error::external(format!("whatsapp bridge {path}"), e))?;
        if !resp.status().is_success() {
            return Err(Error::unavailable(format!(
                "whatsapp bridge {path} returned HTTP {}",
                resp.status()
            )));
        }
        Ok(resp)
    }
}

/// Bridge payloads accept either a URL or raw base64.
pub(crate) fn media_payload(source: &MediaSource) -> String {
    match source {
        MediaSource::Url(url) => url.clone(),
        MediaSource::Base64(b64) => b64.clone(),
        MediaSource::Bytes(bytes) => STANDARD.encode(bytes),
    }
}

fn status_from_bridge(state: &str) -> ConnectionStatus {
    match state {
        "open" => ConnectionStatus::new(ConnectionState::Connected),
        "connecting" => ConnectionStatus::new(ConnectionState::Connecting),
        "close" | "closed" => ConnectionStatus::new(ConnectionState::Disconnected),
        other => ConnectionStatus::new(ConnectionState::Error)
            .with_detail(format!("unknown bridge state: {other}")),
    }
}
