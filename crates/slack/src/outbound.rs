//! Slack Web API client.

use {
    bytes::Bytes,
    reqwest::{
        Client, RequestBuilder,
        multipart::{Form, Part},
    },
    secrecy::ExposeSecret,
    tracing::{debug, warn},
};

use switchboard_channels::{
    ConnectionState, ConnectionStatus, Error, InstanceConfig, Result, SendResult,
    SlackCredentials,
};

use crate::types::{ApiResponse, PostMessage};

pub(crate) struct SlackApi<'a> {
    client: &'a Client,
    creds: &'a SlackCredentials,
    timeout: std::time::Duration,
}

impl<'a> SlackApi<'a> {
    pub(crate) fn new(client: &'a Client, instance: &'a InstanceConfig) -> Result<Self> {
        Ok(Self {
            client,
            creds: instance.slack()?,
            timeout: instance.channel.timeout(),
        })
    }

    fn post(&self, method: &str) -> RequestBuilder {
        let base = self.creds.api_base.trim_end_matches('/');
        self.client
            .post(format!("{base}/{method}"))
            .bearer_auth(self.creds.bot_token.expose_secret())
            .timeout(self.timeout)
    }

    pub(crate) async fn post_message(
        &self,
        channel: &str,
        text: &str,
        thread_ts: Option<&str>,
    ) -> SendResult {
        let body = PostMessage {
            channel,
            text,
            thread_ts,
        };
        match self.call("chat.postMessage", self.post("chat.postMessage").json(&body)).await {
            Ok(resp) => SendResult::ok(resp.ts),
            Err(e) => SendResult::failed(e),
        }
    }

    pub(crate) async fn upload_file(
        &self,
        channel: &str,
        bytes: Bytes,
        filename: String,
        mime_type: &str,
        comment: Option<&str>,
        thread_ts: Option<&str>,
    ) -> SendResult {
        let part = match Part::bytes(bytes.to_vec())
            .file_name(filename.clone())
            .mime_str(mime_type)
        {
            Ok(p) => p,
            Err(e) => return SendResult::failed(format!("invalid file mime type: {e}")),
        };
        let mut form = Form::new()
            .text("channels", channel.to_string())
            .text("filename", filename)
            .part("file", part);
        if let Some(comment) = comment {
            form = form.text("initial_comment", comment.to_string());
        }
        if let Some(ts) = thread_ts {
            form = form.text("thread_ts", ts.to_string());
        }

        match self.call("files.upload", self.post("files.upload").multipart(form)).await {
            Ok(resp) => SendResult::ok(resp.file.map(|f| f.id)),
            Err(e) => SendResult::failed(e),
        }
    }

    pub(crate) async fn auth_test(&self) -> Result<ConnectionStatus> {
        match self.call("auth.test", self.post("auth.test")).await {
            Ok(resp) => {
                let detail = match (resp.user, resp.team) {
                    (Some(user), Some(team)) => format!("{user} in {team}"),
                    (Some(user), None) => user,
                    _ => "authenticated".to_string(),
                };
                Ok(ConnectionStatus::new(ConnectionState::Connected)
                    .with_owner(resp.user_id)
                    .with_detail(detail))
            },
            Err(Error::Unauthorized { message }) => {
                Ok(ConnectionStatus::new(ConnectionState::Error).with_detail(message))
            },
            Err(e) => Err(e),
        }
    }

    /// Send a Web API call. Slack reports most failures as HTTP 200 with
    /// `ok: false`, so both layers are checked.
    async fn call(&self, method: &str, req: RequestBuilder) -> Result<ApiResponse> {
        let resp = req.send().await.map_err(|e| {
            warn!(method, error = %e, "slack api request failed");
            Error::external(format!("slack {method}"), e)
        })?;
        let status = resp.status();
        if !status.is_success() {
            warn!(method, %status, "slack api returned error status");
            return Err(Error::unavailable(format!("slack {method} returned HTTP {status}")));
        }
        let body: ApiResponse = resp
            .json()
            .await
            .map_err(|e| Error::external(format!("slack {method} body"), e))?;
        if !body.ok {
            let error = body.error.unwrap_or_else(|| "unknown_error".into());
            warn!(method, error = %error, "slack api call not ok");
            return Err(match error.as_str() {
                "invalid_auth" | "not_authed" | "account_inactive" | "token_revoked" => {
                    Error::unauthorized(format!("slack {method}: {error}"))
                },
                _ => Error::unavailable(format!("slack {method}: {error}")),
            });
        }
        debug!(method, "slack api call ok");
        Ok(body)
    }
}
