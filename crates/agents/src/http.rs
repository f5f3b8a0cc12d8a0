//! HTTP agent backend (`POST {url}/runs`).

use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    reqwest::{
        Client, RequestBuilder,
        header::CONTENT_TYPE,
        multipart::{Form, Part},
    },
    secrecy::ExposeSecret,
    serde::Serialize,
    serde_json::Value,
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{agent as agent_metrics, counter, histogram, labels};

use {
    switchboard_channels::{InstanceConfig, NormalizedMessage, error_excerpt},
    switchboard_media::TempAudio,
};

use crate::{AgentArtifact, AgentBridge, AgentError};

/// Keys accepted as the text reply in a JSON response, in priority order.
const TEXT_KEYS: [&str; 4] = ["text", "content", "response", "output"];

/// Agent bridge over HTTP.
#[derive(Debug, Clone, Default)]
pub struct HttpAgentBridge {
    client: Client,
    temp_dir: Option<PathBuf>,
    max_timeout: Option<Duration>,
}

/// Message fields sent to the backend, as JSON or as multipart text parts.
#[derive(Debug, Serialize)]
struct RunRequest<'a> {
    message: &'a str,
    sender_id: &'a str,
    message_type: &'static str,
    instance: &'a str,
    channel_type: &'static str,
    channel_message_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sender_name: Option<&'a str>,
}

impl<'a> RunRequest<'a> {
    fn new(instance: &'a InstanceConfig, message: &'a NormalizedMessage) -> Self {
        Self {
            message: message.text.as_deref().unwrap_or_default(),
            sender_id: &message.sender_id,
            message_type: message.message_type.as_str(),
            instance: &instance.name,
            channel_type: instance.channel_type().as_str(),
            channel_message_id: &message.channel_message_id,
            sender_name: message.sender_name.as_deref(),
        }
    }

    fn into_form(self) -> Form {
        let mut form = Form::new()
            .text("message", self.message.to_string())
            .text("sender_id", self.sender_id.to_string())
            .text("message_type", self.message_type)
            .text("instance", self.instance.to_string())
            .text("channel_type", self.channel_type)
            .text("channel_message_id", self.channel_message_id.to_string());
        if let Some(name) = self.sender_name {
            form = form.text("sender_name", name.to_string());
        }
        form
    }
}

impl HttpAgentBridge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Directory for temporary audio files. Defaults to the system temp dir.
    pub fn with_temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.temp_dir = Some(dir.into());
        self
    }

    /// Upper bound applied to every tenant's agent timeout.
    pub fn with_max_timeout(mut self, max: Duration) -> Self {
        self.max_timeout = Some(max);
        self
    }

    fn timeout(&self, instance: &InstanceConfig) -> Duration {
        let timeout = instance.agent.timeout();
        match self.max_timeout {
            Some(max) if !max.is_zero() => timeout.min(max),
            _ => timeout,
        }
    }

    fn request(&self, instance: &InstanceConfig) -> RequestBuilder {
        let url = format!("{}/runs", instance.agent.url.trim_end_matches('/'));
        let mut req = self.client.post(url).timeout(self.timeout(instance));
        if let Some(key) = &instance.agent.api_key {
            req = req.bearer_auth(key.expose_secret());
        }
        req
    }

    async fn call(
        &self,
        instance: &InstanceConfig,
        message: &NormalizedMessage,
        audio: Option<Bytes>,
    ) -> Result<AgentArtifact, AgentError> {
        let fields = RunRequest::new(instance, message);

        let resp = match audio {
            None => self.request(instance).json(&fields).send().await,
            Some(bytes) => {
                // Held until the upload finishes; dropping it deletes the file.
                let temp = TempAudio::write(&bytes, self.temp_dir.as_deref())
                    .map_err(AgentError::prepare)?;
                let file = temp.open().await.map_err(AgentError::prepare)?;
                let part = Part::stream_with_length(reqwest::Body::from(file), temp.len() as u64)
                    .file_name(temp.file_name())
                    .mime_str(temp.mime_type())
                    .map_err(AgentError::prepare)?;
                debug!(
                    instance = %instance.name,
                    mime_type = temp.mime_type(),
                    bytes = temp.len(),
                    "uploading audio to agent backend"
                );
                let form = fields.into_form().part("file", part);
                let resp = self.request(instance).multipart(form).send().await;
                drop(temp);
                resp
            },
        };

        let resp = resp.map_err(|e| {
            if e.is_timeout() {
                AgentError::request(format!(
                    "timed out after {}s",
                    self.timeout(instance).as_secs()
                ))
            } else {
                AgentError::request(e)
            }
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AgentError::response(format!(
                "agent backend returned HTTP {status}: {}",
                error_excerpt(&body)
            )));
        }

        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let body = resp
            .bytes()
            .await
            .map_err(|e| AgentError::request(format!("reading response body: {e}")))?;
        parse_response(&content_type, body)
    }
}

#[async_trait]
impl AgentBridge for HttpAgentBridge {
    async fn run(
        &self,
        instance: &InstanceConfig,
        message: &NormalizedMessage,
        audio: Option<Bytes>,
    ) -> Result<AgentArtifact, AgentError> {
        let started = Instant::now();
        let result = self.call(instance, message, audio).await;
        let elapsed = started.elapsed();

        #[cfg(feature = "metrics")]
        {
            counter!(agent_metrics::REQUESTS_TOTAL, labels::INSTANCE => instance.name.clone())
                .increment(1);
            histogram!(agent_metrics::DURATION_SECONDS).record(elapsed.as_secs_f64());
            match &result {
                Ok(artifact) => {
                    counter!(agent_metrics::ARTIFACTS_TOTAL, labels::ARTIFACT => artifact.kind())
                        .increment(1);
                },
                Err(e) => {
                    counter!(agent_metrics::ERRORS_TOTAL, labels::STAGE => e.stage.as_str())
                        .increment(1);
                },
            }
        }

        match &result {
            Ok(artifact) => debug!(
                instance = %instance.name,
                artifact = artifact.kind(),
                elapsed_ms = elapsed.as_millis() as u64,
                "agent backend replied"
            ),
            Err(e) => warn!(
                instance = %instance.name,
                stage = %e.stage,
                error = %e.detail,
                elapsed_ms = elapsed.as_millis() as u64,
                "agent backend call failed"
            ),
        }
        result
    }
}

/// Turn a 2xx response into an artifact that mirrors what the backend sent.
pub fn parse_response(content_type: &str, body: Bytes) -> Result<AgentArtifact, AgentError> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence.starts_with("audio/") {
        if body.is_empty() {
            return Err(AgentError::response("empty audio body"));
        }
        return Ok(AgentArtifact::AudioBytes {
            content: body,
            mime_type: essence,
        });
    }

    if essence == "text/plain" {
        let text = String::from_utf8_lossy(&body).trim().to_string();
        if text.is_empty() {
            return Err(AgentError::response("empty text body"));
        }
        return Ok(AgentArtifact::Text { content: text });
    }

    let value: Value = serde_json::from_slice(&body).map_err(|e| {
        AgentError::response(format!(
            "unrecognised response ({}): {e}",
            if essence.is_empty() {
                "no content type"
            } else {
                essence.as_str()
            }
        ))
    })?;
    artifact_from_json(&value)
}

fn artifact_from_json(value: &Value) -> Result<AgentArtifact, AgentError> {
    let Some(obj) = value.as_object() else {
        return match value.as_str() {
            Some(s) if !s.trim().is_empty() => Ok(AgentArtifact::text(s)),
            _ => Err(AgentError::response("response is not a JSON object")),
        };
    };

    if let Some(url) = obj.get("audio_url").and_then(Value::as_str)
        && !url.is_empty()
    {
        let mime_type = obj
            .get("mime_type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| mime_from_url(url).to_string());
        return Ok(AgentArtifact::AudioUrl {
            content: url.to_string(),
            mime_type,
        });
    }

    TEXT_KEYS
        .iter()
        .find_map(|k| {
            obj.get(*k)
                .and_then(Value::as_str)
                .filter(|t| !t.trim().is_empty())
        })
        .map(AgentArtifact::text)
        .ok_or_else(|| AgentError::response("response has no text or audio_url field"))
}

/// Best-effort audio MIME from a URL's file extension.
fn mime_from_url(url: &str) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let ext = path
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "ogg" | "opus" | "oga" => "audio/ogg",
        "wav" => "audio/wav",
        "flac" => "audio/flac",
        "m4a" | "mp4" | "aac" => "audio/mp4",
        "webm" => "audio/webm",
        _ => "audio/mpeg",
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::AgentStage,
        secrecy::Secret,
        serde_json::json,
        switchboard_channels::{
            AgentBackendConfig, ChannelCredentials, ConnectionSnapshot, MessageType,
            WhatsAppCredentials,
        },
        wiremock::{
            Mock, MockServer, ResponseTemplate,
            matchers::{body_partial_json, body_string_contains, header, method, path},
        },
    };

    fn instance(agent_url: &str, timeout_secs: u64) -> InstanceConfig {
        InstanceConfig {
            name: "acme".into(),
            is_default: true,
            channel: ChannelCredentials::WhatsApp(WhatsAppCredentials {
                bridge_url: "http://bridge".into(),
                api_key: Secret::new("k".into()),
                bridge_instance: None,
                timeout_secs: 5,
            }),
            agent: AgentBackendConfig {
                url: agent_url.into(),
                api_key: Some(Secret::new("agent-key".into())),
                timeout_secs,
            },
            connection: ConnectionSnapshot::default(),
        }
    }

    fn message(text: Option<&str>, message_type: MessageType) -> NormalizedMessage {
        NormalizedMessage {
            channel_message_id: "M1".into(),
            sender_id: "+15550001".into(),
            sender_name: Some("Ana".into()),
            chat_id: "15550001@s.whatsapp.net".into(),
            message_type,
            text: text.map(str::to_string),
            media: None,
            timestamp: None,
        }
    }

    #[tokio::test]
    async fn text_message_gets_text_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/runs"))
            .and(header("authorization", "Bearer agent-key"))
            .and(body_partial_json(json!({
                "message": "hi",
                "sender_id": "+15550001",
                "message_type": "text",
                "instance": "acme",
                "channel_type": "whatsapp"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"text": "hello back"})))
            .expect(1)
            .mount(&server)
            .await;

        let artifact = HttpAgentBridge::new()
            .run(
                &instance(&server.uri(), 5),
                &message(Some("hi"), MessageType::Text),
                None,
            )
            .await
            .unwrap();
        assert_eq!(artifact, AgentArtifact::text("hello back"));
    }

    #[tokio::test]
    async fn audio_body_becomes_audio_bytes() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/runs"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_raw(b"OggS-reply".to_vec(), "audio/ogg; codecs=opus"),
            )
            .mount(&server)
            .await;

        let artifact = HttpAgentBridge::new()
            .run(
                &instance(&server.uri(), 5),
                &message(Some("say it"), MessageType::Text),
                None,
            )
            .await
            .unwrap();
        assert_eq!(artifact, AgentArtifact::AudioBytes {
            content: Bytes::from_static(b"OggS-reply"),
            mime_type: "audio/ogg".into(),
        });
    }

    #[tokio::test]
    async fn audio_url_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"audio_url": "https://cdn/r.ogg?sig=1"})),
            )
            .mount(&server)
            .await;

        let artifact = HttpAgentBridge::new()
            .run(
                &instance(&server.uri(), 5),
                &message(Some("x"), MessageType::Text),
                None,
            )
            .await
            .unwrap();
        assert_eq!(artifact, AgentArtifact::AudioUrl {
            content: "https://cdn/r.ogg?sig=1".into(),
            mime_type: "audio/ogg".into(),
        });
    }

    #[tokio::test]
    async fn gateway_timeout_is_response_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(504).set_body_string("upstream timed out"))
            .mount(&server)
            .await;

        let err = HttpAgentBridge::new()
            .run(
                &instance(&server.uri(), 5),
                &message(Some("x"), MessageType::Text),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage, AgentStage::Response);
        assert!(err.detail.contains("504"));
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"text": "late"}))
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = HttpAgentBridge::new()
            .run(
                &instance(&server.uri(), 1),
                &message(Some("x"), MessageType::Text),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage, AgentStage::Request);
        assert!(err.detail.contains("timed out"));
    }

    #[tokio::test]
    async fn max_timeout_caps_tenant_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"text": "late"}))
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = HttpAgentBridge::new()
            .with_max_timeout(Duration::from_secs(1))
            .run(
                &instance(&server.uri(), 60),
                &message(Some("x"), MessageType::Text),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage, AgentStage::Request);
        assert_eq!(err.detail, "timed out after 1s");
    }

    #[tokio::test]
    async fn audio_is_uploaded_as_multipart_and_temp_file_removed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/runs"))
            .and(body_string_contains("name=\"file\""))
            .and(body_string_contains(".ogg\""))
            .and(body_string_contains("Content-Type: audio/ogg"))
            .and(body_string_contains("name=\"sender_id\""))
            .respond_with(ResponseTemplate::new(200).set_body_raw("transcribed", "text/plain"))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let artifact = HttpAgentBridge::new()
            .with_temp_dir(dir.path())
            .run(
                &instance(&server.uri(), 5),
                &message(None, MessageType::Audio),
                Some(Bytes::from_static(b"OggS\0\x02voice-note")),
            )
            .await
            .unwrap();
        assert_eq!(artifact, AgentArtifact::text("transcribed"));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn temp_file_removed_on_failure() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let err = HttpAgentBridge::new()
            .with_temp_dir(dir.path())
            .run(
                &instance(&server.uri(), 5),
                &message(None, MessageType::Audio),
                Some(Bytes::from_static(b"RIFF\0\0\0\0WAVEfmt ")),
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage, AgentStage::Response);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn unreachable_backend_is_request_failure() {
        // Port 9 (discard) on localhost is closed in test environments.
        let err = HttpAgentBridge::new()
            .run(
                &instance("http://127.0.0.1:9", 2),
                &message(Some("x"), MessageType::Text),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.stage, AgentStage::Request);
    }

    #[test]
    fn json_shapes() {
        assert_eq!(
            parse_response("application/json", Bytes::from_static(br#"{"output":"o"}"#)).unwrap(),
            AgentArtifact::text("o")
        );
        assert_eq!(
            parse_response("", Bytes::from_static(br#"{"response":"r","other":1}"#)).unwrap(),
            AgentArtifact::text("r")
        );
        assert_eq!(
            parse_response(
                "application/json",
                Bytes::from_static(br#"{"audio_url":"https://x/a","mime_type":"audio/wav"}"#)
            )
            .unwrap(),
            AgentArtifact::AudioUrl {
                content: "https://x/a".into(),
                mime_type: "audio/wav".into()
            }
        );
    }

    #[test]
    fn empty_text_key_falls_through_to_next() {
        assert_eq!(
            parse_response(
                "application/json",
                Bytes::from_static(br#"{"text":"","content":"  ","output":"hi"}"#)
            )
            .unwrap(),
            AgentArtifact::text("hi")
        );
    }

    #[test]
    fn malformed_responses() {
        for (ct, body) in [
            ("application/json", &br#"{"foo":1}"#[..]),
            ("application/json", b"[1,2]"),
            ("text/html", b"<html>"),
            ("text/plain", b"   "),
            ("audio/mpeg", b""),
        ] {
            let err = parse_response(ct, Bytes::copy_from_slice(body)).unwrap_err();
            assert_eq!(err.stage, AgentStage::Response, "{ct}");
        }
    }

    #[test]
    fn url_mime_inference() {
        assert_eq!(mime_from_url("https://x/a.MP3"), "audio/mpeg");
        assert_eq!(mime_from_url("https://x/a.wav#t"), "audio/wav");
        assert_eq!(mime_from_url("https://x/a"), "audio/mpeg");
    }
}
