//! Fakes shared by the gateway integration tests.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    serde_json::{Value, json},
    switchboard_agents::{AgentArtifact, AgentBridge, AgentError},
    switchboard_channels::{
        ChannelHandler, ChannelSession, ChannelType, ConnectionState, ConnectionStatus, Error,
        HandlerRegistry, InboundMedia, InstanceConfig, MediaKind, MediaSource, MessageType,
        Normalized, NormalizedMessage, Result, SendResult, TraceStore,
        access::RuleType,
    },
    switchboard_gateway::{
        Dispatcher, access_store::MemoryAccessRuleStore, instance_store::MemoryInstanceStore,
        trace_store::MemoryTraceStore,
    },
};

/// A reply the fake channel was asked to deliver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent {
    Text(String),
    Audio { len: usize, mime_type: String },
    Media { url: String, kind: MediaKind },
}

/// In-process channel. Events look like
/// `{"id": "m1", "from": "+15550001", "text": "hi"}`; `"audio"` attaches an
/// audio URL, `"ignore"` and `"challenge"` produce the other outcomes.
#[derive(Default)]
pub struct FakeChannel {
    pub sent: Mutex<Vec<Sent>>,
    pub fail_sends: AtomicBool,
    pub fail_media: AtomicBool,
    pub fail_lifecycle: AtomicBool,
}

impl FakeChannel {
    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn record(&self, sent: Sent) -> SendResult {
        if self.fail_sends.load(Ordering::SeqCst) {
            return SendResult::failed("bridge returned 500");
        }
        let mut all = self.sent.lock().unwrap();
        all.push(sent);
        SendResult::ok(Some(format!("out-{}", all.len())))
    }

    fn lifecycle(&self, state: ConnectionState) -> Result<ConnectionStatus> {
        if self.fail_lifecycle.load(Ordering::SeqCst) {
            return Err(Error::external(
                "bridge",
                std::io::Error::other("connection refused"),
            ));
        }
        Ok(ConnectionStatus::new(state).with_owner(Some("+15550000".into())))
    }
}

#[async_trait]
impl ChannelHandler for FakeChannel {
    fn channel_type(&self) -> ChannelType {
        ChannelType::WhatsApp
    }

    fn normalize(&self, _instance: &InstanceConfig, raw: &Value) -> Result<Normalized> {
        if let Some(reason) = raw.get("ignore").and_then(Value::as_str) {
            return Ok(Normalized::ignored(reason));
        }
        if let Some(challenge) = raw.get("challenge") {
            return Ok(Normalized::Handshake {
                response: json!({ "challenge": challenge }),
            });
        }
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::invalid_input("missing id"))?;
        let from = raw
            .get("from")
            .and_then(Value::as_str)
            .unwrap_or("+15550001");
        let audio = raw.get("audio").and_then(Value::as_str);
        Ok(Normalized::Message(NormalizedMessage {
            channel_message_id: id.to_string(),
            sender_id: from.to_string(),
            sender_name: None,
            chat_id: format!("chat-{from}"),
            message_type: if audio.is_some() {
                MessageType::Audio
            } else {
                MessageType::Text
            },
            text: raw.get("text").and_then(Value::as_str).map(str::to_string),
            media: audio.map(|url| InboundMedia {
                kind: MediaKind::Audio,
                source: MediaSource::Url(url.to_string()),
                mime_type: Some("audio/ogg".into()),
                file_name: None,
            }),
            timestamp: None,
        }))
    }

    async fn fetch_media(&self, _instance: &InstanceConfig, _source: &MediaSource) -> Result<Bytes> {
        if self.fail_media.load(Ordering::SeqCst) {
            return Err(Error::unavailable("media expired"));
        }
        Ok(Bytes::from_static(b"OggS-voice-note"))
    }

    async fn send_text(&self, _session: &ChannelSession<'_>, text: &str) -> SendResult {
        self.record(Sent::Text(text.to_string()))
    }

    async fn send_media(
        &self,
        _session: &ChannelSession<'_>,
        media: &MediaSource,
        kind: MediaKind,
        _caption: Option<&str>,
    ) -> SendResult {
        let url = match media {
            MediaSource::Url(u) => u.clone(),
            other => format!("{other:?}"),
        };
        self.record(Sent::Media { url, kind })
    }

    async fn send_audio(
        &self,
        _session: &ChannelSession<'_>,
        audio: &MediaSource,
        mime_type: &str,
    ) -> SendResult {
        let len = match audio {
            MediaSource::Bytes(b) => b.len(),
            _ => 0,
        };
        self.record(Sent::Audio {
            len,
            mime_type: mime_type.to_string(),
        })
    }

    async fn connection_status(&self, _instance: &InstanceConfig) -> Result<ConnectionStatus> {
        self.lifecycle(ConnectionState::Connected)
    }

    async fn connect(&self, _instance: &InstanceConfig) -> Result<ConnectionStatus> {
        self.lifecycle(ConnectionState::Connecting)
    }

    async fn disconnect(&self, _instance: &InstanceConfig) -> Result<ConnectionStatus> {
        self.lifecycle(ConnectionState::Disconnected)
    }
}

/// Agent that answers with a fixed artifact, or fails.
pub struct FakeAgent {
    pub artifact: Mutex<Option<AgentArtifact>>,
    pub calls: AtomicUsize,
    pub audio_seen: Mutex<Vec<usize>>,
}

impl FakeAgent {
    pub fn answering(artifact: AgentArtifact) -> Self {
        Self {
            artifact: Mutex::new(Some(artifact)),
            calls: AtomicUsize::new(0),
            audio_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            artifact: Mutex::new(None),
            calls: AtomicUsize::new(0),
            audio_seen: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentBridge for FakeAgent {
    async fn run(
        &self,
        _instance: &InstanceConfig,
        _message: &NormalizedMessage,
        audio: Option<Bytes>,
    ) -> std::result::Result<AgentArtifact, AgentError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(audio) = audio {
            self.audio_seen.lock().unwrap().push(audio.len());
        }
        self.artifact
            .lock()
            .unwrap()
            .clone()
            .ok_or_else(|| AgentError::response("agent returned 504"))
    }
}

pub fn instance(name: &str, is_default: bool, agent_url: &str) -> InstanceConfig {
    serde_json::from_value(json!({
        "name": name,
        "is_default": is_default,
        "channel_type": "whatsapp",
        "bridge_url": "http://bridge.invalid",
        "api_key": format!("{name}-key"),
        "agent": {"url": agent_url, "api_key": "agent-key", "timeout_secs": 5},
    }))
    .unwrap()
}

/// Open traces older than this are reclaimed by a redelivery.
pub const STALE_AFTER: Duration = Duration::from_secs(300);

/// Dispatcher over in-memory stores, the fake channel and `agent`.
pub struct Harness {
    pub dispatcher: Arc<Dispatcher>,
    pub channel: Arc<FakeChannel>,
    pub instances: Arc<MemoryInstanceStore>,
    pub rules: Arc<MemoryAccessRuleStore>,
    pub traces: Arc<MemoryTraceStore>,
}

impl Harness {
    pub async fn new(agent: Arc<dyn AgentBridge>) -> Self {
        Self::with_rules(agent, Vec::new()).await
    }

    pub async fn with_rules(
        agent: Arc<dyn AgentBridge>,
        rules: Vec<(&str, RuleType, Option<&str>)>,
    ) -> Self {
        let instances = Arc::new(
            MemoryInstanceStore::with_instances([
                instance("acme", true, "http://agent.invalid"),
                instance("globex", false, "http://agent.invalid"),
            ])
            .await
            .unwrap(),
        );
        Self::build(instances, agent, rules).await
    }

    pub async fn build(
        instances: Arc<MemoryInstanceStore>,
        agent: Arc<dyn AgentBridge>,
        rules: Vec<(&str, RuleType, Option<&str>)>,
    ) -> Self {
        let channel = Arc::new(FakeChannel::default());
        let rules = Arc::new(MemoryAccessRuleStore::with_rules(rules).await.unwrap());
        let traces = Arc::new(MemoryTraceStore::new());
        let dispatcher = Dispatcher::new(
            Arc::clone(&instances) as _,
            Arc::clone(&rules) as _,
            HandlerRegistry::new().with(Arc::clone(&channel) as _),
            agent,
            Arc::clone(&traces) as Arc<dyn TraceStore>,
        )
        .with_stale_after(STALE_AFTER);
        Self {
            dispatcher: Arc::new(dispatcher),
            channel,
            instances,
            rules,
            traces,
        }
    }
}
