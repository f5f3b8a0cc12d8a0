//! Dispatch engine.
//!
//! One inbound event in; at most one agent call and one reply out; exactly
//! one trace for every message that reaches normalization. The trace walks
//! `received → processing → agent_ok → completed`, leaving early through
//! `blocked`, `failed`, `agent_failed` or `send_failed`.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    http::HeaderMap,
    serde_json::Value,
    switchboard_agents::{AgentArtifact, AgentBridge},
    switchboard_channels::{
        AccessRuleStore, ChannelHandler, ChannelSession, ChannelType, Error as ChannelError,
        HandlerRegistry, InstanceConfig, InstanceStore, MediaKind, MediaSource, Normalized,
        NormalizedMessage, SendResult, TracePatch, TraceStatus, TraceStore,
        access::{self, AccessDecision},
        trace::{
            STAGE_AGENT_BRIDGE, STAGE_CHANNEL_SEND, STAGE_INGRESS_CANCELLED, STAGE_MEDIA_DOWNLOAD,
        },
    },
    switchboard_common::time::elapsed_ms,
    switchboard_config::schema::DEFAULT_FALLBACK_TEXT,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{
    channel as channel_metrics, counter, dispatch as dispatch_metrics, gauge, histogram, labels,
};

use crate::trace_recorder::{ActiveTrace, OpenOutcome, TraceRecorder};

/// Error stage recorded when the access rules cannot be loaded.
pub const STAGE_ACCESS_CHECK: &str = "access_check";

/// How a dispatched event ended. Every variant past `Handshake` carries the
/// id of the message's trace.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// Receipts, own messages, bot echoes. No trace.
    Ignored { reason: String },
    /// Protocol handshake; the ingress answers with `response` verbatim.
    Handshake { response: Value },
    /// Redelivery of a message that already has a trace.
    Duplicate {
        trace_id: String,
        status: TraceStatus,
    },
    Blocked { trace_id: String },
    Completed { trace_id: String },
    AgentFailed { trace_id: String },
    SendFailed { trace_id: String },
    /// Failed before the agent was called (rules unavailable, media download).
    Failed {
        trace_id: String,
        stage: &'static str,
    },
}

impl DispatchOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ignored { .. } => "ignored",
            Self::Handshake { .. } => "handshake",
            Self::Duplicate { .. } => "duplicate",
            Self::Blocked { .. } => "blocked",
            Self::Completed { .. } => "completed",
            Self::AgentFailed { .. } => "agent_failed",
            Self::SendFailed { .. } => "send_failed",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn trace_id(&self) -> Option<&str> {
        match self {
            Self::Ignored { .. } | Self::Handshake { .. } => None,
            Self::Duplicate { trace_id, .. }
            | Self::Blocked { trace_id }
            | Self::Completed { trace_id }
            | Self::AgentFailed { trace_id }
            | Self::SendFailed { trace_id }
            | Self::Failed { trace_id, .. } => Some(trace_id),
        }
    }
}

/// Errors that stop an event before a trace exists.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// Unknown instance, or no default instance.
    #[error("{message}")]
    TenantNotFound { message: String },

    /// The event could not be parsed or normalized.
    #[error("invalid event: {message}")]
    InvalidEvent { message: String },

    /// The channel rejected the request signature.
    #[error("unauthorized: {message}")]
    Unauthorized { message: String },

    /// No handler is registered for the instance's channel.
    #[error("no handler registered for channel {channel}")]
    HandlerUnavailable { channel: ChannelType },

    #[error("storage failure: {0}")]
    Storage(#[source] ChannelError),
}

impl DispatchError {
    #[must_use]
    pub fn invalid_event(message: impl std::fmt::Display) -> Self {
        Self::InvalidEvent {
            message: message.to_string(),
        }
    }

    /// Stable name, used in logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TenantNotFound { .. } => "tenant_not_found",
            Self::InvalidEvent { .. } => "invalid_event",
            Self::Unauthorized { .. } => "unauthorized",
            Self::HandlerUnavailable { .. } => "handler_unavailable",
            Self::Storage(_) => "storage",
        }
    }

    fn from_resolve(e: ChannelError) -> Self {
        if e.is_not_found() {
            Self::TenantNotFound {
                message: e.to_string(),
            }
        } else {
            Self::Storage(e)
        }
    }

    fn from_inbound(e: ChannelError) -> Self {
        match e {
            ChannelError::Unauthorized { message } => Self::Unauthorized { message },
            other => Self::invalid_event(other),
        }
    }
}

/// Routes inbound events for every tenant.
pub struct Dispatcher {
    instances: Arc<dyn InstanceStore>,
    rules: Arc<dyn AccessRuleStore>,
    handlers: HandlerRegistry,
    agent: Arc<dyn AgentBridge>,
    recorder: TraceRecorder,
    fallback_text: Option<String>,
}

impl Dispatcher {
    pub fn new(
        instances: Arc<dyn InstanceStore>,
        rules: Arc<dyn AccessRuleStore>,
        handlers: HandlerRegistry,
        agent: Arc<dyn AgentBridge>,
        traces: Arc<dyn TraceStore>,
    ) -> Self {
        Self {
            instances,
            rules,
            handlers,
            agent,
            recorder: TraceRecorder::new(traces),
            fallback_text: Some(DEFAULT_FALLBACK_TEXT.to_string()),
        }
    }

    /// Text sent to the sender when the agent fails. Blank disables it.
    pub fn with_fallback_text(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.fallback_text = (!text.trim().is_empty()).then_some(text);
        self
    }

    /// Reprocess redeliveries whose trace is still open after `window`.
    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.recorder = self.recorder.with_stale_after(window);
        self
    }

    pub fn recorder(&self) -> &TraceRecorder {
        &self.recorder
    }

    pub fn instances(&self) -> &Arc<dyn InstanceStore> {
        &self.instances
    }

    pub fn handlers(&self) -> &HandlerRegistry {
        &self.handlers
    }

    /// Dispatch a parsed event to `instance`, or to the default instance.
    pub async fn handle(
        &self,
        raw: &Value,
        instance: Option<&str>,
    ) -> Result<DispatchOutcome, DispatchError> {
        self.handle_with_cancel(raw, instance, &CancellationToken::new())
            .await
    }

    /// Like [`handle`](Self::handle). Once the agent has answered, a
    /// cancelled `cancel` abandons the reply and closes the trace
    /// `send_failed`.
    pub async fn handle_with_cancel(
        &self,
        raw: &Value,
        instance: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let instance = self.resolve(instance).await?;
        let handler = self.handler_for(&instance)?;
        self.dispatch(&instance, handler.as_ref(), raw, cancel)
            .await
    }

    /// Authenticate and parse a raw webhook request, then dispatch it.
    pub async fn handle_webhook(
        &self,
        instance: Option<&str>,
        headers: &HeaderMap,
        body: &[u8],
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let instance = self.resolve(instance).await?;
        let handler = self.handler_for(&instance)?;
        handler
            .verify_request(&instance, headers, body)
            .map_err(DispatchError::from_inbound)?;
        let raw: Value = serde_json::from_slice(body)
            .map_err(|e| DispatchError::invalid_event(format!("body is not JSON: {e}")))?;
        self.dispatch(&instance, handler.as_ref(), &raw, cancel)
            .await
    }

    async fn resolve(&self, instance: Option<&str>) -> Result<InstanceConfig, DispatchError> {
        let resolved = match instance {
            Some(name) => self.instances.resolve(name).await,
            None => self.instances.resolve_default().await,
        };
        resolved.map_err(|e| {
            debug!(instance = ?instance, error = %e, "instance resolution failed");
            DispatchError::from_resolve(e)
        })
    }

    fn handler_for(
        &self,
        instance: &InstanceConfig,
    ) -> Result<Arc<dyn ChannelHandler>, DispatchError> {
        let channel = instance.channel_type();
        self.handlers
            .get(channel)
            .ok_or(DispatchError::HandlerUnavailable { channel })
    }

    async fn dispatch(
        &self,
        instance: &InstanceConfig,
        handler: &dyn ChannelHandler,
        raw: &Value,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        #[cfg(feature = "metrics")]
        let started = Instant::now();
        #[cfg(feature = "metrics")]
        let channel = instance.channel_type().as_str();
        #[cfg(feature = "metrics")]
        {
            counter!(dispatch_metrics::EVENTS_TOTAL, labels::CHANNEL => channel).increment(1);
            gauge!(dispatch_metrics::IN_FLIGHT).increment(1.0);
        }

        let result = self.dispatch_inner(instance, handler, raw, cancel).await;

        #[cfg(feature = "metrics")]
        {
            gauge!(dispatch_metrics::IN_FLIGHT).decrement(1.0);
            histogram!(dispatch_metrics::DURATION_SECONDS, labels::CHANNEL => channel)
                .record(started.elapsed().as_secs_f64());
            match &result {
                Ok(outcome) => counter!(
                    dispatch_metrics::OUTCOMES_TOTAL,
                    labels::CHANNEL => channel,
                    labels::OUTCOME => outcome.as_str()
                )
                .increment(1),
                Err(e) => counter!(
                    dispatch_metrics::ERRORS_TOTAL,
                    labels::CHANNEL => channel,
                    labels::ERROR_TYPE => e.kind()
                )
                .increment(1),
            }
        }

        result
    }

    async fn dispatch_inner(
        &self,
        instance: &InstanceConfig,
        handler: &dyn ChannelHandler,
        raw: &Value,
        cancel: &CancellationToken,
    ) -> Result<DispatchOutcome, DispatchError> {
        let message = match handler
            .normalize(instance, raw)
            .map_err(DispatchError::from_inbound)?
        {
            Normalized::Message(message) => message,
            Normalized::Ignored { reason } => {
                debug!(instance = %instance.name, reason = %reason, "event ignored");
                return Ok(DispatchOutcome::Ignored { reason });
            },
            Normalized::Handshake { response } => {
                debug!(instance = %instance.name, "answering channel handshake");
                return Ok(DispatchOutcome::Handshake { response });
            },
        };

        #[cfg(feature = "metrics")]
        counter!(
            channel_metrics::MESSAGES_RECEIVED_TOTAL,
            labels::CHANNEL => instance.channel_type().as_str(),
            labels::INSTANCE => instance.name.clone()
        )
        .increment(1);

        let opened = self
            .recorder
            .open(
                &instance.name,
                &message.channel_message_id,
                &message.sender_id,
                message.message_type,
                message.has_media(),
            )
            .await
            .map_err(DispatchError::Storage)?;

        let trace = match opened {
            OpenOutcome::Opened(trace) => trace,
            OpenOutcome::Existing { trace_id, status } => {
                info!(
                    instance = %instance.name,
                    channel_message_id = %message.channel_message_id,
                    trace_id = %trace_id,
                    status = %status,
                    "duplicate delivery skipped"
                );
                return Ok(DispatchOutcome::Duplicate { trace_id, status });
            },
        };

        Ok(self
            .process(instance, handler, &message, &trace, cancel)
            .await)
    }

    /// Everything after the trace is opened. Always closes the trace.
    async fn process(
        &self,
        instance: &InstanceConfig,
        handler: &dyn ChannelHandler,
        message: &NormalizedMessage,
        trace: &ActiveTrace,
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let trace_id = trace.trace_id.clone();

        let rules = match self.rules.snapshot(&instance.name).await {
            Ok(rules) => rules,
            Err(e) => {
                warn!(
                    instance = %instance.name,
                    trace_id = %trace_id,
                    error = %e,
                    "failed to load access rules"
                );
                return self
                    .fail(trace, STAGE_ACCESS_CHECK, e.to_string())
                    .await;
            },
        };
        let evaluation = access::evaluate(&rules, &message.sender_id, &instance.name);
        if evaluation.decision == AccessDecision::Blocked {
            info!(
                instance = %instance.name,
                trace_id = %trace_id,
                sender = %message.sender_id,
                rule = ?evaluation.matched.map(|r| &r.phone_pattern),
                "sender blocked"
            );
            #[cfg(feature = "metrics")]
            counter!(
                channel_metrics::BLOCKED_TOTAL,
                labels::CHANNEL => instance.channel_type().as_str(),
                labels::INSTANCE => instance.name.clone()
            )
            .increment(1);
            self.recorder
                .close(trace, TraceStatus::Blocked, TracePatch::default())
                .await;
            return DispatchOutcome::Blocked { trace_id };
        }

        self.recorder
            .advance(trace, TraceStatus::Processing, TracePatch::default())
            .await;

        let audio = match message.audio() {
            None => None,
            Some(media) => match handler.fetch_media(instance, &media.source).await {
                Ok(bytes) => {
                    debug!(trace_id = %trace_id, bytes = bytes.len(), "inbound audio resolved");
                    Some(bytes)
                },
                Err(e) => {
                    warn!(
                        instance = %instance.name,
                        trace_id = %trace_id,
                        error = %e,
                        "failed to download inbound audio"
                    );
                    return self
                        .fail(trace, STAGE_MEDIA_DOWNLOAD, e.to_string())
                        .await;
                },
            },
        };

        let session = ChannelSession::new(instance, &message.chat_id);
        let agent_started = Instant::now();
        let artifact = match self.agent.run(instance, message, audio).await {
            Ok(artifact) => artifact,
            Err(e) => {
                let agent_ms = elapsed_ms(agent_started);
                warn!(
                    instance = %instance.name,
                    trace_id = %trace_id,
                    stage = %e.stage,
                    error = %e.detail,
                    "agent call failed"
                );
                let mut patch = TracePatch::default()
                    .with_agent(false, agent_ms)
                    .with_error(STAGE_AGENT_BRIDGE, e.to_string());
                if let Some(sent) = self
                    .send_fallback(instance, handler, &session, cancel)
                    .await
                {
                    patch = patch.with_send(sent);
                }
                self.recorder
                    .close(trace, TraceStatus::AgentFailed, patch)
                    .await;
                return DispatchOutcome::AgentFailed { trace_id };
            },
        };

        let agent_ms = elapsed_ms(agent_started);
        debug!(
            trace_id = %trace_id,
            artifact = artifact.kind(),
            agent_ms,
            "agent answered"
        );
        self.recorder
            .advance(
                trace,
                TraceStatus::AgentOk,
                TracePatch::default().with_agent(true, agent_ms),
            )
            .await;

        if cancel.is_cancelled() {
            info!(
                instance = %instance.name,
                trace_id = %trace_id,
                "ingress cancelled, reply abandoned"
            );
            self.recorder
                .close(
                    trace,
                    TraceStatus::SendFailed,
                    TracePatch::default()
                        .with_send(false)
                        .with_error(STAGE_INGRESS_CANCELLED, "ingress cancelled before reply"),
                )
                .await;
            return DispatchOutcome::SendFailed { trace_id };
        }

        let sent = relay(instance, handler, &session, &artifact).await;
        if sent.success {
            debug!(trace_id = %trace_id, message_id = ?sent.message_id, "reply sent");
            self.recorder
                .close(
                    trace,
                    TraceStatus::Completed,
                    TracePatch::default().with_send(true),
                )
                .await;
            DispatchOutcome::Completed { trace_id }
        } else {
            let error = sent.error.unwrap_or_else(|| "send failed".into());
            warn!(
                instance = %instance.name,
                trace_id = %trace_id,
                error = %error,
                "reply send failed"
            );
            self.recorder
                .close(
                    trace,
                    TraceStatus::SendFailed,
                    TracePatch::default()
                        .with_send(false)
                        .with_error(STAGE_CHANNEL_SEND, error),
                )
                .await;
            DispatchOutcome::SendFailed { trace_id }
        }
    }

    async fn fail(
        &self,
        trace: &ActiveTrace,
        stage: &'static str,
        error: String,
    ) -> DispatchOutcome {
        self.recorder
            .close(
                trace,
                TraceStatus::Failed,
                TracePatch::default().with_error(stage, error),
            )
            .await;
        DispatchOutcome::Failed {
            trace_id: trace.trace_id.clone(),
            stage,
        }
    }

    /// Best-effort apology after an agent failure. `None` when nothing was
    /// attempted.
    async fn send_fallback(
        &self,
        instance: &InstanceConfig,
        handler: &dyn ChannelHandler,
        session: &ChannelSession<'_>,
        cancel: &CancellationToken,
    ) -> Option<bool> {
        let text = self.fallback_text.as_deref()?;
        if cancel.is_cancelled() {
            return None;
        }
        let sent = handler.send_text(session, text).await;
        record_send(instance, "fallback", &sent);
        if !sent.success {
            warn!(
                instance = %instance.name,
                error = ?sent.error,
                "fallback reply failed"
            );
        }
        Some(sent.success)
    }
}

/// Send `artifact` back on the channel it belongs to.
async fn relay(
    instance: &InstanceConfig,
    handler: &dyn ChannelHandler,
    session: &ChannelSession<'_>,
    artifact: &AgentArtifact,
) -> SendResult {
    let sent = match artifact {
        AgentArtifact::Text { content } => handler.send_text(session, content).await,
        AgentArtifact::AudioBytes { content, mime_type } => {
            handler
                .send_audio(session, &MediaSource::Bytes(content.clone()), mime_type)
                .await
        },
        AgentArtifact::AudioUrl { content, .. } => {
            handler
                .send_media(
                    session,
                    &MediaSource::Url(content.clone()),
                    MediaKind::Audio,
                    None,
                )
                .await
        },
    };
    record_send(instance, artifact.kind(), &sent);
    sent
}

#[allow(unused_variables)]
fn record_send(instance: &InstanceConfig, artifact: &'static str, sent: &SendResult) {
    #[cfg(feature = "metrics")]
    {
        let name = if sent.success {
            channel_metrics::MESSAGES_SENT_TOTAL
        } else {
            channel_metrics::SEND_ERRORS_TOTAL
        };
        counter!(
            name,
            labels::CHANNEL => instance.channel_type().as_str(),
            labels::ARTIFACT => artifact
        )
        .increment(1);
    }
}
