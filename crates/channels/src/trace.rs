//! Per-message lifecycle trace model and its storage trait.

use std::{fmt, str::FromStr};

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
};

use crate::{Error, Result, plugin::MessageType};

/// `error_stage` recorded when the agent backend call fails.
pub const STAGE_AGENT_BRIDGE: &str = "agent_bridge";
/// `error_stage` recorded when relaying the artifact to the channel fails.
pub const STAGE_CHANNEL_SEND: &str = "channel_send";
/// `error_stage` recorded when inbound media cannot be fetched.
pub const STAGE_MEDIA_DOWNLOAD: &str = "media_download";
/// `error_stage` recorded when the ingress was cancelled before the send.
pub const STAGE_INGRESS_CANCELLED: &str = "ingress_cancelled";
/// `error_stage` recorded when a trace was left open by a dispatch that
/// never finished (process crash, panicked task).
pub const STAGE_ABANDONED: &str = "abandoned";

/// Lifecycle status of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceStatus {
    Received,
    Processing,
    AgentOk,
    Completed,
    Blocked,
    AgentFailed,
    SendFailed,
    Failed,
}

impl TraceStatus {
    pub const ALL: [Self; 8] = [
        Self::Received,
        Self::Processing,
        Self::AgentOk,
        Self::Completed,
        Self::Blocked,
        Self::AgentFailed,
        Self::SendFailed,
        Self::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Processing => "processing",
            Self::AgentOk => "agent_ok",
            Self::Completed => "completed",
            Self::Blocked => "blocked",
            Self::AgentFailed => "agent_failed",
            Self::SendFailed => "send_failed",
            Self::Failed => "failed",
        }
    }

    /// Terminal traces are immutable.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Received | Self::Processing | Self::AgentOk)
    }

    /// Terminal statuses, as stored strings. Used by retention queries.
    pub fn terminal_strs() -> impl Iterator<Item = &'static str> {
        Self::ALL
            .into_iter()
            .filter(Self::is_terminal)
            .map(|s| s.as_str())
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TraceStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| Error::invalid_input(format!("unknown trace status: {s}")))
    }
}

/// One inbound message's journey through the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trace {
    pub trace_id: String,
    pub instance_name: String,
    pub channel_message_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub has_media: bool,
    pub status: TraceStatus,
    pub error_stage: Option<String>,
    pub error_message: Option<String>,
    pub received_at: i64,
    pub completed_at: Option<i64>,
    pub agent_processing_time_ms: Option<i64>,
    pub total_processing_time_ms: Option<i64>,
    pub agent_response_success: Option<bool>,
    pub channel_send_success: Option<bool>,
}

/// Fields known when a trace is opened.
#[derive(Debug, Clone)]
pub struct NewTrace {
    pub trace_id: String,
    pub instance_name: String,
    pub channel_message_id: String,
    pub sender_id: String,
    pub message_type: MessageType,
    pub has_media: bool,
    pub received_at: i64,
}

impl NewTrace {
    pub fn into_trace(self) -> Trace {
        Trace {
            trace_id: self.trace_id,
            instance_name: self.instance_name,
            channel_message_id: self.channel_message_id,
            sender_id: self.sender_id,
            message_type: self.message_type,
            has_media: self.has_media,
            status: TraceStatus::Received,
            error_stage: None,
            error_message: None,
            received_at: self.received_at,
            completed_at: None,
            agent_processing_time_ms: None,
            total_processing_time_ms: None,
            agent_response_success: None,
            channel_send_success: None,
        }
    }
}

/// Partial update. `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TracePatch {
    pub status: Option<TraceStatus>,
    pub error_stage: Option<String>,
    pub error_message: Option<String>,
    pub completed_at: Option<i64>,
    pub agent_processing_time_ms: Option<i64>,
    pub total_processing_time_ms: Option<i64>,
    pub agent_response_success: Option<bool>,
    pub channel_send_success: Option<bool>,
}

impl TracePatch {
    pub fn status(status: TraceStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn with_error(mut self, stage: impl Into<String>, message: impl Into<String>) -> Self {
        self.error_stage = Some(stage.into());
        self.error_message = Some(message.into());
        self
    }

    pub fn with_agent(mut self, success: bool, elapsed_ms: i64) -> Self {
        self.agent_response_success = Some(success);
        self.agent_processing_time_ms = Some(elapsed_ms);
        self
    }

    pub fn with_send(mut self, success: bool) -> Self {
        self.channel_send_success = Some(success);
        self
    }

    /// Merge into `trace`, keeping stored values where the patch is empty.
    pub fn apply(&self, trace: &mut Trace) {
        if let Some(status) = self.status {
            trace.status = status;
        }
        if let Some(v) = &self.error_stage {
            trace.error_stage = Some(v.clone());
        }
        if let Some(v) = &self.error_message {
            trace.error_message = Some(v.clone());
        }
        trace.completed_at = self.completed_at.or(trace.completed_at);
        trace.agent_processing_time_ms = self
            .agent_processing_time_ms
            .or(trace.agent_processing_time_ms);
        trace.total_processing_time_ms = self
            .total_processing_time_ms
            .or(trace.total_processing_time_ms);
        trace.agent_response_success = self.agent_response_success.or(trace.agent_response_success);
        trace.channel_send_success = self.channel_send_success.or(trace.channel_send_success);
    }
}

/// Filter for trace listings. Newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceQuery {
    pub instance_name: Option<String>,
    pub status: Option<TraceStatus>,
    pub limit: u32,
}

impl TraceQuery {
    pub const DEFAULT_LIMIT: u32 = 50;
    pub const MAX_LIMIT: u32 = 1000;

    pub fn effective_limit(&self) -> u32 {
        self.limit.clamp(1, Self::MAX_LIMIT)
    }
}

impl Default for TraceQuery {
    fn default() -> Self {
        Self {
            instance_name: None,
            status: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }
}

/// Result of an idempotent insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A trace already exists for the same `(instance, channel_message_id)`.
    Existing(Trace),
}

/// Result of a conditional update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Applied,
    /// The trace was already terminal; nothing was written.
    Terminal(TraceStatus),
    Missing,
}

/// Durable trace storage.
#[async_trait]
pub trait TraceStore: Send + Sync {
    /// Insert unless a trace with the same `(instance_name,
    /// channel_message_id)` exists. Must be atomic.
    async fn insert_if_absent(&self, trace: NewTrace) -> Result<InsertOutcome>;

    /// Apply `patch` only while the stored trace is non-terminal.
    async fn update(&self, trace_id: &str, patch: TracePatch) -> Result<UpdateOutcome>;

    async fn get(&self, trace_id: &str) -> Result<Option<Trace>>;

    async fn find_by_message(
        &self,
        instance_name: &str,
        channel_message_id: &str,
    ) -> Result<Option<Trace>>;

    async fn list(&self, query: &TraceQuery) -> Result<Vec<Trace>>;

    /// Delete terminal traces received before `before_ms`. Returns the count.
    async fn prune_before(&self, before_ms: i64) -> Result<u64>;

    /// Restart a trace that is still open although it was received before
    /// `stale_before_ms`. The trace goes back to `received` with
    /// `received_at = now_ms` and its outcome fields cleared. Atomic: of
    /// several concurrent callers exactly one gets `true`.
    async fn reclaim_stale(&self, trace_id: &str, stale_before_ms: i64, now_ms: i64)
    -> Result<bool>;

    /// Close every open trace received before `stale_before_ms` as `failed`
    /// with [`STAGE_ABANDONED`]. Returns the count.
    async fn abandon_stale(&self, stale_before_ms: i64, now_ms: i64) -> Result<u64>;
}
