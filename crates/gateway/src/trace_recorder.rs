//! Per-message trace lifecycle on top of a [`TraceStore`].
//!
//! `open` is an atomic insert-if-absent keyed by `(instance, channel message
//! id)`; `advance` moves a trace through non-terminal states; `close` writes
//! the terminal state together with `completed_at` and the total processing
//! time. Writes after `close` are rejected by the store and logged here as
//! consistency warnings.
//!
//! A trace still open past the stale window belongs to a dispatch that died;
//! `open` reclaims it so the redelivered message is processed again.

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use {
    switchboard_channels::{
        InsertOutcome, MessageType, NewTrace, Result, Trace, TracePatch, TraceQuery, TraceStatus,
        TraceStore, UpdateOutcome,
    },
    switchboard_common::{now_ms, time::elapsed_ms},
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, labels, traces as trace_metrics};

/// Result of opening a trace for an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened(ActiveTrace),
    /// A trace already exists for this message.
    Existing {
        trace_id: String,
        status: TraceStatus,
    },
}

/// A trace opened by this process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveTrace {
    pub trace_id: String,
    pub instance_name: String,
    started: Instant,
}

impl ActiveTrace {
    pub fn id(&self) -> &str {
        &self.trace_id
    }
}

/// Writes and reads message traces.
#[derive(Clone)]
pub struct TraceRecorder {
    store: Arc<dyn TraceStore>,
    stale_after: Option<Duration>,
}

impl TraceRecorder {
    pub fn new(store: Arc<dyn TraceStore>) -> Self {
        Self {
            store,
            stale_after: None,
        }
    }

    /// Reclaim open traces older than `window` on redelivery. Zero disables.
    pub fn with_stale_after(mut self, window: Duration) -> Self {
        self.stale_after = (!window.is_zero()).then_some(window);
        self
    }

    pub fn store(&self) -> &Arc<dyn TraceStore> {
        &self.store
    }

    /// Open a trace in `received`, or report the existing one.
    pub async fn open(
        &self,
        instance_name: &str,
        channel_message_id: &str,
        sender_id: &str,
        message_type: MessageType,
        has_media: bool,
    ) -> Result<OpenOutcome> {
        let started = Instant::now();
        let trace_id = uuid::Uuid::new_v4().to_string();
        let new = NewTrace {
            trace_id: trace_id.clone(),
            instance_name: instance_name.to_string(),
            channel_message_id: channel_message_id.to_string(),
            sender_id: sender_id.to_string(),
            message_type,
            has_media,
            received_at: now_ms(),
        };

        match self.store.insert_if_absent(new).await? {
            InsertOutcome::Inserted => {
                debug!(
                    instance = instance_name,
                    channel_message_id,
                    trace_id = %trace_id,
                    "trace opened"
                );
                Ok(OpenOutcome::Opened(ActiveTrace {
                    trace_id,
                    instance_name: instance_name.to_string(),
                    started,
                }))
            },
            InsertOutcome::Existing(existing) => {
                if self.reclaim(&existing).await? {
                    return Ok(OpenOutcome::Opened(ActiveTrace {
                        trace_id: existing.trace_id,
                        instance_name: instance_name.to_string(),
                        started,
                    }));
                }
                Ok(OpenOutcome::Existing {
                    trace_id: existing.trace_id,
                    status: existing.status,
                })
            },
        }
    }

    /// Take over `existing` when it is open and older than the stale window.
    async fn reclaim(&self, existing: &Trace) -> Result<bool> {
        let Some(window) = self.stale_after else {
            return Ok(false);
        };
        if existing.status.is_terminal() {
            return Ok(false);
        }
        let now = now_ms();
        let stale_before = now.saturating_sub(duration_ms(window));
        if existing.received_at >= stale_before {
            return Ok(false);
        }
        let reclaimed = self
            .store
            .reclaim_stale(&existing.trace_id, stale_before, now)
            .await?;
        if reclaimed {
            warn!(
                trace_id = %existing.trace_id,
                instance = %existing.instance_name,
                channel_message_id = %existing.channel_message_id,
                stale_status = %existing.status,
                "reclaimed abandoned trace, processing redelivery"
            );
            #[cfg(feature = "metrics")]
            counter!(
                trace_metrics::RECLAIMED_TOTAL,
                labels::INSTANCE => existing.instance_name.clone()
            )
            .increment(1);
        }
        Ok(reclaimed)
    }

    /// Move a trace to a non-terminal `status`, merging `patch`.
    pub async fn advance(&self, trace: &ActiveTrace, status: TraceStatus, patch: TracePatch) {
        if status.is_terminal() {
            warn!(
                trace_id = %trace.trace_id,
                status = %status,
                "advance called with a terminal status, use close"
            );
            self.consistency_warning(trace, "advance_terminal");
            return;
        }
        let patch = TracePatch {
            status: Some(status),
            ..patch
        };
        self.write(trace, patch, "advance").await;
    }

    /// Finish a trace with a terminal `status`. The trace is immutable after
    /// this call.
    pub async fn close(&self, trace: &ActiveTrace, status: TraceStatus, patch: TracePatch) {
        if !status.is_terminal() {
            warn!(
                trace_id = %trace.trace_id,
                status = %status,
                "close called with a non-terminal status"
            );
            self.consistency_warning(trace, "close_non_terminal");
            return;
        }
        let patch = TracePatch {
            status: Some(status),
            completed_at: Some(now_ms()),
            total_processing_time_ms: Some(elapsed_ms(trace.started)),
            ..patch
        };
        self.write(trace, patch, "close").await;
        debug!(trace_id = %trace.trace_id, status = %status, "trace closed");
    }

    async fn write(&self, trace: &ActiveTrace, patch: TracePatch, op: &'static str) {
        match self.store.update(&trace.trace_id, patch).await {
            Ok(UpdateOutcome::Applied) => {},
            Ok(UpdateOutcome::Terminal(current)) => {
                warn!(
                    trace_id = %trace.trace_id,
                    instance = %trace.instance_name,
                    current = %current,
                    op,
                    "trace already closed, write ignored"
                );
                self.consistency_warning(trace, "closed");
            },
            Ok(UpdateOutcome::Missing) => {
                warn!(
                    trace_id = %trace.trace_id,
                    instance = %trace.instance_name,
                    op,
                    "trace vanished before it was closed"
                );
                self.consistency_warning(trace, "missing");
            },
            Err(e) => {
                warn!(
                    trace_id = %trace.trace_id,
                    instance = %trace.instance_name,
                    op,
                    error = %e,
                    "failed to write trace"
                );
            },
        }
    }

    #[allow(unused_variables)]
    fn consistency_warning(&self, trace: &ActiveTrace, kind: &'static str) {
        #[cfg(feature = "metrics")]
        counter!(
            trace_metrics::CONSISTENCY_WARNINGS_TOTAL,
            labels::INSTANCE => trace.instance_name.clone(),
            labels::ERROR_TYPE => kind
        )
        .increment(1);
    }

    pub async fn get(&self, trace_id: &str) -> Result<Option<Trace>> {
        self.store.get(trace_id).await
    }

    pub async fn list(&self, query: &TraceQuery) -> Result<Vec<Trace>> {
        self.store.list(query).await
    }
}

pub(crate) fn duration_ms(d: Duration) -> i64 {
    i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::trace_store::MemoryTraceStore,
        switchboard_channels::trace::STAGE_AGENT_BRIDGE,
    };

    fn recorder() -> TraceRecorder {
        TraceRecorder::new(Arc::new(MemoryTraceStore::new()))
    }

    async fn open(recorder: &TraceRecorder, message: &str) -> OpenOutcome {
        recorder
            .open("acme", message, "+15550001", MessageType::Text, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn open_advance_close() {
        let recorder = recorder();
        let OpenOutcome::Opened(trace) = open(&recorder, "m1").await else {
            panic!("expected a new trace");
        };

        recorder
            .advance(&trace, TraceStatus::Processing, TracePatch::default())
            .await;
        recorder
            .close(
                &trace,
                TraceStatus::AgentFailed,
                TracePatch::default()
                    .with_agent(false, 7)
                    .with_error(STAGE_AGENT_BRIDGE, "HTTP 504"),
            )
            .await;

        let stored = recorder.get(trace.id()).await.unwrap().unwrap();
        assert_eq!(stored.status, TraceStatus::AgentFailed);
        assert_eq!(stored.error_stage.as_deref(), Some(STAGE_AGENT_BRIDGE));
        assert_eq!(stored.agent_response_success, Some(false));
        assert!(stored.completed_at.is_some());
        assert!(stored.total_processing_time_ms.is_some_and(|ms| ms >= 0));
    }

    #[tokio::test]
    async fn reopen_reports_existing_trace() {
        let recorder = recorder();
        let OpenOutcome::Opened(trace) = open(&recorder, "m1").await else {
            panic!("expected a new trace");
        };
        assert_eq!(open(&recorder, "m1").await, OpenOutcome::Existing {
            trace_id: trace.trace_id.clone(),
            status: TraceStatus::Received,
        });

        recorder
            .close(&trace, TraceStatus::Completed, TracePatch::default())
            .await;
        assert_eq!(open(&recorder, "m1").await, OpenOutcome::Existing {
            trace_id: trace.trace_id.clone(),
            status: TraceStatus::Completed,
        });
    }

    #[tokio::test]
    async fn writes_after_close_are_ignored() {
        let recorder = recorder();
        let OpenOutcome::Opened(trace) = open(&recorder, "m1").await else {
            panic!("expected a new trace");
        };
        recorder
            .close(&trace, TraceStatus::Blocked, TracePatch::default())
            .await;
        recorder
            .advance(&trace, TraceStatus::Processing, TracePatch::default())
            .await;
        recorder
            .close(
                &trace,
                TraceStatus::Completed,
                TracePatch::default().with_send(true),
            )
            .await;

        let stored = recorder.get(trace.id()).await.unwrap().unwrap();
        assert_eq!(stored.status, TraceStatus::Blocked);
        assert_eq!(stored.channel_send_success, None);
    }

    #[tokio::test]
    async fn status_kind_is_checked() {
        let recorder = recorder();
        let OpenOutcome::Opened(trace) = open(&recorder, "m1").await else {
            panic!("expected a new trace");
        };
        recorder
            .advance(&trace, TraceStatus::Completed, TracePatch::default())
            .await;
        recorder
            .close(&trace, TraceStatus::AgentOk, TracePatch::default())
            .await;

        let stored = recorder.get(trace.id()).await.unwrap().unwrap();
        assert_eq!(stored.status, TraceStatus::Received);
    }

    #[tokio::test]
    async fn stale_open_trace_is_reopened_on_redelivery() {
        let store = Arc::new(MemoryTraceStore::new());
        store
            .insert_if_absent(NewTrace {
                trace_id: "orphan".into(),
                instance_name: "acme".into(),
                channel_message_id: "m1".into(),
                sender_id: "+15550001".into(),
                message_type: MessageType::Text,
                has_media: false,
                received_at: now_ms() - 60_000,
            })
            .await
            .unwrap();
        store
            .update("orphan", TracePatch::status(TraceStatus::Processing))
            .await
            .unwrap();

        // Without a stale window the orphan is reported as a duplicate.
        let plain = TraceRecorder::new(Arc::clone(&store) as Arc<dyn TraceStore>);
        assert_eq!(open(&plain, "m1").await, OpenOutcome::Existing {
            trace_id: "orphan".into(),
            status: TraceStatus::Processing,
        });

        let recorder = TraceRecorder::new(store as Arc<dyn TraceStore>)
            .with_stale_after(Duration::from_secs(30));
        let OpenOutcome::Opened(trace) = open(&recorder, "m1").await else {
            panic!("expected the stale trace to be reclaimed");
        };
        assert_eq!(trace.id(), "orphan");

        // The reclaimed trace is fresh again, so a further redelivery is a duplicate.
        assert_eq!(open(&recorder, "m1").await, OpenOutcome::Existing {
            trace_id: "orphan".into(),
            status: TraceStatus::Received,
        });
    }
}
