//! Message trace storage.
//!
//! Updates are conditional on the stored status being non-terminal, checked
//! inside the same write, so a closed trace can never be reopened by a late
//! or concurrent writer.

use std::collections::HashMap;

use {
    async_trait::async_trait,
    sqlx::SqlitePool,
    switchboard_channels::{
        Error, InsertOutcome, NewTrace, Result, Trace, TracePatch, TraceQuery, TraceStatus,
        TraceStore, UpdateOutcome,
        trace::STAGE_ABANDONED,
    },
    tokio::sync::RwLock,
};

#[derive(sqlx::FromRow)]
struct TraceRow {
    trace_id: String,
    instance_name: String,
    channel_message_id: String,
    sender_id: String,
    message_type: String,
    has_media: bool,
    status: String,
    error_stage: Option<String>,
    error_message: Option<String>,
    received_at: i64,
    completed_at: Option<i64>,
    agent_processing_time_ms: Option<i64>,
    total_processing_time_ms: Option<i64>,
    agent_response_success: Option<bool>,
    channel_send_success: Option<bool>,
}

impl TryFrom<TraceRow> for Trace {
    type Error = Error;

    fn try_from(r: TraceRow) -> Result<Self> {
        Ok(Self {
            trace_id: r.trace_id,
            instance_name: r.instance_name,
            channel_message_id: r.channel_message_id,
            sender_id: r.sender_id,
            message_type: r.message_type.parse()?,
            has_media: r.has_media,
            status: r.status.parse()?,
            error_stage: r.error_stage,
            error_message: r.error_message,
            received_at: r.received_at,
            completed_at: r.completed_at,
            agent_processing_time_ms: r.agent_processing_time_ms,
            total_processing_time_ms: r.total_processing_time_ms,
            agent_response_success: r.agent_response_success,
            channel_send_success: r.channel_send_success,
        })
    }
}

const COLUMNS: &str = "trace_id, instance_name, channel_message_id, sender_id, message_type, \
                       has_media, status, error_stage, error_message, received_at, completed_at, \
                       agent_processing_time_ms, total_processing_time_ms, \
                       agent_response_success, channel_send_success";

/// `('completed', 'blocked', ...)` for use in SQL.
fn terminal_list() -> String {
    let quoted: Vec<String> = TraceStatus::terminal_strs()
        .map(|s| format!("'{s}'"))
        .collect();
    format!("({})", quoted.join(", "))
}

const ABANDONED_MESSAGE: &str = "dispatch did not finish within the stale window";

/// SQLite-backed trace store.
pub struct SqliteTraceStore {
    pool: SqlitePool,
}

impl SqliteTraceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn status_of(&self, trace_id: &str) -> Result<Option<TraceStatus>> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM message_traces WHERE trace_id = ?")
                .bind(trace_id)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| Error::external("read trace status", e))?;
        status.map(|s| s.parse()).transpose()
    }
}

#[async_trait]
impl TraceStore for SqliteTraceStore {
    async fn insert_if_absent(&self, trace: NewTrace) -> Result<InsertOutcome> {
        let res = sqlx::query(
            "INSERT INTO message_traces
               (trace_id, instance_name, channel_message_id, sender_id, message_type,
                has_media, status, received_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT DO NOTHING",
        )
        .bind(&trace.trace_id)
        .bind(&trace.instance_name)
        .bind(&trace.channel_message_id)
        .bind(&trace.sender_id)
        .bind(trace.message_type.as_str())
        .bind(trace.has_media)
        .bind(TraceStatus::Received.as_str())
        .bind(trace.received_at)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::external("insert trace", e))?;

        if res.rows_affected() > 0 {
            return Ok(InsertOutcome::Inserted);
        }
        match self
            .find_by_message(&trace.instance_name, &trace.channel_message_id)
            .await?
        {
            Some(existing) => Ok(InsertOutcome::Existing(existing)),
            None => Err(Error::unavailable(format!(
                "trace {} conflicted but no trace exists for message {}",
                trace.trace_id, trace.channel_message_id
            ))),
        }
    }

    async fn update(&self, trace_id: &str, patch: TracePatch) -> Result<UpdateOutcome> {
        let sql = format!(
            "UPDATE message_traces SET
               status = COALESCE(?, status),
               error_stage = COALESCE(?, error_stage),
               error_message = COALESCE(?, error_message),
               completed_at = COALESCE(?, completed_at),
               agent_processing_time_ms = COALESCE(?, agent_processing_time_ms),
               total_processing_time_ms = COALESCE(?, total_processing_time_ms),
               agent_response_success = COALESCE(?, agent_response_success),
               channel_send_success = COALESCE(?, channel_send_success)
             WHERE trace_id = ? AND status NOT IN {}",
            terminal_list()
        );
        let res = sqlx::query(&sql)
            .bind(patch.status.map(|s| s.as_str()))
            .bind(&patch.error_stage)
            .bind(&patch.error_message)
            .bind(patch.completed_at)
            .bind(patch.agent_processing_time_ms)
            .bind(patch.total_processing_time_ms)
            .bind(patch.agent_response_success)
            .bind(patch.channel_send_success)
            .bind(trace_id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::external("update trace", e))?;

        if res.rows_affected() > 0 {
            return Ok(UpdateOutcome::Applied);
        }
        Ok(match self.status_of(trace_id).await? {
            Some(status) => UpdateOutcome::Terminal(status),
            None => UpdateOutcome::Missing,
        })
    }

    async fn get(&self, trace_id: &str) -> Result<Option<Trace>> {
        let row = sqlx::query_as::<_, TraceRow>(&format!(
            "SELECT {COLUMNS} FROM message_traces WHERE trace_id = ?"
        ))
        .bind(trace_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::external("get trace", e))?;
        row.map(TryInto::try_into).transpose()
    }

    async fn find_by_message(
        &self,
        instance_name: &str,
        channel_message_id: &str,
    ) -> Result<Option<Trace>> {
        let row = sqlx::query_as::<_, TraceRow>(&format!(
            "SELECT {COLUMNS} FROM message_traces
             WHERE instance_name = ? AND channel_message_id = ?"
        ))
        .bind(instance_name)
        .bind(channel_message_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::external("find trace", e))?;
        row.map(TryInto::try_into).transpose()
    }

    async fn list(&self, query: &TraceQuery) -> Result<Vec<Trace>> {
        let rows = sqlx::query_as::<_, TraceRow>(&format!(
            "SELECT {COLUMNS} FROM message_traces
             WHERE (?1 IS NULL OR instance_name = ?1)
               AND (?2 IS NULL OR status = ?2)
             ORDER BY received_at DESC, trace_id
             LIMIT ?3"
        ))
        .bind(&query.instance_name)
        .bind(query.status.map(|s| s.as_str()))
        .bind(query.effective_limit())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::external("list traces", e))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn prune_before(&self, before_ms: i64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM message_traces WHERE received_at < ? AND status IN {}",
            terminal_list()
        );
        let res = sqlx::query(&sql)
            .bind(before_ms)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::external("prune traces", e))?;
        Ok(res.rows_affected())
    }

    async fn reclaim_stale(
        &self,
        trace_id: &str,
        stale_before_ms: i64,
        now_ms: i64,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE message_traces SET
               status = ?, received_at = ?,
               error_stage = NULL, error_message = NULL, completed_at = NULL,
               agent_processing_time_ms = NULL, total_processing_time_ms = NULL,
               agent_response_success = NULL, channel_send_success = NULL
             WHERE trace_id = ? AND received_at < ? AND status NOT IN {}",
            terminal_list()
        );
        let res = sqlx::query(&sql)
            .bind(TraceStatus::Received.as_str())
            .bind(now_ms)
            .bind(trace_id)
            .bind(stale_before_ms)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::external("reclaim trace", e))?;
        Ok(res.rows_affected() > 0)
    }

    async fn abandon_stale(&self, stale_before_ms: i64, now_ms: i64) -> Result<u64> {
        let sql = format!(
            "UPDATE message_traces SET
               status = ?, error_stage = ?, error_message = ?, completed_at = ?
             WHERE received_at < ? AND status NOT IN {}",
            terminal_list()
        );
        let res = sqlx::query(&sql)
            .bind(TraceStatus::Failed.as_str())
            .bind(STAGE_ABANDONED)
            .bind(ABANDONED_MESSAGE)
            .bind(now_ms)
            .bind(stale_before_ms)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::external("abandon traces", e))?;
        Ok(res.rows_affected())
    }
}

#[derive(Default)]
struct MemoryTraces {
    by_id: HashMap<String, Trace>,
    /// `(instance_name, channel_message_id)` → trace id.
    by_message: HashMap<(String, String), String>,
}

/// In-memory trace store.
#[derive(Default)]
pub struct MemoryTraceStore {
    inner: RwLock<MemoryTraces>,
}

impl MemoryTraceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.by_id.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl TraceStore for MemoryTraceStore {
    async fn insert_if_absent(&self, trace: NewTrace) -> Result<InsertOutcome> {
        let mut inner = self.inner.write().await;
        let key = (
            trace.instance_name.clone(),
            trace.channel_message_id.clone(),
        );
        if let Some(existing) = inner.by_message.get(&key).and_then(|id| inner.by_id.get(id)) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        if let Some(existing) = inner.by_id.get(&trace.trace_id) {
            return Ok(InsertOutcome::Existing(existing.clone()));
        }
        inner.by_message.insert(key, trace.trace_id.clone());
        inner
            .by_id
            .insert(trace.trace_id.clone(), trace.into_trace());
        Ok(InsertOutcome::Inserted)
    }

    async fn update(&self, trace_id: &str, patch: TracePatch) -> Result<UpdateOutcome> {
        let mut inner = self.inner.write().await;
        let Some(trace) = inner.by_id.get_mut(trace_id) else {
            return Ok(UpdateOutcome::Missing);
        };
        if trace.status.is_terminal() {
            return Ok(UpdateOutcome::Terminal(trace.status));
        }
        patch.apply(trace);
        Ok(UpdateOutcome::Applied)
    }

    async fn get(&self, trace_id: &str) -> Result<Option<Trace>> {
        Ok(self.inner.read().await.by_id.get(trace_id).cloned())
    }

    async fn find_by_message(
        &self,
        instance_name: &str,
        channel_message_id: &str,
    ) -> Result<Option<Trace>> {
        let inner = self.inner.read().await;
        let key = (instance_name.to_string(), channel_message_id.to_string());
        Ok(inner
            .by_message
            .get(&key)
            .and_then(|id| inner.by_id.get(id))
            .cloned())
    }

    async fn list(&self, query: &TraceQuery) -> Result<Vec<Trace>> {
        let inner = self.inner.read().await;
        let mut traces: Vec<Trace> = inner
            .by_id
            .values()
            .filter(|t| {
                query
                    .instance_name
                    .as_deref()
                    .is_none_or(|i| t.instance_name == i)
            })
            .filter(|t| query.status.is_none_or(|s| t.status == s))
            .cloned()
            .collect();
        traces.sort_by(|a, b| {
            b.received_at
                .cmp(&a.received_at)
                .then_with(|| a.trace_id.cmp(&b.trace_id))
        });
        traces.truncate(query.effective_limit() as usize);
        Ok(traces)
    }

    async fn prune_before(&self, before_ms: i64) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let expired: Vec<Trace> = inner
            .by_id
            .values()
            .filter(|t| t.status.is_terminal() && t.received_at < before_ms)
            .cloned()
            .collect();
        for trace in &expired {
            inner.by_id.remove(&trace.trace_id);
            inner.by_message.remove(&(
                trace.instance_name.clone(),
                trace.channel_message_id.clone(),
            ));
        }
        Ok(expired.len() as u64)
    }

    async fn reclaim_stale(
        &self,
        trace_id: &str,
        stale_before_ms: i64,
        now_ms: i64,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(trace) = inner.by_id.get_mut(trace_id) else {
            return Ok(false);
        };
        if trace.status.is_terminal() || trace.received_at >= stale_before_ms {
            return Ok(false);
        }
        *trace = Trace {
            status: TraceStatus::Received,
            received_at: now_ms,
            error_stage: None,
            error_message: None,
            completed_at: None,
            agent_processing_time_ms: None,
            total_processing_time_ms: None,
            agent_response_success: None,
            channel_send_success: None,
            ..trace.clone()
        };
        Ok(true)
    }

    async fn abandon_stale(&self, stale_before_ms: i64, now_ms: i64) -> Result<u64> {
        let mut inner = self.inner.write().await;
        let mut closed = 0;
        for trace in inner
            .by_id
            .values_mut()
            .filter(|t| !t.status.is_terminal() && t.received_at < stale_before_ms)
        {
            let mut patch = TracePatch::status(TraceStatus::Failed)
                .with_error(STAGE_ABANDONED, ABANDONED_MESSAGE);
            patch.completed_at = Some(now_ms);
            patch.apply(trace);
            closed += 1;
        }
        Ok(closed)
    }
}
