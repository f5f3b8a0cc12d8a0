//! `switchboard traces`: read-only view of the message trace store.

use {
    anyhow::{Result, bail},
    clap::Subcommand,
    sqlx::SqlitePool,
    switchboard_channels::{Trace, TraceQuery, TraceStatus, TraceStore},
    switchboard_gateway::trace_store::SqliteTraceStore,
};

#[derive(Subcommand)]
pub enum TraceAction {
    /// List traces, newest first.
    List {
        /// Only traces of this instance.
        #[arg(long)]
        instance: Option<String>,
        /// Only traces in this status (e.g. completed, agent_failed).
        #[arg(long)]
        status: Option<TraceStatus>,
        #[arg(long, default_value_t = TraceQuery::DEFAULT_LIMIT)]
        limit: u32,
        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
    /// Show one trace as JSON.
    Get { trace_id: String },
}

pub async fn handle_traces(action: TraceAction, pool: SqlitePool) -> Result<()> {
    let store = SqliteTraceStore::new(pool);
    match action {
        TraceAction::List {
            instance,
            status,
            limit,
            json,
        } => {
            let query = TraceQuery {
                instance_name: instance,
                status,
                limit,
            };
            let traces = store.list(&query).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&traces)?);
            } else if traces.is_empty() {
                println!("No traces found.");
            } else {
                println!(
                    "{:<36}  {:<16}  {:<12}  {:<16}  {:>10}",
                    "TRACE", "INSTANCE", "STATUS", "SENDER", "TOTAL_MS"
                );
                for trace in &traces {
                    println!("{}", row(trace));
                }
            }
        },
        TraceAction::Get { trace_id } => match store.get(&trace_id).await? {
            Some(trace) => println!("{}", serde_json::to_string_pretty(&trace)?),
            None => bail!("unknown trace: {trace_id}"),
        },
    }
    Ok(())
}

fn row(trace: &Trace) -> String {
    let total = trace
        .total_processing_time_ms
        .map(|ms| ms.to_string())
        .unwrap_or_else(|| "-".into());
    let status = match &trace.error_stage {
        Some(stage) => format!("{} ({stage})", trace.status),
        None => trace.status.to_string(),
    };
    format!(
        "{:<36}  {:<16}  {:<12}  {:<16}  {:>10}",
        trace.trace_id, trace.instance_name, status, trace.sender_id, total
    )
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, switchboard_channels::MessageType};

    #[test]
    fn row_shows_error_stage_and_missing_timings() {
        let trace = Trace {
            trace_id: "t-1".into(),
            instance_name: "acme".into(),
            channel_message_id: "m1".into(),
            sender_id: "+15550001".into(),
            message_type: MessageType::Text,
            has_media: false,
            status: TraceStatus::AgentFailed,
            error_stage: Some("agent_bridge".into()),
            error_message: Some("HTTP 504".into()),
            received_at: 1,
            completed_at: None,
            agent_processing_time_ms: None,
            total_processing_time_ms: None,
            agent_response_success: Some(false),
            channel_send_success: None,
        };
        let line = row(&trace);
        assert!(line.contains("agent_failed (agent_bridge)"));
        assert!(line.trim_end().ends_with('-'));
    }
}
