//! Switchboard gateway: tenant stores, trace recording, the dispatch engine
//! and the HTTP ingress that feeds it.
//!
//! A webhook is resolved to an [`InstanceConfig`](switchboard_channels::InstanceConfig),
//! normalized by the tenant's channel handler, gated by the access rules,
//! forwarded to the tenant's agent backend and the artifact relayed back.
//! Every processed message leaves exactly one trace.

pub mod access_store;
pub mod dispatch;
pub mod instance_store;
pub mod lifecycle;
#[cfg(feature = "metrics")]
pub mod metrics_middleware;
pub mod retention;
pub mod server;
pub mod state;
pub mod trace_recorder;
pub mod trace_store;

pub use {
    dispatch::{DispatchError, DispatchOutcome, Dispatcher},
    lifecycle::InstanceLifecycle,
    trace_recorder::{ActiveTrace, OpenOutcome, TraceRecorder},
};

/// Run the gateway's database migrations.
///
/// Creates the `instances`, `access_rules` and `message_traces` tables.
pub async fn run_migrations(pool: &sqlx::SqlitePool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations")
        .set_ignore_missing(true)
        .run(pool)
        .await?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod tests {
    use {
        serde_json::json,
        sqlx::{SqlitePool, sqlite::SqlitePoolOptions},
        switchboard_channels::InstanceConfig,
    };

    /// Single-connection in-memory database with migrations applied.
    pub(crate) async fn test_pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::run_migrations(&pool).await.unwrap();
        pool
    }

    pub(crate) fn whatsapp_instance(name: &str, is_default: bool) -> InstanceConfig {
        serde_json::from_value(json!({
            "name": name,
            "is_default": is_default,
            "channel_type": "whatsapp",
            "bridge_url": "http://bridge.invalid",
            "api_key": format!("{name}-key"),
            "agent": {"url": "http://agent.invalid", "api_key": "agent-key"},
        }))
        .unwrap()
    }
}
