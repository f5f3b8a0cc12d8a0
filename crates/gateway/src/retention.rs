//! Periodic trace maintenance: closing traces abandoned by a dead dispatch
//! and pruning old terminal traces.

use std::{sync::Arc, time::Duration};

use {
    switchboard_channels::{Result, TraceStore},
    switchboard_common::now_ms,
    switchboard_config::TracesConfig,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use crate::trace_recorder::duration_ms;

#[cfg(feature = "metrics")]
use switchboard_metrics::{counter, traces as trace_metrics};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Cut-off timestamp for `retention_days` before `now_ms`.
pub fn cutoff_ms(now_ms: i64, retention_days: u32) -> i64 {
    now_ms.saturating_sub(i64::from(retention_days).saturating_mul(DAY_MS))
}

/// Delete terminal traces received more than `retention_days` ago.
pub async fn prune_once(store: &dyn TraceStore, retention_days: u32, now_ms: i64) -> Result<u64> {
    let removed = store
        .prune_before(cutoff_ms(now_ms, retention_days))
        .await?;
    #[cfg(feature = "metrics")]
    counter!(trace_metrics::PRUNED_TOTAL).increment(removed);
    Ok(removed)
}

/// Close open traces received more than `stale_after` ago as `failed`.
pub async fn abandon_once(
    store: &dyn TraceStore,
    stale_after: Duration,
    now_ms: i64,
) -> Result<u64> {
    let closed = store
        .abandon_stale(now_ms.saturating_sub(duration_ms(stale_after)), now_ms)
        .await?;
    #[cfg(feature = "metrics")]
    counter!(trace_metrics::ABANDONED_TOTAL).increment(closed);
    Ok(closed)
}

/// One maintenance pass. Abandoned traces are closed before pruning so they
/// age out like any other terminal trace.
async fn sweep(store: &dyn TraceStore, config: &TracesConfig, now_ms: i64) {
    if config.recovery_enabled() {
        match abandon_once(store, Duration::from_secs(config.stale_after_secs), now_ms).await {
            Ok(0) => {},
            Ok(closed) => warn!(closed, "closed abandoned traces"),
            Err(e) => warn!(error = %e, "abandoned trace sweep failed"),
        }
    }
    if config.pruning_enabled() {
        match prune_once(store, config.retention_days, now_ms).await {
            Ok(0) => {},
            Ok(removed) => info!(removed, "pruned expired traces"),
            Err(e) => warn!(error = %e, "trace pruning failed"),
        }
    }
}

/// Spawn the maintenance loop. Returns `None` when both pruning and
/// abandoned-trace recovery are disabled.
pub fn spawn_retention(
    store: Arc<dyn TraceStore>,
    config: &TracesConfig,
    cancel: CancellationToken,
) -> Option<JoinHandle<()>> {
    if !config.sweep_enabled() {
        info!("trace retention disabled, traces are kept forever");
        return None;
    }
    let config = config.clone();
    let every = Duration::from_secs(config.prune_interval_secs.max(1));
    info!(
        retention_days = config.retention_days,
        stale_after_secs = config.stale_after_secs,
        interval_secs = every.as_secs(),
        "trace maintenance enabled"
    );

    Some(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("trace retention stopped");
                    break;
                },
                _ = ticker.tick() => sweep(store.as_ref(), &config, now_ms()).await,
            }
        }
    }))
}
