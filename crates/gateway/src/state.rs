use std::sync::Arc;

#[cfg(feature = "metrics")]
use switchboard_metrics::MetricsHandle;

use crate::{dispatch::Dispatcher, lifecycle::InstanceLifecycle, trace_recorder::TraceRecorder};

/// Shared state behind every route.
pub struct GatewayState {
    pub dispatcher: Arc<Dispatcher>,
    pub lifecycle: InstanceLifecycle,
    pub version: &'static str,
    #[cfg(feature = "metrics")]
    pub metrics_handle: Option<MetricsHandle>,
}

impl GatewayState {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        let lifecycle = InstanceLifecycle::new(
            Arc::clone(dispatcher.instances()),
            dispatcher.handlers().clone(),
        );
        Self {
            dispatcher,
            lifecycle,
            version: env!("CARGO_PKG_VERSION"),
            #[cfg(feature = "metrics")]
            metrics_handle: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: MetricsHandle) -> Self {
        self.metrics_handle = Some(handle);
        self
    }

    pub fn traces(&self) -> &TraceRecorder {
        self.dispatcher.recorder()
    }
}
