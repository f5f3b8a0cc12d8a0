//! Metrics collection and export for switchboard.
//!
//! Call sites record through the `metrics` facade using the names in this
//! crate. Without an installed recorder every call is a no-op; with the
//! `prometheus` feature, [`init_metrics`] installs a Prometheus recorder whose
//! handle renders the `/metrics` endpoint.
//!
//! ```rust,ignore
//! use switchboard_metrics::{counter, dispatch, labels};
//!
//! counter!(dispatch::OUTCOMES_TOTAL, labels::OUTCOME => "completed").increment(1);
//! ```

mod definitions;
mod error;
mod recorder;

pub use {
    definitions::*,
    error::{Error, Result},
    recorder::{MetricsHandle, MetricsRecorderConfig, init_metrics},
};

// Re-export metrics macros for convenience
pub use metrics::{counter, gauge, histogram};
