//! Metric name and label definitions.
//!
//! Every metric switchboard emits is named here so dashboards have one place
//! to look.

/// HTTP ingress metrics
pub mod http {
    /// Total number of HTTP requests handled
    pub const REQUESTS_TOTAL: &str = "switchboard_http_requests_total";
    /// Duration of HTTP requests in seconds
    pub const REQUEST_DURATION_SECONDS: &str = "switchboard_http_request_duration_seconds";
}

/// Dispatch engine metrics
pub mod dispatch {
    /// Inbound events handed to the dispatcher
    pub const EVENTS_TOTAL: &str = "switchboard_dispatch_events_total";
    /// Dispatch outcomes, labelled by `outcome`
    pub const OUTCOMES_TOTAL: &str = "switchboard_dispatch_outcomes_total";
    /// Dispatches rejected before a trace existed, labelled by `error_type`
    pub const ERRORS_TOTAL: &str = "switchboard_dispatch_errors_total";
    /// End-to-end processing time of a traced message in seconds
    pub const DURATION_SECONDS: &str = "switchboard_dispatch_duration_seconds";
    /// Dispatches currently running
    pub const IN_FLIGHT: &str = "switchboard_dispatch_in_flight";
}

/// Agent backend metrics
pub mod agent {
    /// Agent backend calls
    pub const REQUESTS_TOTAL: &str = "switchboard_agent_requests_total";
    /// Agent backend failures, labelled by `stage`
    pub const ERRORS_TOTAL: &str = "switchboard_agent_errors_total";
    /// Agent backend call duration in seconds
    pub const DURATION_SECONDS: &str = "switchboard_agent_duration_seconds";
    /// Artifacts returned, labelled by `artifact`
    pub const ARTIFACTS_TOTAL: &str = "switchboard_agent_artifacts_total";
}

/// Channel metrics
pub mod channel {
    /// Messages received from channels
    pub const MESSAGES_RECEIVED_TOTAL: &str = "switchboard_channel_messages_received_total";
    /// Messages sent to channels
    pub const MESSAGES_SENT_TOTAL: &str = "switchboard_channel_messages_sent_total";
    /// Failed sends
    pub const SEND_ERRORS_TOTAL: &str = "switchboard_channel_send_errors_total";
    /// Senders rejected by access rules
    pub const BLOCKED_TOTAL: &str = "switchboard_channel_blocked_total";
}

/// Trace store metrics
pub mod traces {
    /// Traces deleted by retention pruning
    pub const PRUNED_TOTAL: &str = "switchboard_traces_pruned_total";
    /// Trace updates refused because the trace was already terminal
    pub const CONSISTENCY_WARNINGS_TOTAL: &str = "switchboard_trace_consistency_warnings_total";
    /// Stale open traces taken over by a redelivery
    pub const RECLAIMED_TOTAL: &str = "switchboard_traces_reclaimed_total";
    /// Stale open traces closed as abandoned by the sweep
    pub const ABANDONED_TOTAL: &str = "switchboard_traces_abandoned_total";
}

/// Common label keys
pub mod labels {
    pub const CHANNEL: &str = "channel";
    pub const INSTANCE: &str = "instance";
    pub const OUTCOME: &str = "outcome";
    pub const STAGE: &str = "stage";
    pub const ARTIFACT: &str = "artifact";
    pub const ERROR_TYPE: &str = "error_type";
    pub const METHOD: &str = "method";
    pub const STATUS: &str = "status";
    pub const ENDPOINT: &str = "endpoint";
}

/// Standard histogram buckets for different metric types
pub mod buckets {
    /// HTTP request duration buckets (in seconds)
    /// Covers 1ms to 60s
    pub const HTTP_DURATION: &[f64] = &[
        0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
    ];

    /// Agent and end-to-end dispatch buckets (in seconds)
    /// Covers 100ms to 5 minutes (agent calls can be slow)
    pub const AGENT_DURATION: &[f64] = &[
        0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0, 120.0, 180.0, 300.0,
    ];
}
