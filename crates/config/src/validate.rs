//! Semantic validation of a loaded configuration.
//!
//! Parsing already rejects syntax and type errors; this pass reports values
//! that parse but cannot work, plus a few warnings worth surfacing at startup.

use std::{fmt, net::IpAddr, path::PathBuf};

use crate::schema::SwitchboardConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "value", "security", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "traces.prune_interval_secs"
    pub path: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}] {}: {}", self.severity, self.category, self.path, self.message)
    }
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    fn push(
        &mut self,
        severity: Severity,
        category: &'static str,
        path: &str,
        message: impl Into<String>,
    ) {
        self.diagnostics.push(Diagnostic {
            severity,
            category,
            path: path.into(),
            message: message.into(),
        });
    }
}

/// Validate a parsed configuration.
#[must_use]
pub fn validate(config: &SwitchboardConfig) -> ValidationResult {
    let mut result = ValidationResult::default();
    check_server(config, &mut result);
    check_database(config, &mut result);
    check_dispatch(config, &mut result);
    check_agent(config, &mut result);
    check_traces(config, &mut result);
    result
}

fn check_server(config: &SwitchboardConfig, result: &mut ValidationResult) {
    let bind = config.server.bind.trim();
    if bind.is_empty() {
        result.push(Severity::Error, "value", "server.bind", "bind address is empty");
        return;
    }
    if bind != "localhost" && bind.parse::<IpAddr>().is_err() {
        result.push(
            Severity::Error,
            "value",
            "server.bind",
            format!("`{bind}` is not an IP address"),
        );
        return;
    }
    if !config.server.is_localhost() {
        result.push(
            Severity::Warning,
            "security",
            "server.bind",
            format!("webhook and admin routes are reachable on {bind}"),
        );
    }
    if config.server.port == 0 {
        result.push(
            Severity::Info,
            "value",
            "server.port",
            "port 0 binds a random free port",
        );
    }
}

fn check_database(config: &SwitchboardConfig, result: &mut ValidationResult) {
    let url = config.database.url.trim();
    if url.is_empty() {
        result.push(Severity::Error, "value", "database.url", "database url is empty");
    } else if !url.starts_with("sqlite:") {
        result.push(
            Severity::Error,
            "value",
            "database.url",
            format!("unsupported database url `{url}` (expected sqlite:)"),
        );
    }
}

fn check_dispatch(config: &SwitchboardConfig, result: &mut ValidationResult) {
    if config.dispatch.fallback_text.trim().is_empty() {
        result.push(
            Severity::Warning,
            "value",
            "dispatch.fallback_text",
            "empty fallback text: senders get no reply when the agent fails",
        );
    }
}

fn check_agent(config: &SwitchboardConfig, result: &mut ValidationResult) {
    if let Some(dir) = &config.agent.temp_dir
        && !dir.is_dir()
    {
        result.push(
            Severity::Error,
            "file-ref",
            "agent.temp_dir",
            format!("{} is not a directory", dir.display()),
        );
    }
}

fn check_traces(config: &SwitchboardConfig, result: &mut ValidationResult) {
    let traces = &config.traces;
    let max_agent = config.agent.max_timeout_secs;
    if traces.recovery_enabled() && max_agent > 0 && traces.stale_after_secs <= max_agent {
        result.push(
            Severity::Warning,
            "value",
            "traces.stale_after_secs",
            format!(
                "stale window of {}s does not exceed the {max_agent}s agent timeout, \
                 slow messages may be processed twice",
                traces.stale_after_secs
            ),
        );
    }
    if !traces.pruning_enabled() {
        result.push(
            Severity::Info,
            "value",
            "traces.retention_days",
            "retention is 0, traces are kept forever",
        );
    }
    if traces.sweep_enabled() && traces.prune_interval_secs == 0 {
        result.push(
            Severity::Error,
            "value",
            "traces.prune_interval_secs",
            "prune interval must be at least 1 second",
        );
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn paths(result: &ValidationResult, severity: Severity) -> Vec<&str> {
        result
            .diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .map(|d| d.path.as_str())
            .collect()
    }

    #[test]
    fn defaults_are_valid() {
        let result = validate(&SwitchboardConfig::default());
        assert!(!result.has_errors(), "{:?}", result.diagnostics);
        assert_eq!(result.count(Severity::Warning), 0);
    }

    #[test]
    fn reports_impossible_values() {
        let mut cfg = SwitchboardConfig::default();
        cfg.server.bind = "not an ip".into();
        cfg.database.url = "postgres://db".into();
        cfg.traces.prune_interval_secs = 0;
        cfg.agent.temp_dir = Some(PathBuf::from("/definitely/not/here"));

        let result = validate(&cfg);
        assert!(result.has_errors());
        assert_eq!(result.errors().count(), 4);
        assert_eq!(
            paths(&result, Severity::Error),
            vec![
                "server.bind",
                "database.url",
                "agent.temp_dir",
                "traces.prune_interval_secs"
            ]
        );
    }

    #[test]
    fn zero_port_and_zero_retention_are_allowed() {
        let mut cfg = SwitchboardConfig::default();
        cfg.server.port = 0;
        cfg.traces.retention_days = 0;
        cfg.traces.stale_after_secs = 0;
        cfg.traces.prune_interval_secs = 0;

        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert_eq!(
            paths(&result, Severity::Info),
            vec!["server.port", "traces.retention_days"]
        );
    }

    #[test]
    fn public_bind_and_blank_fallback_warn() {
        let mut cfg = SwitchboardConfig::default();
        cfg.server.bind = "0.0.0.0".into();
        cfg.dispatch.fallback_text = "  ".into();

        let result = validate(&cfg);
        assert!(!result.has_errors());
        assert_eq!(
            paths(&result, Severity::Warning),
            vec!["server.bind", "dispatch.fallback_text"]
        );
    }

    #[test]
    fn stale_window_must_outlast_agent_timeout() {
        let mut cfg = SwitchboardConfig::default();
        cfg.agent.max_timeout_secs = 900;
        let result = validate(&cfg);
        assert_eq!(paths(&result, Severity::Warning), vec!["traces.stale_after_secs"]);

        cfg.traces.stale_after_secs = 901;
        assert_eq!(validate(&cfg).count(Severity::Warning), 0);
    }

    #[test]
    fn recovery_alone_still_needs_an_interval() {
        let mut cfg = SwitchboardConfig::default();
        cfg.traces.retention_days = 0;
        cfg.traces.prune_interval_secs = 0;
        assert_eq!(
            paths(&validate(&cfg), Severity::Error),
            vec!["traces.prune_interval_secs"]
        );
    }

    #[test]
    fn existing_temp_dir_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = SwitchboardConfig::default();
        cfg.agent.temp_dir = Some(dir.path().to_path_buf());
        assert!(!validate(&cfg).has_errors());
    }
}
