use std::fmt;

/// Where an agent call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentStage {
    /// Building the request (temp file, MIME inference, form encoding).
    Prepare,
    /// Transport failure or timeout.
    Request,
    /// Non-2xx status or a body that is not a recognised artifact.
    Response,
}

impl AgentStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prepare => "prepare",
            Self::Request => "request",
            Self::Response => "response",
        }
    }
}

impl fmt::Display for AgentStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of an agent backend call.
#[derive(Debug, Clone, thiserror::Error)]
#[error("agent {stage} failed: {detail}")]
pub struct AgentError {
    pub stage: AgentStage,
    pub detail: String,
}

impl AgentError {
    #[must_use]
    pub fn prepare(detail: impl fmt::Display) -> Self {
        Self::new(AgentStage::Prepare, detail)
    }

    #[must_use]
    pub fn request(detail: impl fmt::Display) -> Self {
        Self::new(AgentStage::Request, detail)
    }

    #[must_use]
    pub fn response(detail: impl fmt::Display) -> Self {
        Self::new(AgentStage::Response, detail)
    }

    fn new(stage: AgentStage, detail: impl fmt::Display) -> Self {
        Self {
            stage,
            detail: detail.to_string(),
        }
    }
}
