//! Agent backend bridge: forward a normalized message (and optional audio)
//! to a tenant's agent backend and turn its reply into an [`AgentArtifact`].

pub mod artifact;
pub mod bridge;
pub mod error;
pub mod http;

pub use {
    artifact::AgentArtifact,
    bridge::AgentBridge,
    error::{AgentError, AgentStage},
    http::HttpAgentBridge,
};
