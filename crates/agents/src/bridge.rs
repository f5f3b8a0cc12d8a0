use {async_trait::async_trait, bytes::Bytes};

use switchboard_channels::{InstanceConfig, NormalizedMessage};

use crate::{AgentArtifact, AgentError};

/// Call into a tenant's agent backend.
///
/// Every exit path, including cancellation of the returned future, must
/// release any temporary resources created for the call.
#[async_trait]
pub trait AgentBridge: Send + Sync {
    async fn run(
        &self,
        instance: &InstanceConfig,
        message: &NormalizedMessage,
        audio: Option<Bytes>,
    ) -> Result<AgentArtifact, AgentError>;
}
