//! Connection lifecycle of an instance's channel account.
//!
//! Every call resolves the instance by name, asks its channel handler and
//! writes the result back into the instance's connection snapshot.

use std::sync::Arc;

use {
    switchboard_channels::{
        ConnectionSnapshot, ConnectionState, ConnectionStatus, Error, HandlerRegistry,
        InstanceConfig, InstanceStore, Result,
    },
    switchboard_common::now_ms,
    tracing::{info, warn},
};

/// Lifecycle operation, used in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Status,
    Connect,
    Disconnect,
    Restart,
}

impl Operation {
    fn as_str(self) -> &'static str {
        match self {
            Self::Status => "status",
            Self::Connect => "connect",
            Self::Disconnect => "disconnect",
            Self::Restart => "restart",
        }
    }
}

#[derive(Clone)]
pub struct InstanceLifecycle {
    instances: Arc<dyn InstanceStore>,
    handlers: HandlerRegistry,
}

impl InstanceLifecycle {
    pub fn new(instances: Arc<dyn InstanceStore>, handlers: HandlerRegistry) -> Self {
        Self {
            instances,
            handlers,
        }
    }

    pub async fn status(&self, name: &str) -> Result<ConnectionStatus> {
        self.run(name, Operation::Status).await
    }

    pub async fn connect(&self, name: &str) -> Result<ConnectionStatus> {
        self.run(name, Operation::Connect).await
    }

    pub async fn disconnect(&self, name: &str) -> Result<ConnectionStatus> {
        self.run(name, Operation::Disconnect).await
    }

    pub async fn restart(&self, name: &str) -> Result<ConnectionStatus> {
        self.run(name, Operation::Restart).await
    }

    async fn run(&self, name: &str, op: Operation) -> Result<ConnectionStatus> {
        let instance = self.instances.resolve(name).await?;
        let channel = instance.channel_type();
        let handler = self
            .handlers
            .get(channel)
            .ok_or_else(|| Error::unavailable(format!("no handler registered for {channel}")))?;

        let result = match op {
            Operation::Status => handler.connection_status(&instance).await,
            Operation::Connect => handler.connect(&instance).await,
            Operation::Disconnect => handler.disconnect(&instance).await,
            Operation::Restart => handler.restart(&instance).await,
        };

        let snapshot = match &result {
            Ok(status) => {
                info!(
                    instance = %instance.name,
                    op = op.as_str(),
                    state = %status.state,
                    "connection lifecycle"
                );
                ConnectionSnapshot {
                    state: status.state,
                    owner_id: status
                        .owner_id
                        .clone()
                        .or_else(|| instance.connection.owner_id.clone()),
                    last_updated: Some(now_ms()),
                    error: None,
                }
            },
            Err(e) => {
                warn!(
                    instance = %instance.name,
                    op = op.as_str(),
                    error = %e,
                    "connection lifecycle call failed"
                );
                ConnectionSnapshot {
                    state: ConnectionState::Error,
                    owner_id: instance.connection.owner_id.clone(),
                    last_updated: Some(now_ms()),
                    error: Some(e.to_string()),
                }
            },
        };
        self.record(&instance, snapshot).await;
        result
    }

    async fn record(&self, instance: &InstanceConfig, snapshot: ConnectionSnapshot) {
        if let Err(e) = self
            .instances
            .update_connection(&instance.name, snapshot)
            .await
        {
            warn!(instance = %instance.name, error = %e, "failed to store connection snapshot");
        }
    }
}
