//! Storage traits for tenant records and access rules.
//!
//! Both are read on every dispatch and written by administrative tooling.
//! Implementations must make writes atomic per record so a concurrent reader
//! sees either the old or the new value, never a mix.

use async_trait::async_trait;

use crate::{
    Error, Result,
    access::AccessRule,
    instance::{ConnectionSnapshot, InstanceConfig},
};

/// Durable store of per-tenant configuration.
#[async_trait]
pub trait InstanceStore: Send + Sync {
    async fn list(&self) -> Result<Vec<InstanceConfig>>;
    async fn get(&self, name: &str) -> Result<Option<InstanceConfig>>;
    async fn get_default(&self) -> Result<Option<InstanceConfig>>;

    /// Insert or replace. Storing an instance with `is_default` set clears
    /// the flag on every other instance in the same write.
    async fn upsert(&self, instance: InstanceConfig) -> Result<()>;

    /// Replace the connection snapshot of an existing instance.
    async fn update_connection(&self, name: &str, snapshot: ConnectionSnapshot) -> Result<()>;

    async fn resolve(&self, name: &str) -> Result<InstanceConfig> {
        self.get(name)
            .await?
            .ok_or_else(|| Error::instance_not_found(name))
    }

    async fn resolve_default(&self) -> Result<InstanceConfig> {
        self.get_default().await?.ok_or(Error::NoDefaultInstance)
    }
}

/// Durable store of allow/block rules.
#[async_trait]
pub trait AccessRuleStore: Send + Sync {
    async fn list(&self) -> Result<Vec<AccessRule>>;

    /// Every rule that applies to `instance`: global rules plus rules scoped
    /// to it, read as one consistent snapshot.
    async fn snapshot(&self, instance: &str) -> Result<Vec<AccessRule>>;

    /// Persist a rule and return its id.
    async fn add(&self, rule: AccessRule) -> Result<i64>;
    async fn remove(&self, id: i64) -> Result<bool>;
}
