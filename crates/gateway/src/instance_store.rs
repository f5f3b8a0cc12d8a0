//! Tenant configuration storage.

use std::{collections::HashMap, sync::Arc};

use {
    async_trait::async_trait,
    sqlx::SqlitePool,
    switchboard_channels::{ConnectionSnapshot, Error, InstanceConfig, InstanceStore, Result},
    switchboard_common::now_ms,
    tokio::sync::RwLock,
};

/// Internal row type for sqlx mapping.
#[derive(sqlx::FromRow)]
struct InstanceRow {
    name: String,
    is_default: bool,
    config: String,
    connection: String,
}

impl TryFrom<InstanceRow> for InstanceConfig {
    type Error = Error;

    fn try_from(r: InstanceRow) -> Result<Self> {
        let mut config: InstanceConfig = serde_json::from_str(&r.config)?;
        config.name = r.name;
        config.is_default = r.is_default;
        config.connection = serde_json::from_str(&r.connection)?;
        Ok(config)
    }
}

fn db(context: &'static str) -> impl FnOnce(sqlx::Error) -> Error {
    move |e| Error::external(context, e)
}

/// SQLite-backed instance store. One row per instance; the credentials and
/// agent backend live in a single JSON column.
pub struct SqliteInstanceStore {
    pool: SqlitePool,
}

impl SqliteInstanceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

const SELECT: &str = "SELECT name, is_default, config, connection FROM instances";

#[async_trait]
impl InstanceStore for SqliteInstanceStore {
    async fn list(&self) -> Result<Vec<InstanceConfig>> {
        let rows = sqlx::query_as::<_, InstanceRow>(&format!("{SELECT} ORDER BY name"))
            .fetch_all(&self.pool)
            .await
            .map_err(db("list instances"))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn get(&self, name: &str) -> Result<Option<InstanceConfig>> {
        let row = sqlx::query_as::<_, InstanceRow>(&format!("{SELECT} WHERE name = ?"))
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("get instance"))?;
        row.map(TryInto::try_into).transpose()
    }

    async fn get_default(&self) -> Result<Option<InstanceConfig>> {
        let sql = format!("{SELECT} WHERE is_default = 1 LIMIT 1");
        let row = sqlx::query_as::<_, InstanceRow>(&sql)
            .fetch_optional(&self.pool)
            .await
            .map_err(db("get default instance"))?;
        row.map(TryInto::try_into).transpose()
    }

    async fn upsert(&self, instance: InstanceConfig) -> Result<()> {
        if instance.name.trim().is_empty() {
            return Err(Error::invalid_input("instance name is empty"));
        }
        let config = serde_json::to_string(&instance)?;
        let connection = serde_json::to_string(&instance.connection)?;
        let now = now_ms();

        let mut tx = self.pool.begin().await.map_err(db("begin upsert"))?;
        if instance.is_default {
            sqlx::query("UPDATE instances SET is_default = 0 WHERE is_default = 1 AND name != ?")
                .bind(&instance.name)
                .execute(&mut *tx)
                .await
                .map_err(db("clear default instance"))?;
        }
        sqlx::query(
            r#"INSERT INTO instances
                 (name, channel_type, is_default, config, connection, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(name) DO UPDATE SET
                 channel_type = excluded.channel_type,
                 is_default = excluded.is_default,
                 config = excluded.config,
                 connection = excluded.connection,
                 updated_at = excluded.updated_at"#,
        )
        .bind(&instance.name)
        .bind(instance.channel_type().as_str())
        .bind(instance.is_default)
        .bind(&config)
        .bind(&connection)
        .bind(now)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db("upsert instance"))?;
        tx.commit().await.map_err(db("commit upsert"))?;
        Ok(())
    }

    async fn update_connection(&self, name: &str, snapshot: ConnectionSnapshot) -> Result<()> {
        let connection = serde_json::to_string(&snapshot)?;
        let res = sqlx::query("UPDATE instances SET connection = ?, updated_at = ? WHERE name = ?")
            .bind(&connection)
            .bind(now_ms())
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(db("update connection"))?;
        if res.rows_affected() == 0 {
            return Err(Error::instance_not_found(name));
        }
        Ok(())
    }
}

/// In-memory instance store. Writers swap in a fresh `Arc` per record, so a
/// reader holding an old config keeps a consistent copy.
#[derive(Default)]
pub struct MemoryInstanceStore {
    instances: RwLock<HashMap<String, Arc<InstanceConfig>>>,
}

impl MemoryInstanceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a store with `instances`, applying the same default rules as
    /// [`InstanceStore::upsert`].
    pub async fn with_instances(
        instances: impl IntoIterator<Item = InstanceConfig>,
    ) -> Result<Self> {
        let store = Self::new();
        for instance in instances {
            store.upsert(instance).await?;
        }
        Ok(store)
    }
}

#[async_trait]
impl InstanceStore for MemoryInstanceStore {
    async fn list(&self) -> Result<Vec<InstanceConfig>> {
        let map = self.instances.read().await;
        let mut all: Vec<InstanceConfig> = map.values().map(|i| i.as_ref().clone()).collect();
        all.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(all)
    }

    async fn get(&self, name: &str) -> Result<Option<InstanceConfig>> {
        Ok(self
            .instances
            .read()
            .await
            .get(name)
            .map(|i| i.as_ref().clone()))
    }

    async fn get_default(&self) -> Result<Option<InstanceConfig>> {
        Ok(self
            .instances
            .read()
            .await
            .values()
            .find(|i| i.is_default)
            .map(|i| i.as_ref().clone()))
    }

    async fn upsert(&self, instance: InstanceConfig) -> Result<()> {
        if instance.name.trim().is_empty() {
            return Err(Error::invalid_input("instance name is empty"));
        }
        let mut map = self.instances.write().await;
        if instance.is_default {
            for (name, existing) in map.iter_mut() {
                if existing.is_default && *name != instance.name {
                    let mut cleared = existing.as_ref().clone();
                    cleared.is_default = false;
                    *existing = Arc::new(cleared);
                }
            }
        }
        map.insert(instance.name.clone(), Arc::new(instance));
        Ok(())
    }

    async fn update_connection(&self, name: &str, snapshot: ConnectionSnapshot) -> Result<()> {
        let mut map = self.instances.write().await;
        let existing = map
            .get_mut(name)
            .ok_or_else(|| Error::instance_not_found(name))?;
        let mut updated = existing.as_ref().clone();
        updated.connection = snapshot;
        *existing = Arc::new(updated);
        Ok(())
    }
}
