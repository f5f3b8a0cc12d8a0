//! Allow/block rule storage.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use {
    async_trait::async_trait,
    sqlx::SqlitePool,
    switchboard_channels::{
        AccessRuleStore, Error, Result,
        access::{AccessRule, RuleType},
    },
    switchboard_common::now_ms,
    tokio::sync::RwLock,
};

#[derive(sqlx::FromRow)]
struct RuleRow {
    id: i64,
    phone_pattern: String,
    rule_type: String,
    scope: Option<String>,
}

impl TryFrom<RuleRow> for AccessRule {
    type Error = Error;

    fn try_from(r: RuleRow) -> Result<Self> {
        Ok(Self {
            id: r.id,
            phone_pattern: r.phone_pattern,
            rule_type: r.rule_type.parse()?,
            scope: r.scope,
        })
    }
}

fn validate(rule: &AccessRule) -> Result<()> {
    if rule.phone_pattern.trim().is_empty() {
        return Err(Error::invalid_input("phone pattern is empty"));
    }
    if rule.scope.as_deref().is_some_and(|s| s.trim().is_empty()) {
        return Err(Error::invalid_input("rule scope is empty"));
    }
    Ok(())
}

/// SQLite-backed rule store.
pub struct SqliteAccessRuleStore {
    pool: SqlitePool,
}

impl SqliteAccessRuleStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccessRuleStore for SqliteAccessRuleStore {
    async fn list(&self) -> Result<Vec<AccessRule>> {
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT id, phone_pattern, rule_type, scope FROM access_rules ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::external("list access rules", e))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn snapshot(&self, instance: &str) -> Result<Vec<AccessRule>> {
        // One statement, so global and scoped rules come from the same state.
        let rows = sqlx::query_as::<_, RuleRow>(
            "SELECT id, phone_pattern, rule_type, scope FROM access_rules
             WHERE scope IS NULL OR scope = ?
             ORDER BY id",
        )
        .bind(instance)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::external("load access rules", e))?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn add(&self, rule: AccessRule) -> Result<i64> {
        validate(&rule)?;
        let res = sqlx::query(
            "INSERT INTO access_rules (phone_pattern, rule_type, scope, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(rule.phone_pattern.trim())
        .bind(rule.rule_type.as_str())
        .bind(&rule.scope)
        .bind(now_ms())
        .execute(&self.pool)
        .await
        .map_err(|e| Error::external("add access rule", e))?;
        Ok(res.last_insert_rowid())
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM access_rules WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| Error::external("remove access rule", e))?;
        Ok(res.rows_affected() > 0)
    }
}

/// In-memory rule store. The rule set is an immutable slice replaced on every
/// write; readers clone the `Arc` and evaluate against a stable snapshot.
pub struct MemoryAccessRuleStore {
    rules: RwLock<Arc<[AccessRule]>>,
    next_id: AtomicI64,
}

impl Default for MemoryAccessRuleStore {
    fn default() -> Self {
        Self {
            rules: RwLock::new(Arc::from(Vec::new())),
            next_id: AtomicI64::new(1),
        }
    }
}

impl MemoryAccessRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience for tests and seeding: `(pattern, rule_type, scope)`.
    pub async fn with_rules<'a>(
        rules: impl IntoIterator<Item = (&'a str, RuleType, Option<&'a str>)>,
    ) -> Result<Self> {
        let store = Self::new();
        for (pattern, rule_type, scope) in rules {
            let rule = match scope {
                Some(instance) => AccessRule::scoped(pattern, rule_type, instance),
                None => AccessRule::global(pattern, rule_type),
            };
            store.add(rule).await?;
        }
        Ok(store)
    }

    async fn current(&self) -> Arc<[AccessRule]> {
        Arc::clone(&*self.rules.read().await)
    }
}

#[async_trait]
impl AccessRuleStore for MemoryAccessRuleStore {
    async fn list(&self) -> Result<Vec<AccessRule>> {
        Ok(self.current().await.to_vec())
    }

    async fn snapshot(&self, instance: &str) -> Result<Vec<AccessRule>> {
        Ok(self
            .current()
            .await
            .iter()
            .filter(|r| r.applies_to(instance))
            .cloned()
            .collect())
    }

    async fn add(&self, mut rule: AccessRule) -> Result<i64> {
        validate(&rule)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        rule.id = id;
        rule.phone_pattern = rule.phone_pattern.trim().to_string();

        let mut guard = self.rules.write().await;
        let mut next = guard.to_vec();
        next.push(rule);
        *guard = Arc::from(next);
        Ok(id)
    }

    async fn remove(&self, id: i64) -> Result<bool> {
        let mut guard = self.rules.write().await;
        let before = guard.len();
        let next: Vec<AccessRule> = guard.iter().filter(|r| r.id != id).cloned().collect();
        let removed = next.len() != before;
        if removed {
            *guard = Arc::from(next);
        }
        Ok(removed)
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::tests::test_pool,
        switchboard_channels::access::{self, AccessDecision},
    };

    async fn stores() -> Vec<Box<dyn AccessRuleStore>> {
        vec![
            Box::new(SqliteAccessRuleStore::new(test_pool().await)),
            Box::new(MemoryAccessRuleStore::new()),
        ]
    }

    #[tokio::test]
    async fn snapshot_holds_global_and_scoped_rules() {
        for store in stores().await {
            store
                .add(AccessRule::global("*", RuleType::Block))
                .await
                .unwrap();
            store
                .add(AccessRule::scoped("+1*", RuleType::Allow, "acme"))
                .await
                .unwrap();
            store
                .add(AccessRule::scoped("+44*", RuleType::Allow, "other"))
                .await
                .unwrap();

            let acme = store.snapshot("acme").await.unwrap();
            assert_eq!(acme.len(), 2);
            assert_eq!(
                access::check(&acme, "+15550001", "acme"),
                AccessDecision::Allowed
            );

            let other = store.snapshot("other").await.unwrap();
            assert_eq!(
                access::check(&other, "+15550001", "other"),
                AccessDecision::Blocked
            );
            assert_eq!(store.list().await.unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn ids_are_assigned_and_removable() {
        for store in stores().await {
            let a = store
                .add(AccessRule::global("+1555*", RuleType::Block))
                .await
                .unwrap();
            let b = store
                .add(AccessRule::global("+1666*", RuleType::Block))
                .await
                .unwrap();
            assert_ne!(a, b);

            assert!(store.remove(a).await.unwrap());
            assert!(!store.remove(a).await.unwrap());
            let left = store.list().await.unwrap();
            assert_eq!(left.len(), 1);
            assert_eq!(left[0].id, b);
            assert_eq!(left[0].phone_pattern, "+1666*");
        }
    }

    #[tokio::test]
    async fn rejects_blank_pattern_and_scope() {
        for store in stores().await {
            assert!(
                store
                    .add(AccessRule::global("  ", RuleType::Allow))
                    .await
                    .is_err()
            );
            assert!(
                store
                    .add(AccessRule::scoped("*", RuleType::Allow, ""))
                    .await
                    .is_err()
            );
        }
    }

    #[tokio::test]
    async fn memory_readers_keep_their_snapshot() {
        let store = MemoryAccessRuleStore::with_rules([("*", RuleType::Block, None)])
            .await
            .unwrap();
        let before = store.current().await;
        store
            .add(AccessRule::global("+1*", RuleType::Allow))
            .await
            .unwrap();
        assert_eq!(before.len(), 1);
        assert_eq!(store.current().await.len(), 2);
    }
}
