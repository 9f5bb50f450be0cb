use sqlx::{sqlite::SqliteRow, Row};
use tracing::warn;

use conductor_core::context::{rank_entries, ContextEntry, ContextQuery, ContextSnippet, ContextSource};
use conductor_core::domain::agent::TenantId;

use super::rows::parse_timestamp;
use super::{ContextRepository, RepositoryError};
use crate::DbPool;

/// Upper bound on rows pulled per search before ranking.
const SEARCH_CANDIDATES: u32 = 500;

pub struct SqlContextRepository {
    pool: DbPool,
}

impl SqlContextRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl ContextRepository for SqlContextRepository {
    async fn save(&self, entry: ContextEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO context_entry (id, tenant_id, title, tags, content, created_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                tenant_id = excluded.tenant_id,
                title = excluded.title,
                tags = excluded.tags,
                content = excluded.content",
        )
        .bind(&entry.id)
        .bind(&entry.tenant_id.0)
        .bind(&entry.title)
        .bind(&entry.tags)
        .bind(&entry.content)
        .bind(entry.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_for_tenant(
        &self,
        tenant_id: &TenantId,
        limit: u32,
    ) -> Result<Vec<ContextEntry>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, tenant_id, title, tags, content, created_at
             FROM context_entry
             WHERE tenant_id = ?
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(&tenant_id.0)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(entry_from_row).collect()
    }
}

#[async_trait::async_trait]
impl ContextSource for SqlContextRepository {
    async fn search(&self, tenant_id: &TenantId, query: &ContextQuery) -> Vec<ContextSnippet> {
        match self.list_for_tenant(tenant_id, SEARCH_CANDIDATES).await {
            Ok(entries) => rank_entries(&entries, query),
            Err(error) => {
                warn!(
                    event_name = "context.search.failed",
                    tenant_id = %tenant_id,
                    error = %error,
                    "context search failed; planning continues without context"
                );
                Vec::new()
            }
        }
    }
}

fn entry_from_row(row: SqliteRow) -> Result<ContextEntry, RepositoryError> {
    Ok(ContextEntry {
        id: row.try_get("id")?,
        tenant_id: TenantId(row.try_get("tenant_id")?),
        title: row.try_get("title")?,
        tags: row.try_get("tags")?,
        content: row.try_get("content")?,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use conductor_core::context::{ContextEntry, ContextQuery, ContextSource};
    use conductor_core::domain::agent::TenantId;

    use super::SqlContextRepository;
    use crate::migrations;
    use crate::repositories::ContextRepository;
    use crate::{connect_with_settings, DbPool};

    fn entry(id: &str, tenant: &str, title: &str, tags: &str, content: &str) -> ContextEntry {
        ContextEntry {
            id: id.to_string(),
            tenant_id: TenantId(tenant.to_string()),
            title: title.to_string(),
            tags: tags.to_string(),
            content: content.to_string(),
            created_at: Utc::now() - Duration::minutes(1),
        }
    }

    #[tokio::test]
    async fn search_is_tenant_scoped_and_ranked() {
        let pool = setup_pool().await;
        let repo = SqlContextRepository::new(pool.clone());

        for item in [
            entry("c1", "acme", "Order rules", "sales", "Orders for partner Acme ship weekly"),
            entry("c2", "acme", "Holiday calendar", "hr", "Office closed on Friday"),
            entry("c3", "globex", "Order rules", "sales", "Globex orders ship daily"),
        ] {
            repo.save(item).await.expect("save entry");
        }

        let snippets = repo
            .search(
                &TenantId("acme".to_string()),
                &ContextQuery { text: Some("ship the order".to_string()), tags: None, limit: 5 },
            )
            .await;

        assert_eq!(snippets.len(), 1);
        assert_eq!(snippets[0].title, "Order rules");
        assert!(snippets[0].excerpt.contains("Acme"));

        pool.close().await;
    }

    #[tokio::test]
    async fn search_degrades_to_empty_when_the_store_is_unavailable() {
        let pool = setup_pool().await;
        let repo = SqlContextRepository::new(pool.clone());
        pool.close().await;

        let snippets = repo
            .search(
                &TenantId("acme".to_string()),
                &ContextQuery { text: None, tags: None, limit: 5 },
            )
            .await;

        assert!(snippets.is_empty());
    }

    async fn setup_pool() -> DbPool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect test pool");
        migrations::run_pending(&pool).await.expect("run migrations");
        pool
    }
}
