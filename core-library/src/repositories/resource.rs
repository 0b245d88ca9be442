//! Resource repository trait and implementation
//!
//! Resources are the items playlists point at. The catalog owns them; the
//! ordering code only ever asks whether one exists.

use crate::error::{LibraryError, Result};
use crate::models::Resource;
use async_trait::async_trait;
use sqlx::{query, query_as, query_scalar, QueryBuilder, Sqlite, SqlitePool};

#[async_trait]
pub trait ResourceRepository: Send + Sync {
    async fn find_by_id(&self, id: &str) -> Result<Option<Resource>>;

    /// Fetch several resources at once; missing IDs are skipped
    async fn find_many(&self, ids: &[String]) -> Result<Vec<Resource>>;

    async fn exists(&self, id: &str) -> Result<bool>;

    async fn insert(&self, resource: &Resource) -> Result<()>;

    /// Delete a resource; remaining playlist entries cascade
    ///
    /// # Returns
    /// - `Ok(true)` if the resource was deleted
    /// - `Ok(false)` if it was not found
    async fn delete(&self, id: &str) -> Result<bool>;

    async fn count(&self) -> Result<i64>;
}

/// SQLite implementation of ResourceRepository
pub struct SqliteResourceRepository {
    pool: SqlitePool,
}

impl SqliteResourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceRepository for SqliteResourceRepository {
    async fn find_by_id(&self, id: &str) -> Result<Option<Resource>> {
        let resource = query_as::<_, Resource>("SELECT * FROM resources WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(resource)
    }

    async fn find_many(&self, ids: &[String]) -> Result<Vec<Resource>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM resources WHERE id IN (");
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");

        let resources = builder
            .build_query_as::<Resource>()
            .fetch_all(&self.pool)
            .await?;

        Ok(resources)
    }

    async fn exists(&self, id: &str) -> Result<bool> {
        let exists: bool = query_scalar("SELECT EXISTS(SELECT 1 FROM resources WHERE id = ?)")
            .bind(id)
            .fetch_one(&self.pool)
            .await?;

        Ok(exists)
    }

    async fn insert(&self, resource: &Resource) -> Result<()> {
        resource
            .validate()
            .map_err(|e| LibraryError::InvalidInput {
                field: "Resource".to_string(),
                message: e,
            })?;

        query(
            r#"
            INSERT INTO resources (id, title, description, kind, author_id, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&resource.id)
        .bind(&resource.title)
        .bind(&resource.description)
        .bind(&resource.kind)
        .bind(&resource.author_id)
        .bind(resource.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool> {
        let result = query("DELETE FROM resources WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> Result<i64> {
        let count: i64 = query_scalar("SELECT COUNT(*) FROM resources")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}
