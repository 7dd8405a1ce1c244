//! URL name repository implementation.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres};
use tracing::debug;
use uuid::Uuid;

use vfs_core::url_names::{candidate, MAX_CANDIDATES};
use vfs_core::{
    sanitize_url_name, Error, Project, ResourceState, Result, Role, UrlNameRepository, UserContext,
};

use crate::resources::fetch_by_id;

/// Newest mapping first; `seq` breaks ties within one timestamp.
const NEWEST_FIRST: &str = "ORDER BY date_changed DESC, seq DESC";

/// PostgreSQL implementation of UrlNameRepository.
#[derive(Clone)]
pub struct PgUrlNameRepository {
    pool: Pool<Postgres>,
}

impl PgUrlNameRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UrlNameRepository for PgUrlNameRepository {
    async fn write_url_name(
        &self,
        ctx: &UserContext,
        raw_name: &str,
        structure_id: Uuid,
        locale: &str,
    ) -> Result<String> {
        ctx.require_role(Role::Editor)?;
        let base = sanitize_url_name(raw_name)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        // numbered candidates of one base can equal another base, so all writers share one lock
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('vfs_url_name'))")
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let resource = fetch_by_id(&mut tx, Project::Offline, structure_id).await?;
        if resource.state == ResourceState::Deleted {
            return Err(Error::ResourceNotFound(resource.root_path));
        }

        for attempt in 0..MAX_CANDIDATES {
            let name = candidate(&base, attempt);
            let taken: bool = sqlx::query_scalar(
                "SELECT EXISTS(SELECT 1 FROM vfs_url_name WHERE name = $1 AND structure_id <> $2)",
            )
            .bind(&name)
            .bind(structure_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(Error::Database)?;
            if taken {
                continue;
            }

            // a newer unpublished name replaces the older unpublished ones
            sqlx::query(
                "DELETE FROM vfs_url_name
                 WHERE structure_id = $1 AND locale = $2 AND state = 'new' AND name <> $3",
            )
            .bind(structure_id)
            .bind(locale)
            .bind(&name)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            sqlx::query(
                "INSERT INTO vfs_url_name (name, structure_id, locale, state, date_changed)
                 VALUES ($1, $2, $3, 'new', $4)
                 ON CONFLICT (name, structure_id, locale)
                 DO UPDATE SET date_changed = EXCLUDED.date_changed,
                               seq = nextval(pg_get_serial_sequence('vfs_url_name', 'seq'))",
            )
            .bind(&name)
            .bind(structure_id)
            .bind(locale)
            .bind(Utc::now())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            tx.commit().await.map_err(Error::Database)?;

            debug!(
                subsystem = "db",
                component = "url_names",
                op = "write",
                structure_id = %structure_id,
                name = %name,
                attempt,
                "URL name written"
            );
            return Ok(name);
        }

        Err(Error::Internal(format!(
            "no free url name derived from '{}'",
            base
        )))
    }

    async fn read_id_for_url_name(&self, project: Project, name: &str) -> Result<Option<Uuid>> {
        let id: Option<Uuid> = sqlx::query_scalar(&format!(
            "SELECT structure_id FROM vfs_url_name
             WHERE name = $1 AND ($2 OR state = 'published')
             {NEWEST_FIRST}
             LIMIT 1"
        ))
        .bind(name)
        .bind(project == Project::Offline)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn read_url_names_for_id(
        &self,
        project: Project,
        structure_id: Uuid,
    ) -> Result<Vec<String>> {
        let names: Vec<String> = sqlx::query_scalar(&format!(
            "SELECT name FROM vfs_url_name
             WHERE structure_id = $1 AND ($2 OR state = 'published')
             {NEWEST_FIRST}"
        ))
        .bind(structure_id)
        .bind(project == Project::Offline)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut seen = HashSet::new();
        Ok(names.into_iter().filter(|n| seen.insert(n.clone())).collect())
    }

    async fn read_newest_url_name(
        &self,
        project: Project,
        structure_id: Uuid,
        locale: &str,
    ) -> Result<Option<String>> {
        let name: Option<String> = sqlx::query_scalar(&format!(
            "SELECT name FROM vfs_url_name
             WHERE structure_id = $1 AND locale = $2 AND ($3 OR state = 'published')
             {NEWEST_FIRST}
             LIMIT 1"
        ))
        .bind(structure_id)
        .bind(locale)
        .bind(project == Project::Offline)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(name)
    }
}
