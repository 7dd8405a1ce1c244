//! Publish repository implementation.
//!
//! A publish runs in one transaction: the Offline state is planned with
//! [`vfs_core::plan_publish`], applied to the Online project, recorded in the
//! history and the history is trimmed to the retention limit. Publishes are
//! serialised with a transaction-scoped advisory lock.

use std::collections::HashSet;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::{info, warn};
use uuid::Uuid;

use vfs_core::{
    check_parents, new_v7, outside_parents, plan_publish, select_publish_set, Error, Project,
    PublishHistoryEntry, PublishPlan, PublishReport, PublishRepository, PublishScope,
    PublishedResource, ResourceType, Result, Role, UserContext,
};

use crate::relations::{detach_target, resolve_all_targets};
use crate::resources::{fetch_by_id, list_changed};

const HISTORY_COLUMNS: &str = "history_id, publish_tag, published_at, published_by, resource_count";

fn parse_history_row(row: &PgRow) -> PublishHistoryEntry {
    PublishHistoryEntry {
        history_id: row.get("history_id"),
        publish_tag: row.get("publish_tag"),
        published_at: row.get("published_at"),
        published_by: row.get("published_by"),
        resource_count: row.get("resource_count"),
    }
}

fn parse_published_row(row: &PgRow) -> Result<PublishedResource> {
    let type_id: i32 = row.get("type_id");
    let state: String = row.get("state");
    let moved_state: Option<String> = row.get("moved_state");
    Ok(PublishedResource {
        history_id: row.get("history_id"),
        structure_id: row.get("structure_id"),
        resource_id: row.get("resource_id"),
        root_path: row.get("root_path"),
        resource_type: ResourceType::from_type_id(type_id)?,
        state: state.parse()?,
        moved_state: moved_state.map(|s| s.parse()).transpose()?,
    })
}

/// Map a deferred Online path conflict on commit to [`Error::Publish`].
fn map_publish_conflict(e: sqlx::Error) -> Error {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => Error::Publish(
            "a published path is still occupied online by an unpublished resource".to_string(),
        ),
        _ => Error::Database(e),
    }
}

/// Remove a resource and everything hanging off it from one project.
async fn remove_from_project(conn: &mut PgConnection, project: Project, structure_id: Uuid) -> Result<()> {
    let resource_id: Option<Uuid> = sqlx::query_scalar(
        "DELETE FROM vfs_resource WHERE project = $1 AND structure_id = $2 RETURNING resource_id",
    )
    .bind(project.as_str())
    .bind(structure_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Database)?;

    if let Some(resource_id) = resource_id {
        sqlx::query(
            "DELETE FROM vfs_content c
             WHERE c.project = $1 AND c.resource_id = $2
               AND NOT EXISTS (SELECT 1 FROM vfs_resource r
                               WHERE r.project = $1 AND r.resource_id = $2)",
        )
        .bind(project.as_str())
        .bind(resource_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
    }

    sqlx::query("DELETE FROM vfs_relation WHERE project = $1 AND source_id = $2")
        .bind(project.as_str())
        .bind(structure_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
    detach_target(conn, project, structure_id).await
}

/// Apply the removals and upserts of a plan to both projects.
async fn apply_plan(conn: &mut PgConnection, plan: &PublishPlan) -> Result<()> {
    for id in plan.deleted_ids() {
        remove_from_project(conn, Project::Online, id).await?;
        remove_from_project(conn, Project::Offline, id).await?;

        sqlx::query("DELETE FROM vfs_url_name WHERE structure_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;
        sqlx::query("UPDATE vfs_subscription SET deleted = true WHERE structure_id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;
    }

    for res in &plan.upserts {
        sqlx::query(
            "INSERT INTO vfs_resource
                (project, structure_id, resource_id, root_path, type_id, state, content_hash,
                 date_created, date_last_modified, user_last_modified, moved_from)
             VALUES ('online', $1, $2, $3, $4, 'unchanged', $5, $6, $7, $8, NULL)
             ON CONFLICT (project, structure_id) DO UPDATE SET
                resource_id = EXCLUDED.resource_id,
                root_path = EXCLUDED.root_path,
                type_id = EXCLUDED.type_id,
                state = 'unchanged',
                content_hash = EXCLUDED.content_hash,
                date_last_modified = EXCLUDED.date_last_modified,
                user_last_modified = EXCLUDED.user_last_modified,
                moved_from = NULL",
        )
        .bind(res.structure_id)
        .bind(res.resource_id)
        .bind(&res.root_path)
        .bind(res.resource_type.type_id())
        .bind(&res.content_hash)
        .bind(res.date_created)
        .bind(res.date_last_modified)
        .bind(res.user_last_modified)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO vfs_content (project, resource_id, data)
             SELECT 'online', resource_id, data FROM vfs_content
             WHERE project = 'offline' AND resource_id = $1
             ON CONFLICT (project, resource_id) DO UPDATE SET data = EXCLUDED.data",
        )
        .bind(res.resource_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;

        sqlx::query("DELETE FROM vfs_relation WHERE project = 'online' AND source_id = $1")
            .bind(res.structure_id)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;
        sqlx::query(
            "INSERT INTO vfs_relation
                (project, source_id, source_path, target_id, target_path, relation_type)
             SELECT 'online', source_id, source_path, target_id, target_path, relation_type
             FROM vfs_relation WHERE project = 'offline' AND source_id = $1",
        )
        .bind(res.structure_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;

        sqlx::query(
            "UPDATE vfs_resource SET state = 'unchanged', moved_from = NULL
             WHERE project = 'offline' AND structure_id = $1",
        )
        .bind(res.structure_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;

        sqlx::query("UPDATE vfs_url_name SET state = 'published' WHERE structure_id = $1")
            .bind(res.structure_id)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;
    }

    resolve_all_targets(conn, Project::Online).await
}

async fn insert_snapshots(conn: &mut PgConnection, snapshots: &[PublishedResource]) -> Result<()> {
    for snap in snapshots {
        sqlx::query(
            "INSERT INTO vfs_published_resource
                (history_id, structure_id, resource_id, root_path, type_id, state, moved_state)
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(snap.history_id)
        .bind(snap.structure_id)
        .bind(snap.resource_id)
        .bind(&snap.root_path)
        .bind(snap.resource_type.type_id())
        .bind(snap.state.as_str())
        .bind(snap.moved_state.map(|m| m.as_str()))
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
    }
    Ok(())
}

/// PostgreSQL implementation of PublishRepository.
#[derive(Clone)]
pub struct PgPublishRepository {
    pool: Pool<Postgres>,
}

impl PgPublishRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PublishRepository for PgPublishRepository {
    async fn publish(
        &self,
        ctx: &UserContext,
        scope: &PublishScope,
        history_size: usize,
    ) -> Result<PublishReport> {
        ctx.require_role(Role::Publisher)?;
        let start = Instant::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext('vfs_publish'))")
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

        let changed = list_changed(&mut tx).await?;
        let mut requested = Vec::new();
        if let PublishScope::Resources(ids) = scope {
            for id in ids {
                requested.push(fetch_by_id(&mut tx, Project::Offline, *id).await?);
            }
        }
        let selected = select_publish_set(scope, &changed, &requested)?;
        let needed: Vec<String> = outside_parents(&selected).into_iter().collect();
        let online_parents: Vec<String> = sqlx::query_scalar(
            "SELECT root_path FROM vfs_resource
             WHERE project = 'online' AND root_path = ANY($1) AND state <> 'deleted'",
        )
        .bind(&needed)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let online_parents: HashSet<String> = online_parents.into_iter().collect();
        check_parents(&selected, &online_parents)?;

        let history_id = new_v7();
        let plan = plan_publish(history_id, &selected);
        let resource_count = plan.resource_count() as i32;

        let row = sqlx::query(
            "INSERT INTO vfs_publish_history (history_id, published_at, published_by, resource_count)
             VALUES ($1, $2, $3, $4)
             RETURNING publish_tag, published_at",
        )
        .bind(history_id)
        .bind(Utc::now())
        .bind(ctx.user_id)
        .bind(resource_count)
        .fetch_one(&mut *tx)
        .await
        .map_err(Error::Database)?;
        let publish_tag: i64 = row.get("publish_tag");
        let published_at: DateTime<Utc> = row.get("published_at");

        apply_plan(&mut tx, &plan).await?;
        insert_snapshots(&mut tx, &plan.snapshots).await?;

        let purged = sqlx::query(
            "DELETE FROM vfs_publish_history
             WHERE publish_tag NOT IN (
                 SELECT publish_tag FROM vfs_publish_history
                 ORDER BY publish_tag DESC
                 LIMIT $1
             )",
        )
        .bind(history_size.max(1) as i64)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?
        .rows_affected();

        if let Err(e) = tx.commit().await {
            let err = map_publish_conflict(e);
            warn!(
                subsystem = "db",
                component = "publish",
                op = "publish",
                history_id = %history_id,
                error = %err,
                "Publish rolled back"
            );
            return Err(err);
        }

        info!(
            subsystem = "db",
            component = "publish",
            op = "publish",
            history_id = %history_id,
            publish_tag,
            resource_count,
            purged,
            duration_ms = start.elapsed().as_millis() as u64,
            "Publish committed"
        );

        Ok(PublishReport {
            entry: PublishHistoryEntry {
                history_id,
                publish_tag,
                published_at,
                published_by: ctx.user_id,
                resource_count,
            },
            resources: plan.snapshots,
            purged,
        })
    }

    async fn read_published_resources(&self, history_id: Uuid) -> Result<Vec<PublishedResource>> {
        let rows = sqlx::query(
            "SELECT history_id, structure_id, resource_id, root_path, type_id, state, moved_state
             FROM vfs_published_resource
             WHERE history_id = $1
             ORDER BY root_path, state COLLATE \"C\"",
        )
        .bind(history_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(parse_published_row).collect()
    }

    async fn list_history(&self, limit: i64) -> Result<Vec<PublishHistoryEntry>> {
        let rows = sqlx::query(&format!(
            "SELECT {HISTORY_COLUMNS} FROM vfs_publish_history
             ORDER BY publish_tag DESC
             LIMIT $1"
        ))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(parse_history_row).collect())
    }
}
