//! Resource repository implementation.
//!
//! Every write runs in one transaction against the Offline project. The
//! helpers taking `&mut PgConnection` are shared with the publish and
//! relation repositories so they can run inside a caller's transaction.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use vfs_core::{
    new_v7, paths, CreateResourceRequest, Error, Project, Resource, ResourceRepository,
    ResourceState, ResourceType, Result, Role, UserContext,
};

use crate::content::compute_content_hash;
use crate::escape_like;
use crate::relations::{detach_target, refresh_content_relations, resolve_broken};

/// Columns selected for a [`Resource`], aliased against `vfs_resource r`.
pub(crate) const RESOURCE_COLUMNS: &str = "r.structure_id, r.resource_id, r.root_path, \
    r.type_id, r.state, r.content_hash, r.date_created, r.date_last_modified, \
    r.user_last_modified, r.moved_from, \
    (SELECT COUNT(*) FROM vfs_resource s \
     WHERE s.project = r.project AND s.resource_id = r.resource_id)::INT4 AS sibling_count";

pub(crate) fn parse_resource_row(row: &PgRow) -> Result<Resource> {
    let type_id: i32 = row.get("type_id");
    let state: String = row.get("state");
    Ok(Resource {
        structure_id: row.get("structure_id"),
        resource_id: row.get("resource_id"),
        root_path: row.get("root_path"),
        resource_type: ResourceType::from_type_id(type_id)?,
        state: state.parse()?,
        sibling_count: row.get("sibling_count"),
        content_hash: row.get("content_hash"),
        date_created: row.get("date_created"),
        date_last_modified: row.get("date_last_modified"),
        user_last_modified: row.get("user_last_modified"),
        moved_from: row.get("moved_from"),
    })
}

/// Map a deferred unique violation on commit to [`Error::AlreadyExists`].
pub(crate) fn map_path_conflict(e: sqlx::Error, path: &str) -> Error {
    match e.as_database_error() {
        Some(db) if db.is_unique_violation() => Error::AlreadyExists(path.to_string()),
        _ => Error::Database(e),
    }
}

// =============================================================================
// TRANSACTION HELPERS
// =============================================================================

pub(crate) async fn fetch_by_path(
    conn: &mut PgConnection,
    project: Project,
    path: &str,
) -> Result<Option<Resource>> {
    let row = sqlx::query(&format!(
        "SELECT {RESOURCE_COLUMNS} FROM vfs_resource r WHERE r.project = $1 AND r.root_path = $2"
    ))
    .bind(project.as_str())
    .bind(path)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Database)?;

    row.as_ref().map(parse_resource_row).transpose()
}

pub(crate) async fn fetch_by_id(
    conn: &mut PgConnection,
    project: Project,
    structure_id: Uuid,
) -> Result<Resource> {
    let row = sqlx::query(&format!(
        "SELECT {RESOURCE_COLUMNS} FROM vfs_resource r \
         WHERE r.project = $1 AND r.structure_id = $2"
    ))
    .bind(project.as_str())
    .bind(structure_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Database)?;

    match row {
        Some(row) => parse_resource_row(&row),
        None => Err(Error::ResourceNotFound(structure_id.to_string())),
    }
}

/// Resources strictly below a folder, ordered by path.
pub(crate) async fn fetch_descendants(
    conn: &mut PgConnection,
    project: Project,
    folder: &str,
    include_deleted: bool,
) -> Result<Vec<Resource>> {
    let rows = sqlx::query(&format!(
        "SELECT {RESOURCE_COLUMNS} FROM vfs_resource r
         WHERE r.project = $1 AND r.root_path LIKE $2 AND r.root_path <> $3
           AND ($4 OR r.state <> 'deleted')
         ORDER BY r.root_path"
    ))
    .bind(project.as_str())
    .bind(format!("{}%", escape_like(folder)))
    .bind(folder)
    .bind(include_deleted)
    .fetch_all(&mut *conn)
    .await
    .map_err(Error::Database)?;

    rows.iter().map(parse_resource_row).collect()
}

/// The Offline resource at `path`, failing for missing or deleted entries.
pub(crate) async fn require_live(conn: &mut PgConnection, path: &str) -> Result<Resource> {
    match fetch_by_path(conn, Project::Offline, path).await? {
        Some(r) if r.state != ResourceState::Deleted => Ok(r),
        _ => Err(Error::ResourceNotFound(path.to_string())),
    }
}

/// Any Offline entry, deleted ones included, occupies its path.
async fn ensure_free(conn: &mut PgConnection, path: &str) -> Result<()> {
    let taken: bool = sqlx::query_scalar(
        "SELECT EXISTS(SELECT 1 FROM vfs_resource WHERE project = 'offline' AND root_path = $1)",
    )
    .bind(path)
    .fetch_one(&mut *conn)
    .await
    .map_err(Error::Database)?;

    if taken {
        return Err(Error::AlreadyExists(path.to_string()));
    }
    Ok(())
}

async fn ensure_parent(conn: &mut PgConnection, path: &str) -> Result<()> {
    let parent = paths::parent(path);
    if parent == paths::ROOT {
        return Ok(());
    }
    match fetch_by_path(conn, Project::Offline, parent).await? {
        Some(r) if r.is_folder() && r.state != ResourceState::Deleted => Ok(()),
        _ => Err(Error::ResourceNotFound(parent.to_string())),
    }
}

/// Mark an Offline resource modified by `ctx`.
pub(crate) async fn touch(conn: &mut PgConnection, structure_id: Uuid, ctx: &UserContext) -> Result<()> {
    sqlx::query(
        "UPDATE vfs_resource
         SET state = CASE WHEN state = 'new' THEN 'new' ELSE 'changed' END,
             date_last_modified = $2,
             user_last_modified = $3
         WHERE project = 'offline' AND structure_id = $1",
    )
    .bind(structure_id)
    .bind(Utc::now())
    .bind(ctx.user_id)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

pub(crate) async fn insert_resource(
    conn: &mut PgConnection,
    project: Project,
    resource: &Resource,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO vfs_resource
            (project, structure_id, resource_id, root_path, type_id, state, content_hash,
             date_created, date_last_modified, user_last_modified, moved_from)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(project.as_str())
    .bind(resource.structure_id)
    .bind(resource.resource_id)
    .bind(&resource.root_path)
    .bind(resource.resource_type.type_id())
    .bind(resource.state.as_str())
    .bind(&resource.content_hash)
    .bind(resource.date_created)
    .bind(resource.date_last_modified)
    .bind(resource.user_last_modified)
    .bind(&resource.moved_from)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

pub(crate) async fn upsert_content(
    conn: &mut PgConnection,
    project: Project,
    resource_id: Uuid,
    data: &[u8],
) -> Result<()> {
    sqlx::query(
        "INSERT INTO vfs_content (project, resource_id, data) VALUES ($1, $2, $3)
         ON CONFLICT (project, resource_id) DO UPDATE SET data = EXCLUDED.data",
    )
    .bind(project.as_str())
    .bind(resource_id)
    .bind(data)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

pub(crate) async fn fetch_content(
    conn: &mut PgConnection,
    project: Project,
    resource_id: Uuid,
) -> Result<Vec<u8>> {
    let data: Option<Vec<u8>> = sqlx::query_scalar(
        "SELECT data FROM vfs_content WHERE project = $1 AND resource_id = $2",
    )
    .bind(project.as_str())
    .bind(resource_id)
    .fetch_optional(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(data.unwrap_or_default())
}

/// Store shared content and refresh every sibling's hash and relations.
async fn store_content(conn: &mut PgConnection, resource_id: Uuid, content: &[u8]) -> Result<()> {
    upsert_content(conn, Project::Offline, resource_id, content).await?;

    let siblings: Vec<Uuid> = sqlx::query_scalar(
        "UPDATE vfs_resource SET content_hash = $2
         WHERE project = 'offline' AND resource_id = $1
         RETURNING structure_id",
    )
    .bind(resource_id)
    .bind(compute_content_hash(content))
    .fetch_all(&mut *conn)
    .await
    .map_err(Error::Database)?;

    for id in siblings {
        refresh_content_relations(conn, Project::Offline, id).await?;
    }
    Ok(())
}

/// Insert a new Offline resource and wire up its relations.
async fn insert_new(conn: &mut PgConnection, resource: &Resource, content: Option<&[u8]>) -> Result<()> {
    insert_resource(conn, Project::Offline, resource).await?;
    if let Some(content) = content {
        upsert_content(conn, Project::Offline, resource.resource_id, content).await?;
    }
    refresh_content_relations(conn, Project::Offline, resource.structure_id).await?;
    resolve_broken(conn, Project::Offline, &resource.root_path, resource.structure_id).await?;
    Ok(())
}

fn new_resource(
    ctx: &UserContext,
    root_path: String,
    resource_type: ResourceType,
    resource_id: Uuid,
    content_hash: String,
) -> Resource {
    let now = Utc::now();
    Resource {
        structure_id: new_v7(),
        resource_id,
        root_path,
        resource_type,
        state: ResourceState::New,
        sibling_count: 1,
        content_hash,
        date_created: now,
        date_last_modified: now,
        user_last_modified: ctx.user_id,
        moved_from: None,
    }
}

fn ensure_same_kind(resource: &Resource, resource_type: ResourceType) -> Result<()> {
    if resource.is_folder() != resource_type.is_folder() {
        return Err(Error::InvalidInput(format!(
            "cannot change {} between folder and file types",
            resource.root_path
        )));
    }
    Ok(())
}

async fn create_in_tx(
    conn: &mut PgConnection,
    ctx: &UserContext,
    req: CreateResourceRequest,
) -> Result<Uuid> {
    paths::validate(&req.root_path, req.resource_type.is_folder())?;
    ensure_free(conn, &req.root_path).await?;
    ensure_parent(conn, &req.root_path).await?;

    let content = if req.resource_type.is_folder() {
        Vec::new()
    } else {
        req.content
    };
    let resource = new_resource(
        ctx,
        req.root_path,
        req.resource_type,
        new_v7(),
        compute_content_hash(&content),
    );
    insert_new(conn, &resource, Some(&content)).await?;
    Ok(resource.structure_id)
}

async fn replace_in_tx(
    conn: &mut PgConnection,
    ctx: &UserContext,
    existing: &Resource,
    resource_type: ResourceType,
    content: &[u8],
) -> Result<()> {
    if existing.is_folder() || resource_type.is_folder() {
        return Err(Error::InvalidInput(format!(
            "folders have no content: {}",
            existing.root_path
        )));
    }
    sqlx::query("UPDATE vfs_resource SET type_id = $2 WHERE project = 'offline' AND structure_id = $1")
        .bind(existing.structure_id)
        .bind(resource_type.type_id())
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
    touch(conn, existing.structure_id, ctx).await?;
    store_content(conn, existing.resource_id, content).await
}

/// Drop an Offline resource that was never published, with everything attached to it.
async fn remove_new(conn: &mut PgConnection, resource: &Resource) -> Result<()> {
    let id = resource.structure_id;
    sqlx::query("DELETE FROM vfs_resource WHERE project = 'offline' AND structure_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;

    sqlx::query(
        "DELETE FROM vfs_content c
         WHERE c.project = 'offline' AND c.resource_id = $1
           AND NOT EXISTS (SELECT 1 FROM vfs_resource r
                           WHERE r.project = 'offline' AND r.resource_id = $1)",
    )
    .bind(resource.resource_id)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;

    sqlx::query("DELETE FROM vfs_relation WHERE project = 'offline' AND source_id = $1")
        .bind(id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
    detach_target(conn, Project::Offline, id).await?;

    for table in ["vfs_url_name", "vfs_subscription", "vfs_visit"] {
        sqlx::query(&format!("DELETE FROM {table} WHERE structure_id = $1"))
            .bind(id)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;
    }
    Ok(())
}

async fn delete_entry(conn: &mut PgConnection, ctx: &UserContext, resource: &Resource) -> Result<()> {
    match resource.state {
        ResourceState::Deleted => Ok(()),
        ResourceState::New => remove_new(conn, resource).await,
        _ => {
            sqlx::query(
                "UPDATE vfs_resource
                 SET state = 'deleted', date_last_modified = $2, user_last_modified = $3
                 WHERE project = 'offline' AND structure_id = $1",
            )
            .bind(resource.structure_id)
            .bind(Utc::now())
            .bind(ctx.user_id)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;

            sqlx::query(
                "DELETE FROM vfs_relation
                 WHERE project = 'offline' AND source_id = $1 AND relation_type <> 'CATEGORY'",
            )
            .bind(resource.structure_id)
            .execute(&mut *conn)
            .await
            .map_err(Error::Database)?;
            Ok(())
        }
    }
}

// =============================================================================
// REPOSITORY
// =============================================================================

/// PostgreSQL implementation of ResourceRepository.
#[derive(Clone)]
pub struct PgResourceRepository {
    pool: Pool<Postgres>,
}

impl PgResourceRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ResourceRepository for PgResourceRepository {
    async fn create(&self, ctx: &UserContext, req: CreateResourceRequest) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let path = req.root_path.clone();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let id = create_in_tx(&mut tx, ctx, req).await?;
        let resource = fetch_by_id(&mut tx, Project::Offline, id).await?;
        tx.commit().await.map_err(|e| map_path_conflict(e, &path))?;

        debug!(
            subsystem = "db",
            component = "resources",
            op = "create",
            root_path = %resource.root_path,
            structure_id = %resource.structure_id,
            "Resource created"
        );
        Ok(resource)
    }

    async fn create_sibling(
        &self,
        ctx: &UserContext,
        source: &str,
        destination: &str,
    ) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let src = require_live(&mut tx, source).await?;
        if src.is_folder() {
            return Err(Error::InvalidInput(format!(
                "folders cannot have siblings: {}",
                source
            )));
        }
        paths::validate(destination, false)?;
        ensure_free(&mut tx, destination).await?;
        ensure_parent(&mut tx, destination).await?;

        let sibling = new_resource(
            ctx,
            destination.to_string(),
            src.resource_type,
            src.resource_id,
            src.content_hash.clone(),
        );
        insert_new(&mut tx, &sibling, None).await?;
        let resource = fetch_by_id(&mut tx, Project::Offline, sibling.structure_id).await?;
        tx.commit()
            .await
            .map_err(|e| map_path_conflict(e, destination))?;
        Ok(resource)
    }

    async fn write_content(&self, ctx: &UserContext, path: &str, content: &[u8]) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let target = require_live(&mut tx, path).await?;
        if target.is_folder() {
            return Err(Error::InvalidInput(format!(
                "folders have no content: {}",
                path
            )));
        }
        touch(&mut tx, target.structure_id, ctx).await?;
        store_content(&mut tx, target.resource_id, content).await?;
        let resource = fetch_by_id(&mut tx, Project::Offline, target.structure_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(resource)
    }

    async fn copy(&self, ctx: &UserContext, source: &str, destination: &str) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let src = require_live(&mut tx, source).await?;
        paths::validate(destination, src.is_folder())?;
        ensure_free(&mut tx, destination).await?;
        ensure_parent(&mut tx, destination).await?;
        if src.is_folder() && destination.starts_with(source) {
            return Err(Error::InvalidInput(format!(
                "cannot copy {} into itself",
                source
            )));
        }

        let mut items = vec![src.clone()];
        if src.is_folder() {
            items.extend(fetch_descendants(&mut tx, Project::Offline, source, false).await?);
        }

        let mut top = None;
        for item in items {
            let Some(new_path) = paths::rebase(&item.root_path, source, destination) else {
                continue;
            };
            let content = fetch_content(&mut tx, Project::Offline, item.resource_id).await?;
            let copy = new_resource(
                ctx,
                new_path,
                item.resource_type,
                new_v7(),
                item.content_hash.clone(),
            );
            insert_new(&mut tx, &copy, Some(&content)).await?;
            top.get_or_insert(copy.structure_id);
        }
        let top = top.ok_or_else(|| Error::Internal("copy produced no resource".to_string()))?;
        let resource = fetch_by_id(&mut tx, Project::Offline, top).await?;
        tx.commit()
            .await
            .map_err(|e| map_path_conflict(e, destination))?;
        Ok(resource)
    }

    async fn move_to(&self, ctx: &UserContext, source: &str, destination: &str) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let src = require_live(&mut tx, source).await?;
        paths::validate(destination, src.is_folder())?;
        ensure_free(&mut tx, destination).await?;
        ensure_parent(&mut tx, destination).await?;
        if src.is_folder() && destination.starts_with(source) {
            return Err(Error::InvalidInput(format!(
                "cannot move {} into itself",
                source
            )));
        }

        let mut items = vec![src.clone()];
        if src.is_folder() {
            items.extend(fetch_descendants(&mut tx, Project::Offline, source, true).await?);
        }

        let now = Utc::now();
        let mut moved = 0usize;
        for item in items {
            let Some(new_path) = paths::rebase(&item.root_path, source, destination) else {
                continue;
            };
            let moved_from = if item.state == ResourceState::New {
                None
            } else if item.moved_from.as_deref() == Some(new_path.as_str()) {
                // moved back to where it is online
                None
            } else {
                item.moved_from.clone().or_else(|| Some(item.root_path.clone()))
            };
            let state = if item.state == ResourceState::Deleted {
                ResourceState::Deleted
            } else {
                item.state.after_modification()
            };

            sqlx::query(
                "UPDATE vfs_resource
                 SET root_path = $2, moved_from = $3, state = $4,
                     date_last_modified = $5, user_last_modified = $6
                 WHERE project = 'offline' AND structure_id = $1",
            )
            .bind(item.structure_id)
            .bind(&new_path)
            .bind(&moved_from)
            .bind(state.as_str())
            .bind(now)
            .bind(ctx.user_id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            sqlx::query(
                "UPDATE vfs_relation SET source_path = $2 WHERE project = 'offline' AND source_id = $1",
            )
            .bind(item.structure_id)
            .bind(&new_path)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            // broken links that already point at the new path would collide
            sqlx::query(
                "DELETE FROM vfs_relation b
                 WHERE b.project = 'offline' AND b.target_id IS NULL AND b.target_path = $2
                   AND EXISTS (SELECT 1 FROM vfs_relation a
                               WHERE a.project = 'offline' AND a.target_id = $1
                                 AND a.source_id = b.source_id
                                 AND a.relation_type = b.relation_type)",
            )
            .bind(item.structure_id)
            .bind(&new_path)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            sqlx::query(
                "UPDATE vfs_relation SET target_path = $2 WHERE project = 'offline' AND target_id = $1",
            )
            .bind(item.structure_id)
            .bind(&new_path)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;

            if state != ResourceState::Deleted {
                resolve_broken(&mut tx, Project::Offline, &new_path, item.structure_id).await?;
            }
            moved += 1;
        }

        let resource = fetch_by_id(&mut tx, Project::Offline, src.structure_id).await?;
        tx.commit()
            .await
            .map_err(|e| map_path_conflict(e, destination))?;

        debug!(
            subsystem = "db",
            component = "resources",
            op = "move",
            source,
            destination,
            moved,
            "Resource moved"
        );
        Ok(resource)
    }

    async fn change_type(
        &self,
        ctx: &UserContext,
        path: &str,
        resource_type: ResourceType,
    ) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let target = require_live(&mut tx, path).await?;
        ensure_same_kind(&target, resource_type)?;
        sqlx::query("UPDATE vfs_resource SET type_id = $2 WHERE project = 'offline' AND structure_id = $1")
            .bind(target.structure_id)
            .bind(resource_type.type_id())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        touch(&mut tx, target.structure_id, ctx).await?;
        refresh_content_relations(&mut tx, Project::Offline, target.structure_id).await?;

        let resource = fetch_by_id(&mut tx, Project::Offline, target.structure_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(resource)
    }

    async fn replace(
        &self,
        ctx: &UserContext,
        path: &str,
        resource_type: ResourceType,
        content: &[u8],
    ) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let target = require_live(&mut tx, path).await?;
        replace_in_tx(&mut tx, ctx, &target, resource_type, content).await?;
        let resource = fetch_by_id(&mut tx, Project::Offline, target.structure_id).await?;
        tx.commit().await.map_err(Error::Database)?;
        Ok(resource)
    }

    async fn import(&self, ctx: &UserContext, req: CreateResourceRequest) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let path = req.root_path.clone();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let id = match fetch_by_path(&mut tx, Project::Offline, &path).await? {
            None => create_in_tx(&mut tx, ctx, req).await?,
            // importing over a deleted entry restores it as changed
            Some(existing) if existing.is_folder() && req.resource_type.is_folder() => {
                if existing.state == ResourceState::Deleted {
                    touch(&mut tx, existing.structure_id, ctx).await?;
                }
                existing.structure_id
            }
            Some(existing) => {
                replace_in_tx(&mut tx, ctx, &existing, req.resource_type, &req.content).await?;
                existing.structure_id
            }
        };

        let resource = fetch_by_id(&mut tx, Project::Offline, id).await?;
        tx.commit().await.map_err(|e| map_path_conflict(e, &path))?;
        Ok(resource)
    }

    async fn delete(&self, ctx: &UserContext, path: &str) -> Result<()> {
        ctx.require_role(Role::Editor)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        let target = fetch_by_path(&mut tx, Project::Offline, path)
            .await?
            .ok_or_else(|| Error::ResourceNotFound(path.to_string()))?;
        if target.state == ResourceState::Deleted {
            return Ok(());
        }

        let mut affected = vec![target.clone()];
        if target.is_folder() {
            affected.extend(fetch_descendants(&mut tx, Project::Offline, path, true).await?);
        }
        // children first
        affected.sort_by(|a, b| b.root_path.cmp(&a.root_path));

        for resource in &affected {
            delete_entry(&mut tx, ctx, resource).await?;
        }
        tx.commit().await.map_err(Error::Database)?;

        debug!(
            subsystem = "db",
            component = "resources",
            op = "delete",
            root_path = path,
            affected = affected.len(),
            "Resource deleted"
        );
        Ok(())
    }

    async fn read(&self, project: Project, path: &str) -> Result<Resource> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        fetch_by_path(&mut conn, project, path)
            .await?
            .ok_or_else(|| Error::ResourceNotFound(path.to_string()))
    }

    async fn read_by_id(&self, project: Project, structure_id: Uuid) -> Result<Resource> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        fetch_by_id(&mut conn, project, structure_id).await
    }

    async fn read_content(&self, project: Project, structure_id: Uuid) -> Result<Vec<u8>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        let resource = fetch_by_id(&mut conn, project, structure_id).await?;
        fetch_content(&mut conn, project, resource.resource_id).await
    }

    async fn read_children(
        &self,
        project: Project,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<Resource>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        if folder != paths::ROOT {
            let parent = fetch_by_path(&mut conn, project, folder)
                .await?
                .ok_or_else(|| Error::ResourceNotFound(folder.to_string()))?;
            if !parent.is_folder() {
                return Err(Error::InvalidInput(format!("not a folder: {}", folder)));
            }
        }
        let children = fetch_descendants(&mut conn, project, folder, true).await?;
        Ok(children
            .into_iter()
            .filter(|r| paths::is_in_folder(&r.root_path, folder, recursive))
            .collect())
    }

    async fn read_siblings(&self, project: Project, structure_id: Uuid) -> Result<Vec<Resource>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        let resource = fetch_by_id(&mut conn, project, structure_id).await?;

        let rows = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS} FROM vfs_resource r
             WHERE r.project = $1 AND r.resource_id = $2
             ORDER BY r.root_path"
        ))
        .bind(project.as_str())
        .bind(resource.resource_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::Database)?;

        rows.iter().map(parse_resource_row).collect()
    }

    async fn list_changed(&self) -> Result<Vec<Resource>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        list_changed(&mut conn).await
    }
}

/// Every Offline resource whose state is not unchanged, ordered by path.
pub(crate) async fn list_changed(conn: &mut PgConnection) -> Result<Vec<Resource>> {
    let rows = sqlx::query(&format!(
        "SELECT {RESOURCE_COLUMNS} FROM vfs_resource r
         WHERE r.project = 'offline' AND r.state <> 'unchanged'
         ORDER BY r.root_path"
    ))
    .fetch_all(&mut *conn)
    .await
    .map_err(Error::Database)?;

    rows.iter().map(parse_resource_row).collect()
}
