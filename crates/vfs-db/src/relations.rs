//! Relation repository implementation and relation maintenance helpers.

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Pool, Postgres, Row};
use uuid::Uuid;

use vfs_core::{
    Error, Project, Relation, RelationDirection, RelationFilter, RelationRepository, RelationType,
    ResourceState, Result, Role, UserContext,
};

use crate::content::content_relations;
use crate::resources::{fetch_by_id, fetch_content, require_live, touch};

const RELATION_COLUMNS: &str = "source_id, source_path, target_id, target_path, relation_type";

fn parse_relation_row(row: &PgRow) -> Result<Relation> {
    let relation_type: String = row.get("relation_type");
    Ok(Relation {
        source_id: row.get("source_id"),
        source_path: row.get("source_path"),
        target_id: row.get("target_id"),
        target_path: row.get("target_path"),
        relation_type: relation_type.parse()?,
    })
}

/// Order relations by source path, target path, then type.
pub(crate) fn sort_relations(relations: &mut [Relation]) {
    relations.sort_by(|a, b| {
        a.source_path
            .cmp(&b.source_path)
            .then(a.target_path.cmp(&b.target_path))
            .then(a.relation_type.cmp(&b.relation_type))
    });
}

// =============================================================================
// TRANSACTION HELPERS
// =============================================================================

/// Rebuild the content relations of one resource.
pub(crate) async fn refresh_content_relations(
    conn: &mut PgConnection,
    project: Project,
    structure_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "DELETE FROM vfs_relation
         WHERE project = $1 AND source_id = $2 AND relation_type <> 'CATEGORY'",
    )
    .bind(project.as_str())
    .bind(structure_id)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;

    let resource = fetch_by_id(conn, project, structure_id).await?;
    if resource.state == ResourceState::Deleted || !resource.resource_type.is_link_parseable() {
        return Ok(());
    }
    let content = fetch_content(conn, project, resource.resource_id).await?;

    // targets are resolved in SQL against the same transaction
    for rel in content_relations(&resource, &content, |_| None) {
        sqlx::query(
            "INSERT INTO vfs_relation
                (project, source_id, source_path, target_id, target_path, relation_type)
             VALUES ($1, $2, $3,
                     (SELECT structure_id FROM vfs_resource
                      WHERE project = $1 AND root_path = $4 AND state <> 'deleted'
                      LIMIT 1),
                     $4, $5)
             ON CONFLICT (project, source_id, target_path, relation_type) DO NOTHING",
        )
        .bind(project.as_str())
        .bind(rel.source_id)
        .bind(&rel.source_path)
        .bind(&rel.target_path)
        .bind(rel.relation_type.as_str())
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
    }
    Ok(())
}

/// Point broken relations aimed at `path` to the resource now living there.
pub(crate) async fn resolve_broken(
    conn: &mut PgConnection,
    project: Project,
    path: &str,
    structure_id: Uuid,
) -> Result<()> {
    sqlx::query(
        "UPDATE vfs_relation SET target_id = $3
         WHERE project = $1 AND target_id IS NULL AND target_path = $2",
    )
    .bind(project.as_str())
    .bind(path)
    .bind(structure_id)
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

pub(crate) async fn detach_target(
    conn: &mut PgConnection,
    project: Project,
    structure_id: Uuid,
) -> Result<()> {
    sqlx::query("UPDATE vfs_relation SET target_id = NULL WHERE project = $1 AND target_id = $2")
        .bind(project.as_str())
        .bind(structure_id)
        .execute(&mut *conn)
        .await
        .map_err(Error::Database)?;
    Ok(())
}

/// Resolve every relation target against the resources of a project.
pub(crate) async fn resolve_all_targets(conn: &mut PgConnection, project: Project) -> Result<()> {
    sqlx::query(
        "UPDATE vfs_relation rel
         SET target_id = (SELECT r.structure_id FROM vfs_resource r
                          WHERE r.project = rel.project AND r.root_path = rel.target_path
                            AND r.state <> 'deleted'
                          LIMIT 1)
         WHERE rel.project = $1",
    )
    .bind(project.as_str())
    .execute(&mut *conn)
    .await
    .map_err(Error::Database)?;
    Ok(())
}

// =============================================================================
// REPOSITORY
// =============================================================================

/// PostgreSQL implementation of RelationRepository.
#[derive(Clone)]
pub struct PgRelationRepository {
    pool: Pool<Postgres>,
}

impl PgRelationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RelationRepository for PgRelationRepository {
    async fn read_relations(
        &self,
        project: Project,
        structure_id: Uuid,
        filter: &RelationFilter,
    ) -> Result<Vec<Relation>> {
        let mut conn = self.pool.acquire().await.map_err(Error::Database)?;
        fetch_by_id(&mut conn, project, structure_id).await?;

        let column = match filter.direction {
            RelationDirection::Targets => "source_id",
            RelationDirection::Sources => "target_id",
        };
        let rows = sqlx::query(&format!(
            "SELECT {RELATION_COLUMNS} FROM vfs_relation WHERE project = $1 AND {column} = $2"
        ))
        .bind(project.as_str())
        .bind(structure_id)
        .fetch_all(&mut *conn)
        .await
        .map_err(Error::Database)?;

        let mut relations = rows
            .iter()
            .map(parse_relation_row)
            .collect::<Result<Vec<_>>>()?;
        relations.retain(|r| filter.matches(r));
        sort_relations(&mut relations);
        Ok(relations)
    }

    async fn add_relation(
        &self,
        ctx: &UserContext,
        source: &str,
        target: &str,
        relation_type: RelationType,
    ) -> Result<()> {
        ctx.require_role(Role::Editor)?;
        if relation_type.is_defined_in_content() {
            return Err(Error::InvalidInput(format!(
                "{} relations are defined by content",
                relation_type.as_str()
            )));
        }
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let src = require_live(&mut tx, source).await?;
        let dst = require_live(&mut tx, target).await?;

        let result = sqlx::query(
            "INSERT INTO vfs_relation
                (project, source_id, source_path, target_id, target_path, relation_type)
             VALUES ('offline', $1, $2, $3, $4, $5)
             ON CONFLICT (project, source_id, target_path, relation_type) DO NOTHING",
        )
        .bind(src.structure_id)
        .bind(&src.root_path)
        .bind(dst.structure_id)
        .bind(&dst.root_path)
        .bind(relation_type.as_str())
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        if result.rows_affected() > 0 {
            touch(&mut tx, src.structure_id, ctx).await?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn delete_relations(
        &self,
        ctx: &UserContext,
        source: &str,
        filter: &RelationFilter,
    ) -> Result<u64> {
        ctx.require_role(Role::Editor)?;
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let src = require_live(&mut tx, source).await?;

        let rows = sqlx::query(&format!(
            "SELECT {RELATION_COLUMNS} FROM vfs_relation
             WHERE project = 'offline' AND source_id = $1 AND relation_type = 'CATEGORY'"
        ))
        .bind(src.structure_id)
        .fetch_all(&mut *tx)
        .await
        .map_err(Error::Database)?;

        let mut removed = 0u64;
        for rel in rows.iter().map(parse_relation_row) {
            let rel = rel?;
            if !filter.matches(&rel) {
                continue;
            }
            let result = sqlx::query(
                "DELETE FROM vfs_relation
                 WHERE project = 'offline' AND source_id = $1 AND target_path = $2
                   AND relation_type = $3",
            )
            .bind(rel.source_id)
            .bind(&rel.target_path)
            .bind(rel.relation_type.as_str())
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
            removed += result.rows_affected();
        }

        if removed > 0 {
            touch(&mut tx, src.structure_id, ctx).await?;
        }
        tx.commit().await.map_err(Error::Database)?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rel(source: &str, target: &str, relation_type: RelationType) -> Relation {
        Relation {
            source_id: Uuid::nil(),
            source_path: source.to_string(),
            target_id: None,
            target_path: target.to_string(),
            relation_type,
        }
    }

    #[test]
    fn test_sort_relations() {
        let mut relations = vec![
            rel("/b.html", "/x.png", RelationType::EmbeddedImage),
            rel("/a.html", "/y.html", RelationType::Hyperlink),
            rel("/a.html", "/y.html", RelationType::EmbeddedImage),
            rel("/a.html", "/x.png", RelationType::Hyperlink),
        ];
        sort_relations(&mut relations);
        let order: Vec<(&str, &str, RelationType)> = relations
            .iter()
            .map(|r| (r.source_path.as_str(), r.target_path.as_str(), r.relation_type))
            .collect();
        assert_eq!(
            order,
            vec![
                ("/a.html", "/x.png", RelationType::Hyperlink),
                ("/a.html", "/y.html", RelationType::EmbeddedImage),
                ("/a.html", "/y.html", RelationType::Hyperlink),
                ("/b.html", "/x.png", RelationType::EmbeddedImage),
            ]
        );
    }
}
