//! Subscription and visit tracking repository implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use vfs_core::{
    Error, Principal, Resource, Result, SubscriptionFilter, SubscriptionRepository, VisitedFilter,
};

use crate::resources::{parse_resource_row, RESOURCE_COLUMNS};

/// PostgreSQL implementation of SubscriptionRepository.
#[derive(Clone)]
pub struct PgSubscriptionRepository {
    pool: Pool<Postgres>,
}

impl PgSubscriptionRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SubscriptionRepository for PgSubscriptionRepository {
    async fn subscribe(&self, principal: Principal, structure_id: Uuid) -> Result<()> {
        let known: bool = sqlx::query_scalar(
            "SELECT EXISTS(
                SELECT 1 FROM vfs_resource
                WHERE structure_id = $1
                  AND (project = 'online' OR state <> 'deleted')
            )",
        )
        .bind(structure_id)
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        if !known {
            return Err(Error::ResourceNotFound(structure_id.to_string()));
        }

        sqlx::query(
            "INSERT INTO vfs_subscription (principal_kind, principal_id, structure_id, deleted)
             VALUES ($1, $2, $3, false)
             ON CONFLICT (principal_kind, principal_id, structure_id)
             DO UPDATE SET deleted = false",
        )
        .bind(principal.kind())
        .bind(principal.id())
        .bind(structure_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn unsubscribe(&self, principal: Principal, structure_id: Uuid) -> Result<()> {
        sqlx::query(
            "DELETE FROM vfs_subscription
             WHERE principal_kind = $1 AND principal_id = $2 AND structure_id = $3",
        )
        .bind(principal.kind())
        .bind(principal.id())
        .bind(structure_id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn unsubscribe_all(&self, principal: Principal) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM vfs_subscription WHERE principal_kind = $1 AND principal_id = $2",
        )
        .bind(principal.kind())
        .bind(principal.id())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn unsubscribe_resource(&self, structure_id: Uuid) -> Result<u64> {
        let result = sqlx::query("DELETE FROM vfs_subscription WHERE structure_id = $1")
            .bind(structure_id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn mark_visited(
        &self,
        user_id: Uuid,
        structure_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO vfs_visit (user_id, structure_id, visited_at) VALUES ($1, $2, $3)
             ON CONFLICT (user_id, structure_id)
             DO UPDATE SET visited_at = GREATEST(vfs_visit.visited_at, EXCLUDED.visited_at)",
        )
        .bind(user_id)
        .bind(structure_id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn read_date_last_visited(
        &self,
        user_id: Uuid,
        structure_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT visited_at FROM vfs_visit WHERE user_id = $1 AND structure_id = $2",
        )
        .bind(user_id)
        .bind(structure_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(at)
    }

    async fn read_subscribed_resources(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Resource>> {
        if filter.user.is_none() && filter.groups.is_empty() {
            return Ok(Vec::new());
        }
        let users: Vec<Uuid> = filter.user.into_iter().collect();

        let rows = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS}, v.visited_at
             FROM vfs_resource r
             JOIN (
                 SELECT DISTINCT structure_id FROM vfs_subscription
                 WHERE NOT deleted
                   AND ((principal_kind = 'user' AND principal_id = ANY($1))
                     OR (principal_kind = 'group' AND principal_id = ANY($2)))
             ) sub ON sub.structure_id = r.structure_id
             LEFT JOIN vfs_visit v ON v.structure_id = r.structure_id AND v.user_id = $3
             WHERE r.project = 'online'
             ORDER BY r.root_path"
        ))
        .bind(&users)
        .bind(&filter.groups)
        .bind(filter.user)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut resources = Vec::with_capacity(rows.len());
        for row in &rows {
            let resource = parse_resource_row(row)?;
            let last_visit: Option<DateTime<Utc>> = row.get("visited_at");
            if filter.accepts(&resource, last_visit) {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    async fn read_visited_resources(&self, filter: &VisitedFilter) -> Result<Vec<Resource>> {
        let rows = sqlx::query(&format!(
            "SELECT {RESOURCE_COLUMNS}, v.visited_at
             FROM vfs_resource r
             JOIN vfs_visit v ON v.structure_id = r.structure_id
             WHERE r.project = 'online' AND v.user_id = $1
             ORDER BY r.root_path"
        ))
        .bind(filter.user)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        let mut resources = Vec::with_capacity(rows.len());
        for row in &rows {
            let resource = parse_resource_row(row)?;
            let visited_at: DateTime<Utc> = row.get("visited_at");
            if filter.accepts(&resource, visited_at) {
                resources.push(resource);
            }
        }
        Ok(resources)
    }

    async fn read_subscribers(&self, structure_id: Uuid) -> Result<Vec<Principal>> {
        let rows = sqlx::query(
            "SELECT principal_kind, principal_id FROM vfs_subscription
             WHERE structure_id = $1 AND NOT deleted
             ORDER BY principal_kind, principal_id",
        )
        .bind(structure_id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        rows.iter()
            .map(|row| {
                let kind: String = row.get("principal_kind");
                Principal::from_parts(&kind, row.get("principal_id"))
            })
            .collect()
    }
}
