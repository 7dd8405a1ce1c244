//! Core traits for the VFS storage abstractions.
//!
//! These traits define the interfaces that storage backends (PostgreSQL,
//! in-memory) must satisfy. Write operations act on the Offline project.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::Result;
use crate::models::*;

// =============================================================================
// RESOURCE REPOSITORY
// =============================================================================

/// Request for creating or importing a resource.
#[derive(Debug, Clone)]
pub struct CreateResourceRequest {
    pub root_path: String,
    pub resource_type: ResourceType,
    pub content: Vec<u8>,
}

impl CreateResourceRequest {
    pub fn new(root_path: impl Into<String>, resource_type: ResourceType, content: impl Into<Vec<u8>>) -> Self {
        Self {
            root_path: root_path.into(),
            resource_type,
            content: content.into(),
        }
    }

    /// Request for an empty folder.
    pub fn folder(root_path: impl Into<String>) -> Self {
        Self::new(root_path, ResourceType::Folder, Vec::new())
    }
}

/// Repository for resource operations.
#[async_trait]
pub trait ResourceRepository: Send + Sync {
    /// Create a new resource (state NEW) and compute its content relations.
    async fn create(&self, ctx: &UserContext, req: CreateResourceRequest) -> Result<Resource>;

    /// Create a sibling of `source` at `destination`, sharing its content.
    async fn create_sibling(
        &self,
        ctx: &UserContext,
        source: &str,
        destination: &str,
    ) -> Result<Resource>;

    /// Replace the content shared by a resource and its siblings.
    async fn write_content(&self, ctx: &UserContext, path: &str, content: &[u8]) -> Result<Resource>;

    /// Copy a resource as a new resource with its own content.
    async fn copy(&self, ctx: &UserContext, source: &str, destination: &str) -> Result<Resource>;

    /// Move a resource (and a folder's descendants) to a new path.
    async fn move_to(&self, ctx: &UserContext, source: &str, destination: &str) -> Result<Resource>;

    /// Change the resource type, recomputing content relations.
    async fn change_type(
        &self,
        ctx: &UserContext,
        path: &str,
        resource_type: ResourceType,
    ) -> Result<Resource>;

    /// Replace type and content together.
    async fn replace(
        &self,
        ctx: &UserContext,
        path: &str,
        resource_type: ResourceType,
        content: &[u8],
    ) -> Result<Resource>;

    /// Create the resource, or replace it when the path already exists.
    async fn import(&self, ctx: &UserContext, req: CreateResourceRequest) -> Result<Resource>;

    /// Delete a resource. Never-published resources disappear completely.
    async fn delete(&self, ctx: &UserContext, path: &str) -> Result<()>;

    /// Read a resource by root path.
    async fn read(&self, project: Project, path: &str) -> Result<Resource>;

    /// Read a resource by structure id.
    async fn read_by_id(&self, project: Project, structure_id: Uuid) -> Result<Resource>;

    /// Read the content of a resource.
    async fn read_content(&self, project: Project, structure_id: Uuid) -> Result<Vec<u8>>;

    /// List the children of a folder.
    async fn read_children(
        &self,
        project: Project,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<Resource>>;

    /// List every resource sharing content with the given one (itself included).
    async fn read_siblings(&self, project: Project, structure_id: Uuid) -> Result<Vec<Resource>>;

    /// List every Offline resource whose state is not unchanged.
    async fn list_changed(&self) -> Result<Vec<Resource>>;
}

// =============================================================================
// PUBLISH REPOSITORY
// =============================================================================

/// Repository for publishing and publish history.
#[async_trait]
pub trait PublishRepository: Send + Sync {
    /// Publish the scope atomically and purge history beyond `history_size`.
    async fn publish(
        &self,
        ctx: &UserContext,
        scope: &PublishScope,
        history_size: usize,
    ) -> Result<PublishReport>;

    /// Snapshots recorded by a publish; empty for unknown or purged ids.
    async fn read_published_resources(&self, history_id: Uuid) -> Result<Vec<PublishedResource>>;

    /// History entries, newest first.
    async fn list_history(&self, limit: i64) -> Result<Vec<PublishHistoryEntry>>;
}

// =============================================================================
// URL NAME REPOSITORY
// =============================================================================

/// Repository for URL name mappings.
#[async_trait]
pub trait UrlNameRepository: Send + Sync {
    /// Map a (sanitised, uniquified) name to a structure id; returns the final name.
    async fn write_url_name(
        &self,
        ctx: &UserContext,
        raw_name: &str,
        structure_id: Uuid,
        locale: &str,
    ) -> Result<String>;

    /// Resolve a name. Online only sees published mappings.
    async fn read_id_for_url_name(&self, project: Project, name: &str) -> Result<Option<Uuid>>;

    /// Every name of a structure id, newest first.
    async fn read_url_names_for_id(&self, project: Project, structure_id: Uuid)
        -> Result<Vec<String>>;

    /// The newest name of a structure id for a locale.
    async fn read_newest_url_name(
        &self,
        project: Project,
        structure_id: Uuid,
        locale: &str,
    ) -> Result<Option<String>>;
}

// =============================================================================
// RELATION REPOSITORY
// =============================================================================

/// Repository for relations between resources.
#[async_trait]
pub trait RelationRepository: Send + Sync {
    /// Relations of a resource in the given direction.
    async fn read_relations(
        &self,
        project: Project,
        structure_id: Uuid,
        filter: &RelationFilter,
    ) -> Result<Vec<Relation>>;

    /// Add a user-defined relation between two Offline resources.
    async fn add_relation(
        &self,
        ctx: &UserContext,
        source: &str,
        target: &str,
        relation_type: RelationType,
    ) -> Result<()>;

    /// Delete user-defined relations of a source; returns the number removed.
    async fn delete_relations(
        &self,
        ctx: &UserContext,
        source: &str,
        filter: &RelationFilter,
    ) -> Result<u64>;
}

// =============================================================================
// SUBSCRIPTION REPOSITORY
// =============================================================================

/// Repository for subscriptions and visit tracking.
#[async_trait]
pub trait SubscriptionRepository: Send + Sync {
    async fn subscribe(&self, principal: Principal, structure_id: Uuid) -> Result<()>;

    async fn unsubscribe(&self, principal: Principal, structure_id: Uuid) -> Result<()>;

    /// Remove every subscription of a principal.
    async fn unsubscribe_all(&self, principal: Principal) -> Result<u64>;

    /// Remove every subscription to a resource.
    async fn unsubscribe_resource(&self, structure_id: Uuid) -> Result<u64>;

    /// Record a visit; only a later timestamp replaces an earlier one.
    async fn mark_visited(&self, user_id: Uuid, structure_id: Uuid, at: DateTime<Utc>)
        -> Result<()>;

    async fn read_date_last_visited(
        &self,
        user_id: Uuid,
        structure_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Subscribed Online resources matching the filter, ordered by path.
    async fn read_subscribed_resources(&self, filter: &SubscriptionFilter)
        -> Result<Vec<Resource>>;

    /// Visited Online resources matching the filter, ordered by path.
    async fn read_visited_resources(&self, filter: &VisitedFilter) -> Result<Vec<Resource>>;

    /// Principals subscribed to a resource.
    async fn read_subscribers(&self, structure_id: Uuid) -> Result<Vec<Principal>>;
}

// =============================================================================
// PUBLISH JOB REPOSITORY
// =============================================================================

/// Repository for the asynchronous publish queue.
#[async_trait]
pub trait PublishJobRepository: Send + Sync {
    /// Queue a publish job.
    async fn queue(&self, ctx: &UserContext, scope: PublishScope) -> Result<Uuid>;

    /// Claim the oldest pending job, marking it running.
    async fn claim_next(&self) -> Result<Option<PublishJob>>;

    async fn complete(&self, job_id: Uuid, history_id: Uuid) -> Result<()>;

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()>;

    async fn get(&self, job_id: Uuid) -> Result<Option<PublishJob>>;

    async fn pending_count(&self) -> Result<i64>;

    async fn running_count(&self) -> Result<i64>;

    /// Jobs newest first.
    async fn list_recent(&self, limit: i64) -> Result<Vec<PublishJob>>;

    /// Delete finished jobs beyond the newest `keep_count`; returns the number removed.
    async fn cleanup(&self, keep_count: i64) -> Result<i64>;
}
