//! In-memory storage backend.
//!
//! [`MemoryStore`] implements every repository trait over plain collections
//! behind one async mutex, so each operation is atomic. It backs the
//! behavioural tests and embedded use without PostgreSQL.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use vfs_core::publish::entries_to_purge;
use vfs_core::url_names::{candidate, MAX_CANDIDATES};
use vfs_core::{
    check_parents, new_v7, outside_parents, paths, plan_publish, sanitize_url_name,
    select_publish_set, CreateResourceRequest, Error, JobStatus, Principal, Project,
    PublishHistoryEntry, PublishJob, PublishJobRepository, PublishPlan, PublishReport,
    PublishRepository, PublishScope, PublishedResource, Relation, RelationDirection,
    RelationFilter, RelationRepository, RelationType, Resource,
    ResourceRepository, ResourceState, ResourceType, Result, Role, SubscriptionFilter,
    SubscriptionRepository, UrlNameMapping, UrlNameRepository, UrlNameState, UserContext,
    VisitedFilter,
};

use crate::content::{compute_content_hash, content_relations};
use crate::relations::sort_relations;

/// In-memory implementation of all VFS repositories.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[derive(Default)]
struct State {
    offline: ProjectData,
    online: ProjectData,
    /// Ascending by publish tag.
    history: Vec<HistoryRecord>,
    last_publish_tag: i64,
    /// Insertion order; later entries are newer.
    url_names: Vec<UrlNameMapping>,
    /// Subscription -> deleted flag.
    subscriptions: HashMap<(Principal, Uuid), bool>,
    visits: HashMap<(Uuid, Uuid), DateTime<Utc>>,
    /// Insertion order.
    jobs: Vec<PublishJob>,
}

struct HistoryRecord {
    entry: PublishHistoryEntry,
    resources: Vec<PublishedResource>,
}

/// Resources, contents and relations of one project.
#[derive(Default)]
struct ProjectData {
    resources: HashMap<Uuid, Resource>,
    /// Keyed by resource id, shared by siblings.
    contents: HashMap<Uuid, Vec<u8>>,
    relations: Vec<Relation>,
}

impl ProjectData {
    fn by_path(&self, path: &str) -> Option<&Resource> {
        self.resources.values().find(|r| r.root_path == path)
    }

    fn live_id(&self, path: &str) -> Option<Uuid> {
        self.by_path(path)
            .filter(|r| r.state != ResourceState::Deleted)
            .map(|r| r.structure_id)
    }

    fn sibling_count(&self, resource_id: Uuid) -> i32 {
        self.resources
            .values()
            .filter(|r| r.resource_id == resource_id)
            .count() as i32
    }

    /// A copy of the resource with its current sibling count.
    fn view(&self, resource: &Resource) -> Resource {
        Resource {
            sibling_count: self.sibling_count(resource.resource_id),
            ..resource.clone()
        }
    }

    fn view_sorted<'a>(&self, resources: impl Iterator<Item = &'a Resource>) -> Vec<Resource> {
        let mut out: Vec<Resource> = resources.map(|r| self.view(r)).collect();
        out.sort_by(|a, b| a.root_path.cmp(&b.root_path));
        out
    }

    fn get(&self, structure_id: Uuid) -> Result<Resource> {
        self.resources
            .get(&structure_id)
            .map(|r| self.view(r))
            .ok_or_else(|| Error::ResourceNotFound(structure_id.to_string()))
    }

    fn read(&self, path: &str) -> Result<Resource> {
        self.by_path(path)
            .map(|r| self.view(r))
            .ok_or_else(|| Error::ResourceNotFound(path.to_string()))
    }

    /// The resource at `path`, failing for missing or deleted entries.
    fn require_live(&self, path: &str) -> Result<Resource> {
        match self.by_path(path) {
            Some(r) if r.state != ResourceState::Deleted => Ok(self.view(r)),
            _ => Err(Error::ResourceNotFound(path.to_string())),
        }
    }

    fn ensure_free(&self, path: &str) -> Result<()> {
        match self.by_path(path) {
            Some(_) => Err(Error::AlreadyExists(path.to_string())),
            None => Ok(()),
        }
    }

    fn ensure_parent(&self, path: &str) -> Result<()> {
        let parent = paths::parent(path);
        if parent == paths::ROOT {
            return Ok(());
        }
        match self.by_path(parent) {
            Some(r) if r.is_folder() && r.state != ResourceState::Deleted => Ok(()),
            _ => Err(Error::ResourceNotFound(parent.to_string())),
        }
    }

    fn siblings_of(&self, resource_id: Uuid) -> Vec<Uuid> {
        self.resources
            .values()
            .filter(|r| r.resource_id == resource_id)
            .map(|r| r.structure_id)
            .collect()
    }

    /// Rebuild the content relations of one resource.
    fn refresh_content_relations(&mut self, structure_id: Uuid) {
        self.relations
            .retain(|r| r.source_id != structure_id || !r.relation_type.is_defined_in_content());
        let Some(resource) = self.resources.get(&structure_id) else {
            return;
        };
        if resource.state == ResourceState::Deleted {
            return;
        }
        let content = self
            .contents
            .get(&resource.resource_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let fresh = content_relations(resource, content, |path| self.live_id(path));
        self.relations.extend(fresh);
    }

    /// Point broken relations aimed at `path` to the resource now living there.
    fn resolve_broken(&mut self, path: &str, structure_id: Uuid) {
        for rel in self
            .relations
            .iter_mut()
            .filter(|r| r.target_id.is_none() && r.target_path == path)
        {
            rel.target_id = Some(structure_id);
        }
    }

    fn detach_target(&mut self, structure_id: Uuid) {
        for rel in self
            .relations
            .iter_mut()
            .filter(|r| r.target_id == Some(structure_id))
        {
            rel.target_id = None;
        }
    }

    /// Resolve every relation target against the resources of this project.
    fn resolve_all_targets(&mut self) {
        let by_path: HashMap<String, Uuid> = self
            .resources
            .values()
            .filter(|r| r.state != ResourceState::Deleted)
            .map(|r| (r.root_path.clone(), r.structure_id))
            .collect();
        for rel in &mut self.relations {
            rel.target_id = by_path.get(&rel.target_path).copied();
        }
    }

    /// Drop a resource with its outgoing relations and now unused content.
    fn remove(&mut self, structure_id: Uuid) {
        if let Some(removed) = self.resources.remove(&structure_id) {
            if self.sibling_count(removed.resource_id) == 0 {
                self.contents.remove(&removed.resource_id);
            }
        }
        self.relations.retain(|r| r.source_id != structure_id);
        self.detach_target(structure_id);
    }

    fn insert_new(&mut self, resource: Resource, content: Option<Vec<u8>>) -> Uuid {
        let id = resource.structure_id;
        let path = resource.root_path.clone();
        if let Some(content) = content {
            self.contents.insert(resource.resource_id, content);
        }
        self.resources.insert(id, resource);
        self.refresh_content_relations(id);
        self.resolve_broken(&path, id);
        id
    }

    /// Store shared content and refresh every sibling's hash and relations.
    fn store_content(&mut self, resource_id: Uuid, content: &[u8]) {
        let hash = compute_content_hash(content);
        self.contents.insert(resource_id, content.to_vec());
        let siblings = self.siblings_of(resource_id);
        for id in &siblings {
            if let Some(r) = self.resources.get_mut(id) {
                r.content_hash = hash.clone();
            }
        }
        for id in siblings {
            self.refresh_content_relations(id);
        }
    }

    fn touch(&mut self, structure_id: Uuid, ctx: &UserContext) {
        if let Some(r) = self.resources.get_mut(&structure_id) {
            r.state = r.state.after_modification();
            r.date_last_modified = Utc::now();
            r.user_last_modified = ctx.user_id;
        }
    }
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

impl State {
    fn project(&self, project: Project) -> &ProjectData {
        match project {
            Project::Offline => &self.offline,
            Project::Online => &self.online,
        }
    }

    fn create(&mut self, ctx: &UserContext, req: CreateResourceRequest) -> Result<Resource> {
        paths::validate(&req.root_path, req.resource_type.is_folder())?;
        self.offline.ensure_free(&req.root_path)?;
        self.offline.ensure_parent(&req.root_path)?;

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
        let id = self.offline.insert_new(resource, Some(content));
        self.offline.get(id)
    }

    fn replace(
        &mut self,
        ctx: &UserContext,
        existing: &Resource,
        resource_type: ResourceType,
        content: &[u8],
    ) -> Result<Resource> {
        if existing.is_folder() || resource_type.is_folder() {
            return Err(Error::InvalidInput(format!(
                "folders have no content: {}",
                existing.root_path
            )));
        }
        if let Some(r) = self.offline.resources.get_mut(&existing.structure_id) {
            r.resource_type = resource_type;
        }
        self.offline.touch(existing.structure_id, ctx);
        self.offline.store_content(existing.resource_id, content);
        self.offline.get(existing.structure_id)
    }

    fn delete_entry(&mut self, ctx: &UserContext, resource: &Resource) {
        let id = resource.structure_id;
        match resource.state {
            ResourceState::Deleted => {}
            ResourceState::New => {
                self.offline.remove(id);
                self.url_names.retain(|m| m.structure_id != id);
                self.subscriptions.retain(|(_, sid), _| *sid != id);
                self.visits.retain(|(_, sid), _| *sid != id);
            }
            _ => {
                if let Some(r) = self.offline.resources.get_mut(&id) {
                    r.state = ResourceState::Deleted;
                    r.date_last_modified = Utc::now();
                    r.user_last_modified = ctx.user_id;
                }
                self.offline
                    .relations
                    .retain(|r| r.source_id != id || !r.relation_type.is_defined_in_content());
            }
        }
    }

    /// Reject plans that would leave two Online resources on one path.
    fn check_online_paths(&self, plan: &PublishPlan) -> Result<()> {
        let removed: HashSet<Uuid> = plan.deleted_ids().collect();
        let mut final_paths: HashMap<&str, Uuid> = self
            .online
            .resources
            .values()
            .filter(|r| !removed.contains(&r.structure_id))
            .map(|r| (r.root_path.as_str(), r.structure_id))
            .collect();
        let upserted: HashSet<Uuid> = plan.published_ids().collect();
        final_paths.retain(|_, id| !upserted.contains(&*id));

        for res in &plan.upserts {
            if let Some(other) = final_paths.insert(res.root_path.as_str(), res.structure_id) {
                if other != res.structure_id {
                    return Err(Error::Publish(format!(
                        "{} is still occupied online by an unpublished resource",
                        res.root_path
                    )));
                }
            }
        }
        Ok(())
    }

    fn apply_publish(&mut self, plan: &PublishPlan) {
        for res in &plan.removals {
            let id = res.structure_id;
            self.online.remove(id);
            self.offline.remove(id);
            self.url_names.retain(|m| m.structure_id != id);
            for (_, deleted) in self
                .subscriptions
                .iter_mut()
                .filter(|((_, sid), _)| *sid == id)
            {
                *deleted = true;
            }
        }

        for res in &plan.upserts {
            let id = res.structure_id;
            self.online.resources.insert(id, res.clone());
            if let Some(content) = self.offline.contents.get(&res.resource_id) {
                self.online.contents.insert(res.resource_id, content.clone());
            }
            self.online.relations.retain(|r| r.source_id != id);
            let relations: Vec<Relation> = self
                .offline
                .relations
                .iter()
                .filter(|r| r.source_id == id)
                .cloned()
                .collect();
            self.online.relations.extend(relations);

            if let Some(offline) = self.offline.resources.get_mut(&id) {
                offline.state = ResourceState::Unchanged;
                offline.moved_from = None;
            }
            for mapping in self.url_names.iter_mut().filter(|m| m.structure_id == id) {
                mapping.state = UrlNameState::Published;
            }
        }

        self.online.resolve_all_targets();
    }

    fn url_name_visible(mapping: &UrlNameMapping, project: Project) -> bool {
        project == Project::Offline || mapping.state == UrlNameState::Published
    }

    /// Mappings of a structure id, newest first.
    fn url_names_for(&self, project: Project, structure_id: Uuid) -> Vec<&UrlNameMapping> {
        let mut mappings: Vec<&UrlNameMapping> = self
            .url_names
            .iter()
            .rev()
            .filter(|m| m.structure_id == structure_id && Self::url_name_visible(m, project))
            .collect();
        mappings.sort_by(|a, b| b.date_changed.cmp(&a.date_changed));
        mappings
    }
}

// =============================================================================
// RESOURCES
// =============================================================================

#[async_trait]
impl ResourceRepository for MemoryStore {
    async fn create(&self, ctx: &UserContext, req: CreateResourceRequest) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut state = self.state.lock().await;
        let resource = state.create(ctx, req)?;
        debug!(
            subsystem = "db",
            component = "memory",
            op = "create",
            root_path = %resource.root_path,
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
        let mut state = self.state.lock().await;
        let offline = &mut state.offline;

        let src = offline.require_live(source)?;
        if src.is_folder() {
            return Err(Error::InvalidInput(format!(
                "folders cannot have siblings: {}",
                source
            )));
        }
        paths::validate(destination, false)?;
        offline.ensure_free(destination)?;
        offline.ensure_parent(destination)?;

        let sibling = new_resource(
            ctx,
            destination.to_string(),
            src.resource_type,
            src.resource_id,
            src.content_hash.clone(),
        );
        let id = offline.insert_new(sibling, None);
        offline.get(id)
    }

    async fn write_content(&self, ctx: &UserContext, path: &str, content: &[u8]) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut state = self.state.lock().await;
        let offline = &mut state.offline;

        let target = offline.require_live(path)?;
        if target.is_folder() {
            return Err(Error::InvalidInput(format!(
                "folders have no content: {}",
                path
            )));
        }
        offline.touch(target.structure_id, ctx);
        offline.store_content(target.resource_id, content);
        offline.get(target.structure_id)
    }

    async fn copy(&self, ctx: &UserContext, source: &str, destination: &str) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut state = self.state.lock().await;
        let offline = &mut state.offline;

        let src = offline.require_live(source)?;
        paths::validate(destination, src.is_folder())?;
        offline.ensure_free(destination)?;
        offline.ensure_parent(destination)?;
        if src.is_folder() && destination.starts_with(source) {
            return Err(Error::InvalidInput(format!(
                "cannot copy {} into itself",
                source
            )));
        }

        let mut items = vec![src.clone()];
        if src.is_folder() {
            items.extend(offline.view_sorted(offline.resources.values().filter(|r| {
                r.state != ResourceState::Deleted && paths::is_in_folder(&r.root_path, source, true)
            })));
        }

        let mut top = None;
        for item in items {
            let Some(new_path) = paths::rebase(&item.root_path, source, destination) else {
                continue;
            };
            let content = offline
                .contents
                .get(&item.resource_id)
                .cloned()
                .unwrap_or_default();
            let copy = new_resource(
                ctx,
                new_path,
                item.resource_type,
                new_v7(),
                item.content_hash.clone(),
            );
            let id = offline.insert_new(copy, Some(content));
            top.get_or_insert(id);
        }
        let top = top.ok_or_else(|| Error::Internal("copy produced no resource".to_string()))?;
        offline.get(top)
    }

    async fn move_to(&self, ctx: &UserContext, source: &str, destination: &str) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut state = self.state.lock().await;
        let offline = &mut state.offline;

        let src = offline.require_live(source)?;
        paths::validate(destination, src.is_folder())?;
        offline.ensure_free(destination)?;
        offline.ensure_parent(destination)?;
        if src.is_folder() && destination.starts_with(source) {
            return Err(Error::InvalidInput(format!(
                "cannot move {} into itself",
                source
            )));
        }

        let mut ids: Vec<(Uuid, String)> = offline
            .resources
            .values()
            .filter(|r| {
                r.structure_id == src.structure_id
                    || (src.is_folder() && paths::is_in_folder(&r.root_path, source, true))
            })
            .map(|r| (r.structure_id, r.root_path.clone()))
            .collect();
        ids.sort_by(|a, b| a.1.cmp(&b.1));

        let now = Utc::now();
        let mut moved = Vec::with_capacity(ids.len());
        for (id, old_path) in ids {
            let Some(new_path) = paths::rebase(&old_path, source, destination) else {
                continue;
            };
            if let Some(r) = offline.resources.get_mut(&id) {
                r.root_path = new_path.clone();
                if r.state != ResourceState::New {
                    if r.moved_from.as_deref() == Some(new_path.as_str()) {
                        // moved back to where it is online
                        r.moved_from = None;
                    } else if r.moved_from.is_none() {
                        r.moved_from = Some(old_path.clone());
                    }
                }
                if r.state != ResourceState::Deleted {
                    r.state = r.state.after_modification();
                }
                r.date_last_modified = now;
                r.user_last_modified = ctx.user_id;
            }
            moved.push((id, new_path));
        }

        for (id, new_path) in &moved {
            // broken links that already point at the new path would collide
            let incoming: HashSet<(Uuid, RelationType)> = offline
                .relations
                .iter()
                .filter(|r| r.target_id == Some(*id))
                .map(|r| (r.source_id, r.relation_type))
                .collect();
            offline.relations.retain(|r| {
                !(r.target_id.is_none()
                    && r.target_path == *new_path
                    && incoming.contains(&(r.source_id, r.relation_type)))
            });

            for rel in &mut offline.relations {
                if rel.source_id == *id {
                    rel.source_path = new_path.clone();
                }
                if rel.target_id == Some(*id) {
                    rel.target_path = new_path.clone();
                }
            }
            if offline.live_id(new_path) == Some(*id) {
                offline.resolve_broken(new_path, *id);
            }
        }

        debug!(
            subsystem = "db",
            component = "memory",
            op = "move",
            source,
            destination,
            moved = moved.len(),
            "Resource moved"
        );
        offline.get(src.structure_id)
    }

    async fn change_type(
        &self,
        ctx: &UserContext,
        path: &str,
        resource_type: ResourceType,
    ) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut state = self.state.lock().await;
        let offline = &mut state.offline;

        let target = offline.require_live(path)?;
        ensure_same_kind(&target, resource_type)?;
        if let Some(r) = offline.resources.get_mut(&target.structure_id) {
            r.resource_type = resource_type;
        }
        offline.touch(target.structure_id, ctx);
        offline.refresh_content_relations(target.structure_id);
        offline.get(target.structure_id)
    }

    async fn replace(
        &self,
        ctx: &UserContext,
        path: &str,
        resource_type: ResourceType,
        content: &[u8],
    ) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut state = self.state.lock().await;
        let target = state.offline.require_live(path)?;
        state.replace(ctx, &target, resource_type, content)
    }

    async fn import(&self, ctx: &UserContext, req: CreateResourceRequest) -> Result<Resource> {
        ctx.require_role(Role::Editor)?;
        let mut state = self.state.lock().await;
        let existing = state.offline.by_path(&req.root_path).cloned();
        match existing {
            None => state.create(ctx, req),
            // importing over a deleted entry restores it as changed
            Some(existing) if existing.is_folder() && req.resource_type.is_folder() => {
                if existing.state == ResourceState::Deleted {
                    state.offline.touch(existing.structure_id, ctx);
                }
                state.offline.get(existing.structure_id)
            }
            Some(existing) => state.replace(ctx, &existing, req.resource_type, &req.content),
        }
    }

    async fn delete(&self, ctx: &UserContext, path: &str) -> Result<()> {
        ctx.require_role(Role::Editor)?;
        let mut state = self.state.lock().await;

        let target = state.offline.read(path)?;
        if target.state == ResourceState::Deleted {
            return Ok(());
        }

        let mut affected: Vec<Resource> = vec![target.clone()];
        if target.is_folder() {
            affected.extend(
                state
                    .offline
                    .resources
                    .values()
                    .filter(|r| paths::is_in_folder(&r.root_path, path, true))
                    .cloned(),
            );
        }
        affected.sort_by(|a, b| b.root_path.cmp(&a.root_path));

        for resource in &affected {
            state.delete_entry(ctx, resource);
        }
        debug!(
            subsystem = "db",
            component = "memory",
            op = "delete",
            root_path = path,
            affected = affected.len(),
            "Resource deleted"
        );
        Ok(())
    }

    async fn read(&self, project: Project, path: &str) -> Result<Resource> {
        self.state.lock().await.project(project).read(path)
    }

    async fn read_by_id(&self, project: Project, structure_id: Uuid) -> Result<Resource> {
        self.state.lock().await.project(project).get(structure_id)
    }

    async fn read_content(&self, project: Project, structure_id: Uuid) -> Result<Vec<u8>> {
        let state = self.state.lock().await;
        let data = state.project(project);
        let resource = data.get(structure_id)?;
        Ok(data
            .contents
            .get(&resource.resource_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn read_children(
        &self,
        project: Project,
        folder: &str,
        recursive: bool,
    ) -> Result<Vec<Resource>> {
        let state = self.state.lock().await;
        let data = state.project(project);
        if folder != paths::ROOT {
            let parent = data.read(folder)?;
            if !parent.is_folder() {
                return Err(Error::InvalidInput(format!("not a folder: {}", folder)));
            }
        }
        Ok(data.view_sorted(
            data.resources
                .values()
                .filter(|r| paths::is_in_folder(&r.root_path, folder, recursive)),
        ))
    }

    async fn read_siblings(&self, project: Project, structure_id: Uuid) -> Result<Vec<Resource>> {
        let state = self.state.lock().await;
        let data = state.project(project);
        let resource = data.get(structure_id)?;
        Ok(data.view_sorted(
            data.resources
                .values()
                .filter(|r| r.resource_id == resource.resource_id),
        ))
    }

    async fn list_changed(&self) -> Result<Vec<Resource>> {
        let state = self.state.lock().await;
        Ok(state
            .offline
            .view_sorted(state.offline.resources.values().filter(|r| !r.state.is_unchanged())))
    }
}

// =============================================================================
// PUBLISH
// =============================================================================

#[async_trait]
impl PublishRepository for MemoryStore {
    async fn publish(
        &self,
        ctx: &UserContext,
        scope: &PublishScope,
        history_size: usize,
    ) -> Result<PublishReport> {
        ctx.require_role(Role::Publisher)?;
        let mut state = self.state.lock().await;

        let changed = state
            .offline
            .view_sorted(state.offline.resources.values().filter(|r| !r.state.is_unchanged()));
        let requested = match scope {
            PublishScope::Resources(ids) => ids
                .iter()
                .map(|id| state.offline.get(*id))
                .collect::<Result<Vec<_>>>()?,
            PublishScope::Project => Vec::new(),
        };
        let selected = select_publish_set(scope, &changed, &requested)?;
        let online_parents: HashSet<String> = outside_parents(&selected)
            .into_iter()
            .filter(|parent| state.online.live_id(parent).is_some())
            .collect();
        check_parents(&selected, &online_parents)?;

        let history_id = new_v7();
        let plan = plan_publish(history_id, &selected);
        state.check_online_paths(&plan)?;
        state.apply_publish(&plan);

        state.last_publish_tag += 1;
        let entry = PublishHistoryEntry {
            history_id,
            publish_tag: state.last_publish_tag,
            published_at: Utc::now(),
            published_by: ctx.user_id,
            resource_count: plan.resource_count() as i32,
        };
        state.history.push(HistoryRecord {
            entry: entry.clone(),
            resources: plan.snapshots.clone(),
        });

        let purge = entries_to_purge(state.history.len(), history_size);
        let purged = state.history.drain(..purge).count() as u64;

        info!(
            subsystem = "db",
            component = "memory",
            op = "publish",
            history_id = %history_id,
            resource_count = entry.resource_count,
            purged,
            "Publish committed"
        );
        Ok(PublishReport {
            entry,
            resources: plan.snapshots,
            purged,
        })
    }

    async fn read_published_resources(&self, history_id: Uuid) -> Result<Vec<PublishedResource>> {
        let state = self.state.lock().await;
        Ok(state
            .history
            .iter()
            .find(|h| h.entry.history_id == history_id)
            .map(|h| h.resources.clone())
            .unwrap_or_default())
    }

    async fn list_history(&self, limit: i64) -> Result<Vec<PublishHistoryEntry>> {
        let state = self.state.lock().await;
        Ok(state
            .history
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .map(|h| h.entry.clone())
            .collect())
    }
}

// =============================================================================
// URL NAMES
// =============================================================================

#[async_trait]
impl UrlNameRepository for MemoryStore {
    async fn write_url_name(
        &self,
        ctx: &UserContext,
        raw_name: &str,
        structure_id: Uuid,
        locale: &str,
    ) -> Result<String> {
        ctx.require_role(Role::Editor)?;
        let base = sanitize_url_name(raw_name)?;
        let mut state = self.state.lock().await;

        let resource = state.offline.get(structure_id)?;
        if resource.state == ResourceState::Deleted {
            return Err(Error::ResourceNotFound(resource.root_path));
        }

        for attempt in 0..MAX_CANDIDATES {
            let name = candidate(&base, attempt);
            let owners: Vec<Uuid> = state
                .url_names
                .iter()
                .filter(|m| m.name == name)
                .map(|m| m.structure_id)
                .collect();
            if owners.iter().any(|owner| *owner != structure_id) {
                continue;
            }

            // a newer unpublished name replaces the older unpublished ones
            state.url_names.retain(|m| {
                !(m.structure_id == structure_id
                    && m.locale == locale
                    && m.state == UrlNameState::New
                    && m.name != name)
            });
            let existing = state
                .url_names
                .iter()
                .position(|m| m.name == name && m.structure_id == structure_id && m.locale == locale);
            let state_for_name = match existing {
                Some(idx) => state.url_names.remove(idx).state,
                None => UrlNameState::New,
            };
            state.url_names.push(UrlNameMapping {
                name: name.clone(),
                structure_id,
                locale: locale.to_string(),
                state: state_for_name,
                date_changed: Utc::now(),
            });
            return Ok(name);
        }
        Err(Error::Internal(format!(
            "no free url name derived from '{}'",
            base
        )))
    }

    async fn read_id_for_url_name(&self, project: Project, name: &str) -> Result<Option<Uuid>> {
        let state = self.state.lock().await;
        Ok(state
            .url_names
            .iter()
            .rev()
            .find(|m| m.name == name && State::url_name_visible(m, project))
            .map(|m| m.structure_id))
    }

    async fn read_url_names_for_id(
        &self,
        project: Project,
        structure_id: Uuid,
    ) -> Result<Vec<String>> {
        let state = self.state.lock().await;
        let mut seen = HashSet::new();
        Ok(state
            .url_names_for(project, structure_id)
            .into_iter()
            .filter(|m| seen.insert(m.name.clone()))
            .map(|m| m.name.clone())
            .collect())
    }

    async fn read_newest_url_name(
        &self,
        project: Project,
        structure_id: Uuid,
        locale: &str,
    ) -> Result<Option<String>> {
        let state = self.state.lock().await;
        Ok(state
            .url_names_for(project, structure_id)
            .into_iter()
            .find(|m| m.locale == locale)
            .map(|m| m.name.clone()))
    }
}

// =============================================================================
// RELATIONS
// =============================================================================

#[async_trait]
impl RelationRepository for MemoryStore {
    async fn read_relations(
        &self,
        project: Project,
        structure_id: Uuid,
        filter: &RelationFilter,
    ) -> Result<Vec<Relation>> {
        let state = self.state.lock().await;
        let data = state.project(project);
        data.get(structure_id)?;

        let mut relations: Vec<Relation> = data
            .relations
            .iter()
            .filter(|r| match filter.direction {
                RelationDirection::Targets => r.source_id == structure_id,
                RelationDirection::Sources => r.target_id == Some(structure_id),
            })
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
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
        let mut state = self.state.lock().await;
        let offline = &mut state.offline;
        let src = offline.require_live(source)?;
        let dst = offline.require_live(target)?;

        let exists = offline.relations.iter().any(|r| {
            r.source_id == src.structure_id
                && r.target_path == dst.root_path
                && r.relation_type == relation_type
        });
        if !exists {
            offline.relations.push(Relation {
                source_id: src.structure_id,
                source_path: src.root_path.clone(),
                target_id: Some(dst.structure_id),
                target_path: dst.root_path.clone(),
                relation_type,
            });
            offline.touch(src.structure_id, ctx);
        }
        Ok(())
    }

    async fn delete_relations(
        &self,
        ctx: &UserContext,
        source: &str,
        filter: &RelationFilter,
    ) -> Result<u64> {
        ctx.require_role(Role::Editor)?;
        let mut state = self.state.lock().await;
        let offline = &mut state.offline;
        let src = offline.require_live(source)?;

        let before = offline.relations.len();
        offline.relations.retain(|r| {
            !(r.source_id == src.structure_id
                && !r.relation_type.is_defined_in_content()
                && filter.matches(r))
        });
        let removed = (before - offline.relations.len()) as u64;
        if removed > 0 {
            offline.touch(src.structure_id, ctx);
        }
        Ok(removed)
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

#[async_trait]
impl SubscriptionRepository for MemoryStore {
    async fn subscribe(&self, principal: Principal, structure_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let known = state
            .offline
            .resources
            .get(&structure_id)
            .is_some_and(|r| r.state != ResourceState::Deleted)
            || state.online.resources.contains_key(&structure_id);
        if !known {
            return Err(Error::ResourceNotFound(structure_id.to_string()));
        }
        state.subscriptions.insert((principal, structure_id), false);
        Ok(())
    }

    async fn unsubscribe(&self, principal: Principal, structure_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        state.subscriptions.remove(&(principal, structure_id));
        Ok(())
    }

    async fn unsubscribe_all(&self, principal: Principal) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.subscriptions.len();
        state.subscriptions.retain(|(p, _), _| *p != principal);
        Ok((before - state.subscriptions.len()) as u64)
    }

    async fn unsubscribe_resource(&self, structure_id: Uuid) -> Result<u64> {
        let mut state = self.state.lock().await;
        let before = state.subscriptions.len();
        state.subscriptions.retain(|(_, sid), _| *sid != structure_id);
        Ok((before - state.subscriptions.len()) as u64)
    }

    async fn mark_visited(
        &self,
        user_id: Uuid,
        structure_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let entry = state.visits.entry((user_id, structure_id)).or_insert(at);
        if at > *entry {
            *entry = at;
        }
        Ok(())
    }

    async fn read_date_last_visited(
        &self,
        user_id: Uuid,
        structure_id: Uuid,
    ) -> Result<Option<DateTime<Utc>>> {
        let state = self.state.lock().await;
        Ok(state.visits.get(&(user_id, structure_id)).copied())
    }

    async fn read_subscribed_resources(
        &self,
        filter: &SubscriptionFilter,
    ) -> Result<Vec<Resource>> {
        let state = self.state.lock().await;
        let principals = filter.principals();
        let ids: BTreeSet<Uuid> = state
            .subscriptions
            .iter()
            .filter(|((p, _), deleted)| !**deleted && principals.contains(p))
            .map(|((_, id), _)| *id)
            .collect();

        let online = &state.online;
        let accepted = ids.iter().filter_map(|id| online.resources.get(id)).filter(|r| {
            let last_visit = filter
                .user
                .and_then(|u| state.visits.get(&(u, r.structure_id)).copied());
            filter.accepts(r, last_visit)
        });
        Ok(online.view_sorted(accepted))
    }

    async fn read_visited_resources(&self, filter: &VisitedFilter) -> Result<Vec<Resource>> {
        let state = self.state.lock().await;
        let online = &state.online;
        let visited = state
            .visits
            .iter()
            .filter(|((user, _), _)| *user == filter.user)
            .filter_map(|((_, id), at)| online.resources.get(id).map(|r| (r, *at)))
            .filter(|(r, at)| filter.accepts(r, *at))
            .map(|(r, _)| r);
        Ok(online.view_sorted(visited))
    }

    async fn read_subscribers(&self, structure_id: Uuid) -> Result<Vec<Principal>> {
        let state = self.state.lock().await;
        let mut principals: Vec<Principal> = state
            .subscriptions
            .iter()
            .filter(|((_, id), deleted)| *id == structure_id && !**deleted)
            .map(|((p, _), _)| *p)
            .collect();
        principals.sort_by_key(|p| (p.kind(), p.id()));
        Ok(principals)
    }
}

// =============================================================================
// PUBLISH JOBS
// =============================================================================

#[async_trait]
impl PublishJobRepository for MemoryStore {
    async fn queue(&self, ctx: &UserContext, scope: PublishScope) -> Result<Uuid> {
        let mut state = self.state.lock().await;
        let id = new_v7();
        state.jobs.push(PublishJob {
            id,
            user_id: ctx.user_id,
            user_name: ctx.user_name.clone(),
            scope,
            status: JobStatus::Pending,
            history_id: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        });
        Ok(id)
    }

    async fn claim_next(&self) -> Result<Option<PublishJob>> {
        let mut state = self.state.lock().await;
        Ok(state
            .jobs
            .iter_mut()
            .find(|j| j.status == JobStatus::Pending)
            .map(|job| {
                job.status = JobStatus::Running;
                job.started_at = Some(Utc::now());
                job.clone()
            }))
    }

    async fn complete(&self, job_id: Uuid, history_id: Uuid) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("publish job {}", job_id)))?;
        job.status = JobStatus::Completed;
        job.history_id = Some(history_id);
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn fail(&self, job_id: Uuid, error: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.id == job_id)
            .ok_or_else(|| Error::NotFound(format!("publish job {}", job_id)))?;
        job.status = JobStatus::Failed;
        job.error_message = Some(error.to_string());
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    async fn get(&self, job_id: Uuid) -> Result<Option<PublishJob>> {
        let state = self.state.lock().await;
        Ok(state.jobs.iter().find(|j| j.id == job_id).cloned())
    }

    async fn pending_count(&self) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Pending)
            .count() as i64)
    }

    async fn running_count(&self) -> Result<i64> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .filter(|j| j.status == JobStatus::Running)
            .count() as i64)
    }

    async fn list_recent(&self, limit: i64) -> Result<Vec<PublishJob>> {
        let state = self.state.lock().await;
        Ok(state
            .jobs
            .iter()
            .rev()
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn cleanup(&self, keep_count: i64) -> Result<i64> {
        let mut state = self.state.lock().await;
        let doomed: HashSet<Uuid> = state
            .jobs
            .iter()
            .rev()
            .filter(|j| j.status.is_finished())
            .skip(keep_count.max(0) as usize)
            .map(|j| j.id)
            .collect();
        state.jobs.retain(|j| !doomed.contains(&j.id));
        Ok(doomed.len() as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn editor() -> UserContext {
        UserContext::new(Uuid::new_v4(), "editor").with_role(Role::Editor)
    }

    #[tokio::test]
    async fn test_sibling_count_tracks_siblings() {
        let store = MemoryStore::new();
        let ctx = editor();
        store
            .create(&ctx, CreateResourceRequest::new("/a.txt", ResourceType::Plain, "x"))
            .await
            .unwrap();
        let sibling = store.create_sibling(&ctx, "/a.txt", "/b.txt").await.unwrap();
        assert_eq!(sibling.sibling_count, 2);

        let original = store.read(Project::Offline, "/a.txt").await.unwrap();
        assert_eq!(original.sibling_count, 2);
        assert_eq!(original.resource_id, sibling.resource_id);
    }

    #[tokio::test]
    async fn test_check_online_paths_detects_conflict() {
        let store = MemoryStore::new();
        let ctx = editor();
        let publisher = UserContext::admin(Uuid::new_v4(), "admin");
        store
            .create(&ctx, CreateResourceRequest::new("/x.txt", ResourceType::Plain, "1"))
            .await
            .unwrap();
        store
            .publish(&publisher, &PublishScope::Project, 10)
            .await
            .unwrap();

        store.move_to(&ctx, "/x.txt", "/y.txt").await.unwrap();
        let fresh = store
            .create(&ctx, CreateResourceRequest::new("/x.txt", ResourceType::Plain, "2"))
            .await
            .unwrap();

        let err = store
            .publish(
                &publisher,
                &PublishScope::Resources(vec![fresh.structure_id]),
                10,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Publish(_)));

        // publishing both resolves the conflict
        store
            .publish(&publisher, &PublishScope::Project, 10)
            .await
            .unwrap();
        let online = store.read(Project::Online, "/x.txt").await.unwrap();
        assert_eq!(online.structure_id, fresh.structure_id);
    }
}
