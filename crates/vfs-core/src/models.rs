//! Core data models for the offline/online VFS.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};

// =============================================================================
// PROJECTS AND STATES
// =============================================================================

/// The two project views of the VFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Project {
    /// Editable working copy.
    Offline,
    /// Published, publicly served copy.
    Online,
}

impl Project {
    pub fn as_str(&self) -> &'static str {
        match self {
            Project::Offline => "offline",
            Project::Online => "online",
        }
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a resource in the Offline project.
///
/// Online resources are always [`ResourceState::Unchanged`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceState {
    New,
    Changed,
    Unchanged,
    Deleted,
}

impl ResourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceState::New => "new",
            ResourceState::Changed => "changed",
            ResourceState::Unchanged => "unchanged",
            ResourceState::Deleted => "deleted",
        }
    }

    /// State after an edit: a new resource stays new, anything else becomes changed.
    pub fn after_modification(self) -> ResourceState {
        match self {
            ResourceState::New => ResourceState::New,
            _ => ResourceState::Changed,
        }
    }

    pub fn is_unchanged(&self) -> bool {
        *self == ResourceState::Unchanged
    }
}

impl FromStr for ResourceState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(ResourceState::New),
            "changed" => Ok(ResourceState::Changed),
            "unchanged" => Ok(ResourceState::Unchanged),
            "deleted" => Ok(ResourceState::Deleted),
            other => Err(Error::Serialization(format!(
                "unknown resource state: {}",
                other
            ))),
        }
    }
}

// =============================================================================
// RESOURCE TYPES
// =============================================================================

/// Resource types known to the VFS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Folder,
    Plain,
    Binary,
    Image,
    Jsp,
    XmlPage,
    XmlContent,
    Html,
}

impl ResourceType {
    /// All registered types.
    pub const ALL: [ResourceType; 8] = [
        ResourceType::Folder,
        ResourceType::Plain,
        ResourceType::Binary,
        ResourceType::Image,
        ResourceType::Jsp,
        ResourceType::XmlPage,
        ResourceType::XmlContent,
        ResourceType::Html,
    ];

    /// Stable numeric id persisted in storage.
    pub fn type_id(&self) -> i32 {
        match self {
            ResourceType::Folder => 0,
            ResourceType::Plain => 1,
            ResourceType::Binary => 2,
            ResourceType::Image => 3,
            ResourceType::Jsp => 4,
            ResourceType::XmlPage => 6,
            ResourceType::XmlContent => 7,
            ResourceType::Html => 8,
        }
    }

    pub fn from_type_id(id: i32) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.type_id() == id)
            .ok_or_else(|| Error::InvalidInput(format!("unknown resource type id: {}", id)))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ResourceType::Folder => "folder",
            ResourceType::Plain => "plain",
            ResourceType::Binary => "binary",
            ResourceType::Image => "image",
            ResourceType::Jsp => "jsp",
            ResourceType::XmlPage => "xmlpage",
            ResourceType::XmlContent => "xmlcontent",
            ResourceType::Html => "html",
        }
    }

    pub fn is_folder(&self) -> bool {
        *self == ResourceType::Folder
    }

    /// Whether content of this type is scanned for links.
    pub fn is_link_parseable(&self) -> bool {
        matches!(
            self,
            ResourceType::Jsp | ResourceType::XmlPage | ResourceType::XmlContent | ResourceType::Html
        )
    }
}

// =============================================================================
// RESOURCES
// =============================================================================

/// A file or folder in one project view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// Identity independent of the path.
    pub structure_id: Uuid,
    /// Content identity, shared by siblings.
    pub resource_id: Uuid,
    pub root_path: String,
    pub resource_type: ResourceType,
    pub state: ResourceState,
    /// Number of structure entries sharing `resource_id` (including this one).
    pub sibling_count: i32,
    pub content_hash: String,
    pub date_created: DateTime<Utc>,
    pub date_last_modified: DateTime<Utc>,
    pub user_last_modified: Uuid,
    /// Online root path of a resource moved since its last publish.
    pub moved_from: Option<String>,
}

impl Resource {
    pub fn is_folder(&self) -> bool {
        self.resource_type.is_folder()
    }

    pub fn is_moved(&self) -> bool {
        self.moved_from.is_some()
    }
}

// =============================================================================
// PUBLISH HISTORY
// =============================================================================

/// Which half of a move a published snapshot represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovedState {
    /// The vacated old path.
    Source,
    /// The new path.
    Destination,
}

impl MovedState {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovedState::Source => "source",
            MovedState::Destination => "destination",
        }
    }
}

impl FromStr for MovedState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "source" => Ok(MovedState::Source),
            "destination" => Ok(MovedState::Destination),
            other => Err(Error::Serialization(format!("unknown moved state: {}", other))),
        }
    }
}

/// Immutable snapshot of a resource captured at publish time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishedResource {
    pub history_id: Uuid,
    pub structure_id: Uuid,
    pub resource_id: Uuid,
    pub root_path: String,
    pub resource_type: ResourceType,
    /// State the resource had before the publish reset it.
    pub state: ResourceState,
    pub moved_state: Option<MovedState>,
}

impl PublishedResource {
    pub fn is_moved(&self) -> bool {
        self.moved_state.is_some()
    }
}

/// One recorded publish operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishHistoryEntry {
    pub history_id: Uuid,
    /// Monotonic sequence number used for retention ordering.
    pub publish_tag: i64,
    pub published_at: DateTime<Utc>,
    pub published_by: Uuid,
    pub resource_count: i32,
}

/// Outcome of a completed publish.
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub entry: PublishHistoryEntry,
    pub resources: Vec<PublishedResource>,
    /// History entries removed by retention.
    pub purged: u64,
}

/// What a publish operation covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "ids", rename_all = "snake_case")]
pub enum PublishScope {
    /// Listed resources; folders pull in their changed descendants.
    Resources(Vec<Uuid>),
    /// Every changed resource of the Offline project.
    Project,
}

// =============================================================================
// URL NAMES
// =============================================================================

/// Publication state of a URL name mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UrlNameState {
    /// Written offline, not yet visible online.
    New,
    /// Visible in both projects.
    Published,
}

impl UrlNameState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UrlNameState::New => "new",
            UrlNameState::Published => "published",
        }
    }
}

impl FromStr for UrlNameState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "new" => Ok(UrlNameState::New),
            "published" => Ok(UrlNameState::Published),
            other => Err(Error::Serialization(format!(
                "unknown url name state: {}",
                other
            ))),
        }
    }
}

/// Maps a human-readable URL segment to a structure id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UrlNameMapping {
    pub name: String,
    pub structure_id: Uuid,
    pub locale: String,
    pub state: UrlNameState,
    pub date_changed: DateTime<Utc>,
}

// =============================================================================
// RELATIONS
// =============================================================================

/// Type of a directed relation between two resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RelationType {
    EmbeddedImage,
    EmbeddedObject,
    Hyperlink,
    JspStrong,
    JspWeak,
    Category,
    Xsd,
}

impl RelationType {
    pub const ALL: [RelationType; 7] = [
        RelationType::EmbeddedImage,
        RelationType::EmbeddedObject,
        RelationType::Hyperlink,
        RelationType::JspStrong,
        RelationType::JspWeak,
        RelationType::Category,
        RelationType::Xsd,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RelationType::EmbeddedImage => "EMBEDDED_IMAGE",
            RelationType::EmbeddedObject => "EMBEDDED_OBJECT",
            RelationType::Hyperlink => "HYPERLINK",
            RelationType::JspStrong => "JSP_STRONG",
            RelationType::JspWeak => "JSP_WEAK",
            RelationType::Category => "CATEGORY",
            RelationType::Xsd => "XSD",
        }
    }

    /// Relations discovered by parsing content (everything except user-defined ones).
    pub fn is_defined_in_content(&self) -> bool {
        !matches!(self, RelationType::Category)
    }

    /// Strong relations require the target to be published along with the source.
    pub fn is_strong(&self) -> bool {
        matches!(
            self,
            RelationType::EmbeddedImage
                | RelationType::EmbeddedObject
                | RelationType::JspStrong
                | RelationType::Xsd
        )
    }
}

impl FromStr for RelationType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| Error::Serialization(format!("unknown relation type: {}", s)))
    }
}

/// A directed edge from a source resource to a target path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: Uuid,
    pub source_path: String,
    /// Resolved target, `None` for a broken link.
    pub target_id: Option<Uuid>,
    pub target_path: String,
    pub relation_type: RelationType,
}

/// Which end of the relation the queried resource sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelationDirection {
    /// Relations pointing at the resource.
    Sources,
    /// Relations originating from the resource.
    #[default]
    Targets,
}

/// Filter for relation queries.
#[derive(Debug, Clone, Default)]
pub struct RelationFilter {
    pub direction: RelationDirection,
    /// Restrict to these types; `None` means all.
    pub types: Option<HashSet<RelationType>>,
    pub only_in_content: bool,
    pub only_user_defined: bool,
}

impl RelationFilter {
    /// Relations originating from the queried resource.
    pub fn targets() -> Self {
        Self {
            direction: RelationDirection::Targets,
            ..Default::default()
        }
    }

    /// Relations pointing at the queried resource.
    pub fn sources() -> Self {
        Self {
            direction: RelationDirection::Sources,
            ..Default::default()
        }
    }

    pub fn with_type(mut self, relation_type: RelationType) -> Self {
        self.types
            .get_or_insert_with(HashSet::new)
            .insert(relation_type);
        self
    }

    pub fn in_content(mut self) -> Self {
        self.only_in_content = true;
        self
    }

    pub fn user_defined(mut self) -> Self {
        self.only_user_defined = true;
        self
    }

    /// Check everything but the direction, which storage applies.
    pub fn matches(&self, relation: &Relation) -> bool {
        if let Some(ref types) = self.types {
            if !types.contains(&relation.relation_type) {
                return false;
            }
        }
        if self.only_in_content && !relation.relation_type.is_defined_in_content() {
            return false;
        }
        if self.only_user_defined && relation.relation_type.is_defined_in_content() {
            return false;
        }
        true
    }
}

// =============================================================================
// SUBSCRIPTIONS
// =============================================================================

/// A user or group that may subscribe to resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Principal {
    User(Uuid),
    Group(Uuid),
}

impl Principal {
    pub fn kind(&self) -> &'static str {
        match self {
            Principal::User(_) => "user",
            Principal::Group(_) => "group",
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            Principal::User(id) | Principal::Group(id) => *id,
        }
    }

    pub fn from_parts(kind: &str, id: Uuid) -> Result<Self> {
        match kind {
            "user" => Ok(Principal::User(id)),
            "group" => Ok(Principal::Group(id)),
            other => Err(Error::Serialization(format!(
                "unknown principal kind: {}",
                other
            ))),
        }
    }
}

/// Visit-based selection of subscribed resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SubscriptionMode {
    #[default]
    All,
    /// Visited at or after the last modification.
    Visited,
    /// Never visited, or modified since the last visit.
    Unvisited,
}

/// Filter for subscribed resource queries.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionFilter {
    pub user: Option<Uuid>,
    pub groups: Vec<Uuid>,
    pub mode: SubscriptionMode,
    /// Lower bound on the last modification date.
    pub from_date: Option<DateTime<Utc>>,
    /// Upper bound on the last modification date.
    pub to_date: Option<DateTime<Utc>>,
    pub parent_path: Option<String>,
    pub include_subfolders: bool,
}

impl SubscriptionFilter {
    pub fn for_user(user: Uuid) -> Self {
        Self {
            user: Some(user),
            include_subfolders: true,
            ..Default::default()
        }
    }

    pub fn with_groups(mut self, groups: Vec<Uuid>) -> Self {
        self.groups = groups;
        self
    }

    pub fn with_mode(mut self, mode: SubscriptionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn modified_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from_date = from;
        self.to_date = to;
        self
    }

    pub fn in_folder(mut self, parent_path: impl Into<String>, include_subfolders: bool) -> Self {
        self.parent_path = Some(parent_path.into());
        self.include_subfolders = include_subfolders;
        self
    }

    /// Principals whose subscriptions are considered.
    pub fn principals(&self) -> Vec<Principal> {
        self.user
            .map(Principal::User)
            .into_iter()
            .chain(self.groups.iter().copied().map(Principal::Group))
            .collect()
    }

    /// Apply the date, folder and visit criteria to a resolved resource.
    pub fn accepts(&self, resource: &Resource, last_visit: Option<DateTime<Utc>>) -> bool {
        if let Some(from) = self.from_date {
            if resource.date_last_modified < from {
                return false;
            }
        }
        if let Some(to) = self.to_date {
            if resource.date_last_modified > to {
                return false;
            }
        }
        if let Some(ref parent) = self.parent_path {
            if !crate::paths::is_in_folder(&resource.root_path, parent, self.include_subfolders) {
                return false;
            }
        }
        let visited = last_visit
            .map(|at| at >= resource.date_last_modified)
            .unwrap_or(false);
        match self.mode {
            SubscriptionMode::All => true,
            SubscriptionMode::Visited => visited,
            SubscriptionMode::Unvisited => !visited,
        }
    }
}

/// Filter for visited resource queries.
#[derive(Debug, Clone)]
pub struct VisitedFilter {
    pub user: Uuid,
    /// Lower bound on the visit timestamp.
    pub from_date: Option<DateTime<Utc>>,
    /// Upper bound on the visit timestamp.
    pub to_date: Option<DateTime<Utc>>,
    pub parent_path: Option<String>,
    pub include_subfolders: bool,
}

impl VisitedFilter {
    pub fn for_user(user: Uuid) -> Self {
        Self {
            user,
            from_date: None,
            to_date: None,
            parent_path: None,
            include_subfolders: true,
        }
    }

    pub fn visited_between(
        mut self,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.from_date = from;
        self.to_date = to;
        self
    }

    pub fn in_folder(mut self, parent_path: impl Into<String>, include_subfolders: bool) -> Self {
        self.parent_path = Some(parent_path.into());
        self.include_subfolders = include_subfolders;
        self
    }

    pub fn accepts(&self, resource: &Resource, visited_at: DateTime<Utc>) -> bool {
        if self.from_date.is_some_and(|from| visited_at < from) {
            return false;
        }
        if self.to_date.is_some_and(|to| visited_at > to) {
            return false;
        }
        match self.parent_path {
            Some(ref parent) => {
                crate::paths::is_in_folder(&resource.root_path, parent, self.include_subfolders)
            }
            None => true,
        }
    }
}

// =============================================================================
// PUBLISH JOBS
// =============================================================================

/// Status of a queued publish job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "completed" => Ok(JobStatus::Completed),
            "failed" => Ok(JobStatus::Failed),
            other => Err(Error::Serialization(format!("unknown job status: {}", other))),
        }
    }
}

/// A publish request waiting for or processed by the publish worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishJob {
    pub id: Uuid,
    pub user_id: Uuid,
    pub user_name: String,
    pub scope: PublishScope,
    pub status: JobStatus,
    pub history_id: Option<Uuid>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

// =============================================================================
// USERS AND ROLES
// =============================================================================

/// Roles checked by VFS operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Implies every other role.
    Administrator,
    Publisher,
    Editor,
}

/// The acting user of an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub user_id: Uuid,
    pub user_name: String,
    pub groups: Vec<Uuid>,
    pub roles: HashSet<Role>,
}

impl UserContext {
    pub fn new(user_id: Uuid, user_name: impl Into<String>) -> Self {
        Self {
            user_id,
            user_name: user_name.into(),
            groups: Vec::new(),
            roles: HashSet::new(),
        }
    }

    /// A user holding the administrator role.
    pub fn admin(user_id: Uuid, user_name: impl Into<String>) -> Self {
        Self::new(user_id, user_name).with_role(Role::Administrator)
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.insert(role);
        self
    }

    pub fn with_groups(mut self, groups: Vec<Uuid>) -> Self {
        self.groups = groups;
        self
    }

    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&Role::Administrator) || self.roles.contains(&role)
    }

    /// Fail with [`Error::RoleViolation`] unless the user holds `role`.
    pub fn require_role(&self, role: Role) -> Result<()> {
        if self.has_role(role) {
            Ok(())
        } else {
            tracing::warn!(
                subsystem = "core",
                component = "security",
                user = %self.user_name,
                ?role,
                "Role check failed"
            );
            Err(Error::RoleViolation {
                user: self.user_name.clone(),
                role,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource_at(path: &str, modified: DateTime<Utc>) -> Resource {
        Resource {
            structure_id: Uuid::new_v4(),
            resource_id: Uuid::new_v4(),
            root_path: path.to_string(),
            resource_type: ResourceType::Plain,
            state: ResourceState::Unchanged,
            sibling_count: 1,
            content_hash: String::new(),
            date_created: modified,
            date_last_modified: modified,
            user_last_modified: Uuid::nil(),
            moved_from: None,
        }
    }

    #[test]
    fn test_state_after_modification() {
        assert_eq!(ResourceState::New.after_modification(), ResourceState::New);
        assert_eq!(
            ResourceState::Unchanged.after_modification(),
            ResourceState::Changed
        );
        assert_eq!(
            ResourceState::Changed.after_modification(),
            ResourceState::Changed
        );
    }

    #[test]
    fn test_state_string_roundtrip_for_storage() {
        for state in [
            ResourceState::New,
            ResourceState::Changed,
            ResourceState::Unchanged,
            ResourceState::Deleted,
        ] {
            assert_eq!(state.as_str().parse::<ResourceState>().unwrap(), state);
        }
        assert!("bogus".parse::<ResourceState>().is_err());
    }

    #[test]
    fn test_resource_type_ids_are_unique() {
        let ids: HashSet<i32> = ResourceType::ALL.iter().map(|t| t.type_id()).collect();
        assert_eq!(ids.len(), ResourceType::ALL.len());
        assert_eq!(
            ResourceType::from_type_id(6).unwrap(),
            ResourceType::XmlPage
        );
        assert!(ResourceType::from_type_id(99).is_err());
    }

    #[test]
    fn test_link_parseable_types() {
        assert!(ResourceType::XmlPage.is_link_parseable());
        assert!(ResourceType::Jsp.is_link_parseable());
        assert!(!ResourceType::Plain.is_link_parseable());
        assert!(!ResourceType::Image.is_link_parseable());
        assert!(!ResourceType::Folder.is_link_parseable());
    }

    #[test]
    fn test_relation_type_parse() {
        assert_eq!(
            "EMBEDDED_IMAGE".parse::<RelationType>().unwrap(),
            RelationType::EmbeddedImage
        );
        assert!(!RelationType::Category.is_defined_in_content());
        assert!(RelationType::JspStrong.is_strong());
        assert!(!RelationType::Hyperlink.is_strong());
    }

    #[test]
    fn test_relation_filter_matches() {
        let rel = Relation {
            source_id: Uuid::new_v4(),
            source_path: "/a.html".into(),
            target_id: None,
            target_path: "/b.png".into(),
            relation_type: RelationType::EmbeddedImage,
        };
        assert!(RelationFilter::targets().matches(&rel));
        assert!(RelationFilter::targets()
            .with_type(RelationType::EmbeddedImage)
            .matches(&rel));
        assert!(!RelationFilter::targets()
            .with_type(RelationType::Hyperlink)
            .matches(&rel));
        assert!(RelationFilter::sources().in_content().matches(&rel));
        assert!(!RelationFilter::sources().user_defined().matches(&rel));
    }

    #[test]
    fn test_require_role() {
        let editor = UserContext::new(Uuid::new_v4(), "editor").with_role(Role::Editor);
        assert!(editor.require_role(Role::Editor).is_ok());
        let err = editor.require_role(Role::Publisher).unwrap_err();
        assert!(err.is_security_violation());

        let admin = UserContext::admin(Uuid::new_v4(), "admin");
        assert!(admin.require_role(Role::Publisher).is_ok());
        assert!(admin.require_role(Role::Editor).is_ok());
    }

    #[test]
    fn test_subscription_filter_modes() {
        let modified = Utc::now();
        let res = resource_at("/news/a.html", modified);
        let before = modified - chrono::Duration::hours(1);
        let after = modified + chrono::Duration::hours(1);

        let visited = SubscriptionFilter::for_user(Uuid::nil()).with_mode(SubscriptionMode::Visited);
        assert!(visited.accepts(&res, Some(after)));
        assert!(!visited.accepts(&res, Some(before)));
        assert!(!visited.accepts(&res, None));

        let unvisited =
            SubscriptionFilter::for_user(Uuid::nil()).with_mode(SubscriptionMode::Unvisited);
        assert!(unvisited.accepts(&res, None));
        assert!(unvisited.accepts(&res, Some(before)));
        assert!(!unvisited.accepts(&res, Some(after)));
    }

    #[test]
    fn test_subscription_filter_folder_and_dates() {
        let modified = Utc::now();
        let res = resource_at("/news/2026/a.html", modified);

        let shallow = SubscriptionFilter::for_user(Uuid::nil()).in_folder("/news/", false);
        assert!(!shallow.accepts(&res, None));
        let deep = SubscriptionFilter::for_user(Uuid::nil()).in_folder("/news/", true);
        assert!(deep.accepts(&res, None));

        let late = SubscriptionFilter::for_user(Uuid::nil())
            .modified_between(Some(modified + chrono::Duration::seconds(1)), None);
        assert!(!late.accepts(&res, None));
    }

    #[test]
    fn test_subscription_filter_principals() {
        let user = Uuid::new_v4();
        let group = Uuid::new_v4();
        let filter = SubscriptionFilter::for_user(user).with_groups(vec![group]);
        assert_eq!(
            filter.principals(),
            vec![Principal::User(user), Principal::Group(group)]
        );
    }

    #[test]
    fn test_publish_scope_json() {
        let scope = PublishScope::Resources(vec![Uuid::nil()]);
        let json = serde_json::to_value(&scope).unwrap();
        assert_eq!(json["kind"], "resources");
        let back: PublishScope = serde_json::from_value(json).unwrap();
        assert_eq!(back, scope);

        let project = serde_json::to_value(PublishScope::Project).unwrap();
        assert_eq!(project["kind"], "project");
    }
}
