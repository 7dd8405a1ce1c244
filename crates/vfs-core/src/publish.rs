//! Publish planning.
//!
//! Storage backends gather the Offline resources of a publish, hand them to
//! [`select_publish_set`] and [`plan_publish`], and then apply the resulting
//! [`PublishPlan`] inside a single transaction. Snapshots are computed from
//! the Offline state before anything is reset.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::{MovedState, PublishScope, PublishedResource, Resource, ResourceState};
use crate::paths;

/// Changes to apply for one publish.
#[derive(Debug, Clone, Default)]
pub struct PublishPlan {
    /// History snapshots, ordered by path.
    pub snapshots: Vec<PublishedResource>,
    /// Resources to write to the Online project, parents before children.
    pub upserts: Vec<Resource>,
    /// Resources to remove from the Online project, children before parents.
    pub removals: Vec<Resource>,
}

impl PublishPlan {
    /// Number of Offline resources covered by the plan.
    pub fn resource_count(&self) -> usize {
        self.upserts.len() + self.removals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0
    }

    /// Structure ids whose Offline rows must be reset to unchanged.
    pub fn published_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.upserts.iter().map(|r| r.structure_id)
    }

    /// Structure ids removed by the publish.
    pub fn deleted_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        self.removals.iter().map(|r| r.structure_id)
    }
}

/// Pick the resources a publish covers.
///
/// `changed` holds every non-unchanged Offline resource; `requested` the
/// resolved resources named by the scope. Folders pull in their changed
/// descendants. Parent folders are checked separately with
/// [`check_parents`].
pub fn select_publish_set(
    scope: &PublishScope,
    changed: &[Resource],
    requested: &[Resource],
) -> Result<Vec<Resource>> {
    let mut selected: BTreeMap<String, Resource> = BTreeMap::new();

    match scope {
        PublishScope::Project => {
            for res in changed {
                selected.insert(res.root_path.clone(), res.clone());
            }
        }
        PublishScope::Resources(_) => {
            for res in requested {
                if !res.state.is_unchanged() {
                    selected.insert(res.root_path.clone(), res.clone());
                }
                if res.is_folder() {
                    for child in changed
                        .iter()
                        .filter(|c| paths::is_in_folder(&c.root_path, &res.root_path, true))
                    {
                        selected.insert(child.root_path.clone(), child.clone());
                    }
                }
            }
        }
    }

    if selected.is_empty() {
        return Err(Error::InvalidInput("nothing to publish".to_string()));
    }
    Ok(selected.into_values().collect())
}

/// Parent folders the selection needs but does not publish itself.
///
/// Each of them must already exist in the Online project at that path.
pub fn outside_parents(selected: &[Resource]) -> BTreeSet<String> {
    let published: HashSet<&str> = selected
        .iter()
        .filter(|r| r.state != ResourceState::Deleted)
        .map(|r| r.root_path.as_str())
        .collect();
    selected
        .iter()
        .filter(|r| r.state != ResourceState::Deleted)
        .map(|r| paths::parent(&r.root_path))
        .filter(|parent| *parent != paths::ROOT && !published.contains(parent))
        .map(String::from)
        .collect()
}

/// Reject a selection that would put a resource Online under a missing folder.
///
/// `online` holds the paths from [`outside_parents`] that exist Online.
/// New folders and moved folders are both caught here: neither exists
/// Online at its Offline path until it is published.
pub fn check_parents(selected: &[Resource], online: &HashSet<String>) -> Result<()> {
    for res in selected {
        if res.state == ResourceState::Deleted {
            continue;
        }
        let parent = paths::parent(&res.root_path);
        if parent == paths::ROOT || online.contains(parent) {
            continue;
        }
        if selected
            .iter()
            .any(|p| p.root_path == parent && p.state != ResourceState::Deleted)
        {
            continue;
        }
        return Err(Error::InvalidInput(format!(
            "parent folder {} of {} is not online and must be published with it",
            parent, res.root_path
        )));
    }
    Ok(())
}

/// Build the publish plan for the selected resources.
pub fn plan_publish(history_id: Uuid, resources: &[Resource]) -> PublishPlan {
    let mut plan = PublishPlan::default();

    for res in resources {
        let snapshot = |root_path: &str, state: ResourceState, moved_state: Option<MovedState>| {
            PublishedResource {
                history_id,
                structure_id: res.structure_id,
                resource_id: res.resource_id,
                root_path: root_path.to_string(),
                resource_type: res.resource_type,
                state,
                moved_state,
            }
        };

        match (res.state, res.moved_from.as_deref()) {
            (ResourceState::Unchanged, _) => continue,
            (ResourceState::Deleted, online_path) => {
                // a deleted resource disappears from where it is online
                let path = online_path.unwrap_or(&res.root_path);
                plan.snapshots
                    .push(snapshot(path, ResourceState::Deleted, None));
                plan.removals.push(res.clone());
            }
            (_, Some(old_path)) => {
                plan.snapshots.push(snapshot(
                    old_path,
                    ResourceState::Deleted,
                    Some(MovedState::Source),
                ));
                plan.snapshots.push(snapshot(
                    &res.root_path,
                    ResourceState::New,
                    Some(MovedState::Destination),
                ));
                plan.upserts.push(published_copy(res));
            }
            (state, None) => {
                plan.snapshots.push(snapshot(&res.root_path, state, None));
                plan.upserts.push(published_copy(res));
            }
        }
    }

    plan.snapshots
        .sort_by(|a, b| a.root_path.cmp(&b.root_path).then(a.state.as_str().cmp(b.state.as_str())));
    plan.upserts.sort_by(|a, b| a.root_path.cmp(&b.root_path));
    plan.removals.sort_by(|a, b| b.root_path.cmp(&a.root_path));
    plan
}

/// The Online form of an Offline resource.
fn published_copy(res: &Resource) -> Resource {
    Resource {
        state: ResourceState::Unchanged,
        moved_from: None,
        ..res.clone()
    }
}

/// Number of history entries beyond the retention limit.
pub fn entries_to_purge(entry_count: usize, history_size: usize) -> usize {
    entry_count.saturating_sub(history_size.max(1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ResourceType;
    use chrono::Utc;

    fn res(path: &str, state: ResourceState) -> Resource {
        let now = Utc::now();
        Resource {
            structure_id: Uuid::new_v4(),
            resource_id: Uuid::new_v4(),
            root_path: path.to_string(),
            resource_type: if path.ends_with('/') {
                ResourceType::Folder
            } else {
                ResourceType::Plain
            },
            state,
            sibling_count: 1,
            content_hash: String::new(),
            date_created: now,
            date_last_modified: now,
            user_last_modified: Uuid::nil(),
            moved_from: None,
        }
    }

    #[test]
    fn test_new_file_yields_one_new_snapshot() {
        let file = res("/a.txt", ResourceState::New);
        let plan = plan_publish(Uuid::nil(), std::slice::from_ref(&file));
        assert_eq!(plan.snapshots.len(), 1);
        assert_eq!(plan.snapshots[0].state, ResourceState::New);
        assert_eq!(plan.snapshots[0].root_path, "/a.txt");
        assert!(!plan.snapshots[0].is_moved());
        assert_eq!(plan.upserts.len(), 1);
        assert_eq!(plan.upserts[0].state, ResourceState::Unchanged);
    }

    #[test]
    fn test_moved_file_yields_source_and_destination() {
        let mut file = res("/new.txt", ResourceState::Changed);
        file.moved_from = Some("/old.txt".to_string());
        let plan = plan_publish(Uuid::nil(), &[file]);

        assert_eq!(plan.snapshots.len(), 2);
        let source = plan
            .snapshots
            .iter()
            .find(|s| s.moved_state == Some(MovedState::Source))
            .unwrap();
        assert_eq!(source.root_path, "/old.txt");
        assert_eq!(source.state, ResourceState::Deleted);

        let dest = plan
            .snapshots
            .iter()
            .find(|s| s.moved_state == Some(MovedState::Destination))
            .unwrap();
        assert_eq!(dest.root_path, "/new.txt");
        assert_eq!(dest.state, ResourceState::New);
        assert!(plan.upserts[0].moved_from.is_none());
    }

    #[test]
    fn test_deleted_file_yields_deleted_snapshot_and_removal() {
        let file = res("/gone.txt", ResourceState::Deleted);
        let plan = plan_publish(Uuid::nil(), &[file]);
        assert_eq!(plan.snapshots.len(), 1);
        assert_eq!(plan.snapshots[0].state, ResourceState::Deleted);
        assert_eq!(plan.removals.len(), 1);
        assert!(plan.upserts.is_empty());
    }

    #[test]
    fn test_moved_then_deleted_reports_online_path() {
        let mut file = res("/new.txt", ResourceState::Deleted);
        file.moved_from = Some("/old.txt".to_string());
        let plan = plan_publish(Uuid::nil(), &[file]);
        assert_eq!(plan.snapshots.len(), 1);
        assert_eq!(plan.snapshots[0].root_path, "/old.txt");
        assert!(!plan.snapshots[0].is_moved());
    }

    #[test]
    fn test_unchanged_resources_are_skipped() {
        let plan = plan_publish(Uuid::nil(), &[res("/x.txt", ResourceState::Unchanged)]);
        assert!(plan.is_empty());
        assert!(plan.snapshots.is_empty());
    }

    #[test]
    fn test_ordering_parents_first_for_upserts_children_first_for_removals() {
        let plan = plan_publish(
            Uuid::nil(),
            &[
                res("/f/a.txt", ResourceState::New),
                res("/f/", ResourceState::New),
                res("/g/", ResourceState::Deleted),
                res("/g/b.txt", ResourceState::Deleted),
            ],
        );
        assert_eq!(plan.upserts[0].root_path, "/f/");
        assert_eq!(plan.removals[0].root_path, "/g/b.txt");
    }

    #[test]
    fn test_select_folder_pulls_descendants() {
        let folder = res("/f/", ResourceState::New);
        let child = res("/f/a.txt", ResourceState::New);
        let other = res("/other.txt", ResourceState::New);
        let changed = vec![folder.clone(), child.clone(), other];

        let selected = select_publish_set(
            &PublishScope::Resources(vec![folder.structure_id]),
            &changed,
            std::slice::from_ref(&folder),
        )
        .unwrap();
        let paths: Vec<&str> = selected.iter().map(|r| r.root_path.as_str()).collect();
        assert_eq!(paths, vec!["/f/", "/f/a.txt"]);
    }

    #[test]
    fn test_child_of_unpublished_new_folder_is_rejected() {
        let folder = res("/f/", ResourceState::New);
        let child = res("/f/a.txt", ResourceState::New);
        let changed = vec![folder, child.clone()];

        let selected = select_publish_set(
            &PublishScope::Resources(vec![child.structure_id]),
            &changed,
            std::slice::from_ref(&child),
        )
        .unwrap();
        let needed = outside_parents(&selected);
        assert_eq!(needed.into_iter().collect::<Vec<_>>(), vec!["/f/".to_string()]);

        let err = check_parents(&selected, &HashSet::new()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn test_child_of_online_folder_is_accepted() {
        let child = res("/f/a.txt", ResourceState::Changed);
        let online: HashSet<String> = ["/f/".to_string()].into_iter().collect();
        assert!(check_parents(std::slice::from_ref(&child), &online).is_ok());
    }

    #[test]
    fn test_child_of_moved_folder_needs_the_folder() {
        let mut folder = res("/g/", ResourceState::Changed);
        folder.moved_from = Some("/f/".to_string());
        let mut child = res("/g/x.txt", ResourceState::Changed);
        child.moved_from = Some("/f/x.txt".to_string());

        // "/g/" is not online yet, only "/f/" is
        let online = HashSet::new();
        assert!(check_parents(std::slice::from_ref(&child), &online).is_err());
        assert!(check_parents(&[folder, child], &online).is_ok());
    }

    #[test]
    fn test_top_level_and_deleted_resources_need_no_parent() {
        let top = res("/a.txt", ResourceState::New);
        let gone = res("/f/b.txt", ResourceState::Deleted);
        let selected = vec![top, gone];
        assert!(outside_parents(&selected).is_empty());
        assert!(check_parents(&selected, &HashSet::new()).is_ok());
    }

    #[test]
    fn test_select_nothing_to_publish() {
        let unchanged = res("/x.txt", ResourceState::Unchanged);
        let err = select_publish_set(
            &PublishScope::Resources(vec![unchanged.structure_id]),
            &[],
            &[unchanged],
        )
        .unwrap_err();
        assert!(err.to_string().contains("nothing to publish"));

        assert!(select_publish_set(&PublishScope::Project, &[], &[]).is_err());
    }

    #[test]
    fn test_entries_to_purge() {
        assert_eq!(entries_to_purge(9, 10), 0);
        assert_eq!(entries_to_purge(10, 10), 0);
        assert_eq!(entries_to_purge(12, 10), 2);
        assert_eq!(entries_to_purge(3, 0), 2);
    }
}
