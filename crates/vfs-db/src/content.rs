//! Content hashing and content-derived relations.
//!
//! Shared by the PostgreSQL and in-memory backends so both derive the same
//! relations from the same bytes.

use sha2::{Digest, Sha256};
use uuid::Uuid;

use vfs_core::{Relation, Resource};

use crate::link_extraction::extract_links;

/// Hex-encoded SHA-256 of resource content.
pub fn compute_content_hash(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}

/// Relations defined by a resource's content.
///
/// Only link-parseable types produce relations, and self references are
/// skipped. `resolve` maps a target path to the structure id of the live
/// resource at that path in the same project.
pub fn content_relations(
    resource: &Resource,
    content: &[u8],
    resolve: impl Fn(&str) -> Option<Uuid>,
) -> Vec<Relation> {
    if !resource.resource_type.is_link_parseable() {
        return Vec::new();
    }
    let text = String::from_utf8_lossy(content);
    extract_links(&text)
        .into_iter()
        .filter(|(_, path)| *path != resource.root_path)
        .map(|(relation_type, target_path)| Relation {
            source_id: resource.structure_id,
            source_path: resource.root_path.clone(),
            target_id: resolve(&target_path),
            target_path,
            relation_type,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vfs_core::{RelationType, ResourceState, ResourceType};

    fn page(path: &str, resource_type: ResourceType) -> Resource {
        let now = Utc::now();
        Resource {
            structure_id: Uuid::new_v4(),
            resource_id: Uuid::new_v4(),
            root_path: path.to_string(),
            resource_type,
            state: ResourceState::New,
            sibling_count: 1,
            content_hash: String::new(),
            date_created: now,
            date_last_modified: now,
            user_last_modified: Uuid::nil(),
            moved_from: None,
        }
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        assert_eq!(
            compute_content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(compute_content_hash(b"abc").len(), 64);
    }

    #[test]
    fn test_relations_resolve_known_targets() {
        let logo = Uuid::new_v4();
        let res = page("/index.html", ResourceType::Html);
        let content = br#"<img src="/logo.png"><a href="/missing.html">x</a><a href="/index.html">self</a>"#;

        let rels = content_relations(&res, content, |path| (path == "/logo.png").then_some(logo));
        assert_eq!(rels.len(), 2);

        let image = rels
            .iter()
            .find(|r| r.relation_type == RelationType::EmbeddedImage)
            .unwrap();
        assert_eq!(image.target_id, Some(logo));
        assert_eq!(image.source_path, "/index.html");

        let broken = rels
            .iter()
            .find(|r| r.relation_type == RelationType::Hyperlink)
            .unwrap();
        assert_eq!(broken.target_id, None);
        assert_eq!(broken.target_path, "/missing.html");
    }

    #[test]
    fn test_plain_text_has_no_relations() {
        let res = page("/notes.txt", ResourceType::Plain);
        let rels = content_relations(&res, br#"<img src="/logo.png">"#, |_| None);
        assert!(rels.is_empty());
    }
}
