//! Relation tests against the in-memory store.

use vfs_db::test_fixtures::{editor_context, publisher_context};
use vfs_db::{
    CreateResourceRequest, Error, MemoryStore, Project, PublishRepository, PublishScope,
    RelationFilter, RelationRepository, RelationType, ResourceRepository, ResourceType,
};

fn html(path: &str, body: &str) -> CreateResourceRequest {
    CreateResourceRequest::new(path, ResourceType::Html, body)
}

fn image(path: &str) -> CreateResourceRequest {
    CreateResourceRequest::new(path, ResourceType::Image, vec![0x89, 0x50, 0x4e, 0x47])
}

async fn count_sources(store: &MemoryStore, project: Project, path: &str) -> usize {
    let target = store.read(project, path).await.unwrap();
    store
        .read_relations(project, target.structure_id, &RelationFilter::sources())
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_relation_count_follows_copies_siblings_and_type_changes() {
    let store = MemoryStore::new();
    let ctx = editor_context();
    store.create(&ctx, image("/logo.png")).await.unwrap();
    store
        .create(&ctx, html("/a.html", r#"<img src="/logo.png">"#))
        .await
        .unwrap();
    assert_eq!(count_sources(&store, Project::Offline, "/logo.png").await, 1);

    store.copy(&ctx, "/a.html", "/b.html").await.unwrap();
    assert_eq!(count_sources(&store, Project::Offline, "/logo.png").await, 2);

    store.create_sibling(&ctx, "/a.html", "/c.html").await.unwrap();
    assert_eq!(count_sources(&store, Project::Offline, "/logo.png").await, 3);

    store
        .change_type(&ctx, "/a.html", ResourceType::Plain)
        .await
        .unwrap();
    assert_eq!(count_sources(&store, Project::Offline, "/logo.png").await, 2);

    store.delete(&ctx, "/b.html").await.unwrap();
    assert_eq!(count_sources(&store, Project::Offline, "/logo.png").await, 1);
}

#[tokio::test]
async fn test_broken_link_resolves_when_target_appears() {
    let store = MemoryStore::new();
    let ctx = editor_context();
    let page = store
        .create(&ctx, html("/a.html", r#"<a href="/later.html">soon</a>"#))
        .await
        .unwrap();

    let targets = store
        .read_relations(Project::Offline, page.structure_id, &RelationFilter::targets())
        .await
        .unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].relation_type, RelationType::Hyperlink);
    assert_eq!(targets[0].target_id, None);

    let later = store.create(&ctx, html("/later.html", "")).await.unwrap();
    let targets = store
        .read_relations(Project::Offline, page.structure_id, &RelationFilter::targets())
        .await
        .unwrap();
    assert_eq!(targets[0].target_id, Some(later.structure_id));
}

#[tokio::test]
async fn test_rewriting_content_replaces_relations() {
    let store = MemoryStore::new();
    let ctx = editor_context();
    store.create(&ctx, image("/logo.png")).await.unwrap();
    let page = store
        .create(&ctx, html("/a.html", r#"<img src="/logo.png">"#))
        .await
        .unwrap();

    store
        .write_content(&ctx, "/a.html", b"<p>no links</p>")
        .await
        .unwrap();
    let targets = store
        .read_relations(Project::Offline, page.structure_id, &RelationFilter::targets())
        .await
        .unwrap();
    assert!(targets.is_empty());
}

#[tokio::test]
async fn test_moving_target_keeps_relation() {
    let store = MemoryStore::new();
    let ctx = editor_context();
    let logo = store.create(&ctx, image("/logo.png")).await.unwrap();
    let page = store
        .create(&ctx, html("/a.html", r#"<img src="/logo.png">"#))
        .await
        .unwrap();

    store.move_to(&ctx, "/logo.png", "/brand.png").await.unwrap();
    let targets = store
        .read_relations(Project::Offline, page.structure_id, &RelationFilter::targets())
        .await
        .unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].target_id, Some(logo.structure_id));
    assert_eq!(targets[0].target_path, "/brand.png");
}

#[tokio::test]
async fn test_moving_onto_broken_link_target_leaves_one_relation() {
    let store = MemoryStore::new();
    let ctx = editor_context();
    let logo = store.create(&ctx, image("/logo.png")).await.unwrap();
    let page = store
        .create(
            &ctx,
            html("/a.html", r#"<img src="/logo.png"><img src="/img.png">"#),
        )
        .await
        .unwrap();

    store.move_to(&ctx, "/logo.png", "/img.png").await.unwrap();
    assert_eq!(count_sources(&store, Project::Offline, "/img.png").await, 1);

    let targets = store
        .read_relations(Project::Offline, page.structure_id, &RelationFilter::targets())
        .await
        .unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].target_id, Some(logo.structure_id));
    assert_eq!(targets[0].target_path, "/img.png");
    assert_eq!(targets[0].relation_type, RelationType::EmbeddedImage);
}

#[tokio::test]
async fn test_online_relations_follow_publish() {
    let store = MemoryStore::new();
    let ctx = editor_context();
    let publisher = publisher_context();
    store.create(&ctx, image("/logo.png")).await.unwrap();
    store
        .create(&ctx, html("/a.html", r#"<img src="/logo.png">"#))
        .await
        .unwrap();
    store
        .create(&ctx, html("/b.html", r#"<img src="/logo.png">"#))
        .await
        .unwrap();
    store
        .publish(&publisher, &PublishScope::Project, 10)
        .await
        .unwrap();
    assert_eq!(count_sources(&store, Project::Online, "/logo.png").await, 2);

    store.delete(&ctx, "/a.html").await.unwrap();
    assert_eq!(count_sources(&store, Project::Offline, "/logo.png").await, 1);
    assert_eq!(count_sources(&store, Project::Online, "/logo.png").await, 2);

    store
        .publish(&publisher, &PublishScope::Project, 10)
        .await
        .unwrap();
    assert_eq!(count_sources(&store, Project::Online, "/logo.png").await, 1);
}

#[tokio::test]
async fn test_category_relations_are_user_managed() {
    let store = MemoryStore::new();
    let ctx = editor_context();
    store
        .create(&ctx, CreateResourceRequest::folder("/categories/"))
        .await
        .unwrap();
    let page = store
        .create(&ctx, html("/a.html", r#"<a href="/b.html">b</a>"#))
        .await
        .unwrap();

    store
        .add_relation(&ctx, "/a.html", "/categories/", RelationType::Category)
        .await
        .unwrap();
    // adding twice keeps one relation
    store
        .add_relation(&ctx, "/a.html", "/categories/", RelationType::Category)
        .await
        .unwrap();

    let user_defined = store
        .read_relations(
            Project::Offline,
            page.structure_id,
            &RelationFilter::targets().user_defined(),
        )
        .await
        .unwrap();
    assert_eq!(user_defined.len(), 1);
    assert_eq!(user_defined[0].target_path, "/categories/");

    let in_content = store
        .read_relations(
            Project::Offline,
            page.structure_id,
            &RelationFilter::targets().in_content(),
        )
        .await
        .unwrap();
    assert_eq!(in_content.len(), 1);
    assert_eq!(in_content[0].relation_type, RelationType::Hyperlink);

    // rewriting content leaves user-defined relations alone
    store.write_content(&ctx, "/a.html", b"").await.unwrap();
    let removed = store
        .delete_relations(&ctx, "/a.html", &RelationFilter::targets())
        .await
        .unwrap();
    assert_eq!(removed, 1);
}

#[tokio::test]
async fn test_content_relation_types_cannot_be_added() {
    let store = MemoryStore::new();
    let ctx = editor_context();
    store.create(&ctx, html("/a.html", "")).await.unwrap();
    store.create(&ctx, html("/b.html", "")).await.unwrap();
    let err = store
        .add_relation(&ctx, "/a.html", "/b.html", RelationType::Hyperlink)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidInput(_)));
}

#[tokio::test]
async fn test_type_filter() {
    let store = MemoryStore::new();
    let ctx = editor_context();
    let page = store
        .create(
            &ctx,
            html(
                "/a.html",
                r#"<img src="/x.png"><a href="/y.html">y</a><embed src="/z.swf">"#,
            ),
        )
        .await
        .unwrap();

    let images = store
        .read_relations(
            Project::Offline,
            page.structure_id,
            &RelationFilter::targets().with_type(RelationType::EmbeddedImage),
        )
        .await
        .unwrap();
    assert_eq!(images.len(), 1);
    assert_eq!(images[0].target_path, "/x.png");

    let all = store
        .read_relations(Project::Offline, page.structure_id, &RelationFilter::targets())
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
}
