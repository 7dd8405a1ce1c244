//! # vfs-db
//!
//! Storage backends for the offline/online VFS.
//!
//! This crate provides:
//! - Connection pool management
//! - PostgreSQL repositories for resources, publishing, URL names,
//!   relations, subscriptions and the publish queue
//! - An in-memory store implementing the same traits
//! - Link extraction from resource content
//! - Best-effort schema upgrades
//!
//! ## Example
//!
//! ```rust,ignore
//! use vfs_db::{CreateResourceRequest, Database, ResourceRepository, ResourceType};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::connect("postgres://localhost/vfs").await?;
//!
//!     let page = db.resources.create(
//!         &ctx,
//!         CreateResourceRequest::new("/index.html", ResourceType::Html, "<h1>Hi</h1>"),
//!     ).await?;
//!
//!     println!("Created resource: {}", page.structure_id);
//!     Ok(())
//! }
//! ```
pub mod content;
pub mod link_extraction;
pub mod memory;
pub mod pool;
pub mod publish;
pub mod publish_jobs;
pub mod relations;
pub mod resources;
pub mod subscriptions;
pub mod upgrade;
pub mod url_names;

// Test fixtures for integration tests
// Note: Always compiled so integration tests (in tests/) can use DEFAULT_TEST_DATABASE_URL
pub mod test_fixtures;

// Re-export core types
pub use vfs_core::*;

/// Escape LIKE/ILIKE wildcard characters (`%`, `_`, `\`) in user input.
pub fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

pub use content::{compute_content_hash, content_relations};
pub use link_extraction::extract_links;
pub use memory::MemoryStore;
pub use pool::{create_pool, create_pool_with_config, PoolConfig};
pub use publish::PgPublishRepository;
pub use publish_jobs::PgPublishJobRepository;
pub use relations::PgRelationRepository;
pub use resources::PgResourceRepository;
pub use subscriptions::PgSubscriptionRepository;
pub use upgrade::{run_best_effort, split_statements, UpgradeReport};
pub use url_names::PgUrlNameRepository;

/// Combined database context with all repositories.
#[derive(Clone)]
pub struct Database {
    /// The underlying connection pool.
    pub pool: sqlx::Pool<sqlx::Postgres>,
    /// Offline resource operations and reads of either project.
    pub resources: PgResourceRepository,
    /// Publishing and publish history.
    pub publish: PgPublishRepository,
    pub url_names: PgUrlNameRepository,
    pub relations: PgRelationRepository,
    pub subscriptions: PgSubscriptionRepository,
    /// Queue consumed by the publish worker.
    pub publish_jobs: PgPublishJobRepository,
}

impl Database {
    /// Create a new Database instance from a connection pool.
    pub fn new(pool: sqlx::Pool<sqlx::Postgres>) -> Self {
        Self {
            resources: PgResourceRepository::new(pool.clone()),
            publish: PgPublishRepository::new(pool.clone()),
            url_names: PgUrlNameRepository::new(pool.clone()),
            relations: PgRelationRepository::new(pool.clone()),
            subscriptions: PgSubscriptionRepository::new(pool.clone()),
            publish_jobs: PgPublishJobRepository::new(pool.clone()),
            pool,
        }
    }

    /// Create a new Database instance by connecting to the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = create_pool(url).await?;
        Ok(Self::new(pool))
    }

    /// Create with custom pool configuration.
    pub async fn connect_with_config(url: &str, config: PoolConfig) -> Result<Self> {
        let pool = create_pool_with_config(url, config).await?;
        Ok(Self::new(pool))
    }

    /// Run pending migrations.
    #[cfg(feature = "migrations")]
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Database(sqlx::Error::Migrate(Box::new(e))))?;
        Ok(())
    }

    /// Apply an upgrade script best-effort.
    pub async fn upgrade(&self, script: &str) -> UpgradeReport {
        run_best_effort(&self.pool, &split_statements(script)).await
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &sqlx::Pool<sqlx::Postgres> {
        &self.pool
    }
}
