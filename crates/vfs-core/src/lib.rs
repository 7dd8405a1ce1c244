//! # vfs-core
//!
//! Core types, traits, and publish planning for the offline/online VFS.
//!
//! Storage backends in `vfs-db` implement the repository traits defined
//! here; the pure rules (path handling, publish planning, URL name
//! normalisation) live in this crate so every backend applies them the same
//! way.

pub mod config;
pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod paths;
pub mod publish;
pub mod traits;
pub mod url_names;
pub mod uuid_utils;

// Re-export commonly used types at crate root
pub use config::PublishConfig;
pub use error::{Error, Result};
pub use events::{EventActor, EventBus, EventContext, EventEnvelope, ServerEvent};
pub use models::*;
pub use publish::{check_parents, outside_parents, plan_publish, select_publish_set, PublishPlan};
pub use traits::*;
pub use url_names::sanitize_url_name;
pub use uuid_utils::{extract_timestamp, is_v7, new_v7};
