//! Centralized default constants for the VFS.
//!
//! All crates reference these constants instead of defining their own
//! magic numbers.

// =============================================================================
// PUBLISH
// =============================================================================

/// Number of publish history entries kept before the oldest are purged.
pub const PUBLISH_HISTORY_SIZE: usize = 10;

/// Environment variable overriding [`PUBLISH_HISTORY_SIZE`].
pub const ENV_PUBLISH_HISTORY_SIZE: &str = "PUBLISH_HISTORY_SIZE";

/// Default locale for URL name mappings.
pub const DEFAULT_LOCALE: &str = "en";

// =============================================================================
// PAGINATION
// =============================================================================

/// Default page size for history and job listings.
pub const PAGE_LIMIT: i64 = 50;

// =============================================================================
// EVENTS
// =============================================================================

/// Broadcast buffer for the event bus and worker events.
pub const EVENT_BUS_CAPACITY: usize = 256;

// =============================================================================
// PUBLISH WORKER
// =============================================================================

/// Polling interval when the publish queue is empty.
pub const JOB_POLL_INTERVAL_MS: u64 = 500;

/// Maximum time a single publish may take.
pub const JOB_TIMEOUT_SECS: u64 = 300;

/// Finished publish jobs retained by queue cleanup.
pub const JOB_KEEP_FINISHED: i64 = 1000;
