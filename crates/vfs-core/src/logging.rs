//! Structured logging field name constants.
//!
//! All crates use these names for tracing fields so log aggregation can query
//! by the same keys across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Publish failed, worker cannot reach storage |
//! | WARN  | Role violation, skipped upgrade statement, retryable failure |
//! | INFO  | Startup, shutdown, publish completions, history purges |
//! | DEBUG | Resource operations, queue decisions |
//! | TRACE | Per-resource iteration inside a publish |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "core", "db", "jobs", "publisher"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "resources", "publish", "url_names", "worker", "manager"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "create", "move", "publish", "claim_next"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

pub const STRUCTURE_ID: &str = "structure_id";

pub const ROOT_PATH: &str = "root_path";

pub const HISTORY_ID: &str = "history_id";

pub const JOB_ID: &str = "job_id";

pub const USER: &str = "user";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of resources covered by a publish.
pub const RESOURCE_COUNT: &str = "resource_count";

/// Number of history entries removed by retention.
pub const PURGED: &str = "purged";

// ─── Outcome fields ────────────────────────────────────────────────────────

pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_field_names_are_unique() {
        let fields = [
            SUBSYSTEM,
            COMPONENT,
            OPERATION,
            STRUCTURE_ID,
            ROOT_PATH,
            HISTORY_ID,
            JOB_ID,
            USER,
            DURATION_MS,
            RESOURCE_COUNT,
            PURGED,
            SUCCESS,
            ERROR_MSG,
        ];
        let unique: HashSet<&str> = fields.iter().copied().collect();
        assert_eq!(unique.len(), fields.len());
    }

    #[test]
    fn test_operation_field_is_short() {
        assert_eq!(OPERATION, "op");
        assert_eq!(ERROR_MSG, "error");
    }
}
