//! Best-effort schema upgrades.
//!
//! Upgrade batches run statement by statement outside a transaction. A
//! failing statement is logged and recorded, and the batch carries on with
//! the next one, so a partially applied schema converges on rerun.

use std::time::Instant;

use sqlx::{Pool, Postgres};
use tracing::{info, warn};

/// Outcome of a best-effort upgrade batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpgradeReport {
    /// Number of statements that succeeded.
    pub applied: usize,
    /// Failed statements with their error messages, in execution order.
    pub failed: Vec<(String, String)>,
}

impl UpgradeReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.applied + self.failed.len()
    }
}

/// Split an upgrade script into statements on `;` line endings.
///
/// Blank statements and `--` comment lines are dropped.
pub fn split_statements(script: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    for line in script.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("--") {
            continue;
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(line);
        if trimmed.ends_with(';') {
            let stmt = current.trim().trim_end_matches(';').trim().to_string();
            if !stmt.is_empty() {
                statements.push(stmt);
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        statements.push(rest.to_string());
    }
    statements
}

/// Execute every statement, logging and collecting failures instead of aborting.
pub async fn run_best_effort<S: AsRef<str>>(pool: &Pool<Postgres>, statements: &[S]) -> UpgradeReport {
    let start = Instant::now();
    let mut report = UpgradeReport::default();

    for stmt in statements {
        let stmt = stmt.as_ref();
        match sqlx::query(stmt).execute(pool).await {
            Ok(_) => report.applied += 1,
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "upgrade",
                    op = "execute",
                    statement = stmt,
                    error = %e,
                    "Upgrade statement failed, continuing"
                );
                report.failed.push((stmt.to_string(), e.to_string()));
            }
        }
    }

    info!(
        subsystem = "db",
        component = "upgrade",
        op = "run",
        applied = report.applied,
        failed = report.failed.len(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Upgrade batch finished"
    );
    report
}
