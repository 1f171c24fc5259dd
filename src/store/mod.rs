//! Local relational store for the trust layer.
//!
//! Pending actions, approval pattern counters and conversation turns back the
//! trust layer; escalation prompts ride alongside. Every mutation is a single
//! short auto-committing statement, or one small transaction for a message
//! turn, so no lock is held across an await on external I/O.

pub mod actions;
pub mod conversations;
pub mod escalations;
pub mod patterns;
pub mod schema;

pub use actions::{
    ActionStatus, ActionStore, ClaimToken, Disposition, NewAction, PendingAction, UndoMark,
};
pub use conversations::{CommittedTurn, ConversationStore, ConversationTurn, TurnRole};
pub use escalations::{EscalationPrompt, EscalationStatus, EscalationStore, NewEscalation};
pub use patterns::{
    ApprovalPattern, ApprovalPatternStore, DEFAULT_AUTO_EXECUTE_THRESHOLD, sub_type_for,
};

use anyhow::{Context, Result};
use sqlx::SqlitePool;
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;

/// Open (or create) the database file at `db_path` and run migrations.
pub async fn open_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create store directory: {}", parent.display()))?;
    }

    let url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .connect(&url)
        .await
        .with_context(|| format!("Failed to open store: {}", db_path.display()))?;

    schema::migrate(&pool).await?;
    Ok(pool)
}

/// Single-connection in-memory database, migrated. Used by tests and dry runs.
pub async fn open_in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("open in-memory store")?;
    schema::migrate(&pool).await?;
    Ok(pool)
}

pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

pub(crate) fn count_from_db(value: i64, column: &str) -> Result<u32> {
    u32::try_from(value).with_context(|| format!("{column} out of range: {value}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_pool_creates_parent_directory_and_persists() {
        let temp = tempfile::TempDir::new().unwrap();
        let db_path = temp.path().join("nested").join("semblance.db");

        {
            let pool = open_pool(&db_path).await.unwrap();
            ApprovalPatternStore::new(pool.clone(), DEFAULT_AUTO_EXECUTE_THRESHOLD)
                .record_approval("email.archive", "default")
                .await
                .unwrap();
            pool.close().await;
        }

        assert!(db_path.exists());
        let reopened = open_pool(&db_path).await.unwrap();
        let pattern = ApprovalPatternStore::new(reopened, DEFAULT_AUTO_EXECUTE_THRESHOLD)
            .get_pattern("email.archive", "default")
            .await
            .unwrap()
            .expect("pattern survives restart");
        assert_eq!(pattern.total_approvals, 1);
    }

    #[test]
    fn count_from_db_rejects_negative() {
        assert!(count_from_db(-1, "total_approvals").is_err());
        assert_eq!(count_from_db(7, "total_approvals").unwrap(), 7);
    }
}
