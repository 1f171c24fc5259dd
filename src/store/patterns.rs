use super::{count_from_db, now_rfc3339};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};

pub const DEFAULT_AUTO_EXECUTE_THRESHOLD: u32 = 3;

/// Each rejection raises a pair's threshold by one, up to this many.
const MAX_REJECTION_PENALTY: u32 = 3;

/// Approval history for one `(action_type, sub_type)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalPattern {
    pub action_type: String,
    pub sub_type: String,
    pub consecutive_approvals: u32,
    pub total_approvals: u32,
    pub total_rejections: u32,
    pub last_approval_at: Option<String>,
    pub last_rejection_at: Option<String>,
    pub auto_execute_threshold: u32,
}

impl ApprovalPattern {
    /// Approved often enough in a row to count as routine.
    pub fn is_routine(&self) -> bool {
        self.consecutive_approvals >= self.auto_execute_threshold
    }

    pub fn has_history(&self) -> bool {
        self.total_approvals > 0 || self.total_rejections > 0
    }
}

/// Durable approval/rejection counters, one row per pair.
///
/// Every mutation is a single-row upsert; no cross-row transaction is needed.
#[derive(Debug, Clone)]
pub struct ApprovalPatternStore {
    pool: SqlitePool,
    base_threshold: u32,
}

impl ApprovalPatternStore {
    pub fn new(pool: SqlitePool, base_threshold: u32) -> Self {
        Self {
            pool,
            base_threshold: base_threshold.max(1),
        }
    }

    pub fn base_threshold(&self) -> u32 {
        self.base_threshold
    }

    /// `base + min(rejections, cap)`, the same formula the upserts apply.
    pub fn threshold_for(&self, total_rejections: u32) -> u32 {
        self.base_threshold + total_rejections.min(MAX_REJECTION_PENALTY)
    }

    pub async fn record_approval(&self, action_type: &str, sub_type: &str) -> Result<ApprovalPattern> {
        sqlx::query(
            "INSERT INTO approval_patterns (
                 action_type, sub_type, consecutive_approvals, total_approvals,
                 total_rejections, last_approval_at, last_rejection_at, auto_execute_threshold
             )
             VALUES ($1, $2, 1, 1, 0, $3, NULL, $4)
             ON CONFLICT(action_type, sub_type) DO UPDATE SET
                 consecutive_approvals = approval_patterns.consecutive_approvals + 1,
                 total_approvals = approval_patterns.total_approvals + 1,
                 last_approval_at = excluded.last_approval_at,
                 auto_execute_threshold = $4 + MIN(approval_patterns.total_rejections, $5)",
        )
        .bind(action_type)
        .bind(sub_type)
        .bind(now_rfc3339())
        .bind(i64::from(self.base_threshold))
        .bind(i64::from(MAX_REJECTION_PENALTY))
        .execute(&self.pool)
        .await
        .with_context(|| format!("record approval for {action_type}/{sub_type}"))?;

        self.require_pattern(action_type, sub_type).await
    }

    pub async fn record_rejection(
        &self,
        action_type: &str,
        sub_type: &str,
    ) -> Result<ApprovalPattern> {
        sqlx::query(
            "INSERT INTO approval_patterns (
                 action_type, sub_type, consecutive_approvals, total_approvals,
                 total_rejections, last_approval_at, last_rejection_at, auto_execute_threshold
             )
             VALUES ($1, $2, 0, 0, 1, NULL, $3, $4)
             ON CONFLICT(action_type, sub_type) DO UPDATE SET
                 consecutive_approvals = 0,
                 total_rejections = approval_patterns.total_rejections + 1,
                 last_rejection_at = excluded.last_rejection_at,
                 auto_execute_threshold = $5 + MIN(approval_patterns.total_rejections + 1, $6)",
        )
        .bind(action_type)
        .bind(sub_type)
        .bind(now_rfc3339())
        .bind(i64::from(self.threshold_for(1)))
        .bind(i64::from(self.base_threshold))
        .bind(i64::from(MAX_REJECTION_PENALTY))
        .execute(&self.pool)
        .await
        .with_context(|| format!("record rejection for {action_type}/{sub_type}"))?;

        self.require_pattern(action_type, sub_type).await
    }

    pub async fn get_pattern(
        &self,
        action_type: &str,
        sub_type: &str,
    ) -> Result<Option<ApprovalPattern>> {
        let row = sqlx::query(
            "SELECT action_type, sub_type, consecutive_approvals, total_approvals,
                    total_rejections, last_approval_at, last_rejection_at, auto_execute_threshold
             FROM approval_patterns
             WHERE action_type = $1 AND sub_type = $2",
        )
        .bind(action_type)
        .bind(sub_type)
        .fetch_optional(&self.pool)
        .await
        .context("query approval pattern")?;

        row.map(|r| map_pattern_row(&r)).transpose()
    }

    /// No recorded approval or rejection for this exact pair.
    pub async fn is_novel(&self, action_type: &str, sub_type: &str) -> Result<bool> {
        Ok(self
            .get_pattern(action_type, sub_type)
            .await?
            .is_none_or(|pattern| !pattern.has_history()))
    }

    pub async fn list_patterns(&self) -> Result<Vec<ApprovalPattern>> {
        let rows = sqlx::query(
            "SELECT action_type, sub_type, consecutive_approvals, total_approvals,
                    total_rejections, last_approval_at, last_rejection_at, auto_execute_threshold
             FROM approval_patterns
             ORDER BY action_type, sub_type",
        )
        .fetch_all(&self.pool)
        .await
        .context("list approval patterns")?;

        rows.iter().map(map_pattern_row).collect()
    }

    async fn require_pattern(&self, action_type: &str, sub_type: &str) -> Result<ApprovalPattern> {
        self.get_pattern(action_type, sub_type)
            .await?
            .with_context(|| format!("approval pattern {action_type}/{sub_type} missing after upsert"))
    }
}

fn map_pattern_row(row: &SqliteRow) -> Result<ApprovalPattern> {
    Ok(ApprovalPattern {
        action_type: row.try_get("action_type")?,
        sub_type: row.try_get("sub_type")?,
        consecutive_approvals: count_from_db(
            row.try_get("consecutive_approvals")?,
            "consecutive_approvals",
        )?,
        total_approvals: count_from_db(row.try_get("total_approvals")?, "total_approvals")?,
        total_rejections: count_from_db(row.try_get("total_rejections")?, "total_rejections")?,
        last_approval_at: row.try_get("last_approval_at")?,
        last_rejection_at: row.try_get("last_rejection_at")?,
        auto_execute_threshold: count_from_db(
            row.try_get("auto_execute_threshold")?,
            "auto_execute_threshold",
        )?,
    })
}

const REPLY_KEYS: &[&str] = &["in_reply_to", "inReplyTo", "reply_to"];

/// Finer-grained kind of request within one action type.
///
/// Derived only from structural payload fields. A `sub_type` key supplied by
/// the model is ignored, so a call cannot borrow another pair's history.
pub fn sub_type_for(action: &str, payload: &Value) -> String {
    let is_reply = REPLY_KEYS
        .iter()
        .any(|key| payload.get(*key).is_some_and(|v| !v.is_null()));

    match action {
        "email.draft" if is_reply => "reply",
        "email.draft" => "new_draft",
        "email.send" if is_reply => "reply",
        "email.send" => "new_message",
        _ => "default",
    }
    .to_string()
}
