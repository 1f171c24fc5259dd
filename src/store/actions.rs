use super::now_rfc3339;
use crate::error::{ActionError, SemblanceError};
use crate::security::autonomy::AutonomyTier;
use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

/// Lifecycle of a side-effecting action.
///
/// `pending_approval → executed` and `pending_approval → rejected` are the only
/// legal transitions.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ActionStatus {
    PendingApproval,
    Executed,
    Rejected,
}

impl ActionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Executed | Self::Rejected)
    }
}

/// One side-effecting tool invocation and its decision record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub id: String,
    pub action: String,
    pub sub_type: String,
    pub payload: Value,
    pub reasoning: Option<String>,
    pub domain: String,
    /// Tier in effect when the decision was made.
    pub tier: AutonomyTier,
    pub status: ActionStatus,
    pub created_at: String,
    pub resolved_at: Option<String>,
    /// Set once the gateway reversed an executed action. The status stays `executed`.
    pub undone_at: Option<String>,
}

/// Fields supplied by the caller when recording a new action.
#[derive(Debug, Clone)]
pub struct NewAction {
    pub action: String,
    pub sub_type: String,
    pub payload: Value,
    pub reasoning: Option<String>,
    pub domain: String,
    pub tier: AutonomyTier,
}

/// How a freshly decided action enters the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// `pending_approval`, waiting for a human.
    Queue,
    /// `pending_approval` and already claimed for immediate execution.
    Execute,
    /// Straight to `rejected`, refused by policy.
    Reject,
}

/// Exclusive right to execute one pending action.
///
/// Obtained through [`ActionStore::claim`] (or an [`Disposition::Execute`]
/// insert) and consumed by [`ActionStore::complete`] or [`ActionStore::release`].
#[derive(Debug)]
#[must_use = "a claim must be completed or released"]
pub struct ClaimToken {
    action_id: String,
    token: String,
}

impl ClaimToken {
    fn new(action_id: &str) -> Self {
        Self {
            action_id: action_id.to_string(),
            token: Uuid::new_v4().to_string(),
        }
    }

    pub fn action_id(&self) -> &str {
        &self.action_id
    }
}

/// Proof that this caller marked an executed action as undone.
#[derive(Debug)]
#[must_use = "a failed undo must be cleared"]
pub struct UndoMark {
    action_id: String,
    stamp: String,
}

const ACTION_COLUMNS: &str = "id, action, sub_type, payload, reasoning, domain, tier, status, \
     created_at, resolved_at, undone_at";

/// Fixed-width UTC stamp so claim ages compare correctly as text.
fn lease_stamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Insert one new action on `conn`, claimed when it is about to run.
///
/// Takes a bare connection so a message turn can write its actions and its
/// conversation turns in one transaction.
pub(crate) async fn insert_action(
    conn: &mut SqliteConnection,
    new: NewAction,
    disposition: Disposition,
) -> Result<(PendingAction, Option<ClaimToken>)> {
    let id = Uuid::new_v4().to_string();
    let created_at = now_rfc3339();
    let status = match disposition {
        Disposition::Queue | Disposition::Execute => ActionStatus::PendingApproval,
        Disposition::Reject => ActionStatus::Rejected,
    };
    let claim = (disposition == Disposition::Execute).then(|| ClaimToken::new(&id));
    let claimed_at = claim.as_ref().map(|_| lease_stamp(Utc::now()));
    let resolved_at = status.is_terminal().then(|| created_at.clone());
    let payload_json = serde_json::to_string(&new.payload).context("serialize payload")?;

    sqlx::query(
        "INSERT INTO pending_actions (
             id, action, sub_type, payload, reasoning, domain, tier, status,
             claim_token, claimed_at, created_at, resolved_at
         )
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
    )
    .bind(&id)
    .bind(&new.action)
    .bind(&new.sub_type)
    .bind(&payload_json)
    .bind(new.reasoning.as_deref())
    .bind(&new.domain)
    .bind(new.tier.to_string())
    .bind(status.to_string())
    .bind(claim.as_ref().map(|c| c.token.as_str()))
    .bind(claimed_at.as_deref())
    .bind(&created_at)
    .bind(resolved_at.as_deref())
    .execute(&mut *conn)
    .await
    .with_context(|| format!("insert action {}", new.action))?;

    let action = PendingAction {
        id,
        action: new.action,
        sub_type: new.sub_type,
        payload: new.payload,
        reasoning: new.reasoning,
        domain: new.domain,
        tier: new.tier,
        status,
        created_at,
        resolved_at,
        undone_at: None,
    };
    Ok((action, claim))
}

/// Durable record of actions awaiting, or having received, a decision.
#[derive(Debug, Clone)]
pub struct ActionStore {
    pool: SqlitePool,
}

impl ActionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Persist a new action awaiting approval outside a message turn.
    #[cfg(test)]
    pub async fn queue(&self, new: NewAction) -> Result<PendingAction> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        let (action, _) = insert_action(&mut conn, new, Disposition::Queue).await?;
        Ok(action)
    }

    pub async fn get(&self, id: &str) -> Result<Option<PendingAction>> {
        let row = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS} FROM pending_actions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("query action by id")?;

        row.map(|r| map_action_row(&r)).transpose()
    }

    /// Actions awaiting a decision, oldest first.
    pub async fn list_pending(&self) -> Result<Vec<PendingAction>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS}
             FROM pending_actions
             WHERE status = 'pending_approval'
             ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("list pending actions")?;

        rows.iter().map(map_action_row).collect()
    }

    /// Every action regardless of status, newest first.
    pub async fn list_recent(&self, limit: u32, offset: u32) -> Result<Vec<PendingAction>> {
        let rows = sqlx::query(&format!(
            "SELECT {ACTION_COLUMNS}
             FROM pending_actions
             ORDER BY created_at DESC, rowid DESC
             LIMIT $1 OFFSET $2"
        ))
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.pool)
        .await
        .context("list recent actions")?;

        rows.iter().map(map_action_row).collect()
    }

    /// Atomically take the exclusive right to execute `id`.
    ///
    /// Succeeds only while the row is `pending_approval` and unclaimed, so two
    /// concurrent approvals can never both reach the transport.
    pub async fn claim(&self, id: &str) -> crate::error::Result<ClaimToken> {
        let claim = ClaimToken::new(id);
        let result = sqlx::query(
            "UPDATE pending_actions
             SET claim_token = $1, claimed_at = $2
             WHERE id = $3 AND status = 'pending_approval' AND claim_token IS NULL",
        )
        .bind(&claim.token)
        .bind(lease_stamp(Utc::now()))
        .bind(id)
        .execute(&self.pool)
        .await
        .context("claim action")?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id).await);
        }
        Ok(claim)
    }

    /// Mark a claimed action `executed` after its side effect succeeded.
    pub async fn complete(&self, claim: ClaimToken) -> crate::error::Result<PendingAction> {
        let result = sqlx::query(
            "UPDATE pending_actions
             SET status = 'executed', claim_token = NULL, claimed_at = NULL, resolved_at = $1
             WHERE id = $2 AND claim_token = $3",
        )
        .bind(now_rfc3339())
        .bind(&claim.action_id)
        .bind(&claim.token)
        .execute(&self.pool)
        .await
        .context("complete action")?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(&claim.action_id).await);
        }
        self.require(&claim.action_id).await
    }

    /// Give a claim back, leaving the action `pending_approval` for a retry.
    pub async fn release(&self, claim: ClaimToken) -> Result<PendingAction> {
        sqlx::query(
            "UPDATE pending_actions
             SET claim_token = NULL, claimed_at = NULL
             WHERE id = $1 AND claim_token = $2",
        )
        .bind(&claim.action_id)
        .bind(&claim.token)
        .execute(&self.pool)
        .await
        .context("release action claim")?;

        self.get(&claim.action_id)
            .await?
            .with_context(|| format!("action {} vanished after release", claim.action_id))
    }

    /// `pending_approval → rejected`, refused while another caller holds a claim.
    pub async fn reject(&self, id: &str) -> crate::error::Result<PendingAction> {
        let result = sqlx::query(
            "UPDATE pending_actions
             SET status = 'rejected', resolved_at = $1
             WHERE id = $2 AND status = 'pending_approval' AND claim_token IS NULL",
        )
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("reject action")?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id).await);
        }
        self.require(id).await
    }

    /// Clear claims older than `lease` so actions abandoned by a crash can be
    /// re-approved.
    ///
    /// A claim younger than the lease may belong to a live process still
    /// waiting on the gateway and is left alone.
    pub async fn release_stale_claims(&self, lease: Duration) -> Result<u64> {
        let lease = chrono::Duration::from_std(lease).context("claim lease out of range")?;
        let cutoff = lease_stamp(Utc::now() - lease);
        let result = sqlx::query(
            "UPDATE pending_actions
             SET claim_token = NULL, claimed_at = NULL
             WHERE status = 'pending_approval'
               AND claim_token IS NOT NULL
               AND (claimed_at IS NULL OR claimed_at <= $1)",
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .context("release stale claims")?;

        Ok(result.rows_affected())
    }

    /// Flag an executed action as undone before asking the gateway to reverse it.
    ///
    /// Only one caller can hold the mark, so an undo is sent at most once.
    pub async fn mark_undone(&self, id: &str) -> crate::error::Result<UndoMark> {
        let mark = UndoMark {
            action_id: id.to_string(),
            stamp: now_rfc3339(),
        };
        let result = sqlx::query(
            "UPDATE pending_actions
             SET undone_at = $1
             WHERE id = $2 AND status = 'executed' AND undone_at IS NULL",
        )
        .bind(&mark.stamp)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("mark action undone")?;

        if result.rows_affected() == 0 {
            return Err(match self.get(id).await {
                Ok(Some(action)) if action.undone_at.is_some() => {
                    SemblanceError::Action(ActionError::AlreadyUndone { id: id.to_string() })
                }
                Ok(Some(action)) => SemblanceError::Action(ActionError::InvalidState {
                    id: id.to_string(),
                    status: action.status,
                }),
                Ok(None) => SemblanceError::Action(ActionError::NotFound { id: id.to_string() }),
                Err(err) => SemblanceError::Store(err),
            });
        }
        Ok(mark)
    }

    /// Confirm an undo mark once the gateway reversed the action.
    pub async fn finish_undo(&self, mark: UndoMark) -> crate::error::Result<PendingAction> {
        self.require(&mark.action_id).await
    }

    /// Drop an undo mark after the gateway refused the undo.
    pub async fn clear_undo(&self, mark: UndoMark) -> Result<()> {
        sqlx::query(
            "UPDATE pending_actions
             SET undone_at = NULL
             WHERE id = $1 AND undone_at = $2",
        )
        .bind(&mark.action_id)
        .bind(&mark.stamp)
        .execute(&self.pool)
        .await
        .context("clear undo mark")?;
        Ok(())
    }

    async fn require(&self, id: &str) -> crate::error::Result<PendingAction> {
        self.get(id).await?.ok_or_else(|| {
            SemblanceError::Action(ActionError::NotFound { id: id.to_string() })
        })
    }

    /// Explain why a conditional update matched no row.
    async fn transition_error(&self, id: &str) -> SemblanceError {
        match self.get(id).await {
            Ok(Some(action)) => SemblanceError::Action(ActionError::InvalidState {
                id: id.to_string(),
                status: action.status,
            }),
            Ok(None) => SemblanceError::Action(ActionError::NotFound { id: id.to_string() }),
            Err(err) => SemblanceError::Store(err),
        }
    }
}

fn map_action_row(row: &SqliteRow) -> Result<PendingAction> {
    let payload_raw: String = row.try_get("payload")?;
    let tier_raw: String = row.try_get("tier")?;
    let status_raw: String = row.try_get("status")?;

    Ok(PendingAction {
        id: row.try_get("id")?,
        action: row.try_get("action")?,
        sub_type: row.try_get("sub_type")?,
        payload: serde_json::from_str(&payload_raw).context("deserialize action payload")?,
        reasoning: row.try_get("reasoning")?,
        domain: row.try_get("domain")?,
        tier: AutonomyTier::from_str(&tier_raw)
            .with_context(|| format!("unknown autonomy tier: {tier_raw}"))?,
        status: ActionStatus::from_str(&status_raw)
            .with_context(|| format!("unknown action status: {status_raw}"))?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
        undone_at: row.try_get("undone_at")?,
    })
}
