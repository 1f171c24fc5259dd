use super::now_rfc3339;
use crate::error::{EscalationError, SemblanceError};
use crate::security::autonomy::AutonomyTier;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqlitePool, SqliteRow};
use std::str::FromStr;
use uuid::Uuid;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum EscalationStatus {
    Active,
    Accepted,
    Dismissed,
}

/// Suggestion to raise one domain's tier, offered once per `(domain, tier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPrompt {
    pub id: String,
    pub domain: String,
    pub current_tier: AutonomyTier,
    pub suggested_tier: AutonomyTier,
    pub reason: String,
    pub status: EscalationStatus,
    pub created_at: String,
    pub resolved_at: Option<String>,
}

#[derive(Debug, Clone)]
pub struct NewEscalation {
    pub domain: String,
    pub current_tier: AutonomyTier,
    pub suggested_tier: AutonomyTier,
    pub reason: String,
}

const PROMPT_COLUMNS: &str =
    "id, domain, current_tier, suggested_tier, reason, status, created_at, resolved_at";

#[derive(Debug, Clone)]
pub struct EscalationStore {
    pool: SqlitePool,
}

impl EscalationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a prompt unless the domain was already offered this tier.
    ///
    /// Returns the prompt only when it was newly created, so a dismissed
    /// suggestion is never repeated.
    pub async fn offer(&self, new: NewEscalation) -> Result<Option<EscalationPrompt>> {
        let prompt = EscalationPrompt {
            id: Uuid::new_v4().to_string(),
            domain: new.domain,
            current_tier: new.current_tier,
            suggested_tier: new.suggested_tier,
            reason: new.reason,
            status: EscalationStatus::Active,
            created_at: now_rfc3339(),
            resolved_at: None,
        };

        let result = sqlx::query(
            "INSERT INTO escalation_prompts (
                 id, domain, current_tier, suggested_tier, reason, status, created_at
             )
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT(domain, suggested_tier) DO NOTHING",
        )
        .bind(&prompt.id)
        .bind(&prompt.domain)
        .bind(prompt.current_tier.to_string())
        .bind(prompt.suggested_tier.to_string())
        .bind(&prompt.reason)
        .bind(prompt.status.to_string())
        .bind(&prompt.created_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("offer escalation for {}", prompt.domain))?;

        Ok((result.rows_affected() > 0).then_some(prompt))
    }

    /// Prompts still waiting for an answer, oldest first.
    pub async fn list_active(&self) -> Result<Vec<EscalationPrompt>> {
        let rows = sqlx::query(&format!(
            "SELECT {PROMPT_COLUMNS}
             FROM escalation_prompts
             WHERE status = 'active'
             ORDER BY created_at ASC, rowid ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("list active escalations")?;

        rows.iter().map(map_prompt_row).collect()
    }

    pub async fn get(&self, id: &str) -> Result<Option<EscalationPrompt>> {
        let row = sqlx::query(&format!(
            "SELECT {PROMPT_COLUMNS} FROM escalation_prompts WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("query escalation by id")?;

        row.map(|r| map_prompt_row(&r)).transpose()
    }

    /// `active → accepted` or `active → dismissed`, exactly once.
    pub async fn resolve(
        &self,
        id: &str,
        accepted: bool,
    ) -> crate::error::Result<EscalationPrompt> {
        let status = if accepted {
            EscalationStatus::Accepted
        } else {
            EscalationStatus::Dismissed
        };
        let result = sqlx::query(
            "UPDATE escalation_prompts
             SET status = $1, resolved_at = $2
             WHERE id = $3 AND status = 'active'",
        )
        .bind(status.to_string())
        .bind(now_rfc3339())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("resolve escalation")?;

        let current = self.get(id).await?;
        match current {
            Some(prompt) if result.rows_affected() > 0 => Ok(prompt),
            Some(prompt) => Err(SemblanceError::Escalation(EscalationError::AlreadyResolved {
                id: id.to_string(),
                status: prompt.status,
            })),
            None => Err(SemblanceError::Escalation(EscalationError::NotFound {
                id: id.to_string(),
            })),
        }
    }
}

fn map_prompt_row(row: &SqliteRow) -> Result<EscalationPrompt> {
    let current_raw: String = row.try_get("current_tier")?;
    let suggested_raw: String = row.try_get("suggested_tier")?;
    let status_raw: String = row.try_get("status")?;

    Ok(EscalationPrompt {
        id: row.try_get("id")?,
        domain: row.try_get("domain")?,
        current_tier: AutonomyTier::from_str(&current_raw)
            .with_context(|| format!("unknown autonomy tier: {current_raw}"))?,
        suggested_tier: AutonomyTier::from_str(&suggested_raw)
            .with_context(|| format!("unknown autonomy tier: {suggested_raw}"))?,
        reason: row.try_get("reason")?,
        status: EscalationStatus::from_str(&status_raw)
            .with_context(|| format!("unknown escalation status: {status_raw}"))?,
        created_at: row.try_get("created_at")?,
        resolved_at: row.try_get("resolved_at")?,
    })
}
