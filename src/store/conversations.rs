use super::actions::{ClaimToken, Disposition, NewAction, PendingAction, insert_action};
use super::now_rfc3339;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqlitePool, SqliteRow};
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
pub enum TurnRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: String,
    pub conversation_id: String,
    pub role: TurnRole,
    pub content: String,
    pub created_at: String,
}

/// What one committed message turn wrote.
#[derive(Debug)]
pub struct CommittedTurn {
    pub actions: Vec<(PendingAction, Option<ClaimToken>)>,
    pub user: ConversationTurn,
    pub assistant: ConversationTurn,
}

async fn insert_turn(
    conn: &mut SqliteConnection,
    conversation_id: &str,
    role: TurnRole,
    content: &str,
) -> Result<ConversationTurn> {
    let turn = ConversationTurn {
        id: Uuid::new_v4().to_string(),
        conversation_id: conversation_id.to_string(),
        role,
        content: content.to_string(),
        created_at: now_rfc3339(),
    };

    sqlx::query(
        "INSERT INTO conversation_turns (id, conversation_id, role, content, created_at)
         VALUES ($1, $2, $3, $4, $5)",
    )
    .bind(&turn.id)
    .bind(&turn.conversation_id)
    .bind(turn.role.to_string())
    .bind(&turn.content)
    .bind(&turn.created_at)
    .execute(&mut *conn)
    .await
    .with_context(|| format!("insert {role} turn"))?;

    Ok(turn)
}

/// Append-only conversation log. Turn order is insertion order.
#[derive(Debug, Clone)]
pub struct ConversationStore {
    pool: SqlitePool,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn new_conversation_id() -> String {
        Uuid::new_v4().to_string()
    }

    #[cfg(test)]
    pub async fn append_turn(
        &self,
        conversation_id: &str,
        role: TurnRole,
        content: &str,
    ) -> Result<ConversationTurn> {
        let mut conn = self.pool.acquire().await.context("acquire connection")?;
        insert_turn(&mut conn, conversation_id, role, content).await
    }

    /// Persist one message turn in a single transaction: the user message,
    /// the assistant reply and every action the turn decided on.
    ///
    /// Either all of it lands or none of it does. Actions staged as
    /// [`Disposition::Execute`] come back with their claim.
    pub async fn commit_turn(
        &self,
        conversation_id: &str,
        user_text: &str,
        assistant_text: &str,
        actions: Vec<(NewAction, Disposition)>,
    ) -> Result<CommittedTurn> {
        let mut tx = self.pool.begin().await.context("begin turn")?;

        let mut staged = Vec::with_capacity(actions.len());
        for (new, disposition) in actions {
            staged.push(insert_action(&mut *tx, new, disposition).await?);
        }
        let user = insert_turn(&mut *tx, conversation_id, TurnRole::User, user_text).await?;
        let assistant =
            insert_turn(&mut *tx, conversation_id, TurnRole::Assistant, assistant_text).await?;

        tx.commit().await.context("commit turn")?;
        Ok(CommittedTurn {
            actions: staged,
            user,
            assistant,
        })
    }

    /// Rewrite a stored turn's text, e.g. once execution results are known.
    pub async fn replace_content(&self, turn_id: &str, content: &str) -> Result<()> {
        sqlx::query("UPDATE conversation_turns SET content = $1 WHERE id = $2")
            .bind(content)
            .bind(turn_id)
            .execute(&self.pool)
            .await
            .context("update conversation turn")?;
        Ok(())
    }

    /// Turns of `conversation_id` in insertion order.
    ///
    /// With `limit`, only the most recent `limit` turns are returned (still
    /// oldest first).
    pub async fn get_turns(
        &self,
        conversation_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<ConversationTurn>> {
        let rows = match limit {
            Some(limit) => {
                sqlx::query(
                    "SELECT id, conversation_id, role, content, created_at FROM (
                         SELECT seq, id, conversation_id, role, content, created_at
                         FROM conversation_turns
                         WHERE conversation_id = $1
                         ORDER BY seq DESC
                         LIMIT $2
                     )
                     ORDER BY seq ASC",
                )
                .bind(conversation_id)
                .bind(i64::from(limit))
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT id, conversation_id, role, content, created_at
                     FROM conversation_turns
                     WHERE conversation_id = $1
                     ORDER BY seq ASC",
                )
                .bind(conversation_id)
                .fetch_all(&self.pool)
                .await
            }
        }
        .context("load conversation turns")?;

        rows.iter().map(map_turn_row).collect()
    }
}

fn map_turn_row(row: &SqliteRow) -> Result<ConversationTurn> {
    let role_raw: String = row.try_get("role")?;
    Ok(ConversationTurn {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        role: TurnRole::from_str(&role_raw)
            .with_context(|| format!("unknown turn role: {role_raw}"))?,
        content: row.try_get("content")?,
        created_at: row.try_get("created_at")?,
    })
}
