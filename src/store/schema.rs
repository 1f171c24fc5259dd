use anyhow::{Context, Result};
use sqlx::SqlitePool;

pub(crate) const SCHEMA_META_TABLE: &str = "
CREATE TABLE IF NOT EXISTS semblance_schema_meta (
    key   TEXT PRIMARY KEY,
    value TEXT NOT NULL
)";
pub(crate) const SCHEMA_VERSION_KEY: &str = "schema_version";
const SCHEMA_VERSION: u32 = 1;

const TRUST_TABLES: &[&str] = &[
    "pending_actions",
    "approval_patterns",
    "conversation_turns",
    "escalation_prompts",
];

/// Create the trust-layer tables, refusing databases written by another
/// schema version.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    let fresh = ensure_schema_version(pool).await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pending_actions (
             id          TEXT PRIMARY KEY,
             action      TEXT NOT NULL,
             sub_type    TEXT NOT NULL,
             payload     TEXT NOT NULL,
             reasoning   TEXT,
             domain      TEXT NOT NULL,
             tier        TEXT NOT NULL,
             status      TEXT NOT NULL
                         CHECK (status IN ('pending_approval', 'executed', 'rejected')),
             claim_token TEXT,
             claimed_at  TEXT,
             created_at  TEXT NOT NULL,
             resolved_at TEXT,
             undone_at   TEXT
         )",
    )
    .execute(pool)
    .await
    .context("create pending_actions table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_pending_actions_status
             ON pending_actions(status, created_at)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS approval_patterns (
             action_type            TEXT NOT NULL,
             sub_type               TEXT NOT NULL,
             consecutive_approvals  INTEGER NOT NULL DEFAULT 0,
             total_approvals        INTEGER NOT NULL DEFAULT 0,
             total_rejections       INTEGER NOT NULL DEFAULT 0,
             last_approval_at       TEXT,
             last_rejection_at      TEXT,
             auto_execute_threshold INTEGER NOT NULL,
             PRIMARY KEY (action_type, sub_type)
         )",
    )
    .execute(pool)
    .await
    .context("create approval_patterns table")?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS conversation_turns (
             seq             INTEGER PRIMARY KEY AUTOINCREMENT,
             id              TEXT NOT NULL UNIQUE,
             conversation_id TEXT NOT NULL,
             role            TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
             content         TEXT NOT NULL,
             created_at      TEXT NOT NULL
         )",
    )
    .execute(pool)
    .await
    .context("create conversation_turns table")?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversation_turns_conversation
             ON conversation_turns(conversation_id, seq)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS escalation_prompts (
             id             TEXT PRIMARY KEY,
             domain         TEXT NOT NULL,
             current_tier   TEXT NOT NULL,
             suggested_tier TEXT NOT NULL,
             reason         TEXT NOT NULL,
             status         TEXT NOT NULL
                            CHECK (status IN ('active', 'accepted', 'dismissed')),
             created_at     TEXT NOT NULL,
             resolved_at    TEXT,
             UNIQUE (domain, suggested_tier)
         )",
    )
    .execute(pool)
    .await
    .context("create escalation_prompts table")?;

    if fresh {
        sqlx::query("INSERT INTO semblance_schema_meta (key, value) VALUES ($1, $2)")
            .bind(SCHEMA_VERSION_KEY)
            .bind(SCHEMA_VERSION.to_string())
            .execute(pool)
            .await
            .context("persist schema version")?;
    }

    Ok(())
}

/// Returns `true` when the database carries no version yet and the tables
/// still need to be stamped.
async fn ensure_schema_version(pool: &SqlitePool) -> Result<bool> {
    sqlx::query(SCHEMA_META_TABLE)
        .execute(pool)
        .await
        .context("create semblance_schema_meta table")?;

    let stored_version: Option<(String,)> =
        sqlx::query_as("SELECT value FROM semblance_schema_meta WHERE key = $1")
            .bind(SCHEMA_VERSION_KEY)
            .fetch_optional(pool)
            .await
            .context("load schema version")?;

    if let Some((value,)) = stored_version {
        let parsed = value
            .parse::<u32>()
            .with_context(|| format!("invalid schema version value: {value}"))?;
        anyhow::ensure!(
            parsed == SCHEMA_VERSION,
            "incompatible schema version: stored={parsed}, expected={SCHEMA_VERSION}"
        );
        return Ok(false);
    }

    let placeholders = TRUST_TABLES
        .iter()
        .map(|name| format!("'{name}'"))
        .collect::<Vec<_>>()
        .join(", ");
    let legacy_table_count: (i64,) = sqlx::query_as(&format!(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN ({placeholders})"
    ))
    .fetch_one(pool)
    .await
    .context("detect unversioned tables")?;

    anyhow::ensure!(
        legacy_table_count.0 == 0,
        "database has trust tables without schema version metadata; refusing to reuse it"
    );

    Ok(true)
}
