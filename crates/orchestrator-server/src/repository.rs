//! §6 persisted-state repository contracts. Schema details are left to the
//! implementer per spec.md §1/§6; these are thin `sqlx`-backed SQLite repositories,
//! grounded on the teacher's inline-SQL style (`audit.rs`'s `sqlx::query`/
//! `query_as` calls) rather than a migration-framework schema.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use orchestrator_core::{AnalysisLevel, AnalystKind, Market, PredictionRecord, SessionDescriptor, SessionStatus, Signal};
use sqlx::SqlitePool;
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("not found")]
    NotFound,
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait SessionRepository: Send + Sync {
    async fn insert(&self, descriptor: &SessionDescriptor) -> RepositoryResult<()>;
    async fn update(&self, descriptor: &SessionDescriptor) -> RepositoryResult<()>;
    async fn get(&self, session_id: Uuid) -> RepositoryResult<SessionDescriptor>;
    async fn list_by_symbol(&self, symbol: &str, limit: i64) -> RepositoryResult<Vec<SessionDescriptor>>;
}

/// §6: "Session store: key = session_id, value = Session Descriptor + verdict
/// (nullable until complete). Indexed by (symbol, created_at)."
pub struct SqliteSessionRepository {
    pool: SqlitePool,
}

impl SqliteSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(pool: &SqlitePool) -> RepositoryResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS sessions (
                session_id TEXT PRIMARY KEY,
                symbol TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                market TEXT NOT NULL,
                level TEXT NOT NULL,
                selected_analysts TEXT NOT NULL,
                status TEXT NOT NULL,
                fingerprint TEXT NOT NULL,
                created_at TEXT NOT NULL,
                completed_at TEXT,
                result_json TEXT,
                diagnostic TEXT
            )",
        )
        .execute(pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_sessions_symbol_created ON sessions(symbol, created_at)")
            .execute(pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionRepository for SqliteSessionRepository {
    async fn insert(&self, descriptor: &SessionDescriptor) -> RepositoryResult<()> {
        self.update(descriptor).await
    }

    async fn update(&self, descriptor: &SessionDescriptor) -> RepositoryResult<()> {
        let result_json = match &descriptor.result {
            Some(verdict) => Some(serde_json::to_string(verdict)?),
            None => None,
        };
        let selected_json = serde_json::to_string(&descriptor.selected_analysts)?;
        sqlx::query(
            "INSERT INTO sessions (session_id, symbol, trade_date, market, level, selected_analysts, status, fingerprint, created_at, completed_at, result_json, diagnostic)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at,
                result_json = excluded.result_json,
                diagnostic = excluded.diagnostic",
        )
        .bind(descriptor.session_id.to_string())
        .bind(descriptor.symbol.clone())
        .bind(descriptor.trade_date.to_string())
        .bind(format!("{:?}", descriptor.market))
        .bind(format!("{:?}", descriptor.level))
        .bind(selected_json)
        .bind(status_str(descriptor.status))
        .bind(descriptor.fingerprint.clone())
        .bind(descriptor.created_at.to_rfc3339())
        .bind(descriptor.completed_at.map(|t| t.to_rfc3339()))
        .bind(result_json)
        .bind(descriptor.diagnostic.clone())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> RepositoryResult<SessionDescriptor> {
        let row: SessionRow = sqlx::query_as(
            "SELECT session_id, symbol, trade_date, market, level, selected_analysts, status, fingerprint, created_at, completed_at, result_json, diagnostic
             FROM sessions WHERE session_id = ?",
        )
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await?
        .ok_or(RepositoryError::NotFound)?;

        row_to_descriptor(row)
    }

    async fn list_by_symbol(&self, symbol: &str, limit: i64) -> RepositoryResult<Vec<SessionDescriptor>> {
        let rows: Vec<SessionRow> = sqlx::query_as(
            "SELECT session_id, symbol, trade_date, market, level, selected_analysts, status, fingerprint, created_at, completed_at, result_json, diagnostic
             FROM sessions WHERE symbol = ? ORDER BY created_at DESC LIMIT ?",
        )
        .bind(symbol.to_uppercase())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(row_to_descriptor).collect()
    }
}

type SessionRow = (
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
);

fn status_str(status: SessionStatus) -> &'static str {
    match status {
        SessionStatus::Running => "running",
        SessionStatus::Completed => "completed",
        SessionStatus::Failed => "failed",
        SessionStatus::Canceled => "canceled",
    }
}

fn row_to_descriptor(row: SessionRow) -> RepositoryResult<SessionDescriptor> {
    let (
        session_id,
        symbol,
        trade_date,
        market,
        level,
        selected_analysts_json,
        status,
        fingerprint,
        created_at,
        completed_at,
        result_json,
        diagnostic,
    ) = row;

    let selected_analysts: Vec<AnalystKind> = serde_json::from_str(&selected_analysts_json)?;

    let market = match market.as_str() {
        "US" => Market::US,
        "HK" => Market::HK,
        "CN" => Market::CN,
        other => return Err(RepositoryError::Database(sqlx::Error::Decode(format!("bad market {other}").into()))),
    };
    let level = if level.contains("L1") { AnalysisLevel::L1 } else { AnalysisLevel::L2 };
    let status = match status.as_str() {
        "running" => SessionStatus::Running,
        "completed" => SessionStatus::Completed,
        "failed" => SessionStatus::Failed,
        "canceled" => SessionStatus::Canceled,
        other => return Err(RepositoryError::Database(sqlx::Error::Decode(format!("bad status {other}").into()))),
    };

    Ok(SessionDescriptor {
        session_id: Uuid::parse_str(&session_id).map_err(|e| RepositoryError::Database(sqlx::Error::Decode(Box::new(e))))?,
        symbol,
        trade_date: trade_date
            .parse::<NaiveDate>()
            .map_err(|e| RepositoryError::Database(sqlx::Error::Decode(Box::new(e))))?,
        market,
        level,
        selected_analysts,
        status,
        fingerprint,
        created_at: created_at
            .parse::<DateTime<Utc>>()
            .map_err(|e| RepositoryError::Database(sqlx::Error::Decode(Box::new(e))))?,
        completed_at: completed_at
            .map(|t| t.parse::<DateTime<Utc>>())
            .transpose()
            .map_err(|e| RepositoryError::Database(sqlx::Error::Decode(Box::new(e))))?,
        result: result_json.map(|j| serde_json::from_str(&j)).transpose()?,
        diagnostic,
    })
}

/// §6: "Prediction log: append-only; outcome fields are updated later by an external
/// job." Only the write path is part of the core per §1/§4.9.
#[async_trait]
pub trait PredictionRepository: Send + Sync {
    async fn append(&self, record: &PredictionRecord) -> RepositoryResult<()>;
}

pub struct SqlitePredictionRepository {
    pool: SqlitePool,
}

impl SqlitePredictionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(pool: &SqlitePool) -> RepositoryResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS predictions (
                session_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                trade_date TEXT NOT NULL,
                signal TEXT NOT NULL,
                confidence REAL NOT NULL,
                entry_price REAL,
                target_price REAL,
                stop_loss REAL,
                agent_key TEXT NOT NULL,
                created_at TEXT NOT NULL,
                outcome TEXT,
                actual_return REAL,
                PRIMARY KEY (session_id, symbol, trade_date)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PredictionRepository for SqlitePredictionRepository {
    async fn append(&self, record: &PredictionRecord) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO predictions (session_id, symbol, trade_date, signal, confidence, entry_price, target_price, stop_loss, agent_key, created_at, outcome, actual_return)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(session_id, symbol, trade_date) DO NOTHING",
        )
        .bind(record.session_id.to_string())
        .bind(record.symbol.clone())
        .bind(record.trade_date.to_string())
        .bind(signal_str(record.signal))
        .bind(record.confidence)
        .bind(record.entry_price)
        .bind(record.target_price)
        .bind(record.stop_loss)
        .bind(record.agent_key.clone())
        .bind(record.created_at.to_rfc3339())
        .bind(record.outcome.clone())
        .bind(record.actual_return)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

fn signal_str(signal: Signal) -> &'static str {
    match signal {
        Signal::StrongBuy => "StrongBuy",
        Signal::Buy => "Buy",
        Signal::Hold => "Hold",
        Signal::Sell => "Sell",
        Signal::StrongSell => "StrongSell",
    }
}

/// §6 Prompt store: "per-role prompts with version history; writes create a new
/// version row, reads return the latest active." Grounded in
/// `original_source`'s `prompt_config_service.py` version-row-per-write pattern
/// (SPEC_FULL.md §3.1).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PromptVersion {
    pub role_key: String,
    pub version: i64,
    pub body: String,
    pub created_at: DateTime<Utc>,
    pub active: bool,
}

#[async_trait]
pub trait PromptRepository: Send + Sync {
    async fn write_version(&self, role_key: &str, body: &str) -> RepositoryResult<PromptVersion>;
    async fn active_version(&self, role_key: &str) -> RepositoryResult<Option<PromptVersion>>;
}

pub struct SqlitePromptRepository {
    pool: SqlitePool,
}

impl SqlitePromptRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init_schema(pool: &SqlitePool) -> RepositoryResult<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS prompt_versions (
                role_key TEXT NOT NULL,
                version INTEGER NOT NULL,
                body TEXT NOT NULL,
                created_at TEXT NOT NULL,
                active INTEGER NOT NULL,
                PRIMARY KEY (role_key, version)
            )",
        )
        .execute(pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl PromptRepository for SqlitePromptRepository {
    async fn write_version(&self, role_key: &str, body: &str) -> RepositoryResult<PromptVersion> {
        let next_version: (i64,) =
            sqlx::query_as("SELECT COALESCE(MAX(version), 0) + 1 FROM prompt_versions WHERE role_key = ?")
                .bind(role_key)
                .fetch_one(&self.pool)
                .await?;

        sqlx::query("UPDATE prompt_versions SET active = 0 WHERE role_key = ?")
            .bind(role_key)
            .execute(&self.pool)
            .await?;

        let created_at = Utc::now();
        sqlx::query(
            "INSERT INTO prompt_versions (role_key, version, body, created_at, active) VALUES (?, ?, ?, ?, 1)",
        )
        .bind(role_key)
        .bind(next_version.0)
        .bind(body)
        .bind(created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(PromptVersion { role_key: role_key.to_string(), version: next_version.0, body: body.to_string(), created_at, active: true })
    }

    async fn active_version(&self, role_key: &str) -> RepositoryResult<Option<PromptVersion>> {
        let row: Option<(i64, String, String)> = sqlx::query_as(
            "SELECT version, body, created_at FROM prompt_versions WHERE role_key = ? AND active = 1",
        )
        .bind(role_key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(version, body, created_at)| PromptVersion {
            role_key: role_key.to_string(),
            version,
            body,
            created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
            active: true,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::AnalystKind;

    async fn memory_pool() -> SqlitePool {
        // A single shared connection: a pooled sqlite ":memory:" database is private
        // per-connection, so more than one connection would each see an empty schema.
        sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap()
    }

    fn descriptor(session_id: Uuid, selected: Vec<AnalystKind>) -> SessionDescriptor {
        SessionDescriptor {
            session_id,
            symbol: "AAPL".to_string(),
            trade_date: NaiveDate::from_ymd_opt(2026, 1, 15).unwrap(),
            market: Market::US,
            level: AnalysisLevel::L2,
            selected_analysts: selected,
            status: SessionStatus::Running,
            fingerprint: "AAPL:2026-01-15:US:L2".to_string(),
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            diagnostic: None,
        }
    }

    #[tokio::test]
    async fn insert_then_get_round_trips_selected_analysts() {
        let pool = memory_pool().await;
        SqliteSessionRepository::init_schema(&pool).await.unwrap();
        let repo = SqliteSessionRepository::new(pool);

        let id = Uuid::new_v4();
        let selected = vec![AnalystKind::Market, AnalystKind::News];
        repo.insert(&descriptor(id, selected.clone())).await.unwrap();

        let fetched = repo.get(id).await.unwrap();
        assert_eq!(fetched.selected_analysts, selected);
        assert_eq!(fetched.status, SessionStatus::Running);
    }

    #[tokio::test]
    async fn update_after_completion_preserves_selected_analysts_and_sets_result() {
        let pool = memory_pool().await;
        SqliteSessionRepository::init_schema(&pool).await.unwrap();
        let repo = SqliteSessionRepository::new(pool);

        let id = Uuid::new_v4();
        let selected = vec![AnalystKind::Fundamentals];
        let mut d = descriptor(id, selected.clone());
        repo.insert(&d).await.unwrap();

        d.status = SessionStatus::Completed;
        d.completed_at = Some(Utc::now());
        repo.update(&d).await.unwrap();

        let fetched = repo.get(id).await.unwrap();
        assert_eq!(fetched.status, SessionStatus::Completed);
        assert_eq!(fetched.selected_analysts, selected);
        assert!(fetched.completed_at.is_some());
    }

    #[tokio::test]
    async fn get_missing_session_is_not_found() {
        let pool = memory_pool().await;
        SqliteSessionRepository::init_schema(&pool).await.unwrap();
        let repo = SqliteSessionRepository::new(pool);

        let err = repo.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound));
    }

    #[tokio::test]
    async fn prompt_write_version_deactivates_prior_and_read_returns_latest() {
        let pool = memory_pool().await;
        SqlitePromptRepository::init_schema(&pool).await.unwrap();
        let repo = SqlitePromptRepository::new(pool);

        repo.write_version("synthesis", "v1 body").await.unwrap();
        let second = repo.write_version("synthesis", "v2 body").await.unwrap();
        assert_eq!(second.version, 2);

        let active = repo.active_version("synthesis").await.unwrap().unwrap();
        assert_eq!(active.version, 2);
        assert_eq!(active.body, "v2 body");
    }
}
