use crate::errors::ApiError;
use crate::models::{TransactionKind, TransactionRecord, TransactionStatus};
use chrono::{DateTime, Utc};
use fitness_core::types::Address;
use sqlx::{sqlite::SqlitePoolOptions, Executor, Pool, Row, Sqlite, Transaction};
use uuid::Uuid;

pub type Db = Pool<Sqlite>;

pub async fn connect(db_url: &str) -> Result<Db, ApiError> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .map_err(|_| ApiError::Internal)
}

pub async fn init_schema(db: &Db) -> Result<(), ApiError> {
    // Append-only journal of engine transactions. Holds only public metadata:
    // who submitted, when, and whether it committed. Never ciphertext contents.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS transactions (
  seq INTEGER PRIMARY KEY AUTOINCREMENT,
  id TEXT NOT NULL UNIQUE,
  created_at TEXT NOT NULL,
  kind TEXT NOT NULL,
  caller TEXT NOT NULL,
  status TEXT NOT NULL,
  detail_json TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS transactions_by_caller ON transactions (caller, seq);
"#,
    )
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

/// Open a journal transaction; its entries become visible only on commit.
pub async fn begin(db: &Db) -> Result<Transaction<'static, Sqlite>, ApiError> {
    db.begin().await.map_err(|_| ApiError::Internal)
}

pub async fn insert_transaction<'e, E>(
    db: E,
    id: Uuid,
    kind: TransactionKind,
    caller: Address,
    status: TransactionStatus,
    detail: &serde_json::Value,
) -> Result<(), ApiError>
where
    E: Executor<'e, Database = Sqlite>,
{
    let created_at = Utc::now().to_rfc3339();

    sqlx::query(
        r#"INSERT INTO transactions (id, created_at, kind, caller, status, detail_json)
           VALUES (?, ?, ?, ?, ?, ?)"#,
    )
    .bind(id.to_string())
    .bind(created_at)
    .bind(kind.as_str())
    .bind(caller.to_string())
    .bind(status.as_str())
    .bind(detail.to_string())
    .execute(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    Ok(())
}

pub async fn count_transactions(db: &Db, caller: Option<Address>) -> Result<u64, ApiError> {
    let row = match caller {
        Some(c) => {
            sqlx::query(r#"SELECT COUNT(*) AS c FROM transactions WHERE caller = ?"#)
                .bind(c.to_string())
                .fetch_one(db)
                .await
        }
        None => sqlx::query(r#"SELECT COUNT(*) AS c FROM transactions"#).fetch_one(db).await,
    }
    .map_err(|_| ApiError::Internal)?;

    let c: i64 = row.get("c");
    Ok(c as u64)
}

pub async fn list_transactions(
    db: &Db,
    caller: Option<Address>,
    offset: u64,
    limit: u64,
) -> Result<Vec<TransactionRecord>, ApiError> {
    // An empty filter matches every caller.
    let filter = caller.map(|c| c.to_string()).unwrap_or_default();

    let rows = sqlx::query(
        r#"SELECT seq, id, created_at, kind, caller, status, detail_json
           FROM transactions
           WHERE (? = '' OR caller = ?)
           ORDER BY seq
           LIMIT ? OFFSET ?"#,
    )
    .bind(filter.as_str())
    .bind(filter.as_str())
    .bind(limit as i64)
    .bind(offset as i64)
    .fetch_all(db)
    .await
    .map_err(|_| ApiError::Internal)?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let seq: i64 = row.get(0);
        let id: String = row.get(1);
        let created_at: String = row.get(2);
        let kind: String = row.get(3);
        let caller: String = row.get(4);
        let status: String = row.get(5);
        let detail_json: String = row.get(6);

        let created_at = DateTime::parse_from_rfc3339(&created_at)
            .map_err(|_| ApiError::Internal)?
            .with_timezone(&Utc);

        out.push(TransactionRecord {
            seq: seq as u64,
            id: id.parse().map_err(|_| ApiError::Internal)?,
            created_at,
            kind: kind.parse().map_err(|_| ApiError::Internal)?,
            caller: caller.parse().map_err(|_| ApiError::Internal)?,
            status: status.parse().map_err(|_| ApiError::Internal)?,
            detail: serde_json::from_str(&detail_json).map_err(|_| ApiError::Internal)?,
        });
    }

    Ok(out)
}

#[cfg(test)]
pub(crate) async fn memory_db() -> Db {
    // One connection: every pooled connection to `sqlite::memory:` is its own database.
    let db = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    init_schema(&db).await.unwrap();
    db
}
