use super::model::{LeaseRecord, StoredRow};
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};
use tracing::instrument;

pub type Pool = SqlitePool;

pub async fn init_pool(database_url: &str) -> Result<Pool> {
    let normalized = prepare_sqlite_url(database_url);
    let mut options = SqlitePoolOptions::new();
    if normalized.starts_with("sqlite::memory") {
        // Every connection to `sqlite::memory:` opens its own database.
        options = options
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None);
    }
    let pool = options
        .connect(&normalized)
        .await
        .with_context(|| format!("open {normalized}"))?;
    if !normalized.starts_with("sqlite::memory") {
        sqlx::query("PRAGMA journal_mode=WAL;").execute(&pool).await?;
    }
    sqlx::query("PRAGMA synchronous=FULL;").execute(&pool).await?;
    Ok(pool)
}

/// Expand a leading `~/` in a file-backed SQLite URL and create its parent
/// directory. Non-sqlite and in-memory URLs pass through unchanged.
pub fn prepare_sqlite_url(url: &str) -> String {
    let Some(rest) = url.strip_prefix("sqlite:") else {
        return url.to_string();
    };
    if rest.starts_with(":memory") {
        return url.to_string();
    }
    let rest = rest.strip_prefix("//").unwrap_or(rest);
    let (path, query) = match rest.split_once('?') {
        Some((p, q)) => (p, Some(q)),
        None => (rest, None),
    };
    if path.is_empty() {
        return url.to_string();
    }

    let path = match (path.strip_prefix("~/"), std::env::var("HOME")) {
        (Some(tail), Ok(home)) => format!("{}/{}", home.trim_end_matches('/'), tail),
        _ => path.to_string(),
    };
    if let Some(parent) = std::path::Path::new(&path).parent() {
        if !parent.as_os_str().is_empty() {
            let _ = std::fs::create_dir_all(parent);
        }
    }

    match query {
        Some(q) => format!("sqlite://{path}?{q}"),
        None => format!("sqlite://{path}"),
    }
}

pub async fn run_migrations(pool: &Pool) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

fn encode_cells(cells: &[String]) -> Result<String> {
    Ok(serde_json::to_string(cells)?)
}

fn decode_cells(sheet: &str, row_number: i64, raw: &str) -> Result<Vec<String>> {
    serde_json::from_str(raw)
        .with_context(|| format!("corrupt cells in {sheet} row {row_number}"))
}

#[instrument(skip_all)]
pub async fn read_sheet(pool: &Pool, sheet: &str) -> Result<Vec<StoredRow>> {
    let rows = sqlx::query(
        "SELECT row_number, cells FROM sheet_rows WHERE sheet = ? ORDER BY row_number",
    )
    .bind(sheet)
    .fetch_all(pool)
    .await?;
    rows.into_iter()
        .map(|row| {
            let row_number: i64 = row.get("row_number");
            let raw: String = row.get("cells");
            Ok(StoredRow {
                row_number,
                cells: decode_cells(sheet, row_number, &raw)?,
            })
        })
        .collect()
}

/// Replace the whole of row 1.
#[instrument(skip_all)]
pub async fn write_header(pool: &Pool, sheet: &str, header: &[String]) -> Result<()> {
    sqlx::query(
        "INSERT INTO sheet_rows (sheet, row_number, cells) VALUES (?, 1, ?) \
         ON CONFLICT(sheet, row_number) DO UPDATE SET cells = excluded.cells, updated_at = CURRENT_TIMESTAMP",
    )
    .bind(sheet)
    .bind(encode_cells(header)?)
    .execute(pool)
    .await?;
    Ok(())
}

/// Append rows after the last stored row; returns the first new row number.
#[instrument(skip_all)]
pub async fn append_rows(pool: &Pool, sheet: &str, rows: &[Vec<String>]) -> Result<i64> {
    let mut tx = pool.begin().await?;
    let last: Option<i64> =
        sqlx::query_scalar("SELECT MAX(row_number) FROM sheet_rows WHERE sheet = ?")
            .bind(sheet)
            .fetch_one(&mut *tx)
            .await?;
    // Row 1 is reserved for the header even before one is written.
    let first = last.unwrap_or(1) + 1;
    for (offset, cells) in rows.iter().enumerate() {
        sqlx::query("INSERT INTO sheet_rows (sheet, row_number, cells) VALUES (?, ?, ?)")
            .bind(sheet)
            .bind(first + offset as i64)
            .bind(encode_cells(cells)?)
            .execute(&mut *tx)
            .await?;
    }
    tx.commit().await?;
    Ok(first)
}

/// Write individual cells, creating or padding rows as needed. All cells land
/// in one transaction.
#[instrument(skip_all)]
pub async fn update_cells(
    pool: &Pool,
    sheet: &str,
    cells: &[(i64, usize, String)],
) -> Result<()> {
    let mut tx = pool.begin().await?;
    for (row_number, column, value) in cells {
        if *row_number < 1 {
            return Err(anyhow!("row number {row_number} out of range"));
        }
        let raw: Option<String> =
            sqlx::query_scalar("SELECT cells FROM sheet_rows WHERE sheet = ? AND row_number = ?")
                .bind(sheet)
                .bind(*row_number)
                .fetch_optional(&mut *tx)
                .await?;
        let mut row = match raw {
            Some(raw) => decode_cells(sheet, *row_number, &raw)?,
            None => Vec::new(),
        };
        if row.len() <= *column {
            row.resize(column + 1, String::new());
        }
        row[*column] = value.clone();
        sqlx::query(
            "INSERT INTO sheet_rows (sheet, row_number, cells) VALUES (?, ?, ?) \
             ON CONFLICT(sheet, row_number) DO UPDATE SET cells = excluded.cells, updated_at = CURRENT_TIMESTAMP",
        )
        .bind(sheet)
        .bind(*row_number)
        .bind(encode_cells(&row)?)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(())
}

fn lease_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_lease_ts(raw: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("invalid lease timestamp {raw:?}"))?
        .with_timezone(&Utc))
}

/// Take `name` for `holder` unless another holder's lease is still live.
/// Returns whether the lease is now held by `holder`.
#[instrument(skip_all)]
pub async fn try_acquire_lease(
    pool: &Pool,
    name: &str,
    holder: &str,
    now: DateTime<Utc>,
    expires_at: DateTime<Utc>,
) -> Result<bool> {
    let res = sqlx::query(
        "INSERT INTO leases (name, holder, acquired_at, expires_at) VALUES (?, ?, ?, ?) \
         ON CONFLICT(name) DO UPDATE SET holder = excluded.holder, \
             acquired_at = excluded.acquired_at, expires_at = excluded.expires_at \
         WHERE leases.expires_at <= ? OR leases.holder = excluded.holder",
    )
    .bind(name)
    .bind(holder)
    .bind(lease_ts(now))
    .bind(lease_ts(expires_at))
    .bind(lease_ts(now))
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

#[instrument(skip_all)]
pub async fn fetch_lease(pool: &Pool, name: &str) -> Result<Option<LeaseRecord>> {
    let row = sqlx::query("SELECT name, holder, acquired_at, expires_at FROM leases WHERE name = ?")
        .bind(name)
        .fetch_optional(pool)
        .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let acquired: String = row.get("acquired_at");
    let expires: String = row.get("expires_at");
    Ok(Some(LeaseRecord {
        name: row.get("name"),
        holder: row.get("holder"),
        acquired_at: parse_lease_ts(&acquired)?,
        expires_at: parse_lease_ts(&expires)?,
    }))
}

/// Drop the lease if `holder` still owns it; returns whether a row was removed.
#[instrument(skip_all)]
pub async fn release_lease(pool: &Pool, name: &str, holder: &str) -> Result<bool> {
    let res = sqlx::query("DELETE FROM leases WHERE name = ? AND holder = ?")
        .bind(name)
        .bind(holder)
        .execute(pool)
        .await?;
    Ok(res.rows_affected() == 1)
}
