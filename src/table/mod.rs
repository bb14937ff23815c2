//! Remote tabular stores holding the ledger and the app catalog.
//!
//! A backend exposes a sheet as a grid of strings whose first row is the
//! header. Every trait method maps to exactly one remote call, so callers can
//! reason about rate limits by counting invocations.

use anyhow::Result;
use async_trait::async_trait;

pub mod model;
pub mod sheets;
pub mod sqlite;

pub use sheets::SheetsTable;
pub use sqlite::SqliteTable;

/// Header row plus data rows, as stored. Rows may be ragged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Grid {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Grid {
    /// 1-based sheet row number of the data row at `index`.
    pub fn row_number(index: usize) -> i64 {
        index as i64 + 2
    }
}

/// One cell write. `row_number` is 1-based with the header at 1, `column` is
/// 0-based.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellWrite {
    pub row_number: i64,
    pub column: usize,
    pub value: String,
}

#[async_trait]
pub trait TableBackend: Send + Sync {
    /// Human-readable location for logs.
    fn describe(&self) -> String;

    async fn read_all(&self) -> Result<Grid>;

    async fn write_header(&self, header: &[String]) -> Result<()>;

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()>;

    async fn batch_update(&self, cells: &[CellWrite]) -> Result<()>;
}

/// Spreadsheet column letters: 0 → A, 25 → Z, 26 → AA.
pub fn column_letter(index: usize) -> String {
    let mut n = index + 1;
    let mut letters = Vec::new();
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

/// A1 reference to one cell on `tab`, e.g. `'Sheet 1'!K12`.
pub fn a1_cell(tab: &str, row_number: i64, column: usize) -> String {
    format!("{}!{}{}", quote_tab(tab), column_letter(column), row_number)
}

/// A1 range covering whole columns `A:{last}` on `tab`.
pub fn a1_columns(tab: &str, width: usize) -> String {
    let last = column_letter(width.saturating_sub(1));
    format!("{}!A:{}", quote_tab(tab), last)
}

fn quote_tab(tab: &str) -> String {
    format!("'{}'", tab.replace('\'', "''"))
}
