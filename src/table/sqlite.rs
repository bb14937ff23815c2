use anyhow::Result;
use async_trait::async_trait;
use tracing::instrument;

use super::{CellWrite, Grid, TableBackend};
use crate::config::TableRef;
use crate::db::{self, Pool};

/// A sheet kept in the local `sheet_rows` grid.
#[derive(Debug, Clone)]
pub struct SqliteTable {
    pool: Pool,
    sheet: String,
}

impl SqliteTable {
    pub fn new(pool: Pool, table: &TableRef) -> Self {
        Self {
            pool,
            sheet: table.key(),
        }
    }

    pub fn named(pool: Pool, sheet: impl Into<String>) -> Self {
        Self {
            pool,
            sheet: sheet.into(),
        }
    }
}

#[async_trait]
impl TableBackend for SqliteTable {
    fn describe(&self) -> String {
        format!("sqlite:{}", self.sheet)
    }

    #[instrument(skip_all)]
    async fn read_all(&self) -> Result<Grid> {
        let stored = db::read_sheet(&self.pool, &self.sheet).await?;
        let mut grid = Grid::default();
        for row in stored {
            if row.row_number == 1 {
                grid.header = row.cells;
                continue;
            }
            // Keep positions aligned with sheet row numbers across gaps.
            let index = (row.row_number - 2) as usize;
            if grid.rows.len() < index {
                grid.rows.resize(index, Vec::new());
            }
            grid.rows.push(row.cells);
        }
        Ok(grid)
    }

    async fn write_header(&self, header: &[String]) -> Result<()> {
        db::write_header(&self.pool, &self.sheet, header).await
    }

    async fn append_rows(&self, rows: &[Vec<String>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        db::append_rows(&self.pool, &self.sheet, rows).await?;
        Ok(())
    }

    async fn batch_update(&self, cells: &[CellWrite]) -> Result<()> {
        if cells.is_empty() {
            return Ok(());
        }
        let triples: Vec<(i64, usize, String)> = cells
            .iter()
            .map(|c| (c.row_number, c.column, c.value.clone()))
            .collect();
        db::update_cells(&self.pool, &self.sheet, &triples).await
    }
}
