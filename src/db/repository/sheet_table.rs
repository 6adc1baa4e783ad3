use async_trait::async_trait;

use crate::db::models::Column;
use crate::error::AppResult;

/// One raw row of the backing table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SheetRow {
    /// 1-indexed row number; row 1 is the header and is never returned.
    pub number: usize,
    pub cells: Vec<String>,
}

/// Row-oriented key-value table the slot store is built on.
///
/// Backends only move strings around; decoding into `SlotRecord` happens in
/// `SlotStore`. `write_cells` must apply all given cells of one row in a single
/// request so a concurrent reader never observes half a transition.
#[async_trait]
pub trait SheetTable: Send + Sync + 'static {
    /// All data rows in table order.
    async fn read_rows(&self) -> AppResult<Vec<SheetRow>>;

    /// A single data row, or `None` past the end of the table.
    async fn read_row(&self, number: usize) -> AppResult<Option<SheetRow>>;

    async fn write_cells(&self, number: usize, cells: &[(Column, String)]) -> AppResult<()>;

    /// Append rows after the last data row.
    async fn append_rows(&self, rows: Vec<Vec<String>>) -> AppResult<()>;
}
