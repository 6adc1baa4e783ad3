use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::db::models::{Column, COLUMN_COUNT};
use crate::db::repository::sheet_table::{SheetRow, SheetTable};
use crate::error::{AppError, AppResult};

const SELECT_COLUMNS: &str = r#"
    row_number, idx, label, state, full_name, handle, user_id, event_id,
    transfer_count, reminder_sent, email, meet_link, language
"#;

// Intermediate structure for reading from DB
#[derive(sqlx::FromRow)]
struct RowSlot {
    row_number: i64,
    idx: String,
    label: String,
    state: String,
    full_name: String,
    handle: String,
    user_id: String,
    event_id: String,
    transfer_count: String,
    reminder_sent: String,
    email: String,
    meet_link: String,
    language: String,
}

impl From<RowSlot> for SheetRow {
    fn from(row: RowSlot) -> Self {
        SheetRow {
            number: row.row_number as usize,
            cells: vec![
                row.idx,
                row.label,
                row.state,
                row.full_name,
                row.handle,
                row.user_id,
                row.event_id,
                row.transfer_count,
                row.reminder_sent,
                row.email,
                row.meet_link,
                row.language,
            ],
        }
    }
}

// ============================================================================
// SQLite-backed slot table
// ============================================================================

/// Local stand-in for the booking sheet, same positional layout.
#[derive(Clone)]
pub struct SqliteTable {
    pool: SqlitePool,
}

impl SqliteTable {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SheetTable for SqliteTable {
    async fn read_rows(&self) -> AppResult<Vec<SheetRow>> {
        let rows = sqlx::query_as::<_, RowSlot>(&format!(
            "SELECT {} FROM slots ORDER BY row_number ASC",
            SELECT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn read_row(&self, number: usize) -> AppResult<Option<SheetRow>> {
        let row = sqlx::query_as::<_, RowSlot>(&format!(
            "SELECT {} FROM slots WHERE row_number = ?",
            SELECT_COLUMNS
        ))
        .bind(number as i64)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn write_cells(&self, number: usize, cells: &[(Column, String)]) -> AppResult<()> {
        if cells.is_empty() {
            return Ok(());
        }

        // Column names come from a closed enum, never from input.
        let assignments = cells
            .iter()
            .map(|(c, _)| format!("{} = ?", c.sql_name()))
            .collect::<Vec<String>>()
            .join(", ");
        let sql = format!("UPDATE slots SET {} WHERE row_number = ?", assignments);

        let mut query = sqlx::query(&sql);
        for (_, value) in cells {
            query = query.bind(value.as_str());
        }
        let result = query.bind(number as i64).execute(&self.pool).await?;

        if result.rows_affected() == 0 {
            return Err(AppError::StoreUnavailable(format!(
                "row {} does not exist",
                number
            )));
        }

        Ok(())
    }

    async fn append_rows(&self, rows: Vec<Vec<String>>) -> AppResult<()> {
        let mut tx = self.pool.begin().await?;

        let (last,): (i64,) = sqlx::query_as("SELECT COALESCE(MAX(row_number), 1) FROM slots")
            .fetch_one(&mut *tx)
            .await?;

        let sql = format!(
            "INSERT INTO slots ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            SELECT_COLUMNS
        );
        for (offset, mut cells) in rows.into_iter().enumerate() {
            cells.resize(COLUMN_COUNT, String::new());
            let mut query = sqlx::query(&sql).bind(last + 1 + offset as i64);
            for value in cells {
                query = query.bind(value);
            }
            query.execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) async fn memory_pool() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory sqlite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::free_row;

    #[tokio::test]
    async fn appended_rows_start_after_header() {
        let table = SqliteTable::new(memory_pool().await);
        table
            .append_rows(vec![free_row("10.10.2030, 10:00"), free_row("10.10.2030, 11:00")])
            .await
            .unwrap();

        let rows = table.read_rows().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].number, 2);
        assert_eq!(rows[1].number, 3);
        assert_eq!(rows[1].cells[Column::Label.number() - 1], "10.10.2030, 11:00");
    }

    #[tokio::test]
    async fn write_cells_updates_only_named_columns() {
        let table = SqliteTable::new(memory_pool().await);
        table
            .append_rows(vec![free_row("10.10.2030, 10:00")])
            .await
            .unwrap();

        table
            .write_cells(
                2,
                &[
                    (Column::State, "Pending Confirmation".to_string()),
                    (Column::UserId, "111".to_string()),
                ],
            )
            .await
            .unwrap();

        let row = table.read_row(2).await.unwrap().unwrap();
        assert_eq!(row.cells[Column::Label.number() - 1], "10.10.2030, 10:00");
        assert_eq!(row.cells[Column::State.number() - 1], "Pending Confirmation");
        assert_eq!(row.cells[Column::UserId.number() - 1], "111");
        assert_eq!(row.cells[Column::Email.number() - 1], "");
    }

    #[tokio::test]
    async fn writing_a_missing_row_fails() {
        let table = SqliteTable::new(memory_pool().await);
        let err = table
            .write_cells(9, &[(Column::State, "Confirmed".to_string())])
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::StoreUnavailable(_)));
        assert!(table.read_row(9).await.unwrap().is_none());
    }
}
