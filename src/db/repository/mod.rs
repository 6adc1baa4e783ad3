pub mod sheet_table;
pub mod slot_store;
pub mod sqlite_table;

pub use sheet_table::{SheetRow, SheetTable};
pub use slot_store::SlotStore;
pub use sqlite_table::SqliteTable;
