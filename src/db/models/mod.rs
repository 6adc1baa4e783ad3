//! Table models.
//! Re-exported at the `crate::db::models` namespace so callers can write
//! `use crate::db::models::*;`.

pub mod slot;

pub use self::slot::*;
