use crate::error::StoreError;

/// Get a required column value from a row, classifying failures as
/// CorruptRow rather than a bare driver error.
pub fn get<T: rusqlite::types::FromSql>(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<T, StoreError> {
    row.get(idx).map_err(|e| StoreError::CorruptRow {
        table,
        column,
        detail: e.to_string(),
    })
}

/// Read an integer column as a boolean flag (SQLite has no bool type).
pub fn get_flag(
    row: &rusqlite::Row<'_>,
    idx: usize,
    table: &'static str,
    column: &'static str,
) -> Result<bool, StoreError> {
    Ok(get::<i64>(row, idx, table, column)? != 0)
}
