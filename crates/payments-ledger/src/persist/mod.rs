pub(crate) mod channel_close;
pub(crate) mod codec;
pub(crate) mod inbound_liquidity;
pub(crate) mod incoming;
pub(crate) mod legacy;
pub(crate) mod lightning_outgoing;
pub(crate) mod links;
pub(crate) mod metadata;
pub(crate) mod order;
pub(crate) mod path;
pub(crate) mod splice_cpfp;
pub(crate) mod splice_out;
pub(crate) mod sqlite;
#[cfg(test)]
pub(crate) mod tests;

use std::{fmt::Display, str::FromStr};

use rusqlite::{Connection, params};
use tracing::warn;

use crate::error::{LedgerError, LedgerResult};
use codec::CodecError;

/// Tables holding one on-chain outgoing payment kind each.
pub(crate) const ON_CHAIN_TABLES: [&str; 4] = [
    channel_close::TABLE,
    splice_out::TABLE,
    splice_cpfp::TABLE,
    inbound_liquidity::TABLE,
];

/// Collects the decoded rows of a list query.
///
/// Rows that cannot be decoded are logged and left out; any other error
/// fails the whole query.
pub(crate) fn skip_unreadable<T>(
    rows: impl IntoIterator<Item = LedgerResult<T>>,
) -> LedgerResult<Vec<T>> {
    let mut items = Vec::new();
    for row in rows {
        match row {
            Ok(item) => items.push(item),
            Err(LedgerError::UnreadableRow {
                table,
                id,
                type_version,
                reason,
            }) => {
                warn!("Skipping unreadable row {id} in {table} ({type_version}): {reason}");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(items)
}

/// Parses a plain text column of the row `id`.
pub(crate) fn parse_column<T>(
    table: &'static str,
    id: &str,
    column: &str,
    value: &str,
) -> LedgerResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    value.parse().map_err(|e| {
        LedgerError::unreadable(
            table,
            id,
            column,
            &CodecError::InvalidValue(format!("{column}: {e}")),
        )
    })
}

/// Sets a timestamp column that has no value yet. Returns `false` if the row
/// is unknown or the column is already set.
pub(crate) fn set_once(
    conn: &Connection,
    table: &str,
    column: &str,
    id: &str,
    at: i64,
) -> LedgerResult<bool> {
    let changed = conn.execute(
        &format!("UPDATE {table} SET {column} = ? WHERE id = ? AND {column} IS NULL"),
        params![at, id],
    )?;
    Ok(changed == 1)
}

pub(crate) fn oldest_confirmed_at(conn: &Connection, table: &str) -> LedgerResult<Option<i64>> {
    Ok(conn.query_row(
        &format!("SELECT MIN(confirmed_at) FROM {table} WHERE confirmed_at IS NOT NULL"),
        [],
        |row| row.get(0),
    )?)
}

pub(crate) fn count_rows(conn: &Connection, table: &str) -> LedgerResult<u64> {
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
        row.get(0)
    })?)
}
