use bitcoin::Txid;
use rusqlite::{Connection, params};
use tracing::warn;

use crate::{error::LedgerResult, models::WalletPaymentId};

/// Queries over the transactions that settle payments.
///
/// A transaction may settle several payments and a payment may be settled by
/// several transactions.
pub(crate) struct LinkQueries<'a> {
    conn: &'a Connection,
}

impl<'a> LinkQueries<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Returns `false` if the pair was already linked.
    pub(crate) fn link(&self, tx_id: Txid, id: &WalletPaymentId) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "INSERT OR IGNORE INTO link_tx_to_payments (tx_id, type, id) VALUES (?, ?, ?)",
            params![tx_id.to_string(), id.db_type(), id.db_id()],
        )?;
        Ok(changed == 1)
    }

    /// Sets the confirmation time on the links that have none yet.
    pub(crate) fn set_confirmed(&self, tx_id: Txid, at: i64) -> LedgerResult<usize> {
        Ok(self.conn.execute(
            "UPDATE link_tx_to_payments SET confirmed_at = ? WHERE tx_id = ? AND confirmed_at IS NULL",
            params![at, tx_id.to_string()],
        )?)
    }

    pub(crate) fn set_locked(&self, tx_id: Txid, at: i64) -> LedgerResult<usize> {
        Ok(self.conn.execute(
            "UPDATE link_tx_to_payments SET locked_at = ? WHERE tx_id = ? AND locked_at IS NULL",
            params![at, tx_id.to_string()],
        )?)
    }

    pub(crate) fn list_payment_ids(&self, tx_id: Txid) -> LedgerResult<Vec<WalletPaymentId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT type, id FROM link_tx_to_payments WHERE tx_id = ? ORDER BY type, id")?;
        let rows = stmt
            .query_map(params![tx_id.to_string()], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(db_type, db_id)| {
                WalletPaymentId::from_db(db_type, &db_id)
                    .inspect_err(|e| warn!("Skipping link of {tx_id}: {e}"))
                    .ok()
            })
            .collect())
    }

    /// Transactions linked to a payment that are not confirmed yet.
    pub(crate) fn list_unconfirmed_txs(&self) -> LedgerResult<Vec<Txid>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT tx_id FROM link_tx_to_payments WHERE confirmed_at IS NULL ORDER BY tx_id",
        )?;
        let rows = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|tx_id| {
                tx_id
                    .parse::<Txid>()
                    .inspect_err(|e| warn!("Skipping invalid linked tx id {tx_id}: {e}"))
                    .ok()
            })
            .collect())
    }

    pub(crate) fn delete_for_payment(&self, id: &WalletPaymentId) -> LedgerResult<usize> {
        Ok(self.conn.execute(
            "DELETE FROM link_tx_to_payments WHERE type = ? AND id = ?",
            params![id.db_type(), id.db_id()],
        )?)
    }
}
