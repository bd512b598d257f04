use rusqlite::{Connection, params, params_from_iter};
use tracing::warn;

use super::{
    channel_close,
    codec::{TypeVersion, outgoing::OutgoingStatusTypeVersion},
    inbound_liquidity,
    lightning_outgoing::LEGACY_CLOSE_FILTER,
    splice_cpfp, splice_out,
};
use crate::{
    error::LedgerResult,
    models::{WalletPaymentId, WalletPaymentOrderRow},
};

/// Every payment of the wallet as `(type, id, created_at, completed_at, succeeded)`.
///
/// Incoming payments only appear once received. Channel closes recorded as
/// Lightning payments appear as channel closes, completed when the row was
/// completed or else when it was created.
fn all_payments() -> String {
    let on_chain = [
        (WalletPaymentId::CHANNEL_CLOSE_OUTGOING, channel_close::TABLE),
        (WalletPaymentId::SPLICE_OUTGOING, splice_out::TABLE),
        (WalletPaymentId::SPLICE_CPFP_OUTGOING, splice_cpfp::TABLE),
        (WalletPaymentId::INBOUND_LIQUIDITY_OUTGOING, inbound_liquidity::TABLE),
    ]
    .map(|(db_type, table)| {
        format!(
            "SELECT {db_type}, id, created_at, confirmed_at, confirmed_at IS NOT NULL FROM {table}"
        )
    })
    .join("\n    UNION ALL ");

    format!(
        "SELECT {incoming} AS type, payment_hash AS id, created_at
    ,       received_at AS completed_at, 1 AS succeeded
    FROM incoming_payments
    WHERE received_at IS NOT NULL
    UNION ALL
    SELECT {lightning}, p.id, p.created_at, p.completed_at
    ,       p.status_type IN ('{off_chain}', '{on_chain_status}')
    FROM lightning_outgoing_payments p
    WHERE NOT {LEGACY_CLOSE_FILTER}
    UNION ALL
    SELECT {close}, p.id, p.created_at, COALESCE(p.completed_at, p.created_at), 1
    FROM lightning_outgoing_payments p
    WHERE {LEGACY_CLOSE_FILTER}
    UNION ALL {on_chain}",
        incoming = WalletPaymentId::INCOMING,
        lightning = WalletPaymentId::LIGHTNING_OUTGOING,
        close = WalletPaymentId::CHANNEL_CLOSE_OUTGOING,
        off_chain = OutgoingStatusTypeVersion::SucceededOffChainV0.tag(),
        on_chain_status = OutgoingStatusTypeVersion::SucceededOnChainV0.tag(),
    )
}

/// Paged listings across every payment kind, most recently completed first.
///
/// Pending payments sort by their creation time.
pub(crate) struct OrderQueries<'a> {
    conn: &'a Connection,
}

impl<'a> OrderQueries<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn list(
        &self,
        filter: &str,
        values: &[i64],
        count: u32,
        skip: u32,
    ) -> LedgerResult<Vec<WalletPaymentOrderRow>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT o.type, o.id, o.created_at, o.completed_at, m.modified_at
             FROM ({all}) o
             LEFT JOIN payments_metadata m ON m.type = o.type AND m.id = o.id
             WHERE {filter}
             ORDER BY COALESCE(o.completed_at, o.created_at) DESC, o.created_at DESC, o.type, o.id
             LIMIT ? OFFSET ?",
            all = all_payments()
        ))?;
        let paging = [i64::from(count), i64::from(skip)];
        let rows = stmt
            .query_map(params_from_iter(values.iter().chain(&paging)), |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, Option<i64>>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(db_type, db_id, created_at, completed_at, metadata_modified_at)| {
                let id = WalletPaymentId::from_db(db_type, &db_id)
                    .inspect_err(|e| warn!("Skipping payment {db_id} of type {db_type}: {e}"))
                    .ok()?;
                Some(WalletPaymentOrderRow {
                    id,
                    created_at,
                    completed_at,
                    metadata_modified_at,
                })
            })
            .collect())
    }

    pub(crate) fn list_all(
        &self,
        count: u32,
        skip: u32,
    ) -> LedgerResult<Vec<WalletPaymentOrderRow>> {
        self.list("1", &[], count, skip)
    }

    /// Payments completed at or after `since`, and every pending payment.
    pub(crate) fn list_recent(
        &self,
        since: i64,
        count: u32,
        skip: u32,
    ) -> LedgerResult<Vec<WalletPaymentOrderRow>> {
        self.list(
            "o.completed_at IS NULL OR o.completed_at >= ?",
            &[since],
            count,
            skip,
        )
    }

    pub(crate) fn list_outgoing_in_flight(
        &self,
        count: u32,
        skip: u32,
    ) -> LedgerResult<Vec<WalletPaymentOrderRow>> {
        self.list(
            &format!(
                "o.type = {} AND o.completed_at IS NULL",
                WalletPaymentId::LIGHTNING_OUTGOING
            ),
            &[],
            count,
            skip,
        )
    }

    pub(crate) fn list_successful_in_range(
        &self,
        from: i64,
        to: i64,
        count: u32,
        skip: u32,
    ) -> LedgerResult<Vec<WalletPaymentOrderRow>> {
        self.list(
            "o.succeeded AND o.completed_at BETWEEN ? AND ?",
            &[from, to],
            count,
            skip,
        )
    }

    pub(crate) fn count_successful_in_range(&self, from: i64, to: i64) -> LedgerResult<u64> {
        Ok(self.conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM ({all}) o
                 WHERE o.succeeded AND o.completed_at BETWEEN ? AND ?",
                all = all_payments()
            ),
            params![from, to],
            |row| row.get(0),
        )?)
    }
}
