use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::{parse_column, skip_unreadable};
use crate::{
    error::{LedgerError, LedgerResult},
    models::{Satoshi, SpliceOutgoingPayment},
};

pub(crate) const TABLE: &str = "splice_outgoing_payments";

const SELECT_SPLICE_OUT: &str = "SELECT id
    ,       recipient_amount_sat
    ,       address
    ,       mining_fees_sat
    ,       tx_id
    ,       channel_id
    ,       created_at
    ,       confirmed_at
    ,       locked_at
    FROM splice_outgoing_payments";

struct SpliceOutRow {
    id: String,
    recipient_amount_sat: u64,
    address: String,
    mining_fees_sat: u64,
    tx_id: String,
    channel_id: String,
    created_at: i64,
    confirmed_at: Option<i64>,
    locked_at: Option<i64>,
}

fn map_splice_out_row(row: &Row<'_>) -> Result<SpliceOutRow, rusqlite::Error> {
    Ok(SpliceOutRow {
        id: row.get(0)?,
        recipient_amount_sat: row.get(1)?,
        address: row.get(2)?,
        mining_fees_sat: row.get(3)?,
        tx_id: row.get(4)?,
        channel_id: row.get(5)?,
        created_at: row.get(6)?,
        confirmed_at: row.get(7)?,
        locked_at: row.get(8)?,
    })
}

impl SpliceOutRow {
    fn decode(self) -> LedgerResult<SpliceOutgoingPayment> {
        Ok(SpliceOutgoingPayment {
            id: parse_column(TABLE, &self.id, "id", &self.id)?,
            recipient_amount: Satoshi(self.recipient_amount_sat),
            address: self.address,
            mining_fee: Satoshi(self.mining_fees_sat),
            tx_id: parse_column(TABLE, &self.id, "tx_id", &self.tx_id)?,
            channel_id: parse_column(TABLE, &self.id, "channel_id", &self.channel_id)?,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
            locked_at: self.locked_at,
        })
    }
}

pub(crate) struct SpliceOutQueries<'a> {
    conn: &'a Connection,
}

impl<'a> SpliceOutQueries<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn insert(&self, payment: &SpliceOutgoingPayment) -> LedgerResult<()> {
        let id = payment.id.to_string();
        self.conn
            .execute(
                "INSERT INTO splice_outgoing_payments (id, recipient_amount_sat, address, mining_fees_sat, tx_id, channel_id, created_at, confirmed_at, locked_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    payment.recipient_amount.0,
                    payment.address,
                    payment.mining_fee.0,
                    payment.tx_id.to_string(),
                    payment.channel_id.to_string(),
                    payment.created_at,
                    payment.confirmed_at,
                    payment.locked_at,
                ],
            )
            .map_err(|e| LedgerError::from_insert(e, "splice out", &id))?;
        Ok(())
    }

    pub(crate) fn get(&self, id: Uuid) -> LedgerResult<Option<SpliceOutgoingPayment>> {
        self.conn
            .query_row(
                &format!("{SELECT_SPLICE_OUT} WHERE id = ?"),
                params![id.to_string()],
                map_splice_out_row,
            )
            .optional()?
            .map(SpliceOutRow::decode)
            .transpose()
    }

    pub(crate) fn list_by_created_at(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<SpliceOutgoingPayment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_SPLICE_OUT} WHERE created_at BETWEEN ? AND ? ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![from, to], map_splice_out_row)?
            .collect::<Result<Vec<_>, _>>()?;
        skip_unreadable(rows.into_iter().map(SpliceOutRow::decode))
    }
}
