use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::{parse_column, skip_unreadable};
use crate::{
    error::{LedgerError, LedgerResult},
    models::{Satoshi, SpliceCpfpOutgoingPayment},
};

pub(crate) const TABLE: &str = "splice_cpfp_outgoing_payments";

const SELECT_SPLICE_CPFP: &str = "SELECT id
    ,       mining_fees_sat
    ,       tx_id
    ,       channel_id
    ,       created_at
    ,       confirmed_at
    ,       locked_at
    FROM splice_cpfp_outgoing_payments";

struct SpliceCpfpRow {
    id: String,
    mining_fees_sat: u64,
    tx_id: String,
    channel_id: String,
    created_at: i64,
    confirmed_at: Option<i64>,
    locked_at: Option<i64>,
}

fn map_splice_cpfp_row(row: &Row<'_>) -> Result<SpliceCpfpRow, rusqlite::Error> {
    Ok(SpliceCpfpRow {
        id: row.get(0)?,
        mining_fees_sat: row.get(1)?,
        tx_id: row.get(2)?,
        channel_id: row.get(3)?,
        created_at: row.get(4)?,
        confirmed_at: row.get(5)?,
        locked_at: row.get(6)?,
    })
}

impl SpliceCpfpRow {
    fn decode(self) -> LedgerResult<SpliceCpfpOutgoingPayment> {
        Ok(SpliceCpfpOutgoingPayment {
            id: parse_column(TABLE, &self.id, "id", &self.id)?,
            mining_fee: Satoshi(self.mining_fees_sat),
            tx_id: parse_column(TABLE, &self.id, "tx_id", &self.tx_id)?,
            channel_id: parse_column(TABLE, &self.id, "channel_id", &self.channel_id)?,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
            locked_at: self.locked_at,
        })
    }
}

pub(crate) struct SpliceCpfpQueries<'a> {
    conn: &'a Connection,
}

impl<'a> SpliceCpfpQueries<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn insert(&self, payment: &SpliceCpfpOutgoingPayment) -> LedgerResult<()> {
        let id = payment.id.to_string();
        self.conn
            .execute(
                "INSERT INTO splice_cpfp_outgoing_payments (id, mining_fees_sat, tx_id, channel_id, created_at, confirmed_at, locked_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    payment.mining_fee.0,
                    payment.tx_id.to_string(),
                    payment.channel_id.to_string(),
                    payment.created_at,
                    payment.confirmed_at,
                    payment.locked_at,
                ],
            )
            .map_err(|e| LedgerError::from_insert(e, "splice cpfp", &id))?;
        Ok(())
    }

    pub(crate) fn get(&self, id: Uuid) -> LedgerResult<Option<SpliceCpfpOutgoingPayment>> {
        self.conn
            .query_row(
                &format!("{SELECT_SPLICE_CPFP} WHERE id = ?"),
                params![id.to_string()],
                map_splice_cpfp_row,
            )
            .optional()?
            .map(SpliceCpfpRow::decode)
            .transpose()
    }

    pub(crate) fn list_by_created_at(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<SpliceCpfpOutgoingPayment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_SPLICE_CPFP} WHERE created_at BETWEEN ? AND ? ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![from, to], map_splice_cpfp_row)?
            .collect::<Result<Vec<_>, _>>()?;
        skip_unreadable(rows.into_iter().map(SpliceCpfpRow::decode))
    }
}
