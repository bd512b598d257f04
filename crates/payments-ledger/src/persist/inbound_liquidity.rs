use rusqlite::{Connection, OptionalExtension, Row, params};
use uuid::Uuid;

use super::{
    codec::{
        TypeVersion,
        onchain::{LiquidityLeaseTypeVersion, decode_lease, encode_lease},
        parse_type_version,
    },
    parse_column, skip_unreadable,
};
use crate::{
    error::{LedgerError, LedgerResult},
    models::{InboundLiquidityOutgoingPayment, Satoshi},
};

pub(crate) const TABLE: &str = "inbound_liquidity_outgoing_payments";

const SELECT_INBOUND_LIQUIDITY: &str = "SELECT id
    ,       mining_fees_sat
    ,       tx_id
    ,       channel_id
    ,       lease_type
    ,       lease_blob
    ,       created_at
    ,       confirmed_at
    ,       locked_at
    FROM inbound_liquidity_outgoing_payments";

struct InboundLiquidityRow {
    id: String,
    mining_fees_sat: u64,
    tx_id: String,
    channel_id: String,
    lease_type: String,
    lease_blob: Vec<u8>,
    created_at: i64,
    confirmed_at: Option<i64>,
    locked_at: Option<i64>,
}

fn map_inbound_liquidity_row(row: &Row<'_>) -> Result<InboundLiquidityRow, rusqlite::Error> {
    Ok(InboundLiquidityRow {
        id: row.get(0)?,
        mining_fees_sat: row.get(1)?,
        tx_id: row.get(2)?,
        channel_id: row.get(3)?,
        lease_type: row.get(4)?,
        lease_blob: row.get(5)?,
        created_at: row.get(6)?,
        confirmed_at: row.get(7)?,
        locked_at: row.get(8)?,
    })
}

impl InboundLiquidityRow {
    fn decode(self) -> LedgerResult<InboundLiquidityOutgoingPayment> {
        let lease = parse_type_version::<LiquidityLeaseTypeVersion>(&self.lease_type)
            .and_then(|type_version| decode_lease(type_version, &self.lease_blob))
            .map_err(|e| LedgerError::unreadable(TABLE, &self.id, &self.lease_type, &e))?;
        Ok(InboundLiquidityOutgoingPayment {
            id: parse_column(TABLE, &self.id, "id", &self.id)?,
            mining_fee: Satoshi(self.mining_fees_sat),
            tx_id: parse_column(TABLE, &self.id, "tx_id", &self.tx_id)?,
            channel_id: parse_column(TABLE, &self.id, "channel_id", &self.channel_id)?,
            lease,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
            locked_at: self.locked_at,
        })
    }
}

/// Queries over purchases of inbound liquidity.
pub(crate) struct InboundLiquidityQueries<'a> {
    conn: &'a Connection,
}

impl<'a> InboundLiquidityQueries<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn insert(&self, payment: &InboundLiquidityOutgoingPayment) -> LedgerResult<()> {
        let id = payment.id.to_string();
        let (lease_type, lease_blob) = encode_lease(&payment.lease)?;
        self.conn
            .execute(
                "INSERT INTO inbound_liquidity_outgoing_payments (id, mining_fees_sat, tx_id, channel_id, lease_type, lease_blob, created_at, confirmed_at, locked_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    payment.mining_fee.0,
                    payment.tx_id.to_string(),
                    payment.channel_id.to_string(),
                    lease_type.tag(),
                    lease_blob,
                    payment.created_at,
                    payment.confirmed_at,
                    payment.locked_at,
                ],
            )
            .map_err(|e| LedgerError::from_insert(e, "inbound liquidity purchase", &id))?;
        Ok(())
    }

    pub(crate) fn get(&self, id: Uuid) -> LedgerResult<Option<InboundLiquidityOutgoingPayment>> {
        self.conn
            .query_row(
                &format!("{SELECT_INBOUND_LIQUIDITY} WHERE id = ?"),
                params![id.to_string()],
                map_inbound_liquidity_row,
            )
            .optional()?
            .map(InboundLiquidityRow::decode)
            .transpose()
    }

    pub(crate) fn list_by_created_at(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<InboundLiquidityOutgoingPayment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_INBOUND_LIQUIDITY} WHERE created_at BETWEEN ? AND ? ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![from, to], map_inbound_liquidity_row)?
            .collect::<Result<Vec<_>, _>>()?;
        skip_unreadable(rows.into_iter().map(InboundLiquidityRow::decode))
    }
}
