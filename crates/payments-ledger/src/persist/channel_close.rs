use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::warn;
use uuid::Uuid;

use super::{
    codec::{
        TypeVersion,
        onchain::{ClosingInfoTypeVersion, decode_closing_info, encode_closing_info},
        parse_type_version,
    },
    legacy,
    lightning_outgoing::LightningOutgoingQueries,
    parse_column, skip_unreadable,
};
use crate::{
    error::{LedgerError, LedgerResult},
    models::{ChannelCloseOutgoingPayment, Satoshi},
};

pub(crate) const TABLE: &str = "channel_close_outgoing_payments";

const SELECT_CHANNEL_CLOSE: &str = "SELECT id
    ,       recipient_amount_sat
    ,       address
    ,       is_default_address
    ,       mining_fees_sat
    ,       tx_id
    ,       channel_id
    ,       closing_info_type
    ,       closing_info_blob
    ,       created_at
    ,       confirmed_at
    ,       locked_at
    FROM channel_close_outgoing_payments";

struct ChannelCloseRow {
    id: String,
    recipient_amount_sat: u64,
    address: String,
    is_default_address: bool,
    mining_fees_sat: u64,
    tx_id: String,
    channel_id: String,
    closing_info_type: String,
    closing_info_blob: Vec<u8>,
    created_at: i64,
    confirmed_at: Option<i64>,
    locked_at: Option<i64>,
}

fn map_channel_close_row(row: &Row<'_>) -> Result<ChannelCloseRow, rusqlite::Error> {
    Ok(ChannelCloseRow {
        id: row.get(0)?,
        recipient_amount_sat: row.get(1)?,
        address: row.get(2)?,
        is_default_address: row.get(3)?,
        mining_fees_sat: row.get(4)?,
        tx_id: row.get(5)?,
        channel_id: row.get(6)?,
        closing_info_type: row.get(7)?,
        closing_info_blob: row.get(8)?,
        created_at: row.get(9)?,
        confirmed_at: row.get(10)?,
        locked_at: row.get(11)?,
    })
}

impl ChannelCloseRow {
    fn decode(self) -> LedgerResult<ChannelCloseOutgoingPayment> {
        let closing_type = parse_type_version::<ClosingInfoTypeVersion>(&self.closing_info_type)
            .and_then(|type_version| decode_closing_info(type_version, &self.closing_info_blob))
            .map_err(|e| LedgerError::unreadable(TABLE, &self.id, &self.closing_info_type, &e))?;
        Ok(ChannelCloseOutgoingPayment {
            id: parse_column(TABLE, &self.id, "id", &self.id)?,
            recipient_amount: Satoshi(self.recipient_amount_sat),
            address: self.address,
            is_sent_to_default_address: self.is_default_address,
            mining_fee: Satoshi(self.mining_fees_sat),
            tx_id: parse_column(TABLE, &self.id, "tx_id", &self.tx_id)?,
            channel_id: parse_column(TABLE, &self.id, "channel_id", &self.channel_id)?,
            closing_type,
            created_at: self.created_at,
            confirmed_at: self.confirmed_at,
            locked_at: self.locked_at,
        })
    }
}

/// Queries over channel closes.
///
/// Closes recorded before the dedicated table existed live in the Lightning
/// outgoing tables and are merged into every read.
pub(crate) struct ChannelCloseQueries<'a> {
    conn: &'a Connection,
}

impl<'a> ChannelCloseQueries<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn insert(&self, payment: &ChannelCloseOutgoingPayment) -> LedgerResult<()> {
        let id = payment.id.to_string();
        let (closing_info_type, closing_info_blob) = encode_closing_info(payment.closing_type)?;
        self.conn
            .execute(
                "INSERT INTO channel_close_outgoing_payments (id, recipient_amount_sat, address, is_default_address, mining_fees_sat, tx_id, channel_id, closing_info_type, closing_info_blob, created_at, confirmed_at, locked_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    payment.recipient_amount.0,
                    payment.address,
                    payment.is_sent_to_default_address,
                    payment.mining_fee.0,
                    payment.tx_id.to_string(),
                    payment.channel_id.to_string(),
                    closing_info_type.tag(),
                    closing_info_blob,
                    payment.created_at,
                    payment.confirmed_at,
                    payment.locked_at,
                ],
            )
            .map_err(|e| LedgerError::from_insert(e, "channel close", &id))?;
        Ok(())
    }

    /// Looks the close up in its own table first, then among legacy rows.
    ///
    /// A legacy row that cannot be rebuilt is reported as absent.
    pub(crate) fn get(&self, id: Uuid) -> LedgerResult<Option<ChannelCloseOutgoingPayment>> {
        let row = self
            .conn
            .query_row(
                &format!("{SELECT_CHANNEL_CLOSE} WHERE id = ?"),
                params![id.to_string()],
                map_channel_close_row,
            )
            .optional()?;
        if let Some(row) = row {
            return row.decode().map(Some);
        }

        let legacy_rows = LightningOutgoingQueries::new(self.conn)
            .list_legacy_closes("p.id = ?", params![id.to_string()])?;
        Ok(legacy_rows.first().and_then(|legacy| {
            legacy::channel_close(legacy)
                .inspect_err(|e| warn!("Cannot rebuild legacy channel close {id}: {e}"))
                .ok()
        }))
    }

    pub(crate) fn list_by_created_at(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<ChannelCloseOutgoingPayment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_CHANNEL_CLOSE} WHERE created_at BETWEEN ? AND ? ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![from, to], map_channel_close_row)?
            .collect::<Result<Vec<_>, _>>()?;
        let mut closes = skip_unreadable(rows.into_iter().map(ChannelCloseRow::decode))?;

        let legacy_rows = LightningOutgoingQueries::new(self.conn)
            .list_legacy_closes("p.created_at BETWEEN ? AND ?", params![from, to])?;
        closes.extend(legacy_rows.iter().filter_map(|legacy| {
            legacy::channel_close(legacy)
                .inspect_err(|e| warn!("Skipping legacy channel close {}: {e}", legacy.id))
                .ok()
        }));
        closes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(closes)
    }
}
