use bitcoin::Txid;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use super::{
    codec::{
        CodecError, TypeVersion,
        incoming::{
            IncomingOriginTypeVersion, IncomingReceivedWithTypeVersion, decode_origin,
            decode_received_with, encode_origin, encode_received_with,
        },
        parse_type_version,
    },
    legacy::ReceivedContext,
    skip_unreadable,
};
use crate::{
    error::{LedgerError, LedgerResult},
    models::{
        IncomingPayment, IncomingReceived, MilliSatoshi, PaymentHash, Preimage, ReceivedWith,
        WalletPaymentId,
    },
};

const TABLE: &str = "incoming_payments";

const SELECT_INCOMING: &str = "SELECT payment_hash
    ,       preimage
    ,       origin_type
    ,       origin_blob
    ,       received_amount_msat
    ,       received_at
    ,       received_with_type
    ,       received_with_blob
    ,       created_at
    FROM incoming_payments";

/// Columns of an `incoming_payments` row, before decoding.
struct IncomingRow {
    payment_hash: String,
    preimage: String,
    origin_type: String,
    origin_blob: Vec<u8>,
    received_amount_msat: Option<u64>,
    received_at: Option<i64>,
    received_with_type: Option<String>,
    received_with_blob: Option<Vec<u8>>,
    created_at: i64,
}

fn map_incoming_row(row: &Row<'_>) -> Result<IncomingRow, rusqlite::Error> {
    Ok(IncomingRow {
        payment_hash: row.get(0)?,
        preimage: row.get(1)?,
        origin_type: row.get(2)?,
        origin_blob: row.get(3)?,
        received_amount_msat: row.get(4)?,
        received_at: row.get(5)?,
        received_with_type: row.get(6)?,
        received_with_blob: row.get(7)?,
        created_at: row.get(8)?,
    })
}

impl IncomingRow {
    fn decode(self) -> LedgerResult<IncomingPayment> {
        let unreadable = |tag: &str, e: CodecError| {
            LedgerError::unreadable(TABLE, &self.payment_hash, tag, &e)
        };

        let preimage = self.preimage.parse::<Preimage>().map_err(|e| {
            unreadable("preimage", CodecError::InvalidValue(format!("preimage: {e}")))
        })?;
        let origin_type: IncomingOriginTypeVersion = parse_type_version(&self.origin_type)
            .map_err(|e| unreadable(&self.origin_type, e))?;
        let origin = decode_origin(origin_type, &self.origin_blob)
            .map_err(|e| unreadable(&self.origin_type, e))?;

        let received = match (self.received_at, self.received_with_type, self.received_with_blob) {
            (Some(received_at), Some(received_with_type), Some(blob)) => {
                let ctx = ReceivedContext {
                    received_amount: MilliSatoshi(self.received_amount_msat.unwrap_or_default()),
                    received_at,
                    origin: origin_type,
                };
                let received_with = parse_type_version(&received_with_type)
                    .and_then(|type_version| decode_received_with(type_version, &blob, &ctx))
                    .map_err(|e| unreadable(&received_with_type, e))?;
                Some(IncomingReceived {
                    received_with,
                    received_at,
                })
            }
            (None, None, None) => None,
            (received_at, received_with_type, blob) => {
                return Err(unreadable(
                    received_with_type.as_deref().unwrap_or("received_with"),
                    CodecError::InconsistentStatus {
                        completed_at: received_at,
                        type_version: received_with_type.clone(),
                        has_blob: blob.is_some(),
                    },
                ));
            }
        };

        Ok(IncomingPayment {
            preimage,
            origin,
            received,
            created_at: self.created_at,
        })
    }
}

/// Queries over the `incoming_payments` table.
pub(crate) struct IncomingQueries<'a> {
    conn: &'a Connection,
}

impl<'a> IncomingQueries<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub(crate) fn insert(&self, payment: &IncomingPayment) -> LedgerResult<()> {
        let payment_hash = payment.payment_hash().to_string();
        let (origin_type, origin_blob) = encode_origin(&payment.origin)?;
        let (received_amount, received_at, received_with) = match &payment.received {
            Some(received) => {
                let (type_version, blob) = encode_received_with(&received.received_with)?;
                (
                    Some(received.amount().0),
                    Some(received.received_at),
                    Some((type_version, blob)),
                )
            }
            None => (None, None, None),
        };
        let (received_with_type, received_with_blob) = received_with.unzip();

        self.conn
            .execute(
                "INSERT INTO incoming_payments (payment_hash, preimage, origin_type, origin_blob, received_amount_msat, received_at, received_with_type, received_with_blob, created_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    payment_hash,
                    payment.preimage.to_string(),
                    origin_type.tag(),
                    origin_blob,
                    received_amount,
                    received_at,
                    received_with_type.map(TypeVersion::tag),
                    received_with_blob,
                    payment.created_at,
                ],
            )
            .map_err(|e| LedgerError::from_insert(e, "incoming payment", &payment_hash))?;
        Ok(())
    }

    pub(crate) fn exists(&self, payment_hash: &PaymentHash) -> LedgerResult<bool> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM incoming_payments WHERE payment_hash = ?",
                params![payment_hash.to_string()],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    /// Records the reception. Returns `false` if the payment was already received.
    pub(crate) fn receive(
        &self,
        payment_hash: &PaymentHash,
        received_with: &[ReceivedWith],
        received_at: i64,
    ) -> LedgerResult<bool> {
        let amount: MilliSatoshi = received_with.iter().map(ReceivedWith::amount).sum();
        let (type_version, blob) = encode_received_with(received_with)?;
        let changed = self.conn.execute(
            "UPDATE incoming_payments
             SET received_amount_msat = ?, received_at = ?, received_with_type = ?, received_with_blob = ?
             WHERE payment_hash = ? AND received_at IS NULL",
            params![
                amount.0,
                received_at,
                type_version.tag(),
                blob,
                payment_hash.to_string()
            ],
        )?;
        Ok(changed == 1)
    }

    pub(crate) fn get(&self, payment_hash: &PaymentHash) -> LedgerResult<Option<IncomingPayment>> {
        self.conn
            .query_row(
                &format!("{SELECT_INCOMING} WHERE payment_hash = ?"),
                params![payment_hash.to_string()],
                map_incoming_row,
            )
            .optional()?
            .map(IncomingRow::decode)
            .transpose()
    }

    fn list(&self, filter: &str, from: i64, to: i64) -> LedgerResult<Vec<IncomingPayment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_INCOMING} WHERE {filter} ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![from, to], map_incoming_row)?
            .collect::<Result<Vec<_>, _>>()?;
        skip_unreadable(rows.into_iter().map(IncomingRow::decode))
    }

    pub(crate) fn list_by_created_at(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<IncomingPayment>> {
        self.list("created_at BETWEEN ? AND ?", from, to)
    }

    /// Payments created in the range that were never received.
    pub(crate) fn list_expired(&self, from: i64, to: i64) -> LedgerResult<Vec<IncomingPayment>> {
        self.list("received_at IS NULL AND created_at BETWEEN ? AND ?", from, to)
    }

    /// Received payments with a funding transaction that is not confirmed yet.
    pub(crate) fn list_not_yet_confirmed(&self) -> LedgerResult<Vec<IncomingPayment>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_INCOMING}
             WHERE received_at IS NOT NULL
             AND payment_hash IN (
               SELECT id FROM link_tx_to_payments WHERE type = ? AND confirmed_at IS NULL
             )
             ORDER BY created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params![WalletPaymentId::INCOMING], map_incoming_row)?
            .collect::<Result<Vec<_>, _>>()?;
        skip_unreadable(rows.into_iter().map(IncomingRow::decode))
    }

    pub(crate) fn delete(&self, payment_hash: &PaymentHash) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM incoming_payments WHERE payment_hash = ?",
            params![payment_hash.to_string()],
        )?;
        Ok(changed == 1)
    }

    pub(crate) fn delete_if_not_received(&self, payment_hash: &PaymentHash) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM incoming_payments WHERE payment_hash = ? AND received_at IS NULL",
            params![payment_hash.to_string()],
        )?;
        Ok(changed == 1)
    }

    pub(crate) fn oldest_received_at(&self) -> LedgerResult<Option<i64>> {
        Ok(self.conn.query_row(
            "SELECT MIN(received_at) FROM incoming_payments WHERE received_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn count(&self) -> LedgerResult<u64> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM incoming_payments", [], |row| row.get(0))?)
    }

    pub(crate) fn set_confirmed(
        &self,
        payment_hash: &PaymentHash,
        tx_id: Txid,
        at: i64,
    ) -> LedgerResult<bool> {
        self.update_on_chain_parts(payment_hash, |part| part.set_confirmed(tx_id, at))
    }

    pub(crate) fn set_locked(
        &self,
        payment_hash: &PaymentHash,
        tx_id: Txid,
        at: i64,
    ) -> LedgerResult<bool> {
        self.update_on_chain_parts(payment_hash, |part| part.set_locked(tx_id, at))
    }

    /// Applies `update` to every received part and stores the parts back if any changed.
    ///
    /// Rows received under a retired encoding are left as stored.
    fn update_on_chain_parts(
        &self,
        payment_hash: &PaymentHash,
        mut update: impl FnMut(&mut ReceivedWith) -> bool,
    ) -> LedgerResult<bool> {
        let stored_type: Option<Option<String>> = self
            .conn
            .query_row(
                "SELECT received_with_type FROM incoming_payments WHERE payment_hash = ?",
                params![payment_hash.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        match stored_type.flatten() {
            Some(tag) if tag == IncomingReceivedWithTypeVersion::MultipartsV1.tag() => {}
            Some(tag) => {
                debug!("Keeping {tag} parts of incoming payment {payment_hash} as stored");
                return Ok(false);
            }
            None => return Ok(false),
        }
        let Some(payment) = self.get(payment_hash)? else {
            return Ok(false);
        };
        let Some(mut received) = payment.received else {
            return Ok(false);
        };
        let mut changed = false;
        for part in &mut received.received_with {
            changed |= update(part);
        }
        if !changed {
            return Ok(false);
        }

        let (type_version, blob) = encode_received_with(&received.received_with)?;
        self.conn.execute(
            "UPDATE incoming_payments SET received_with_type = ?, received_with_blob = ? WHERE payment_hash = ?",
            params![type_version.tag(), blob, payment_hash.to_string()],
        )?;
        Ok(true)
    }
}
