use std::collections::HashMap;

use bitcoin::secp256k1::PublicKey;
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use tracing::warn;
use uuid::Uuid;

use super::{
    codec::{
        CodecError, StatusColumns, TypeVersion,
        outgoing::{
            DecodedDetails, OutgoingDetailsTypeVersion, OutgoingPartStatusTypeVersion,
            OutgoingStatusTypeVersion, decode_details, decode_part_status, decode_route,
            decode_status, encode_details, encode_part_status, encode_route, encode_status,
        },
        parse_type_version,
    },
    legacy::{LegacyChannelClose, LegacyClosingPart},
    skip_unreadable,
};
use crate::{
    ensure_ledger,
    error::{LedgerError, LedgerResult},
    models::{
        LightningOutgoingCompleted, LightningOutgoingPart, LightningOutgoingPartStatus,
        LightningOutgoingPayment, LightningOutgoingStatus, MilliSatoshi, PaymentHash,
    },
};

const TABLE: &str = "lightning_outgoing_payments";

const SELECT_WITH_PARTS: &str = "SELECT p.id
    ,       p.recipient_amount_msat
    ,       p.recipient_node_id
    ,       p.details_type
    ,       p.details_blob
    ,       p.created_at
    ,       p.completed_at
    ,       p.status_type
    ,       p.status_blob
    ,       EXISTS (SELECT 1 FROM outgoing_payment_closing_tx_parts c WHERE c.part_parent_id = p.id) AS has_closing_parts
    ,       lp.part_id
    ,       lp.part_amount_msat
    ,       lp.part_route
    ,       lp.part_created_at
    ,       lp.part_completed_at
    ,       lp.part_status_type
    ,       lp.part_status_blob
    FROM lightning_outgoing_payments p
    LEFT JOIN lightning_outgoing_payment_parts lp ON lp.part_parent_id = p.id";

pub(crate) const LEGACY_CLOSE_FILTER: &str = "(p.details_type = 'CLOSING_V0' OR EXISTS (SELECT 1 FROM outgoing_payment_closing_tx_parts c WHERE c.part_parent_id = p.id))";

struct PaymentRow {
    id: String,
    recipient_amount_msat: u64,
    recipient_node_id: String,
    details_type: String,
    details_blob: Vec<u8>,
    created_at: i64,
    completed_at: Option<i64>,
    status_type: Option<String>,
    status_blob: Option<Vec<u8>>,
    has_closing_parts: bool,
}

struct PartRow {
    part_id: String,
    amount_msat: u64,
    route: String,
    created_at: i64,
    completed_at: Option<i64>,
    status_type: Option<String>,
    status_blob: Option<Vec<u8>>,
}

fn map_payment_with_part(row: &Row<'_>) -> Result<(PaymentRow, Option<PartRow>), rusqlite::Error> {
    let payment = PaymentRow {
        id: row.get(0)?,
        recipient_amount_msat: row.get(1)?,
        recipient_node_id: row.get(2)?,
        details_type: row.get(3)?,
        details_blob: row.get(4)?,
        created_at: row.get(5)?,
        completed_at: row.get(6)?,
        status_type: row.get(7)?,
        status_blob: row.get(8)?,
        has_closing_parts: row.get(9)?,
    };
    let part = match row.get::<_, Option<String>>(10)? {
        Some(part_id) => Some(PartRow {
            part_id,
            amount_msat: row.get(11)?,
            route: row.get(12)?,
            created_at: row.get(13)?,
            completed_at: row.get(14)?,
            status_type: row.get(15)?,
            status_blob: row.get(16)?,
        }),
        None => None,
    };
    Ok((payment, part))
}

/// Groups the joined rows by parent id, one entry per payment holding all its parts.
///
/// Payments keep the order in which they first appear.
fn group_by_payment(rows: Vec<(PaymentRow, Option<PartRow>)>) -> Vec<(PaymentRow, Vec<PartRow>)> {
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut grouped: Vec<(PaymentRow, Vec<PartRow>)> = Vec::new();
    for (payment, part) in rows {
        let position = match index.get(&payment.id) {
            Some(position) => *position,
            None => {
                index.insert(payment.id.clone(), grouped.len());
                grouped.push((payment, Vec::new()));
                grouped.len().saturating_sub(1)
            }
        };
        if let (Some(part), Some((_, parts))) = (part, grouped.get_mut(position)) {
            parts.push(part);
        }
    }
    grouped
}

/// Once a payment succeeded off-chain, only the parts that succeeded are
/// part of its settlement. Other statuses keep every part.
fn filter_useless_parts(mut payment: LightningOutgoingPayment) -> LightningOutgoingPayment {
    if let LightningOutgoingStatus::Completed(LightningOutgoingCompleted::SucceededOffChain {
        ..
    }) = payment.status
    {
        payment
            .parts
            .retain(|p| matches!(p.status, LightningOutgoingPartStatus::Succeeded { .. }));
    }
    payment
}

impl PaymentRow {
    /// Whether the row is a channel close recorded under a retired schema.
    fn is_legacy_close(&self) -> bool {
        self.has_closing_parts
            || self.details_type == OutgoingDetailsTypeVersion::ClosingV0.tag()
    }

    fn decode(self, parts: Vec<PartRow>) -> LedgerResult<LightningOutgoingPayment> {
        let unreadable =
            |tag: &str, e: CodecError| LedgerError::unreadable(TABLE, &self.id, tag, &e);
        let invalid = |tag: &str, what: String| unreadable(tag, CodecError::InvalidValue(what));

        let id = Uuid::parse_str(&self.id).map_err(|e| invalid("id", e.to_string()))?;
        let recipient = self
            .recipient_node_id
            .parse::<PublicKey>()
            .map_err(|e| invalid("recipient", e.to_string()))?;

        let details_type: OutgoingDetailsTypeVersion = parse_type_version(&self.details_type)
            .map_err(|e| unreadable(&self.details_type, e))?;
        let details = match decode_details(details_type, &self.details_blob)
            .map_err(|e| unreadable(&self.details_type, e))?
        {
            DecodedDetails::Lightning(details) => details,
            DecodedDetails::LegacyClosing(_) => {
                return Err(invalid(
                    &self.details_type,
                    "channel close stored as outgoing payment".to_string(),
                ));
            }
        };

        let status_tag = self.status_type.clone().unwrap_or_default();
        let status = match StatusColumns::<OutgoingStatusTypeVersion>::from_columns(
            self.completed_at,
            self.status_type,
            self.status_blob,
        )
        .map_err(|e| unreadable(&status_tag, e))?
        {
            None => LightningOutgoingStatus::Pending,
            Some(columns) => LightningOutgoingStatus::Completed(
                decode_status(columns.type_version, &columns.blob, columns.completed_at)
                    .map_err(|e| unreadable(&status_tag, e))?,
            ),
        };

        let parts = parts
            .into_iter()
            .map(|part| {
                let part_tag = part.status_type.clone().unwrap_or_default();
                let status = match StatusColumns::<OutgoingPartStatusTypeVersion>::from_columns(
                    part.completed_at,
                    part.status_type,
                    part.status_blob,
                )
                .map_err(|e| unreadable(&part_tag, e))?
                {
                    None => LightningOutgoingPartStatus::Pending,
                    Some(columns) => decode_part_status(
                        columns.type_version,
                        &columns.blob,
                        columns.completed_at,
                    )
                    .map_err(|e| unreadable(&part_tag, e))?,
                };
                Ok(LightningOutgoingPart {
                    id: Uuid::parse_str(&part.part_id)
                        .map_err(|e| invalid("part_id", e.to_string()))?,
                    amount: MilliSatoshi(part.amount_msat),
                    route: decode_route(&part.route).map_err(|e| unreadable("route", e))?,
                    status,
                    created_at: part.created_at,
                })
            })
            .collect::<LedgerResult<Vec<_>>>()?;

        Ok(filter_useless_parts(LightningOutgoingPayment {
            id,
            recipient_amount: MilliSatoshi(self.recipient_amount_msat),
            recipient,
            details,
            parts,
            status,
            created_at: self.created_at,
        }))
    }
}

/// Queries over Lightning outgoing payments and their parts.
pub(crate) struct LightningOutgoingQueries<'a> {
    conn: &'a Connection,
}

impl<'a> LightningOutgoingQueries<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Inserts the payment and its parts. Must run inside a transaction.
    pub(crate) fn insert(&self, payment: &LightningOutgoingPayment) -> LedgerResult<()> {
        let id = payment.id.to_string();
        let (details_type, details_blob) = encode_details(&payment.details)?;
        let status = match &payment.status {
            LightningOutgoingStatus::Pending => None,
            LightningOutgoingStatus::Completed(completed) => {
                let (type_version, blob) = encode_status(completed)?;
                Some((completed.completed_at(), type_version, blob))
            }
        };
        self.conn
            .execute(
                "INSERT INTO lightning_outgoing_payments (id, recipient_amount_msat, recipient_node_id, payment_hash, details_type, details_blob, created_at, completed_at, status_type, status_blob)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    id,
                    payment.recipient_amount.0,
                    payment.recipient.to_string(),
                    payment.payment_hash().to_string(),
                    details_type.tag(),
                    details_blob,
                    payment.created_at,
                    status.as_ref().map(|s| s.0),
                    status.as_ref().map(|s| s.1.tag()),
                    status.as_ref().map(|s| s.2.as_slice()),
                ],
            )
            .map_err(|e| LedgerError::from_insert(e, "lightning outgoing payment", &id))?;
        self.insert_parts(&id, &payment.parts)
    }

    fn insert_parts(&self, parent_id: &str, parts: &[LightningOutgoingPart]) -> LedgerResult<()> {
        let mut stmt = self.conn.prepare(
            "INSERT INTO lightning_outgoing_payment_parts (part_id, part_parent_id, part_amount_msat, part_route, part_created_at, part_completed_at, part_status_type, part_status_blob)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        for part in parts {
            let part_id = part.id.to_string();
            let status = encode_part_status(&part.status)?;
            stmt.execute(params![
                part_id,
                parent_id,
                part.amount.0,
                encode_route(&part.route),
                part.created_at,
                status.as_ref().map(|s| s.2),
                status.as_ref().map(|s| s.0.tag()),
                status.as_ref().map(|s| s.1.as_slice()),
            ])
            .map_err(|e| LedgerError::from_insert(e, "lightning outgoing payment", &part_id))?;
        }
        Ok(())
    }

    /// Appends parts to an existing payment. Must run inside a transaction.
    pub(crate) fn add_parts(
        &self,
        parent_id: Uuid,
        parts: &[LightningOutgoingPart],
    ) -> LedgerResult<()> {
        let parent_id = parent_id.to_string();
        let exists = self
            .conn
            .query_row(
                "SELECT 1 FROM lightning_outgoing_payments WHERE id = ?",
                params![parent_id],
                |_| Ok(()),
            )
            .optional()?
            .is_some();
        ensure_ledger!(
            exists,
            LedgerError::ReferentialViolation {
                parent: "lightning outgoing payment",
                id: parent_id,
            }
        );
        self.insert_parts(&parent_id, parts)
    }

    /// Sets the terminal status. Returns `false` if the payment is unknown or already completed.
    pub(crate) fn complete(
        &self,
        id: Uuid,
        completed: &LightningOutgoingCompleted,
    ) -> LedgerResult<bool> {
        let (type_version, blob) = encode_status(completed)?;
        let changed = self.conn.execute(
            "UPDATE lightning_outgoing_payments SET completed_at = ?, status_type = ?, status_blob = ?
             WHERE id = ? AND completed_at IS NULL",
            params![
                completed.completed_at(),
                type_version.tag(),
                blob,
                id.to_string()
            ],
        )?;
        Ok(changed == 1)
    }

    /// Sets the terminal status of one part. Returns `false` if the part is
    /// unknown or already completed.
    pub(crate) fn complete_part(
        &self,
        part_id: Uuid,
        status: &LightningOutgoingPartStatus,
    ) -> LedgerResult<bool> {
        let Some((type_version, blob, completed_at)) = encode_part_status(status)? else {
            return Err(LedgerError::InvalidInput(
                "a part can only be completed with a terminal status".to_string(),
            ));
        };
        let changed = self.conn.execute(
            "UPDATE lightning_outgoing_payment_parts SET part_completed_at = ?, part_status_type = ?, part_status_blob = ?
             WHERE part_id = ? AND part_completed_at IS NULL",
            params![completed_at, type_version.tag(), blob, part_id.to_string()],
        )?;
        Ok(changed == 1)
    }

    fn query_grouped<P: Params>(
        &self,
        filter: &str,
        params: P,
    ) -> LedgerResult<Vec<(PaymentRow, Vec<PartRow>)>> {
        let mut stmt = self.conn.prepare(&format!(
            "{SELECT_WITH_PARTS} WHERE {filter} ORDER BY p.created_at DESC, p.id, lp.part_created_at"
        ))?;
        let rows = stmt
            .query_map(params, map_payment_with_part)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(group_by_payment(rows))
    }

    fn list<P: Params>(
        &self,
        filter: &str,
        params: P,
    ) -> LedgerResult<Vec<LightningOutgoingPayment>> {
        let grouped = self.query_grouped(filter, params)?;
        skip_unreadable(
            grouped
                .into_iter()
                .filter(|(payment, _)| !payment.is_legacy_close())
                .map(|(payment, parts)| payment.decode(parts)),
        )
    }

    /// Returns `None` for unknown ids and for rows that record a legacy channel close.
    pub(crate) fn get(&self, id: Uuid) -> LedgerResult<Option<LightningOutgoingPayment>> {
        let grouped = self.query_grouped("p.id = ?", params![id.to_string()])?;
        grouped
            .into_iter()
            .next()
            .filter(|(payment, _)| !payment.is_legacy_close())
            .map(|(payment, parts)| payment.decode(parts))
            .transpose()
    }

    pub(crate) fn parent_of(&self, part_id: Uuid) -> LedgerResult<Option<Uuid>> {
        let parent_id: Option<String> = self
            .conn
            .query_row(
                "SELECT part_parent_id FROM lightning_outgoing_payment_parts WHERE part_id = ?",
                params![part_id.to_string()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(parent_id.and_then(|parent_id| {
            Uuid::parse_str(&parent_id)
                .inspect_err(|_| warn!("Part {part_id} references invalid parent id {parent_id}"))
                .ok()
        }))
    }

    /// Returns the parent of the part, as long as the part is still shown in it.
    pub(crate) fn get_from_part_id(
        &self,
        part_id: Uuid,
    ) -> LedgerResult<Option<LightningOutgoingPayment>> {
        let Some(parent_id) = self.parent_of(part_id)? else {
            return Ok(None);
        };
        Ok(self
            .get(parent_id)?
            .filter(|payment| payment.parts.iter().any(|p| p.id == part_id)))
    }

    pub(crate) fn list_for_hash(
        &self,
        payment_hash: &PaymentHash,
    ) -> LedgerResult<Vec<LightningOutgoingPayment>> {
        self.list("p.payment_hash = ?", params![payment_hash.to_string()])
    }

    pub(crate) fn list_by_created_at(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<LightningOutgoingPayment>> {
        self.list("p.created_at BETWEEN ? AND ?", params![from, to])
    }

    pub(crate) fn oldest_completed_at(&self) -> LedgerResult<Option<i64>> {
        Ok(self.conn.query_row(
            "SELECT MIN(completed_at) FROM lightning_outgoing_payments WHERE completed_at IS NOT NULL",
            [],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn count(&self) -> LedgerResult<u64> {
        Ok(self.conn.query_row(
            &format!("SELECT COUNT(*) FROM lightning_outgoing_payments p WHERE NOT {LEGACY_CLOSE_FILTER}"),
            [],
            |row| row.get(0),
        )?)
    }

    pub(crate) fn count_legacy_closes(&self) -> LedgerResult<u64> {
        Ok(self.conn.query_row(
            &format!("SELECT COUNT(*) FROM lightning_outgoing_payments p WHERE {LEGACY_CLOSE_FILTER}"),
            [],
            |row| row.get(0),
        )?)
    }

    /// Raw rows recording channel closes under the retired schema.
    pub(crate) fn list_legacy_closes<P: Params>(
        &self,
        filter: &str,
        params: P,
    ) -> LedgerResult<Vec<LegacyChannelClose>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT p.id, p.recipient_amount_msat, p.details_type, p.details_blob, p.status_type, p.status_blob, p.created_at, p.completed_at
             FROM lightning_outgoing_payments p
             WHERE {LEGACY_CLOSE_FILTER} AND {filter}
             ORDER BY p.created_at DESC"
        ))?;
        let rows = stmt
            .query_map(params, |row| {
                let details_type: String = row.get(2)?;
                let status_type: Option<String> = row.get(4)?;
                Ok((
                    row.get::<_, String>(0)?,
                    LegacyChannelClose {
                        id: Uuid::nil(),
                        recipient_amount: MilliSatoshi(row.get(1)?),
                        details_blob: (details_type == OutgoingDetailsTypeVersion::ClosingV0.tag())
                            .then(|| row.get(3))
                            .transpose()?,
                        status_blob: (status_type.as_deref()
                            == Some(OutgoingStatusTypeVersion::SucceededOnChainV0.tag()))
                        .then(|| row.get(5))
                        .transpose()?,
                        parts: Vec::new(),
                        created_at: row.get(6)?,
                        completed_at: row.get(7)?,
                    },
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut parts_stmt = self.conn.prepare(
            "SELECT part_amount_sat, part_tx_id, part_closing_info_type, part_closing_info_blob
             FROM outgoing_payment_closing_tx_parts
             WHERE part_parent_id = ?
             ORDER BY part_created_at",
        )?;
        let mut closes = Vec::with_capacity(rows.len());
        for (id, mut close) in rows {
            let Ok(uuid) = Uuid::parse_str(&id) else {
                warn!("Skipping legacy channel close with invalid id {id}");
                continue;
            };
            close.id = uuid;
            close.parts = parts_stmt
                .query_map(params![id], |row| {
                    Ok(LegacyClosingPart {
                        amount_sat: row.get(0)?,
                        tx_id: row.get(1)?,
                        closing_info_type: row.get(2)?,
                        closing_info_blob: row.get(3)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            closes.push(close);
        }
        Ok(closes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PartFailure, Preimage};

    fn part(status: LightningOutgoingPartStatus) -> LightningOutgoingPart {
        LightningOutgoingPart {
            id: Uuid::new_v4(),
            amount: MilliSatoshi(50),
            route: Vec::new(),
            status,
            created_at: 0,
        }
    }

    fn payment(status: LightningOutgoingStatus) -> LightningOutgoingPayment {
        LightningOutgoingPayment {
            id: Uuid::new_v4(),
            recipient_amount: MilliSatoshi(100),
            recipient: "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
                .parse()
                .unwrap(),
            details: crate::models::LightningOutgoingDetails::KeySend {
                preimage: Preimage([1; 32]),
            },
            parts: vec![
                part(LightningOutgoingPartStatus::Succeeded {
                    preimage: Preimage([1; 32]),
                    completed_at: 1,
                }),
                part(LightningOutgoingPartStatus::Failed {
                    failure: PartFailure {
                        remote_failure_code: None,
                        details: "temporary channel failure".to_string(),
                    },
                    completed_at: 1,
                }),
                part(LightningOutgoingPartStatus::Pending),
            ],
            status,
            created_at: 0,
        }
    }

    #[test]
    fn test_filter_useless_parts() {
        let succeeded = filter_useless_parts(payment(LightningOutgoingStatus::Completed(
            LightningOutgoingCompleted::SucceededOffChain {
                preimage: Preimage([1; 32]),
                completed_at: 2,
            },
        )));
        assert_eq!(succeeded.parts.len(), 1);

        let pending = filter_useless_parts(payment(LightningOutgoingStatus::Pending));
        assert_eq!(pending.parts.len(), 3);

        let failed = filter_useless_parts(payment(LightningOutgoingStatus::Completed(
            LightningOutgoingCompleted::Failed {
                reason: crate::models::FinalFailure::RetryExhausted,
                completed_at: 2,
            },
        )));
        assert_eq!(failed.parts.len(), 3);
    }
}
