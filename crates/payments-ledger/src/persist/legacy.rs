//! Reinterpretation of rows written under retired schemas.
//!
//! These functions are only called from read paths. Stored rows are never
//! rewritten, so every read derives the same objects from the same bytes.

use bitcoin::Txid;
use serde::Deserialize;
#[cfg(test)]
use serde::Serialize;
use uuid::Uuid;

use super::codec::{
    CodecError, from_blob,
    incoming::{IncomingOriginTypeVersion, parse_channel_id},
    onchain::{ClosingInfoTypeVersion, decode_closing_info},
    outgoing::{OutgoingStatusTypeVersion, decode_status},
    parse_type_version,
};
use crate::models::{
    ChannelClosingType, ChannelCloseOutgoingPayment, ChannelId, LightningOutgoingCompleted,
    MilliSatoshi, ReceivedWith, Satoshi,
};

/// Row columns needed to complete retired received-with encodings.
pub(crate) struct ReceivedContext {
    pub received_amount: MilliSatoshi,
    pub received_at: i64,
    pub origin: IncomingOriginTypeVersion,
}

#[derive(Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub(crate) struct NewChannelV0 {
    pub fees_msat: u64,
    pub channel_id: Option<String>,
}

#[derive(Deserialize)]
#[cfg_attr(test, derive(Serialize))]
#[serde(tag = "type")]
pub(crate) enum MultipartV0 {
    #[serde(rename = "lightning")]
    Lightning {
        amount_msat: u64,
        channel_id: String,
        htlc_id: u64,
    },
    #[serde(rename = "new_channel")]
    NewChannel {
        amount_msat: u64,
        fees_msat: u64,
        channel_id: Option<String>,
    },
}

fn optional_channel_id(channel_id: Option<&str>) -> Result<ChannelId, CodecError> {
    channel_id.map_or(Ok(ChannelId::ZERO), parse_channel_id)
}

/// A single HTLC whose amount was only recorded on the row.
pub(crate) fn received_with_lightning_payment_v0(ctx: &ReceivedContext) -> Vec<ReceivedWith> {
    vec![ReceivedWith::LightningPayment {
        amount: ctx.received_amount,
        channel_id: ChannelId::ZERO,
        htlc_id: 0,
    }]
}

/// A pay-to-open whose amount was only recorded on the row.
pub(crate) fn received_with_new_channel_v0(
    blob: NewChannelV0,
    ctx: &ReceivedContext,
) -> Result<Vec<ReceivedWith>, CodecError> {
    Ok(vec![ReceivedWith::NewChannel {
        amount: ctx.received_amount,
        service_fee: MilliSatoshi(blob.fees_msat),
        mining_fee: Satoshi::ZERO,
        channel_id: optional_channel_id(blob.channel_id.as_deref())?,
        tx_id: None,
        confirmed_at: Some(ctx.received_at),
        locked_at: Some(ctx.received_at),
    }])
}

/// Pay-to-open parts of this version recorded the amount including the
/// service fee, except for swap-ins.
pub(crate) fn received_with_multiparts_v0(
    parts: Vec<MultipartV0>,
    ctx: &ReceivedContext,
) -> Result<Vec<ReceivedWith>, CodecError> {
    parts
        .into_iter()
        .map(|part| {
            Ok(match part {
                MultipartV0::Lightning {
                    amount_msat,
                    channel_id,
                    htlc_id,
                } => ReceivedWith::LightningPayment {
                    amount: MilliSatoshi(amount_msat),
                    channel_id: parse_channel_id(&channel_id)?,
                    htlc_id,
                },
                MultipartV0::NewChannel {
                    amount_msat,
                    fees_msat,
                    channel_id,
                } => {
                    let amount = if ctx.origin == IncomingOriginTypeVersion::SwapInV0 {
                        MilliSatoshi(amount_msat)
                    } else {
                        MilliSatoshi(amount_msat).saturating_sub(MilliSatoshi(fees_msat))
                    };
                    ReceivedWith::NewChannel {
                        amount,
                        service_fee: MilliSatoshi(fees_msat),
                        mining_fee: Satoshi::ZERO,
                        channel_id: optional_channel_id(channel_id.as_deref())?,
                        tx_id: None,
                        confirmed_at: Some(ctx.received_at),
                        locked_at: Some(ctx.received_at),
                    }
                }
            })
        })
        .collect()
}

/// Details blob of a channel close recorded as a Lightning outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[cfg_attr(test, derive(Serialize))]
pub(crate) struct ClosingDetailsV0 {
    pub channel_id: String,
    pub closing_address: String,
    pub is_sent_to_default_address: bool,
}

/// Row of the retired closing transactions table.
#[derive(Debug, Clone)]
pub(crate) struct LegacyClosingPart {
    pub amount_sat: u64,
    pub tx_id: String,
    pub closing_info_type: Option<String>,
    pub closing_info_blob: Option<Vec<u8>>,
}

/// Raw columns of a Lightning outgoing row that actually records a channel close.
#[derive(Debug, Clone)]
pub(crate) struct LegacyChannelClose {
    pub id: Uuid,
    pub recipient_amount: MilliSatoshi,
    /// Present when the details were stored as `CLOSING_V0`.
    pub details_blob: Option<Vec<u8>>,
    /// Present when the status was stored as `SUCCEEDED_ONCHAIN_V0`.
    pub status_blob: Option<Vec<u8>>,
    pub parts: Vec<LegacyClosingPart>,
    pub created_at: i64,
    pub completed_at: Option<i64>,
}

/// Builds the channel close a retired row stands for.
///
/// Fields the old schema did not record get placeholders: the confirmation
/// and lock times fall back to the completion time, then to the creation time.
pub(crate) fn channel_close(
    legacy: &LegacyChannelClose,
) -> Result<ChannelCloseOutgoingPayment, CodecError> {
    let confirmed_at = legacy.completed_at.unwrap_or(legacy.created_at);
    let details: Option<ClosingDetailsV0> =
        legacy.details_blob.as_deref().map(from_blob).transpose()?;
    let status = legacy
        .status_blob
        .as_deref()
        .map(|blob| {
            decode_status(OutgoingStatusTypeVersion::SucceededOnChainV0, blob, confirmed_at)
        })
        .transpose()?;
    let (status_tx_ids, claimed, status_closing_type) = match status {
        Some(LightningOutgoingCompleted::SucceededOnChain {
            tx_ids,
            claimed,
            closing_type,
            ..
        }) => (tx_ids, Some(claimed), Some(closing_type)),
        _ => (Vec::new(), None, None),
    };

    let mut part_tx_id = None;
    let mut part_closing_type = None;
    for part in &legacy.parts {
        if part_tx_id.is_none() {
            part_tx_id = Some(
                part.tx_id
                    .parse::<Txid>()
                    .map_err(|e| CodecError::InvalidValue(format!("closing tx id: {e}")))?,
            );
        }
        if let (None, Some(type_version), Some(blob)) = (
            part_closing_type,
            part.closing_info_type.as_deref(),
            part.closing_info_blob.as_deref(),
        ) {
            let type_version: ClosingInfoTypeVersion = parse_type_version(type_version)?;
            part_closing_type = Some(decode_closing_info(type_version, blob)?);
        }
    }

    let tx_id = part_tx_id
        .or_else(|| status_tx_ids.first().copied())
        .ok_or_else(|| CodecError::InvalidValue("channel close without transaction".to_string()))?;
    let recipient_amount = if legacy.parts.is_empty() {
        claimed.unwrap_or_else(|| legacy.recipient_amount.truncate_to_sat())
    } else {
        legacy.parts.iter().map(|p| Satoshi(p.amount_sat)).sum()
    };

    Ok(ChannelCloseOutgoingPayment {
        id: legacy.id,
        recipient_amount,
        address: details
            .as_ref()
            .map(|d| d.closing_address.clone())
            .unwrap_or_default(),
        is_sent_to_default_address: details
            .as_ref()
            .is_some_and(|d| d.is_sent_to_default_address),
        mining_fee: legacy
            .recipient_amount
            .truncate_to_sat()
            .saturating_sub(recipient_amount),
        tx_id,
        channel_id: optional_channel_id(details.as_ref().map(|d| d.channel_id.as_str()))?,
        closing_type: part_closing_type
            .or(status_closing_type)
            .unwrap_or(ChannelClosingType::Other),
        created_at: legacy.created_at,
        confirmed_at: Some(confirmed_at),
        locked_at: Some(confirmed_at),
    })
}
