use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};

use super::{CodecError, from_blob, to_blob};
use crate::{
    models::{ChannelId, IncomingOrigin, MilliSatoshi, ReceivedWith, Satoshi},
    persist::legacy::{self, ReceivedContext},
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum IncomingOriginTypeVersion {
    #[strum(serialize = "INVOICE_V0")]
    InvoiceV0,
    #[strum(serialize = "KEYSEND_V0")]
    KeySendV0,
    #[strum(serialize = "SWAPIN_V0")]
    SwapInV0,
    #[strum(serialize = "ONCHAIN_V0")]
    OnChainV0,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum IncomingReceivedWithTypeVersion {
    /// Retired: a single HTLC, amount held in the row.
    #[strum(serialize = "LIGHTNING_PAYMENT_V0")]
    LightningPaymentV0,
    /// Retired: a single pay-to-open, amount held in the row.
    #[strum(serialize = "NEW_CHANNEL_V0")]
    NewChannelV0,
    /// Retired: pay-to-open amounts included the service fee.
    #[strum(serialize = "MULTIPARTS_V0")]
    MultipartsV0,
    #[strum(serialize = "MULTIPARTS_V1")]
    MultipartsV1,
}

mod v0 {
    use super::{Deserialize, OutPoint, Serialize, Txid};

    #[derive(Serialize, Deserialize)]
    pub(super) struct Invoice {
        pub payment_request: String,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct KeySend {}

    #[derive(Serialize, Deserialize)]
    pub(super) struct SwapIn {
        pub address: Option<String>,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct OnChain {
        pub tx_id: Txid,
        pub local_inputs: Vec<OutPoint>,
    }
}

mod v1 {
    use super::{Deserialize, Serialize, Txid};

    #[derive(Serialize, Deserialize)]
    #[serde(tag = "type")]
    pub(super) enum Part {
        #[serde(rename = "lightning_payment")]
        LightningPayment {
            amount_msat: u64,
            channel_id: String,
            htlc_id: u64,
        },
        #[serde(rename = "new_channel")]
        NewChannel {
            amount_msat: u64,
            service_fee_msat: u64,
            mining_fee_sat: u64,
            channel_id: String,
            tx_id: Option<Txid>,
            confirmed_at: Option<i64>,
            locked_at: Option<i64>,
        },
        #[serde(rename = "splice_in")]
        SpliceIn {
            amount_msat: u64,
            service_fee_msat: u64,
            mining_fee_sat: u64,
            channel_id: String,
            tx_id: Txid,
            confirmed_at: Option<i64>,
            locked_at: Option<i64>,
        },
    }
}

pub(crate) fn parse_channel_id(value: &str) -> Result<ChannelId, CodecError> {
    value.parse().map_err(CodecError::InvalidValue)
}

pub(crate) fn encode_origin(
    origin: &IncomingOrigin,
) -> Result<(IncomingOriginTypeVersion, Vec<u8>), CodecError> {
    Ok(match origin {
        IncomingOrigin::Invoice { payment_request } => (
            IncomingOriginTypeVersion::InvoiceV0,
            to_blob(&v0::Invoice {
                payment_request: payment_request.clone(),
            })?,
        ),
        IncomingOrigin::KeySend => {
            (IncomingOriginTypeVersion::KeySendV0, to_blob(&v0::KeySend {})?)
        }
        IncomingOrigin::SwapIn { address } => (
            IncomingOriginTypeVersion::SwapInV0,
            to_blob(&v0::SwapIn {
                address: address.clone(),
            })?,
        ),
        IncomingOrigin::OnChain {
            tx_id,
            local_inputs,
        } => (
            IncomingOriginTypeVersion::OnChainV0,
            to_blob(&v0::OnChain {
                tx_id: *tx_id,
                local_inputs: local_inputs.clone(),
            })?,
        ),
    })
}

pub(crate) fn decode_origin(
    type_version: IncomingOriginTypeVersion,
    blob: &[u8],
) -> Result<IncomingOrigin, CodecError> {
    Ok(match type_version {
        IncomingOriginTypeVersion::InvoiceV0 => {
            let v0::Invoice { payment_request } = from_blob(blob)?;
            IncomingOrigin::Invoice { payment_request }
        }
        IncomingOriginTypeVersion::KeySendV0 => IncomingOrigin::KeySend,
        IncomingOriginTypeVersion::SwapInV0 => {
            let v0::SwapIn { address } = from_blob(blob)?;
            IncomingOrigin::SwapIn { address }
        }
        IncomingOriginTypeVersion::OnChainV0 => {
            let v0::OnChain {
                tx_id,
                local_inputs,
            } = from_blob(blob)?;
            IncomingOrigin::OnChain {
                tx_id,
                local_inputs,
            }
        }
    })
}

pub(crate) fn encode_received_with(
    parts: &[ReceivedWith],
) -> Result<(IncomingReceivedWithTypeVersion, Vec<u8>), CodecError> {
    let parts: Vec<v1::Part> = parts
        .iter()
        .map(|part| match part {
            ReceivedWith::LightningPayment {
                amount,
                channel_id,
                htlc_id,
            } => v1::Part::LightningPayment {
                amount_msat: amount.0,
                channel_id: channel_id.to_string(),
                htlc_id: *htlc_id,
            },
            ReceivedWith::NewChannel {
                amount,
                service_fee,
                mining_fee,
                channel_id,
                tx_id,
                confirmed_at,
                locked_at,
            } => v1::Part::NewChannel {
                amount_msat: amount.0,
                service_fee_msat: service_fee.0,
                mining_fee_sat: mining_fee.0,
                channel_id: channel_id.to_string(),
                tx_id: *tx_id,
                confirmed_at: *confirmed_at,
                locked_at: *locked_at,
            },
            ReceivedWith::SpliceIn {
                amount,
                service_fee,
                mining_fee,
                channel_id,
                tx_id,
                confirmed_at,
                locked_at,
            } => v1::Part::SpliceIn {
                amount_msat: amount.0,
                service_fee_msat: service_fee.0,
                mining_fee_sat: mining_fee.0,
                channel_id: channel_id.to_string(),
                tx_id: *tx_id,
                confirmed_at: *confirmed_at,
                locked_at: *locked_at,
            },
        })
        .collect();
    Ok((IncomingReceivedWithTypeVersion::MultipartsV1, to_blob(&parts)?))
}

/// Decodes the parts of a received payment.
///
/// Retired versions do not hold every field of the current model and are
/// completed from the row through `ctx`.
pub(crate) fn decode_received_with(
    type_version: IncomingReceivedWithTypeVersion,
    blob: &[u8],
    ctx: &ReceivedContext,
) -> Result<Vec<ReceivedWith>, CodecError> {
    match type_version {
        IncomingReceivedWithTypeVersion::LightningPaymentV0 => {
            Ok(legacy::received_with_lightning_payment_v0(ctx))
        }
        IncomingReceivedWithTypeVersion::NewChannelV0 => {
            legacy::received_with_new_channel_v0(from_blob(blob)?, ctx)
        }
        IncomingReceivedWithTypeVersion::MultipartsV0 => {
            legacy::received_with_multiparts_v0(from_blob(blob)?, ctx)
        }
        IncomingReceivedWithTypeVersion::MultipartsV1 => {
            let parts: Vec<v1::Part> = from_blob(blob)?;
            parts
                .into_iter()
                .map(|part| {
                    Ok(match part {
                        v1::Part::LightningPayment {
                            amount_msat,
                            channel_id,
                            htlc_id,
                        } => ReceivedWith::LightningPayment {
                            amount: MilliSatoshi(amount_msat),
                            channel_id: parse_channel_id(&channel_id)?,
                            htlc_id,
                        },
                        v1::Part::NewChannel {
                            amount_msat,
                            service_fee_msat,
                            mining_fee_sat,
                            channel_id,
                            tx_id,
                            confirmed_at,
                            locked_at,
                        } => ReceivedWith::NewChannel {
                            amount: MilliSatoshi(amount_msat),
                            service_fee: MilliSatoshi(service_fee_msat),
                            mining_fee: Satoshi(mining_fee_sat),
                            channel_id: parse_channel_id(&channel_id)?,
                            tx_id,
                            confirmed_at,
                            locked_at,
                        },
                        v1::Part::SpliceIn {
                            amount_msat,
                            service_fee_msat,
                            mining_fee_sat,
                            channel_id,
                            tx_id,
                            confirmed_at,
                            locked_at,
                        } => ReceivedWith::SpliceIn {
                            amount: MilliSatoshi(amount_msat),
                            service_fee: MilliSatoshi(service_fee_msat),
                            mining_fee: Satoshi(mining_fee_sat),
                            channel_id: parse_channel_id(&channel_id)?,
                            tx_id,
                            confirmed_at,
                            locked_at,
                        },
                    })
                })
                .collect()
        }
    }
}
