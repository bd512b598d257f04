use bitcoin::Txid;
use serde::{Deserialize, Serialize};

use super::{CodecError, from_blob, to_blob};
use crate::{
    models::{
        ChannelClosingType, FinalFailure, HopDesc, LightningOutgoingCompleted,
        LightningOutgoingDetails, LightningOutgoingPartStatus, PartFailure, PaymentHash, Preimage,
        Satoshi,
    },
    persist::legacy::ClosingDetailsV0,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum OutgoingDetailsTypeVersion {
    #[strum(serialize = "NORMAL_V0")]
    NormalV0,
    #[strum(serialize = "KEYSEND_V0")]
    KeySendV0,
    #[strum(serialize = "SWAPOUT_V0")]
    SwapOutV0,
    /// Retired: channel closes were once recorded as outgoing Lightning payments.
    #[strum(serialize = "CLOSING_V0")]
    ClosingV0,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum OutgoingStatusTypeVersion {
    #[strum(serialize = "SUCCEEDED_OFFCHAIN_V0")]
    SucceededOffChainV0,
    #[strum(serialize = "SUCCEEDED_ONCHAIN_V0")]
    SucceededOnChainV0,
    #[strum(serialize = "FAILED_V0")]
    FailedV0,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum OutgoingPartStatusTypeVersion {
    #[strum(serialize = "SUCCEEDED_V0")]
    SucceededV0,
    #[strum(serialize = "FAILED_V0")]
    FailedV0,
}

mod v0 {
    use super::{Deserialize, PaymentHash, Preimage, Serialize, Txid};

    #[derive(Serialize, Deserialize)]
    pub(super) struct Normal {
        pub payment_request: String,
        pub payment_hash: PaymentHash,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct KeySend {
        pub preimage: Preimage,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct SwapOut {
        pub address: String,
        pub payment_request: String,
        pub payment_hash: PaymentHash,
        pub swap_out_fee_sat: u64,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct SucceededOffChain {
        pub preimage: Preimage,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct SucceededOnChain {
        pub tx_ids: Vec<Txid>,
        pub claimed_sat: u64,
        pub closing_type: String,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct Failed {
        pub reason: String,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct PartSucceeded {
        pub preimage: Preimage,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct PartFailed {
        pub remote_failure_code: Option<i32>,
        pub details: String,
    }
}

/// Details column of a Lightning outgoing row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum DecodedDetails {
    Lightning(LightningOutgoingDetails),
    /// The row is a retired channel close, see [`crate::persist::legacy`].
    LegacyClosing(ClosingDetailsV0),
}

pub(crate) fn encode_details(
    details: &LightningOutgoingDetails,
) -> Result<(OutgoingDetailsTypeVersion, Vec<u8>), CodecError> {
    Ok(match details {
        LightningOutgoingDetails::Normal {
            payment_request,
            payment_hash,
        } => (
            OutgoingDetailsTypeVersion::NormalV0,
            to_blob(&v0::Normal {
                payment_request: payment_request.clone(),
                payment_hash: *payment_hash,
            })?,
        ),
        LightningOutgoingDetails::KeySend { preimage } => (
            OutgoingDetailsTypeVersion::KeySendV0,
            to_blob(&v0::KeySend {
                preimage: *preimage,
            })?,
        ),
        LightningOutgoingDetails::SwapOut {
            address,
            payment_request,
            payment_hash,
            swap_out_fee,
        } => (
            OutgoingDetailsTypeVersion::SwapOutV0,
            to_blob(&v0::SwapOut {
                address: address.clone(),
                payment_request: payment_request.clone(),
                payment_hash: *payment_hash,
                swap_out_fee_sat: swap_out_fee.0,
            })?,
        ),
    })
}

pub(crate) fn decode_details(
    type_version: OutgoingDetailsTypeVersion,
    blob: &[u8],
) -> Result<DecodedDetails, CodecError> {
    Ok(match type_version {
        OutgoingDetailsTypeVersion::NormalV0 => {
            let v0::Normal {
                payment_request,
                payment_hash,
            } = from_blob(blob)?;
            DecodedDetails::Lightning(LightningOutgoingDetails::Normal {
                payment_request,
                payment_hash,
            })
        }
        OutgoingDetailsTypeVersion::KeySendV0 => {
            let v0::KeySend { preimage } = from_blob(blob)?;
            DecodedDetails::Lightning(LightningOutgoingDetails::KeySend { preimage })
        }
        OutgoingDetailsTypeVersion::SwapOutV0 => {
            let v0::SwapOut {
                address,
                payment_request,
                payment_hash,
                swap_out_fee_sat,
            } = from_blob(blob)?;
            DecodedDetails::Lightning(LightningOutgoingDetails::SwapOut {
                address,
                payment_request,
                payment_hash,
                swap_out_fee: Satoshi(swap_out_fee_sat),
            })
        }
        OutgoingDetailsTypeVersion::ClosingV0 => DecodedDetails::LegacyClosing(from_blob(blob)?),
    })
}

pub(crate) fn encode_status(
    status: &LightningOutgoingCompleted,
) -> Result<(OutgoingStatusTypeVersion, Vec<u8>), CodecError> {
    Ok(match status {
        LightningOutgoingCompleted::SucceededOffChain { preimage, .. } => (
            OutgoingStatusTypeVersion::SucceededOffChainV0,
            to_blob(&v0::SucceededOffChain {
                preimage: *preimage,
            })?,
        ),
        LightningOutgoingCompleted::SucceededOnChain {
            tx_ids,
            claimed,
            closing_type,
            ..
        } => (
            OutgoingStatusTypeVersion::SucceededOnChainV0,
            to_blob(&v0::SucceededOnChain {
                tx_ids: tx_ids.clone(),
                claimed_sat: claimed.0,
                closing_type: closing_type.to_string(),
            })?,
        ),
        LightningOutgoingCompleted::Failed { reason, .. } => (
            OutgoingStatusTypeVersion::FailedV0,
            to_blob(&v0::Failed {
                reason: reason.to_string(),
            })?,
        ),
    })
}

pub(crate) fn decode_status(
    type_version: OutgoingStatusTypeVersion,
    blob: &[u8],
    completed_at: i64,
) -> Result<LightningOutgoingCompleted, CodecError> {
    Ok(match type_version {
        OutgoingStatusTypeVersion::SucceededOffChainV0 => {
            let v0::SucceededOffChain { preimage } = from_blob(blob)?;
            LightningOutgoingCompleted::SucceededOffChain {
                preimage,
                completed_at,
            }
        }
        OutgoingStatusTypeVersion::SucceededOnChainV0 => {
            let v0::SucceededOnChain {
                tx_ids,
                claimed_sat,
                closing_type,
            } = from_blob(blob)?;
            LightningOutgoingCompleted::SucceededOnChain {
                tx_ids,
                claimed: Satoshi(claimed_sat),
                closing_type: parse_closing_type(&closing_type)?,
                completed_at,
            }
        }
        OutgoingStatusTypeVersion::FailedV0 => {
            let v0::Failed { reason } = from_blob(blob)?;
            LightningOutgoingCompleted::Failed {
                reason: reason
                    .parse::<FinalFailure>()
                    .map_err(|_| CodecError::InvalidValue(format!("final failure {reason}")))?,
                completed_at,
            }
        }
    })
}

pub(crate) fn parse_closing_type(value: &str) -> Result<ChannelClosingType, CodecError> {
    value
        .parse()
        .map_err(|_| CodecError::InvalidValue(format!("closing type {value}")))
}

/// Encodes a terminal part status. `None` for a pending part.
pub(crate) fn encode_part_status(
    status: &LightningOutgoingPartStatus,
) -> Result<Option<(OutgoingPartStatusTypeVersion, Vec<u8>, i64)>, CodecError> {
    Ok(match status {
        LightningOutgoingPartStatus::Pending => None,
        LightningOutgoingPartStatus::Succeeded {
            preimage,
            completed_at,
        } => Some((
            OutgoingPartStatusTypeVersion::SucceededV0,
            to_blob(&v0::PartSucceeded {
                preimage: *preimage,
            })?,
            *completed_at,
        )),
        LightningOutgoingPartStatus::Failed {
            failure,
            completed_at,
        } => Some((
            OutgoingPartStatusTypeVersion::FailedV0,
            to_blob(&v0::PartFailed {
                remote_failure_code: failure.remote_failure_code,
                details: failure.details.clone(),
            })?,
            *completed_at,
        )),
    })
}

pub(crate) fn decode_part_status(
    type_version: OutgoingPartStatusTypeVersion,
    blob: &[u8],
    completed_at: i64,
) -> Result<LightningOutgoingPartStatus, CodecError> {
    Ok(match type_version {
        OutgoingPartStatusTypeVersion::SucceededV0 => {
            let v0::PartSucceeded { preimage } = from_blob(blob)?;
            LightningOutgoingPartStatus::Succeeded {
                preimage,
                completed_at,
            }
        }
        OutgoingPartStatusTypeVersion::FailedV0 => {
            let v0::PartFailed {
                remote_failure_code,
                details,
            } = from_blob(blob)?;
            LightningOutgoingPartStatus::Failed {
                failure: PartFailure {
                    remote_failure_code,
                    details,
                },
                completed_at,
            }
        }
    })
}

/// Routes are stored as plain text, hops separated by `;`.
pub(crate) fn encode_route(route: &[HopDesc]) -> String {
    route
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(";")
}

pub(crate) fn decode_route(value: &str) -> Result<Vec<HopDesc>, CodecError> {
    value
        .split(';')
        .filter(|hop| !hop.is_empty())
        .map(|hop| hop.parse().map_err(CodecError::InvalidValue))
        .collect()
}
