use serde::{Deserialize, Serialize};

use super::{CodecError, from_blob, outgoing::parse_closing_type, to_blob};
use crate::models::{
    ChannelClosingType, LeaseFees, LeaseWitness, LiquidityLease, MilliSatoshi, Satoshi,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum ClosingInfoTypeVersion {
    #[strum(serialize = "CLOSING_INFO_V0")]
    ClosingInfoV0,
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, strum::IntoStaticStr, strum::Display, strum::EnumString,
)]
pub(crate) enum LiquidityLeaseTypeVersion {
    #[strum(serialize = "LEASE_V0")]
    LeaseV0,
}

mod v0 {
    use super::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    pub(super) struct ClosingInfo {
        pub closing_type: String,
    }

    #[derive(Serialize, Deserialize)]
    pub(super) struct Lease {
        pub amount_sat: u64,
        pub mining_fee_sat: u64,
        pub service_fee_sat: u64,
        pub seller_sig: String,
        pub funding_script: String,
        pub lease_duration: u32,
        pub lease_end: u32,
        pub max_relay_fee_proportional: u32,
        pub max_relay_fee_base_msat: u64,
    }
}

pub(crate) fn encode_closing_info(
    closing_type: ChannelClosingType,
) -> Result<(ClosingInfoTypeVersion, Vec<u8>), CodecError> {
    Ok((
        ClosingInfoTypeVersion::ClosingInfoV0,
        to_blob(&v0::ClosingInfo {
            closing_type: closing_type.to_string(),
        })?,
    ))
}

pub(crate) fn decode_closing_info(
    type_version: ClosingInfoTypeVersion,
    blob: &[u8],
) -> Result<ChannelClosingType, CodecError> {
    match type_version {
        ClosingInfoTypeVersion::ClosingInfoV0 => {
            let v0::ClosingInfo { closing_type } = from_blob(blob)?;
            parse_closing_type(&closing_type)
        }
    }
}

pub(crate) fn encode_lease(
    lease: &LiquidityLease,
) -> Result<(LiquidityLeaseTypeVersion, Vec<u8>), CodecError> {
    Ok((
        LiquidityLeaseTypeVersion::LeaseV0,
        to_blob(&v0::Lease {
            amount_sat: lease.amount.0,
            mining_fee_sat: lease.fees.mining_fee.0,
            service_fee_sat: lease.fees.service_fee.0,
            seller_sig: lease.seller_sig.clone(),
            funding_script: lease.witness.funding_script.clone(),
            lease_duration: lease.witness.lease_duration,
            lease_end: lease.witness.lease_end,
            max_relay_fee_proportional: lease.witness.max_relay_fee_proportional,
            max_relay_fee_base_msat: lease.witness.max_relay_fee_base.0,
        })?,
    ))
}

pub(crate) fn decode_lease(
    type_version: LiquidityLeaseTypeVersion,
    blob: &[u8],
) -> Result<LiquidityLease, CodecError> {
    match type_version {
        LiquidityLeaseTypeVersion::LeaseV0 => {
            let lease: v0::Lease = from_blob(blob)?;
            Ok(LiquidityLease {
                amount: Satoshi(lease.amount_sat),
                fees: LeaseFees {
                    mining_fee: Satoshi(lease.mining_fee_sat),
                    service_fee: Satoshi(lease.service_fee_sat),
                },
                seller_sig: lease.seller_sig,
                witness: LeaseWitness {
                    funding_script: lease.funding_script,
                    lease_duration: lease.lease_duration,
                    lease_end: lease.lease_end,
                    max_relay_fee_proportional: lease.max_relay_fee_proportional,
                    max_relay_fee_base: MilliSatoshi(lease.max_relay_fee_base_msat),
                },
            })
        }
    }
}
