use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ChannelId, MilliSatoshi, Satoshi, WalletPaymentId};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum ChannelClosingType {
    Mutual,
    Local,
    Remote,
    Revoked,
    Other,
}

/// Funds swept back to the wallet when a channel is closed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelCloseOutgoingPayment {
    pub id: Uuid,
    pub recipient_amount: Satoshi,
    pub address: String,
    pub is_sent_to_default_address: bool,
    pub mining_fee: Satoshi,
    pub tx_id: Txid,
    pub channel_id: ChannelId,
    pub closing_type: ChannelClosingType,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
    pub locked_at: Option<i64>,
}

/// Funds sent on-chain out of a channel through a splice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpliceOutgoingPayment {
    pub id: Uuid,
    pub recipient_amount: Satoshi,
    pub address: String,
    pub mining_fee: Satoshi,
    pub tx_id: Txid,
    pub channel_id: ChannelId,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
    pub locked_at: Option<i64>,
}

/// A child-pays-for-parent transaction bumping an unconfirmed splice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpliceCpfpOutgoingPayment {
    pub id: Uuid,
    pub mining_fee: Satoshi,
    pub tx_id: Txid,
    pub channel_id: ChannelId,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
    pub locked_at: Option<i64>,
}

/// Inbound liquidity purchased from the peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundLiquidityOutgoingPayment {
    pub id: Uuid,
    pub mining_fee: Satoshi,
    pub tx_id: Txid,
    pub channel_id: ChannelId,
    pub lease: LiquidityLease,
    pub created_at: i64,
    pub confirmed_at: Option<i64>,
    pub locked_at: Option<i64>,
}

impl InboundLiquidityOutgoingPayment {
    /// Total fees paid for the purchase.
    pub fn fees(&self) -> Satoshi {
        self.mining_fee.saturating_add(self.lease.fees.service_fee)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiquidityLease {
    pub amount: Satoshi,
    pub fees: LeaseFees,
    /// Seller signature over the lease witness, hex encoded.
    pub seller_sig: String,
    pub witness: LeaseWitness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseFees {
    pub mining_fee: Satoshi,
    pub service_fee: Satoshi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaseWitness {
    /// Hex encoded funding script.
    pub funding_script: String,
    pub lease_duration: u32,
    pub lease_end: u32,
    pub max_relay_fee_proportional: u32,
    pub max_relay_fee_base: MilliSatoshi,
}

/// Common view over the on-chain payment kinds.
pub(crate) trait OnChainOutgoing {
    fn payment_id(&self) -> WalletPaymentId;
    fn tx_id(&self) -> Txid;
}

macro_rules! impl_on_chain_outgoing {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl OnChainOutgoing for $ty {
                fn payment_id(&self) -> WalletPaymentId {
                    WalletPaymentId::$variant(self.id)
                }

                fn tx_id(&self) -> Txid {
                    self.tx_id
                }
            }
        )*
    };
}

impl_on_chain_outgoing!(
    ChannelCloseOutgoingPayment => ChannelCloseOutgoing,
    SpliceOutgoingPayment => SpliceOutgoing,
    SpliceCpfpOutgoingPayment => SpliceCpfpOutgoing,
    InboundLiquidityOutgoingPayment => InboundLiquidityOutgoing,
);
