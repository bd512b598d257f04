mod incoming;
mod metadata;
mod onchain;
mod outgoing;

use std::{fmt, iter::Sum, str::FromStr};

use bitcoin::hashes::{Hash, sha256};
use serde::{Deserialize, Serialize};
use serde_with::{DeserializeFromStr, SerializeDisplay};
use uuid::Uuid;

pub use incoming::*;
pub use metadata::*;
pub use onchain::*;
pub(crate) use onchain::OnChainOutgoing;
pub use outgoing::*;

/// Hash of a payment preimage, the natural key of incoming Lightning payments.
pub type PaymentHash = sha256::Hash;

/// Amount in millisatoshis.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MilliSatoshi(pub u64);

impl MilliSatoshi {
    pub const ZERO: MilliSatoshi = MilliSatoshi(0);

    #[must_use]
    pub fn saturating_add(self, other: MilliSatoshi) -> MilliSatoshi {
        MilliSatoshi(self.0.saturating_add(other.0))
    }

    #[must_use]
    pub fn saturating_sub(self, other: MilliSatoshi) -> MilliSatoshi {
        MilliSatoshi(self.0.saturating_sub(other.0))
    }

    /// Rounds down to the satoshi.
    pub fn truncate_to_sat(self) -> Satoshi {
        Satoshi(self.0 / 1000)
    }
}

impl Sum for MilliSatoshi {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(MilliSatoshi::ZERO, MilliSatoshi::saturating_add)
    }
}

impl fmt::Display for MilliSatoshi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} msat", self.0)
    }
}

/// Amount in satoshis.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Satoshi(pub u64);

impl Satoshi {
    pub const ZERO: Satoshi = Satoshi(0);

    #[must_use]
    pub fn saturating_add(self, other: Satoshi) -> Satoshi {
        Satoshi(self.0.saturating_add(other.0))
    }

    #[must_use]
    pub fn saturating_sub(self, other: Satoshi) -> Satoshi {
        Satoshi(self.0.saturating_sub(other.0))
    }

    pub fn to_msat(self) -> MilliSatoshi {
        MilliSatoshi(self.0.saturating_mul(1000))
    }
}

impl Sum for Satoshi {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Satoshi::ZERO, Satoshi::saturating_add)
    }
}

impl fmt::Display for Satoshi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sat", self.0)
    }
}

/// Parses a 32-byte value from its hex representation.
fn parse_bytes32(s: &str) -> Result<[u8; 32], String> {
    let bytes = hex::decode(s).map_err(|e| format!("invalid hex: {e}"))?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected 32 bytes, got {}", b.len()))
}

/// Payment preimage. Its SHA256 is the payment hash.
#[derive(Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Preimage(pub [u8; 32]);

impl Preimage {
    pub fn payment_hash(&self) -> PaymentHash {
        sha256::Hash::hash(&self.0)
    }
}

impl fmt::Display for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Preimage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Preimage({self})")
    }
}

impl FromStr for Preimage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_bytes32(s).map(Preimage)
    }
}

/// Identifier of a Lightning channel.
#[derive(Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct ChannelId(pub [u8; 32]);

impl ChannelId {
    /// Placeholder used for rows written before the channel id was recorded.
    pub const ZERO: ChannelId = ChannelId([0; 32]);
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChannelId({self})")
    }
}

impl FromStr for ChannelId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_bytes32(s).map(ChannelId)
    }
}

/// Tagged identifier of any payment held by the ledger.
///
/// Metadata rows and transaction links reference payments through the
/// `(db_type, db_id)` pair, so the numeric tags must never be reassigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WalletPaymentId {
    Incoming(PaymentHash),
    LightningOutgoing(Uuid),
    ChannelCloseOutgoing(Uuid),
    SpliceOutgoing(Uuid),
    SpliceCpfpOutgoing(Uuid),
    InboundLiquidityOutgoing(Uuid),
}

impl WalletPaymentId {
    pub(crate) const INCOMING: i64 = 1;
    pub(crate) const LIGHTNING_OUTGOING: i64 = 2;
    pub(crate) const CHANNEL_CLOSE_OUTGOING: i64 = 3;
    pub(crate) const SPLICE_OUTGOING: i64 = 4;
    pub(crate) const SPLICE_CPFP_OUTGOING: i64 = 5;
    pub(crate) const INBOUND_LIQUIDITY_OUTGOING: i64 = 6;

    pub fn db_type(&self) -> i64 {
        match self {
            WalletPaymentId::Incoming(_) => Self::INCOMING,
            WalletPaymentId::LightningOutgoing(_) => Self::LIGHTNING_OUTGOING,
            WalletPaymentId::ChannelCloseOutgoing(_) => Self::CHANNEL_CLOSE_OUTGOING,
            WalletPaymentId::SpliceOutgoing(_) => Self::SPLICE_OUTGOING,
            WalletPaymentId::SpliceCpfpOutgoing(_) => Self::SPLICE_CPFP_OUTGOING,
            WalletPaymentId::InboundLiquidityOutgoing(_) => Self::INBOUND_LIQUIDITY_OUTGOING,
        }
    }

    pub fn db_id(&self) -> String {
        match self {
            WalletPaymentId::Incoming(hash) => hash.to_string(),
            WalletPaymentId::LightningOutgoing(id)
            | WalletPaymentId::ChannelCloseOutgoing(id)
            | WalletPaymentId::SpliceOutgoing(id)
            | WalletPaymentId::SpliceCpfpOutgoing(id)
            | WalletPaymentId::InboundLiquidityOutgoing(id) => id.to_string(),
        }
    }

    pub fn from_db(db_type: i64, db_id: &str) -> Result<Self, String> {
        let uuid = || Uuid::parse_str(db_id).map_err(|e| format!("invalid uuid {db_id}: {e}"));
        Ok(match db_type {
            Self::INCOMING => WalletPaymentId::Incoming(
                db_id
                    .parse()
                    .map_err(|e| format!("invalid payment hash {db_id}: {e}"))?,
            ),
            Self::LIGHTNING_OUTGOING => WalletPaymentId::LightningOutgoing(uuid()?),
            Self::CHANNEL_CLOSE_OUTGOING => WalletPaymentId::ChannelCloseOutgoing(uuid()?),
            Self::SPLICE_OUTGOING => WalletPaymentId::SpliceOutgoing(uuid()?),
            Self::SPLICE_CPFP_OUTGOING => WalletPaymentId::SpliceCpfpOutgoing(uuid()?),
            Self::INBOUND_LIQUIDITY_OUTGOING => {
                WalletPaymentId::InboundLiquidityOutgoing(uuid()?)
            }
            other => return Err(format!("unknown payment type {other}")),
        })
    }
}

impl fmt::Display for WalletPaymentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            WalletPaymentId::Incoming(_) => "incoming",
            WalletPaymentId::LightningOutgoing(_) => "lightning_outgoing",
            WalletPaymentId::ChannelCloseOutgoing(_) => "channel_close_outgoing",
            WalletPaymentId::SpliceOutgoing(_) => "splice_outgoing",
            WalletPaymentId::SpliceCpfpOutgoing(_) => "splice_cpfp_outgoing",
            WalletPaymentId::InboundLiquidityOutgoing(_) => "inbound_liquidity_outgoing",
        };
        write!(f, "{kind}:{}", self.db_id())
    }
}

/// Position of a payment in the wallet history, without its content.
///
/// Payment lists are paged over these rows and the payments themselves are
/// loaded on demand. `metadata_modified_at` lets a cache tell when the user
/// fields of a payment changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletPaymentOrderRow {
    pub id: WalletPaymentId,
    pub created_at: i64,
    pub completed_at: Option<i64>,
    pub metadata_modified_at: Option<i64>,
}

/// Any payment held by the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum WalletPayment {
    Incoming(IncomingPayment),
    LightningOutgoing(LightningOutgoingPayment),
    ChannelCloseOutgoing(ChannelCloseOutgoingPayment),
    SpliceOutgoing(SpliceOutgoingPayment),
    SpliceCpfpOutgoing(SpliceCpfpOutgoingPayment),
    InboundLiquidityOutgoing(InboundLiquidityOutgoingPayment),
}

impl WalletPayment {
    pub fn id(&self) -> WalletPaymentId {
        match self {
            WalletPayment::Incoming(p) => WalletPaymentId::Incoming(p.payment_hash()),
            WalletPayment::LightningOutgoing(p) => WalletPaymentId::LightningOutgoing(p.id),
            WalletPayment::ChannelCloseOutgoing(p) => WalletPaymentId::ChannelCloseOutgoing(p.id),
            WalletPayment::SpliceOutgoing(p) => WalletPaymentId::SpliceOutgoing(p.id),
            WalletPayment::SpliceCpfpOutgoing(p) => WalletPaymentId::SpliceCpfpOutgoing(p.id),
            WalletPayment::InboundLiquidityOutgoing(p) => {
                WalletPaymentId::InboundLiquidityOutgoing(p.id)
            }
        }
    }

    pub fn created_at(&self) -> i64 {
        match self {
            WalletPayment::Incoming(p) => p.created_at,
            WalletPayment::LightningOutgoing(p) => p.created_at,
            WalletPayment::ChannelCloseOutgoing(p) => p.created_at,
            WalletPayment::SpliceOutgoing(p) => p.created_at,
            WalletPayment::SpliceCpfpOutgoing(p) => p.created_at,
            WalletPayment::InboundLiquidityOutgoing(p) => p.created_at,
        }
    }

    /// Time at which the payment reached its final state, if it did.
    pub fn completed_at(&self) -> Option<i64> {
        match self {
            WalletPayment::Incoming(p) => p.received.as_ref().map(|r| r.received_at),
            WalletPayment::LightningOutgoing(p) => p.status.completed_at(),
            WalletPayment::ChannelCloseOutgoing(p) => p.confirmed_at,
            WalletPayment::SpliceOutgoing(p) => p.confirmed_at,
            WalletPayment::SpliceCpfpOutgoing(p) => p.confirmed_at,
            WalletPayment::InboundLiquidityOutgoing(p) => p.confirmed_at,
        }
    }
}
