use std::{fmt, str::FromStr};

use bitcoin::{Txid, secp256k1::PublicKey};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{ChannelClosingType, MilliSatoshi, PaymentHash, Preimage, Satoshi};

/// A payment sent over Lightning, possibly split into several parts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightningOutgoingPayment {
    pub id: Uuid,
    /// Amount received by the recipient, fees excluded.
    pub recipient_amount: MilliSatoshi,
    pub recipient: PublicKey,
    pub details: LightningOutgoingDetails,
    pub parts: Vec<LightningOutgoingPart>,
    pub status: LightningOutgoingStatus,
    pub created_at: i64,
}

impl LightningOutgoingPayment {
    pub fn new(
        recipient_amount: MilliSatoshi,
        recipient: PublicKey,
        details: LightningOutgoingDetails,
        created_at: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            recipient_amount,
            recipient,
            details,
            parts: Vec::new(),
            status: LightningOutgoingStatus::Pending,
            created_at,
        }
    }

    pub fn payment_hash(&self) -> PaymentHash {
        self.details.payment_hash()
    }

    /// Fees paid on top of the recipient amount, counting only succeeded parts.
    pub fn routing_fee(&self) -> MilliSatoshi {
        let sent: MilliSatoshi = self
            .parts
            .iter()
            .filter(|p| matches!(p.status, LightningOutgoingPartStatus::Succeeded { .. }))
            .map(|p| p.amount)
            .sum();
        sent.saturating_sub(self.recipient_amount)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightningOutgoingDetails {
    Normal {
        payment_request: String,
        payment_hash: PaymentHash,
    },
    KeySend {
        preimage: Preimage,
    },
    SwapOut {
        address: String,
        payment_request: String,
        payment_hash: PaymentHash,
        swap_out_fee: Satoshi,
    },
}

impl LightningOutgoingDetails {
    pub fn payment_hash(&self) -> PaymentHash {
        match self {
            LightningOutgoingDetails::Normal { payment_hash, .. }
            | LightningOutgoingDetails::SwapOut { payment_hash, .. } => *payment_hash,
            LightningOutgoingDetails::KeySend { preimage } => preimage.payment_hash(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightningOutgoingStatus {
    Pending,
    Completed(LightningOutgoingCompleted),
}

impl LightningOutgoingStatus {
    pub fn completed_at(&self) -> Option<i64> {
        match self {
            LightningOutgoingStatus::Pending => None,
            LightningOutgoingStatus::Completed(c) => Some(c.completed_at()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightningOutgoingCompleted {
    SucceededOffChain {
        preimage: Preimage,
        completed_at: i64,
    },
    /// Settled by closing channels on-chain.
    SucceededOnChain {
        tx_ids: Vec<Txid>,
        claimed: Satoshi,
        closing_type: ChannelClosingType,
        completed_at: i64,
    },
    Failed {
        reason: FinalFailure,
        completed_at: i64,
    },
}

impl LightningOutgoingCompleted {
    pub fn completed_at(&self) -> i64 {
        match self {
            LightningOutgoingCompleted::SucceededOffChain { completed_at, .. }
            | LightningOutgoingCompleted::SucceededOnChain { completed_at, .. }
            | LightningOutgoingCompleted::Failed { completed_at, .. } => *completed_at,
        }
    }
}

/// Why an outgoing payment failed for good.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
#[strum(serialize_all = "snake_case")]
pub enum FinalFailure {
    AlreadyPaid,
    ChannelClosing,
    ChannelNotConnected,
    ChannelOpening,
    InsufficientBalance,
    InvalidPaymentAmount,
    InvalidPaymentId,
    NoAvailableChannels,
    RecipientUnreachable,
    RetryExhausted,
    UnknownError,
    WalletRestarted,
}

/// One routing attempt of a Lightning outgoing payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LightningOutgoingPart {
    pub id: Uuid,
    pub amount: MilliSatoshi,
    pub route: Vec<HopDesc>,
    pub status: LightningOutgoingPartStatus,
    pub created_at: i64,
}

impl LightningOutgoingPart {
    pub fn new(amount: MilliSatoshi, route: Vec<HopDesc>, created_at: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            amount,
            route,
            status: LightningOutgoingPartStatus::Pending,
            created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LightningOutgoingPartStatus {
    Pending,
    Succeeded {
        preimage: Preimage,
        completed_at: i64,
    },
    Failed {
        failure: PartFailure,
        completed_at: i64,
    },
}

impl LightningOutgoingPartStatus {
    pub fn completed_at(&self) -> Option<i64> {
        match self {
            LightningOutgoingPartStatus::Pending => None,
            LightningOutgoingPartStatus::Succeeded { completed_at, .. }
            | LightningOutgoingPartStatus::Failed { completed_at, .. } => Some(*completed_at),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartFailure {
    /// Failure code returned by a remote node, absent for local failures.
    pub remote_failure_code: Option<i32>,
    pub details: String,
}

/// A hop of a part's route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopDesc {
    pub node_id: PublicKey,
    pub next_node_id: PublicKey,
    pub short_channel_id: Option<String>,
}

impl fmt::Display for HopDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.node_id,
            self.next_node_id,
            self.short_channel_id.as_deref().unwrap_or_default()
        )
    }
}

impl FromStr for HopDesc {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut fields = s.split(':');
        let (Some(node_id), Some(next_node_id), short_channel_id, None) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(format!("invalid hop: {s}"));
        };
        Ok(HopDesc {
            node_id: node_id.parse().map_err(|e| format!("invalid node id: {e}"))?,
            next_node_id: next_node_id
                .parse()
                .map_err(|e| format!("invalid next node id: {e}"))?,
            short_channel_id: short_channel_id
                .filter(|s| !s.is_empty())
                .map(ToString::to_string),
        })
    }
}
