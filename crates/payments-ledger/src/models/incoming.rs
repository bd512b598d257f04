use bitcoin::{OutPoint, Txid};
use serde::{Deserialize, Serialize};

use super::{ChannelId, MilliSatoshi, PaymentHash, Preimage, Satoshi};

/// A payment received by the wallet, keyed by its payment hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingPayment {
    pub preimage: Preimage,
    pub origin: IncomingOrigin,
    /// Set once, when the funds are received.
    pub received: Option<IncomingReceived>,
    pub created_at: i64,
}

impl IncomingPayment {
    pub fn new(preimage: Preimage, origin: IncomingOrigin, created_at: i64) -> Self {
        Self {
            preimage,
            origin,
            received: None,
            created_at,
        }
    }

    pub fn payment_hash(&self) -> PaymentHash {
        self.preimage.payment_hash()
    }

    /// Total amount received, net of fees.
    pub fn amount(&self) -> MilliSatoshi {
        self.received
            .as_ref()
            .map(IncomingReceived::amount)
            .unwrap_or_default()
    }

    pub fn fees(&self) -> MilliSatoshi {
        self.received
            .as_ref()
            .map(IncomingReceived::fees)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncomingOrigin {
    /// A Lightning invoice (BOLT11) generated by the wallet.
    Invoice { payment_request: String },
    /// A spontaneous payment, no invoice involved.
    KeySend,
    /// An on-chain deposit swapped into Lightning by a third party.
    SwapIn { address: Option<String> },
    /// An on-chain deposit spliced directly into a channel.
    OnChain {
        tx_id: Txid,
        local_inputs: Vec<OutPoint>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomingReceived {
    pub received_with: Vec<ReceivedWith>,
    pub received_at: i64,
}

impl IncomingReceived {
    pub fn amount(&self) -> MilliSatoshi {
        self.received_with.iter().map(ReceivedWith::amount).sum()
    }

    pub fn fees(&self) -> MilliSatoshi {
        self.received_with.iter().map(ReceivedWith::fees).sum()
    }
}

/// One of the parts through which an incoming payment was settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceivedWith {
    LightningPayment {
        amount: MilliSatoshi,
        channel_id: ChannelId,
        htlc_id: u64,
    },
    /// Funds received through a channel opened on the fly.
    NewChannel {
        amount: MilliSatoshi,
        service_fee: MilliSatoshi,
        mining_fee: Satoshi,
        channel_id: ChannelId,
        /// Unknown for channels opened before funding transactions were recorded.
        tx_id: Option<Txid>,
        confirmed_at: Option<i64>,
        locked_at: Option<i64>,
    },
    SpliceIn {
        amount: MilliSatoshi,
        service_fee: MilliSatoshi,
        mining_fee: Satoshi,
        channel_id: ChannelId,
        tx_id: Txid,
        confirmed_at: Option<i64>,
        locked_at: Option<i64>,
    },
}

impl ReceivedWith {
    pub fn amount(&self) -> MilliSatoshi {
        match self {
            ReceivedWith::LightningPayment { amount, .. }
            | ReceivedWith::NewChannel { amount, .. }
            | ReceivedWith::SpliceIn { amount, .. } => *amount,
        }
    }

    pub fn fees(&self) -> MilliSatoshi {
        match self {
            ReceivedWith::LightningPayment { .. } => MilliSatoshi::ZERO,
            ReceivedWith::NewChannel {
                service_fee,
                mining_fee,
                ..
            }
            | ReceivedWith::SpliceIn {
                service_fee,
                mining_fee,
                ..
            } => service_fee.saturating_add(mining_fee.to_msat()),
        }
    }

    /// Funding transaction of an on-chain part, when known.
    pub fn tx_id(&self) -> Option<Txid> {
        match self {
            ReceivedWith::LightningPayment { .. } => None,
            ReceivedWith::NewChannel { tx_id, .. } => *tx_id,
            ReceivedWith::SpliceIn { tx_id, .. } => Some(*tx_id),
        }
    }

    /// Records the confirmation time if this part is funded by `tx` and not yet confirmed.
    pub(crate) fn set_confirmed(&mut self, tx: Txid, at: i64) -> bool {
        let funded_by_tx = self.tx_id() == Some(tx);
        match self {
            ReceivedWith::NewChannel { confirmed_at, .. }
            | ReceivedWith::SpliceIn { confirmed_at, .. }
                if funded_by_tx && confirmed_at.is_none() =>
            {
                *confirmed_at = Some(at);
                true
            }
            _ => false,
        }
    }

    /// Records the lock time if this part is funded by `tx` and not yet locked.
    pub(crate) fn set_locked(&mut self, tx: Txid, at: i64) -> bool {
        let funded_by_tx = self.tx_id() == Some(tx);
        match self {
            ReceivedWith::NewChannel { locked_at, .. }
            | ReceivedWith::SpliceIn { locked_at, .. }
                if funded_by_tx && locked_at.is_none() =>
            {
                *locked_at = Some(at);
                true
            }
            _ => false,
        }
    }
}
