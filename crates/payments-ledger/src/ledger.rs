use std::{path::Path, sync::Arc};

use bitcoin::Txid;
use chrono::Utc;
use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    config::LedgerConfig,
    ensure_ledger,
    error::{LedgerError, LedgerResult},
    events::{ChangeKind, EventEmitter, PaymentChange, PaymentChangeListener},
    models::{
        ChannelCloseOutgoingPayment, InboundLiquidityOutgoingPayment, IncomingOrigin,
        IncomingPayment, LightningOutgoingCompleted, LightningOutgoingPart,
        LightningOutgoingPartStatus, LightningOutgoingPayment, OnChainOutgoing, PaymentHash,
        PaymentMetadata, Preimage, ReceivedWith, SpliceCpfpOutgoingPayment,
        SpliceOutgoingPayment, WalletPayment, WalletPaymentId, WalletPaymentOrderRow,
    },
    persist::{
        ON_CHAIN_TABLES, channel_close::ChannelCloseQueries, count_rows,
        inbound_liquidity::InboundLiquidityQueries, incoming::IncomingQueries,
        lightning_outgoing::LightningOutgoingQueries, links::LinkQueries,
        metadata::MetadataQueries, oldest_confirmed_at, order::OrderQueries,
        path::default_storage_path, set_once, skip_unreadable, splice_cpfp::SpliceCpfpQueries,
        splice_out::SpliceOutQueries, sqlite::SqliteStorage,
    },
};

#[derive(Debug, Clone, Copy)]
enum ChainEvent {
    Confirmed,
    Locked,
}

impl ChainEvent {
    fn column(self) -> &'static str {
        match self {
            ChainEvent::Confirmed => "confirmed_at",
            ChainEvent::Locked => "locked_at",
        }
    }
}

fn on_chain_table(id: &WalletPaymentId) -> Option<(&'static str, Uuid)> {
    let [channel_close, splice_out, splice_cpfp, inbound_liquidity] = ON_CHAIN_TABLES;
    match *id {
        WalletPaymentId::Incoming(_) | WalletPaymentId::LightningOutgoing(_) => None,
        WalletPaymentId::ChannelCloseOutgoing(uuid) => Some((channel_close, uuid)),
        WalletPaymentId::SpliceOutgoing(uuid) => Some((splice_out, uuid)),
        WalletPaymentId::SpliceCpfpOutgoing(uuid) => Some((splice_cpfp, uuid)),
        WalletPaymentId::InboundLiquidityOutgoing(uuid) => Some((inbound_liquidity, uuid)),
    }
}

fn get_payment(conn: &Connection, id: &WalletPaymentId) -> LedgerResult<Option<WalletPayment>> {
    Ok(match *id {
        WalletPaymentId::Incoming(hash) => IncomingQueries::new(conn)
            .get(&hash)?
            .map(WalletPayment::Incoming),
        WalletPaymentId::LightningOutgoing(uuid) => LightningOutgoingQueries::new(conn)
            .get(uuid)?
            .map(WalletPayment::LightningOutgoing),
        WalletPaymentId::ChannelCloseOutgoing(uuid) => ChannelCloseQueries::new(conn)
            .get(uuid)?
            .map(WalletPayment::ChannelCloseOutgoing),
        WalletPaymentId::SpliceOutgoing(uuid) => SpliceOutQueries::new(conn)
            .get(uuid)?
            .map(WalletPayment::SpliceOutgoing),
        WalletPaymentId::SpliceCpfpOutgoing(uuid) => SpliceCpfpQueries::new(conn)
            .get(uuid)?
            .map(WalletPayment::SpliceCpfpOutgoing),
        WalletPaymentId::InboundLiquidityOutgoing(uuid) => InboundLiquidityQueries::new(conn)
            .get(uuid)?
            .map(WalletPayment::InboundLiquidityOutgoing),
    })
}

/// Writes a chain event on the links of `tx_id` and on every payment linked to it.
///
/// Returns the payments whose state changed.
fn apply_chain_event(
    conn: &Connection,
    tx_id: Txid,
    at: i64,
    event: ChainEvent,
) -> LedgerResult<Vec<WalletPaymentId>> {
    let links = LinkQueries::new(conn);
    match event {
        ChainEvent::Confirmed => links.set_confirmed(tx_id, at)?,
        ChainEvent::Locked => links.set_locked(tx_id, at)?,
    };

    let mut changed = Vec::new();
    for id in links.list_payment_ids(tx_id)? {
        let updated = match id {
            WalletPaymentId::Incoming(hash) => {
                let incoming = IncomingQueries::new(conn);
                let updated = match event {
                    ChainEvent::Confirmed => incoming.set_confirmed(&hash, tx_id, at),
                    ChainEvent::Locked => incoming.set_locked(&hash, tx_id, at),
                };
                match updated {
                    Err(e @ LedgerError::UnreadableRow { .. }) => {
                        warn!("Not updating {id} for transaction {tx_id}: {e}");
                        false
                    }
                    updated => updated?,
                }
            }
            WalletPaymentId::LightningOutgoing(_) => false,
            _ => match on_chain_table(&id) {
                Some((table, uuid)) => {
                    set_once(conn, table, event.column(), &uuid.to_string(), at)?
                }
                None => false,
            },
        };
        if updated {
            changed.push(id);
        }
    }
    Ok(changed)
}

fn remove_side_rows(conn: &Connection, id: &WalletPaymentId) -> LedgerResult<()> {
    MetadataQueries::new(conn).delete(id)?;
    LinkQueries::new(conn).delete_for_payment(id)?;
    Ok(())
}

fn add_metadata_if_any(
    conn: &Connection,
    id: &WalletPaymentId,
    metadata: Option<&PaymentMetadata>,
) -> LedgerResult<()> {
    match metadata {
        Some(metadata) if !metadata.is_empty() => MetadataQueries::new(conn).add(id, metadata),
        _ => Ok(()),
    }
}

/// Payment ledger of one wallet.
///
/// Every operation runs in its own transaction on the blocking thread pool.
/// Listeners are notified once the transaction committed, and only when it
/// changed something.
#[derive(Clone)]
pub struct PaymentsDb {
    wallet_id: String,
    storage: SqliteStorage,
    events: Arc<EventEmitter>,
}

impl PaymentsDb {
    /// Opens the ledger of the wallet named in `config`.
    pub fn new(config: &LedgerConfig) -> LedgerResult<Self> {
        let path = default_storage_path(&config.data_dir, config.network, &config.wallet_id)?;
        Self::open(&path, &config.wallet_id)
    }

    /// Opens the ledger stored in `path`, creating it if needed.
    pub fn open(path: &Path, wallet_id: &str) -> LedgerResult<Self> {
        ensure_ledger!(
            !wallet_id.is_empty(),
            LedgerError::InvalidInput("Wallet id must not be empty".to_string())
        );
        let storage = SqliteStorage::new(path)?;
        info!("Opened payments ledger of wallet {wallet_id}");
        Ok(Self {
            wallet_id: wallet_id.to_string(),
            storage,
            events: Arc::new(EventEmitter::new()),
        })
    }

    pub fn wallet_id(&self) -> &str {
        &self.wallet_id
    }

    #[cfg(test)]
    pub(crate) fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    pub async fn add_listener(&self, listener: Box<dyn PaymentChangeListener>) -> String {
        self.events.add_listener(listener).await
    }

    pub async fn remove_listener(&self, id: &str) -> bool {
        self.events.remove_listener(id).await
    }

    async fn write<T, F>(&self, f: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> LedgerResult<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || -> LedgerResult<T> {
            let mut conn = storage.get_connection()?;
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .await?
    }

    async fn read<T, F>(&self, f: F) -> LedgerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> LedgerResult<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || -> LedgerResult<T> {
            let mut conn = storage.get_connection()?;
            let tx = conn.transaction()?;
            f(&tx)
        })
        .await?
    }

    async fn notify(&self, change: ChangeKind, ids: Vec<WalletPaymentId>) {
        if ids.is_empty() {
            return;
        }
        let change = PaymentChange {
            wallet_id: self.wallet_id.clone(),
            change,
            ids,
        };
        debug!("Payment change: {change}");
        self.events.emit(&change).await;
    }

    // Incoming

    pub async fn add_incoming_payment(
        &self,
        preimage: Preimage,
        origin: IncomingOrigin,
        created_at: i64,
        metadata: Option<PaymentMetadata>,
    ) -> LedgerResult<IncomingPayment> {
        let payment = IncomingPayment::new(preimage, origin, created_at);
        let id = WalletPaymentId::Incoming(payment.payment_hash());
        let stored = payment.clone();
        self.write(move |conn| {
            IncomingQueries::new(conn).insert(&stored)?;
            add_metadata_if_any(conn, &id, metadata.as_ref())
        })
        .await?;
        info!("Added incoming payment {}", payment.payment_hash());
        self.notify(ChangeKind::Added, vec![id]).await;
        Ok(payment)
    }

    /// Records the reception of an incoming payment and links its on-chain parts.
    ///
    /// Returns `false` if the payment was already received, in which case the
    /// stored reception is kept.
    pub async fn receive_payment(
        &self,
        payment_hash: PaymentHash,
        received_with: Vec<ReceivedWith>,
        received_at: i64,
    ) -> LedgerResult<bool> {
        let id = WalletPaymentId::Incoming(payment_hash);
        let received = self
            .write(move |conn| {
                let incoming = IncomingQueries::new(conn);
                ensure_ledger!(
                    incoming.exists(&payment_hash)?,
                    LedgerError::ReferentialViolation {
                        parent: "incoming payment",
                        id: payment_hash.to_string(),
                    }
                );
                if !incoming.receive(&payment_hash, &received_with, received_at)? {
                    return Ok(false);
                }
                let links = LinkQueries::new(conn);
                for tx_id in received_with.iter().filter_map(ReceivedWith::tx_id) {
                    links.link(tx_id, &id)?;
                }
                Ok(true)
            })
            .await?;
        if received {
            info!("Received incoming payment {payment_hash}");
            self.notify(ChangeKind::Completed, vec![id]).await;
        } else {
            debug!("Incoming payment {payment_hash} was already received");
        }
        Ok(received)
    }

    pub async fn get_incoming_payment(
        &self,
        payment_hash: PaymentHash,
    ) -> LedgerResult<Option<IncomingPayment>> {
        self.read(move |conn| IncomingQueries::new(conn).get(&payment_hash))
            .await
    }

    pub async fn list_incoming_payments_by_time_range(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<IncomingPayment>> {
        self.read(move |conn| IncomingQueries::new(conn).list_by_created_at(from, to))
            .await
    }

    /// Incoming payments created in the range that were never received.
    pub async fn list_expired_incoming_payments(
        &self,
        from_created_at: i64,
        to_created_at: i64,
    ) -> LedgerResult<Vec<IncomingPayment>> {
        self.read(move |conn| {
            IncomingQueries::new(conn).list_expired(from_created_at, to_created_at)
        })
        .await
    }

    /// Deletes an incoming payment that was never received.
    pub async fn remove_expired_incoming_payment(
        &self,
        payment_hash: PaymentHash,
    ) -> LedgerResult<bool> {
        let id = WalletPaymentId::Incoming(payment_hash);
        let removed = self
            .write(move |conn| {
                let removed = IncomingQueries::new(conn).delete_if_not_received(&payment_hash)?;
                if removed {
                    remove_side_rows(conn, &id)?;
                }
                Ok(removed)
            })
            .await?;
        if removed {
            info!("Removed expired incoming payment {payment_hash}");
            self.notify(ChangeKind::Deleted, vec![id]).await;
        }
        Ok(removed)
    }

    /// Deletes an incoming payment with its metadata and transaction links.
    pub async fn delete_incoming_payment(&self, payment_hash: PaymentHash) -> LedgerResult<bool> {
        let id = WalletPaymentId::Incoming(payment_hash);
        let deleted = self
            .write(move |conn| {
                let deleted = IncomingQueries::new(conn).delete(&payment_hash)?;
                if deleted {
                    remove_side_rows(conn, &id)?;
                }
                Ok(deleted)
            })
            .await?;
        if deleted {
            info!("Deleted incoming payment {payment_hash}");
            self.notify(ChangeKind::Deleted, vec![id]).await;
        }
        Ok(deleted)
    }

    pub async fn get_oldest_received_date(&self) -> LedgerResult<Option<i64>> {
        self.read(|conn| IncomingQueries::new(conn).oldest_received_at())
            .await
    }

    /// Received payments still waiting for the confirmation of a funding transaction.
    pub async fn list_incoming_payments_not_yet_confirmed(
        &self,
    ) -> LedgerResult<Vec<IncomingPayment>> {
        self.read(|conn| IncomingQueries::new(conn).list_not_yet_confirmed())
            .await
    }

    // Lightning outgoing

    pub async fn add_lightning_outgoing_payment(
        &self,
        payment: LightningOutgoingPayment,
        metadata: Option<PaymentMetadata>,
    ) -> LedgerResult<()> {
        let id = WalletPaymentId::LightningOutgoing(payment.id);
        self.write(move |conn| {
            LightningOutgoingQueries::new(conn).insert(&payment)?;
            add_metadata_if_any(conn, &id, metadata.as_ref())
        })
        .await?;
        info!("Added lightning outgoing payment {id}");
        self.notify(ChangeKind::Added, vec![id]).await;
        Ok(())
    }

    /// Adds the parts of a new routing attempt to an existing payment.
    pub async fn add_lightning_outgoing_parts(
        &self,
        parent_id: Uuid,
        parts: Vec<LightningOutgoingPart>,
    ) -> LedgerResult<()> {
        if parts.is_empty() {
            return Ok(());
        }
        self.write(move |conn| LightningOutgoingQueries::new(conn).add_parts(parent_id, &parts))
            .await?;
        self.notify(
            ChangeKind::Updated,
            vec![WalletPaymentId::LightningOutgoing(parent_id)],
        )
        .await;
        Ok(())
    }

    /// Returns `false` if the payment is unknown or already completed.
    pub async fn complete_lightning_outgoing_payment(
        &self,
        id: Uuid,
        completed: LightningOutgoingCompleted,
    ) -> LedgerResult<bool> {
        let updated = self
            .write(move |conn| LightningOutgoingQueries::new(conn).complete(id, &completed))
            .await?;
        if updated {
            info!("Completed lightning outgoing payment {id}");
            self.notify(
                ChangeKind::Completed,
                vec![WalletPaymentId::LightningOutgoing(id)],
            )
            .await;
        }
        Ok(updated)
    }

    /// Sets the terminal status of one part. The parent is left untouched.
    pub async fn complete_lightning_outgoing_part(
        &self,
        part_id: Uuid,
        status: LightningOutgoingPartStatus,
    ) -> LedgerResult<bool> {
        let parent = self
            .write(move |conn| {
                let outgoing = LightningOutgoingQueries::new(conn);
                if !outgoing.complete_part(part_id, &status)? {
                    return Ok(None);
                }
                outgoing.parent_of(part_id)
            })
            .await?;
        let Some(parent_id) = parent else {
            return Ok(false);
        };
        debug!("Completed part {part_id} of lightning outgoing payment {parent_id}");
        self.notify(
            ChangeKind::Updated,
            vec![WalletPaymentId::LightningOutgoing(parent_id)],
        )
        .await;
        Ok(true)
    }

    pub async fn get_lightning_outgoing_payment(
        &self,
        id: Uuid,
    ) -> LedgerResult<Option<LightningOutgoingPayment>> {
        self.read(move |conn| LightningOutgoingQueries::new(conn).get(id))
            .await
    }

    pub async fn get_lightning_outgoing_payment_from_part_id(
        &self,
        part_id: Uuid,
    ) -> LedgerResult<Option<LightningOutgoingPayment>> {
        self.read(move |conn| LightningOutgoingQueries::new(conn).get_from_part_id(part_id))
            .await
    }

    pub async fn list_lightning_outgoing_payments_for_hash(
        &self,
        payment_hash: PaymentHash,
    ) -> LedgerResult<Vec<LightningOutgoingPayment>> {
        self.read(move |conn| LightningOutgoingQueries::new(conn).list_for_hash(&payment_hash))
            .await
    }

    pub async fn list_lightning_outgoing_payments_by_time_range(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<LightningOutgoingPayment>> {
        self.read(move |conn| LightningOutgoingQueries::new(conn).list_by_created_at(from, to))
            .await
    }

    // On-chain outgoing

    async fn add_on_chain<P>(
        &self,
        payment: P,
        metadata: Option<PaymentMetadata>,
        insert: fn(&Connection, &P) -> LedgerResult<()>,
    ) -> LedgerResult<()>
    where
        P: OnChainOutgoing + Send + 'static,
    {
        let id = payment.payment_id();
        let tx_id = payment.tx_id();
        self.write(move |conn| {
            insert(conn, &payment)?;
            LinkQueries::new(conn).link(tx_id, &id)?;
            add_metadata_if_any(conn, &id, metadata.as_ref())
        })
        .await?;
        info!("Added {id} spent in {tx_id}");
        self.notify(ChangeKind::Added, vec![id]).await;
        Ok(())
    }

    pub async fn add_channel_close_outgoing_payment(
        &self,
        payment: ChannelCloseOutgoingPayment,
        metadata: Option<PaymentMetadata>,
    ) -> LedgerResult<()> {
        self.add_on_chain(payment, metadata, |conn, p| {
            ChannelCloseQueries::new(conn).insert(p)
        })
        .await
    }

    pub async fn add_splice_outgoing_payment(
        &self,
        payment: SpliceOutgoingPayment,
        metadata: Option<PaymentMetadata>,
    ) -> LedgerResult<()> {
        self.add_on_chain(payment, metadata, |conn, p| {
            SpliceOutQueries::new(conn).insert(p)
        })
        .await
    }

    pub async fn add_splice_cpfp_outgoing_payment(
        &self,
        payment: SpliceCpfpOutgoingPayment,
        metadata: Option<PaymentMetadata>,
    ) -> LedgerResult<()> {
        self.add_on_chain(payment, metadata, |conn, p| {
            SpliceCpfpQueries::new(conn).insert(p)
        })
        .await
    }

    pub async fn add_inbound_liquidity_outgoing_payment(
        &self,
        payment: InboundLiquidityOutgoingPayment,
        metadata: Option<PaymentMetadata>,
    ) -> LedgerResult<()> {
        self.add_on_chain(payment, metadata, |conn, p| {
            InboundLiquidityQueries::new(conn).insert(p)
        })
        .await
    }

    /// Includes channel closes recorded as outgoing Lightning payments by older versions.
    pub async fn get_channel_close_outgoing_payment(
        &self,
        id: Uuid,
    ) -> LedgerResult<Option<ChannelCloseOutgoingPayment>> {
        self.read(move |conn| ChannelCloseQueries::new(conn).get(id))
            .await
    }

    pub async fn list_channel_close_outgoing_payments_by_time_range(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<ChannelCloseOutgoingPayment>> {
        self.read(move |conn| ChannelCloseQueries::new(conn).list_by_created_at(from, to))
            .await
    }

    pub async fn get_splice_outgoing_payment(
        &self,
        id: Uuid,
    ) -> LedgerResult<Option<SpliceOutgoingPayment>> {
        self.read(move |conn| SpliceOutQueries::new(conn).get(id))
            .await
    }

    pub async fn list_splice_outgoing_payments_by_time_range(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<SpliceOutgoingPayment>> {
        self.read(move |conn| SpliceOutQueries::new(conn).list_by_created_at(from, to))
            .await
    }

    pub async fn get_splice_cpfp_outgoing_payment(
        &self,
        id: Uuid,
    ) -> LedgerResult<Option<SpliceCpfpOutgoingPayment>> {
        self.read(move |conn| SpliceCpfpQueries::new(conn).get(id))
            .await
    }

    pub async fn list_splice_cpfp_outgoing_payments_by_time_range(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<SpliceCpfpOutgoingPayment>> {
        self.read(move |conn| SpliceCpfpQueries::new(conn).list_by_created_at(from, to))
            .await
    }

    pub async fn get_inbound_liquidity_outgoing_payment(
        &self,
        id: Uuid,
    ) -> LedgerResult<Option<InboundLiquidityOutgoingPayment>> {
        self.read(move |conn| InboundLiquidityQueries::new(conn).get(id))
            .await
    }

    pub async fn list_inbound_liquidity_outgoing_payments_by_time_range(
        &self,
        from: i64,
        to: i64,
    ) -> LedgerResult<Vec<InboundLiquidityOutgoingPayment>> {
        self.read(move |conn| InboundLiquidityQueries::new(conn).list_by_created_at(from, to))
            .await
    }

    // Chain events

    /// Marks `tx_id` confirmed on its links and on every payment it settles.
    ///
    /// Times already recorded are kept, so replaying an event is a no-op.
    /// Returns the payments that changed.
    pub async fn set_confirmed(&self, tx_id: Txid, at: i64) -> LedgerResult<Vec<WalletPaymentId>> {
        let changed = self
            .write(move |conn| apply_chain_event(conn, tx_id, at, ChainEvent::Confirmed))
            .await?;
        info!("Transaction {tx_id} confirmed at {at}, {} payment(s) updated", changed.len());
        self.notify(ChangeKind::Updated, changed.clone()).await;
        Ok(changed)
    }

    /// Marks `tx_id` locked on its links and on every payment it settles.
    pub async fn set_locked(&self, tx_id: Txid, at: i64) -> LedgerResult<Vec<WalletPaymentId>> {
        let changed = self
            .write(move |conn| apply_chain_event(conn, tx_id, at, ChainEvent::Locked))
            .await?;
        info!("Transaction {tx_id} locked at {at}, {} payment(s) updated", changed.len());
        self.notify(ChangeKind::Updated, changed.clone()).await;
        Ok(changed)
    }

    pub async fn list_payments_for_tx(&self, tx_id: Txid) -> LedgerResult<Vec<WalletPayment>> {
        self.read(move |conn| {
            let ids = LinkQueries::new(conn).list_payment_ids(tx_id)?;
            let payments = skip_unreadable(ids.iter().map(|id| get_payment(conn, id)))?;
            Ok(payments.into_iter().flatten().collect())
        })
        .await
    }

    pub async fn list_unconfirmed_txs(&self) -> LedgerResult<Vec<Txid>> {
        self.read(|conn| LinkQueries::new(conn).list_unconfirmed_txs())
            .await
    }

    // Aggregates

    pub async fn get_payment(&self, id: WalletPaymentId) -> LedgerResult<Option<WalletPayment>> {
        self.read(move |conn| get_payment(conn, &id)).await
    }

    /// Earliest completion over every payment kind: reception of incoming
    /// payments, completion of Lightning payments and confirmation of
    /// on-chain payments.
    pub async fn get_oldest_completed_date(&self) -> LedgerResult<Option<i64>> {
        self.read(|conn| {
            let mut dates = vec![
                IncomingQueries::new(conn).oldest_received_at()?,
                LightningOutgoingQueries::new(conn).oldest_completed_at()?,
            ];
            for table in ON_CHAIN_TABLES {
                dates.push(oldest_confirmed_at(conn, table)?);
            }
            Ok(dates.into_iter().flatten().min())
        })
        .await
    }

    pub async fn count_payments(&self) -> LedgerResult<u64> {
        self.read(|conn| {
            let outgoing = LightningOutgoingQueries::new(conn);
            let mut count = IncomingQueries::new(conn)
                .count()?
                .saturating_add(outgoing.count()?)
                .saturating_add(outgoing.count_legacy_closes()?);
            for table in ON_CHAIN_TABLES {
                count = count.saturating_add(count_rows(conn, table)?);
            }
            Ok(count)
        })
        .await
    }

    // History

    /// Page of the wallet history, most recently completed first.
    ///
    /// Incoming payments show up once received. Pending payments sort by
    /// their creation time.
    pub async fn list_payments_order(
        &self,
        count: u32,
        skip: u32,
    ) -> LedgerResult<Vec<WalletPaymentOrderRow>> {
        self.read(move |conn| OrderQueries::new(conn).list_all(count, skip))
            .await
    }

    /// Like [`Self::list_payments_order`], restricted to payments completed
    /// at or after `since` and to pending payments.
    pub async fn list_recent_payments_order(
        &self,
        since: i64,
        count: u32,
        skip: u32,
    ) -> LedgerResult<Vec<WalletPaymentOrderRow>> {
        self.read(move |conn| OrderQueries::new(conn).list_recent(since, count, skip))
            .await
    }

    /// Lightning payments sent and not completed yet.
    pub async fn list_outgoing_in_flight_payments_order(
        &self,
        count: u32,
        skip: u32,
    ) -> LedgerResult<Vec<WalletPaymentOrderRow>> {
        self.read(move |conn| OrderQueries::new(conn).list_outgoing_in_flight(count, skip))
            .await
    }

    /// Payments received, sent or confirmed between `from` and `to`, inclusive.
    pub async fn list_range_successful_payments_order(
        &self,
        from: i64,
        to: i64,
        count: u32,
        skip: u32,
    ) -> LedgerResult<Vec<WalletPaymentOrderRow>> {
        self.read(move |conn| {
            OrderQueries::new(conn).list_successful_in_range(from, to, count, skip)
        })
        .await
    }

    pub async fn count_range_successful_payments(&self, from: i64, to: i64) -> LedgerResult<u64> {
        self.read(move |conn| OrderQueries::new(conn).count_successful_in_range(from, to))
            .await
    }

    // Metadata

    pub async fn get_metadata(&self, id: WalletPaymentId) -> LedgerResult<Option<PaymentMetadata>> {
        self.read(move |conn| MetadataQueries::new(conn).get(&id))
            .await
    }

    /// Stores protocol metadata, keeping any protocol field already stored.
    pub async fn add_metadata(
        &self,
        id: WalletPaymentId,
        metadata: PaymentMetadata,
    ) -> LedgerResult<()> {
        if metadata.is_empty() {
            return Ok(());
        }
        self.write(move |conn| MetadataQueries::new(conn).add(&id, &metadata))
            .await?;
        self.notify(ChangeKind::MetadataUpdated, vec![id]).await;
        Ok(())
    }

    /// Replaces the user description and notes of a payment.
    pub async fn upsert_user_fields(
        &self,
        id: WalletPaymentId,
        user_description: Option<String>,
        user_notes: Option<String>,
    ) -> LedgerResult<()> {
        let modified_at = Utc::now().timestamp_millis();
        self.write(move |conn| {
            MetadataQueries::new(conn).upsert_user_fields(
                &id,
                user_description.as_deref(),
                user_notes.as_deref(),
                modified_at,
            )
        })
        .await?;
        self.notify(ChangeKind::MetadataUpdated, vec![id]).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::PaymentsDb;
    use crate::{LedgerError, Network, config::LedgerConfig, persist::tests};

    fn open(path: &Path) -> PaymentsDb {
        PaymentsDb::open(path, "wallet").unwrap()
    }

    #[test]
    fn test_open_from_config() {
        let temp_dir = tempdir::TempDir::new("payments_db_config").unwrap();
        let config = LedgerConfig {
            data_dir: temp_dir.path().to_string_lossy().into_owned(),
            network: Network::Regtest,
            wallet_id: "alice".to_string(),
            log_filter: None,
        };
        let db = PaymentsDb::new(&config).unwrap();
        assert_eq!(db.wallet_id(), "alice");
        assert!(
            db.storage()
                .get_db_path()
                .starts_with(temp_dir.path().join("regtest").join("alice"))
        );

        let err = PaymentsDb::open(temp_dir.path(), "").err().unwrap();
        assert!(matches!(err, LedgerError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_incoming_lifecycle() {
        let temp_dir = tempdir::TempDir::new("payments_db_incoming").unwrap();
        tests::test_incoming_lifecycle(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_multipart_reception() {
        let temp_dir = tempdir::TempDir::new("payments_db_multipart").unwrap();
        tests::test_multipart_reception(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_expired_incoming_payments() {
        let temp_dir = tempdir::TempDir::new("payments_db_expired").unwrap();
        tests::test_expired_incoming_payments(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_delete_incoming_payment() {
        let temp_dir = tempdir::TempDir::new("payments_db_delete").unwrap();
        tests::test_delete_incoming_payment(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_lightning_outgoing_lifecycle() {
        let temp_dir = tempdir::TempDir::new("payments_db_outgoing").unwrap();
        tests::test_lightning_outgoing_lifecycle(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_chain_events() {
        let temp_dir = tempdir::TempDir::new("payments_db_chain_events").unwrap();
        tests::test_chain_events(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_legacy_channel_closes() {
        let temp_dir = tempdir::TempDir::new("payments_db_legacy_closes").unwrap();
        tests::test_legacy_channel_closes(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_isolated() {
        let temp_dir = tempdir::TempDir::new("payments_db_unreadable").unwrap();
        tests::test_unreadable_rows_are_isolated(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_legacy_received_parts() {
        let temp_dir = tempdir::TempDir::new("payments_db_legacy_received").unwrap();
        tests::test_legacy_received_parts(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_payments_order() {
        let temp_dir = tempdir::TempDir::new("payments_db_order").unwrap();
        tests::test_payments_order(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_metadata() {
        let temp_dir = tempdir::TempDir::new("payments_db_metadata").unwrap();
        tests::test_metadata(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_change_notifications() {
        let temp_dir = tempdir::TempDir::new("payments_db_notifications").unwrap();
        tests::test_change_notifications(&open(temp_dir.path())).await;
    }

    #[tokio::test]
    async fn test_reopen_keeps_payments() {
        let temp_dir = tempdir::TempDir::new("payments_db_reopen").unwrap();
        tests::test_incoming_lifecycle(&open(temp_dir.path())).await;
        let db = open(temp_dir.path());
        assert_eq!(db.count_payments().await.unwrap(), 1);
    }
}
