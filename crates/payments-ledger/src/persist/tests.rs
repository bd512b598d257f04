use std::sync::Arc;

use bitcoin::{Txid, secp256k1::PublicKey};
use rusqlite::params;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{
    ChangeKind, ChannelCloseOutgoingPayment, ChannelClosingType, ChannelId, ExchangeRate,
    FinalFailure, InboundLiquidityOutgoingPayment, IncomingOrigin, LeaseFees, LeaseWitness, LedgerError,
    LightningOutgoingCompleted, LightningOutgoingDetails, LightningOutgoingPart,
    LightningOutgoingPartStatus, LightningOutgoingPayment, LightningOutgoingStatus,
    LiquidityLease, LnurlMetadata, LnurlPay, LnurlPayMetadata, LnurlSuccessAction, MilliSatoshi,
    PartFailure, PaymentChange, PaymentChangeListener, PaymentMetadata, PaymentsDb, Preimage,
    ReceivedWith, Satoshi, SpliceCpfpOutgoingPayment, SpliceOutgoingPayment, WalletPayment,
    WalletPaymentId, WalletPaymentOrderRow,
};

fn tx_id(n: u8) -> Txid {
    hex::encode([n; 32]).parse().unwrap()
}

fn node_id() -> PublicKey {
    "0279be667ef9dcbbac55a06295ce870b07029bfcdb2dce28d959f2815b16f81798"
        .parse()
        .unwrap()
}

fn invoice(n: u8) -> IncomingOrigin {
    IncomingOrigin::Invoice {
        payment_request: format!("lnbc1invoice{n}"),
    }
}

fn lightning_part(amount: u64, tx: Option<Txid>) -> ReceivedWith {
    match tx {
        None => ReceivedWith::LightningPayment {
            amount: MilliSatoshi(amount),
            channel_id: ChannelId([1; 32]),
            htlc_id: 0,
        },
        Some(tx_id) => ReceivedWith::SpliceIn {
            amount: MilliSatoshi(amount),
            service_fee: MilliSatoshi(1_000),
            mining_fee: Satoshi(2),
            channel_id: ChannelId([1; 32]),
            tx_id,
            confirmed_at: None,
            locked_at: None,
        },
    }
}

fn splice_out(tx_id: Txid, created_at: i64) -> SpliceOutgoingPayment {
    SpliceOutgoingPayment {
        id: Uuid::new_v4(),
        recipient_amount: Satoshi(50_000),
        address: "bc1qsplice".to_string(),
        mining_fee: Satoshi(300),
        tx_id,
        channel_id: ChannelId([2; 32]),
        created_at,
        confirmed_at: None,
        locked_at: None,
    }
}

fn channel_close(tx_id: Txid, created_at: i64) -> ChannelCloseOutgoingPayment {
    ChannelCloseOutgoingPayment {
        id: Uuid::new_v4(),
        recipient_amount: Satoshi(80_000),
        address: "bc1qclose".to_string(),
        is_sent_to_default_address: true,
        mining_fee: Satoshi(500),
        tx_id,
        channel_id: ChannelId([3; 32]),
        closing_type: ChannelClosingType::Local,
        created_at,
        confirmed_at: None,
        locked_at: None,
    }
}

fn lnurl_metadata() -> PaymentMetadata {
    PaymentMetadata {
        lnurl: Some(LnurlPayMetadata {
            pay: LnurlPay {
                initial_url: "lnurl1dp68gurn8ghj7".to_string(),
                callback: "https://service.com/callback".to_string(),
                min_sendable: MilliSatoshi(1_000),
                max_sendable: MilliSatoshi(1_000_000),
                max_comment_length: Some(140),
            },
            description: "coffee".to_string(),
            metadata: LnurlMetadata::from_raw(r#"[["text/plain","A coffee"]]"#).unwrap(),
            success_action: Some(LnurlSuccessAction::Message {
                message: "thanks".to_string(),
            }),
        }),
        original_fiat: Some(ExchangeRate {
            fiat_currency: "EUR".to_string(),
            price: 60_000.5,
        }),
        ..Default::default()
    }
}

struct RecordingListener {
    changes: Arc<Mutex<Vec<PaymentChange>>>,
}

#[async_trait::async_trait]
impl PaymentChangeListener for RecordingListener {
    async fn on_change(&self, change: PaymentChange) {
        self.changes.lock().await.push(change);
    }
}

pub async fn test_incoming_lifecycle(db: &PaymentsDb) {
    let preimage = Preimage([1; 32]);
    let hash = preimage.payment_hash();

    let payment = db
        .add_incoming_payment(preimage, invoice(1), 10, None)
        .await
        .unwrap();
    assert_eq!(payment.payment_hash(), hash);
    assert!(payment.received.is_none());

    let stored = db.get_incoming_payment(hash).await.unwrap().unwrap();
    assert_eq!(stored, payment);

    let duplicate = db.add_incoming_payment(preimage, invoice(1), 11, None).await;
    assert!(matches!(duplicate, Err(LedgerError::DuplicatePayment(_))));

    assert!(
        db.receive_payment(hash, vec![lightning_part(1_000, None)], 20)
            .await
            .unwrap()
    );
    let received = db.get_incoming_payment(hash).await.unwrap().unwrap();
    let reception = received.received.as_ref().unwrap();
    assert_eq!(reception.received_at, 20);
    assert_eq!(received.amount(), MilliSatoshi(1_000));
    assert_eq!(received.fees(), MilliSatoshi::ZERO);

    // The first reception is kept.
    assert!(
        !db.receive_payment(hash, vec![lightning_part(9_000, None)], 30)
            .await
            .unwrap()
    );
    assert_eq!(db.get_incoming_payment(hash).await.unwrap().unwrap(), received);

    let unknown = Preimage([2; 32]).payment_hash();
    let err = db
        .receive_payment(unknown, vec![lightning_part(1_000, None)], 20)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::ReferentialViolation { .. }));

    assert_eq!(db.get_oldest_received_date().await.unwrap(), Some(20));
    let listed = db.list_incoming_payments_by_time_range(0, 100).await.unwrap();
    assert_eq!(listed, vec![received]);
    assert!(
        db.list_incoming_payments_by_time_range(11, 100)
            .await
            .unwrap()
            .is_empty()
    );
}

pub async fn test_multipart_reception(db: &PaymentsDb) {
    let preimage = Preimage([3; 32]);
    let hash = preimage.payment_hash();
    let tx = tx_id(3);
    db.add_incoming_payment(preimage, IncomingOrigin::KeySend, 1, None)
        .await
        .unwrap();
    db.receive_payment(
        hash,
        vec![
            lightning_part(40_000, None),
            lightning_part(60_000, Some(tx)),
            lightning_part(10_000, Some(tx)),
        ],
        5,
    )
    .await
    .unwrap();

    let payment = db.get_incoming_payment(hash).await.unwrap().unwrap();
    assert_eq!(payment.amount(), MilliSatoshi(110_000));
    assert_eq!(payment.fees(), MilliSatoshi(6_000));

    // Both parts share one link.
    let linked = db.list_payments_for_tx(tx).await.unwrap();
    assert_eq!(linked.len(), 1);
    assert_eq!(linked[0].id(), WalletPaymentId::Incoming(hash));
    assert_eq!(db.list_unconfirmed_txs().await.unwrap(), vec![tx]);
}

pub async fn test_expired_incoming_payments(db: &PaymentsDb) {
    let pending = Preimage([4; 32]);
    let paid = Preimage([5; 32]);
    db.add_incoming_payment(pending, invoice(4), 10, None)
        .await
        .unwrap();
    db.add_incoming_payment(paid, invoice(5), 20, None)
        .await
        .unwrap();
    db.receive_payment(paid.payment_hash(), vec![lightning_part(1, None)], 25)
        .await
        .unwrap();

    let expired = db.list_expired_incoming_payments(0, 100).await.unwrap();
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].payment_hash(), pending.payment_hash());
    assert!(
        db.list_expired_incoming_payments(11, 100)
            .await
            .unwrap()
            .is_empty()
    );

    assert!(
        !db.remove_expired_incoming_payment(paid.payment_hash())
            .await
            .unwrap()
    );
    assert!(
        db.remove_expired_incoming_payment(pending.payment_hash())
            .await
            .unwrap()
    );
    assert!(
        db.get_incoming_payment(pending.payment_hash())
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        db.get_incoming_payment(paid.payment_hash())
            .await
            .unwrap()
            .is_some()
    );
}

pub async fn test_delete_incoming_payment(db: &PaymentsDb) {
    let preimage = Preimage([6; 32]);
    let hash = preimage.payment_hash();
    let id = WalletPaymentId::Incoming(hash);
    let tx = tx_id(6);
    db.add_incoming_payment(preimage, invoice(6), 1, Some(lnurl_metadata()))
        .await
        .unwrap();
    db.receive_payment(hash, vec![lightning_part(5_000, Some(tx))], 2)
        .await
        .unwrap();
    assert!(db.get_metadata(id).await.unwrap().is_some());

    assert!(db.delete_incoming_payment(hash).await.unwrap());
    assert!(!db.delete_incoming_payment(hash).await.unwrap());

    assert!(db.get_incoming_payment(hash).await.unwrap().is_none());
    assert!(db.get_metadata(id).await.unwrap().is_none());
    assert!(db.list_payments_for_tx(tx).await.unwrap().is_empty());
    assert!(db.list_unconfirmed_txs().await.unwrap().is_empty());
}

#[allow(clippy::too_many_lines)]
pub async fn test_lightning_outgoing_lifecycle(db: &PaymentsDb) {
    let preimage = Preimage([7; 32]);
    let failed_part = LightningOutgoingPart::new(MilliSatoshi(1_010), Vec::new(), 2);
    let succeeded_part = LightningOutgoingPart::new(MilliSatoshi(1_010), Vec::new(), 3);
    let mut payment = LightningOutgoingPayment::new(
        MilliSatoshi(1_000),
        node_id(),
        LightningOutgoingDetails::Normal {
            payment_request: "lnbc10n1outgoing".to_string(),
            payment_hash: preimage.payment_hash(),
        },
        1,
    );
    payment.parts.push(failed_part.clone());
    db.add_lightning_outgoing_payment(payment.clone(), None)
        .await
        .unwrap();

    let duplicate = db.add_lightning_outgoing_payment(payment.clone(), None).await;
    assert!(matches!(duplicate, Err(LedgerError::DuplicatePayment(_))));

    db.add_lightning_outgoing_parts(payment.id, vec![succeeded_part.clone()])
        .await
        .unwrap();
    let orphan = db
        .add_lightning_outgoing_parts(
            Uuid::new_v4(),
            vec![LightningOutgoingPart::new(MilliSatoshi(1), Vec::new(), 3)],
        )
        .await
        .unwrap_err();
    assert!(matches!(orphan, LedgerError::ReferentialViolation { .. }));

    assert!(
        db.complete_lightning_outgoing_part(
            failed_part.id,
            LightningOutgoingPartStatus::Failed {
                failure: PartFailure {
                    remote_failure_code: Some(0x400f),
                    details: "incorrect payment details".to_string(),
                },
                completed_at: 4,
            },
        )
        .await
        .unwrap()
    );
    assert!(
        db.complete_lightning_outgoing_part(
            succeeded_part.id,
            LightningOutgoingPartStatus::Succeeded {
                preimage,
                completed_at: 5,
            },
        )
        .await
        .unwrap()
    );
    assert!(
        !db.complete_lightning_outgoing_part(
            Uuid::new_v4(),
            LightningOutgoingPartStatus::Succeeded {
                preimage,
                completed_at: 5,
            },
        )
        .await
        .unwrap()
    );

    // A pending payment shows every part.
    let pending = db
        .get_lightning_outgoing_payment_from_part_id(failed_part.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(pending.id, payment.id);
    assert_eq!(pending.status, LightningOutgoingStatus::Pending);
    assert_eq!(pending.parts.len(), 2);

    let completed = LightningOutgoingCompleted::SucceededOffChain {
        preimage,
        completed_at: 6,
    };
    assert!(
        db.complete_lightning_outgoing_payment(payment.id, completed.clone())
            .await
            .unwrap()
    );
    assert!(
        !db.complete_lightning_outgoing_payment(
            payment.id,
            LightningOutgoingCompleted::Failed {
                reason: crate::FinalFailure::UnknownError,
                completed_at: 7,
            },
        )
        .await
        .unwrap()
    );

    let stored = db
        .get_lightning_outgoing_payment(payment.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status, LightningOutgoingStatus::Completed(completed));
    assert_eq!(stored.parts.len(), 1);
    assert_eq!(stored.parts[0].id, succeeded_part.id);
    assert_eq!(stored.routing_fee(), MilliSatoshi(10));

    // The failed part is no longer part of the succeeded payment.
    assert!(
        db.get_lightning_outgoing_payment_from_part_id(failed_part.id)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(
        db.get_lightning_outgoing_payment_from_part_id(succeeded_part.id)
            .await
            .unwrap()
            .map(|p| p.id),
        Some(payment.id)
    );

    let for_hash = db
        .list_lightning_outgoing_payments_for_hash(preimage.payment_hash())
        .await
        .unwrap();
    assert_eq!(for_hash, vec![stored.clone()]);
    assert_eq!(
        db.list_lightning_outgoing_payments_by_time_range(0, 10)
            .await
            .unwrap(),
        vec![stored]
    );
    assert_eq!(db.get_oldest_completed_date().await.unwrap(), Some(6));
}

#[allow(clippy::too_many_lines)]
pub async fn test_chain_events(db: &PaymentsDb) {
    let shared_tx = tx_id(8);
    let close_tx = tx_id(9);
    let lease_tx = tx_id(10);

    let preimage = Preimage([8; 32]);
    db.add_incoming_payment(preimage, invoice(8), 1, None)
        .await
        .unwrap();
    db.receive_payment(
        preimage.payment_hash(),
        vec![lightning_part(20_000, Some(shared_tx))],
        50,
    )
    .await
    .unwrap();

    let splice = splice_out(shared_tx, 2);
    db.add_splice_outgoing_payment(splice.clone(), None)
        .await
        .unwrap();
    let cpfp = SpliceCpfpOutgoingPayment {
        id: Uuid::new_v4(),
        mining_fee: Satoshi(150),
        tx_id: shared_tx,
        channel_id: ChannelId([2; 32]),
        created_at: 3,
        confirmed_at: None,
        locked_at: None,
    };
    db.add_splice_cpfp_outgoing_payment(cpfp.clone(), None)
        .await
        .unwrap();
    let close = channel_close(close_tx, 4);
    db.add_channel_close_outgoing_payment(close.clone(), None)
        .await
        .unwrap();
    let purchase = InboundLiquidityOutgoingPayment {
        id: Uuid::new_v4(),
        mining_fee: Satoshi(400),
        tx_id: lease_tx,
        channel_id: ChannelId([4; 32]),
        lease: LiquidityLease {
            amount: Satoshi(1_000_000),
            fees: LeaseFees {
                mining_fee: Satoshi(400),
                service_fee: Satoshi(1_000),
            },
            seller_sig: "3045".to_string(),
            witness: LeaseWitness {
                funding_script: "0020".to_string(),
                lease_duration: 1_008,
                lease_end: 850_000,
                max_relay_fee_proportional: 100,
                max_relay_fee_base: MilliSatoshi(1_000),
            },
        },
        created_at: 5,
        confirmed_at: None,
        locked_at: None,
    };
    db.add_inbound_liquidity_outgoing_payment(purchase.clone(), None)
        .await
        .unwrap();
    assert_eq!(purchase.fees(), Satoshi(1_400));

    let duplicate = db.add_splice_outgoing_payment(splice.clone(), None).await;
    assert!(matches!(duplicate, Err(LedgerError::DuplicatePayment(_))));

    let unconfirmed = db.list_unconfirmed_txs().await.unwrap();
    assert_eq!(unconfirmed.len(), 3);
    assert!(unconfirmed.contains(&shared_tx));

    let changed = db.set_confirmed(shared_tx, 100).await.unwrap();
    assert_eq!(
        changed,
        vec![
            WalletPaymentId::Incoming(preimage.payment_hash()),
            WalletPaymentId::SpliceOutgoing(splice.id),
            WalletPaymentId::SpliceCpfpOutgoing(cpfp.id),
        ]
    );
    // Replaying the event keeps the first confirmation.
    assert!(db.set_confirmed(shared_tx, 200).await.unwrap().is_empty());

    let stored_splice = db.get_splice_outgoing_payment(splice.id).await.unwrap().unwrap();
    assert_eq!(stored_splice.confirmed_at, Some(100));
    assert_eq!(stored_splice.locked_at, None);
    let stored_cpfp = db
        .get_splice_cpfp_outgoing_payment(cpfp.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_cpfp.confirmed_at, Some(100));

    let incoming = db
        .get_incoming_payment(preimage.payment_hash())
        .await
        .unwrap()
        .unwrap();
    let ReceivedWith::SpliceIn { confirmed_at, .. } =
        &incoming.received.as_ref().unwrap().received_with[0]
    else {
        panic!("expected a splice-in part");
    };
    assert_eq!(*confirmed_at, Some(100));

    assert_eq!(db.set_locked(shared_tx, 150).await.unwrap().len(), 3);
    assert_eq!(
        db.set_locked(close_tx, 160).await.unwrap(),
        vec![WalletPaymentId::ChannelCloseOutgoing(close.id)]
    );
    let stored_close = db
        .get_channel_close_outgoing_payment(close.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored_close.locked_at, Some(160));
    assert_eq!(stored_close.confirmed_at, None);

    let unconfirmed = db.list_unconfirmed_txs().await.unwrap();
    assert_eq!(unconfirmed.len(), 2);
    assert!(!unconfirmed.contains(&shared_tx));

    let linked = db.list_payments_for_tx(shared_tx).await.unwrap();
    assert_eq!(linked.len(), 3);
    assert!(
        linked
            .iter()
            .any(|p| matches!(p, WalletPayment::SpliceOutgoing(s) if s.id == splice.id))
    );

    assert_eq!(
        db.get_payment(WalletPaymentId::InboundLiquidityOutgoing(purchase.id))
            .await
            .unwrap(),
        Some(WalletPayment::InboundLiquidityOutgoing(purchase.clone()))
    );
    assert_eq!(
        db.list_inbound_liquidity_outgoing_payments_by_time_range(0, 10)
            .await
            .unwrap(),
        vec![purchase]
    );
    assert_eq!(
        db.list_splice_cpfp_outgoing_payments_by_time_range(0, 10)
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(
        db.list_splice_outgoing_payments_by_time_range(3, 10)
            .await
            .unwrap(),
        Vec::new()
    );

    // Reception at 50 precedes every confirmation.
    assert_eq!(db.get_oldest_completed_date().await.unwrap(), Some(50));
    assert_eq!(db.count_payments().await.unwrap(), 5);
}

pub async fn test_legacy_channel_closes(db: &PaymentsDb) {
    let legacy_id = Uuid::new_v4();
    let broken_id = Uuid::new_v4();
    let closing_tx = tx_id(11);
    {
        let conn = db.storage().get_connection().unwrap();
        let details = format!(
            r#"{{"channel_id":"{}","closing_address":"bc1qlegacy","is_sent_to_default_address":false}}"#,
            hex::encode([5; 32])
        );
        conn.execute(
            "INSERT INTO lightning_outgoing_payments (id, recipient_amount_msat, recipient_node_id, payment_hash, details_type, details_blob, created_at, completed_at)
             VALUES (?, 100000000, ?, ?, 'CLOSING_V0', ?, 10, 20)",
            params![
                legacy_id.to_string(),
                node_id().to_string(),
                hex::encode([0; 32]),
                details.into_bytes()
            ],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO outgoing_payment_closing_tx_parts (part_id, part_parent_id, part_tx_id, part_amount_sat, part_closing_info_type, part_closing_info_blob, part_created_at)
             VALUES (?, ?, ?, 99000, 'CLOSING_INFO_V0', ?, 10)",
            params![
                Uuid::new_v4().to_string(),
                legacy_id.to_string(),
                closing_tx.to_string(),
                br#"{"closing_type":"mutual"}"#.to_vec()
            ],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO lightning_outgoing_payments (id, recipient_amount_msat, recipient_node_id, payment_hash, details_type, details_blob, created_at)
             VALUES (?, 5000, ?, ?, 'CLOSING_V0', X'00', 12)",
            params![
                broken_id.to_string(),
                node_id().to_string(),
                hex::encode([0; 32])
            ],
        )
        .unwrap();
    }

    let close = db
        .get_channel_close_outgoing_payment(legacy_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(close.recipient_amount, Satoshi(99_000));
    assert_eq!(close.mining_fee, Satoshi(1_000));
    assert_eq!(close.tx_id, closing_tx);
    assert_eq!(close.channel_id, ChannelId([5; 32]));
    assert_eq!(close.address, "bc1qlegacy");
    assert_eq!(close.closing_type, ChannelClosingType::Mutual);
    assert_eq!(close.confirmed_at, Some(20));
    // Rebuilt the same way on every read.
    assert_eq!(
        db.get_channel_close_outgoing_payment(legacy_id)
            .await
            .unwrap(),
        Some(close.clone())
    );

    assert!(
        db.get_channel_close_outgoing_payment(broken_id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        db.get_lightning_outgoing_payment(legacy_id)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        db.list_lightning_outgoing_payments_by_time_range(0, 100)
            .await
            .unwrap()
            .is_empty()
    );

    let recent = channel_close(tx_id(12), 30);
    db.add_channel_close_outgoing_payment(recent.clone(), None)
        .await
        .unwrap();
    let closes = db
        .list_channel_close_outgoing_payments_by_time_range(0, 100)
        .await
        .unwrap();
    assert_eq!(closes, vec![recent, close]);
    assert_eq!(db.count_payments().await.unwrap(), 3);
}

pub async fn test_unreadable_rows_are_isolated(db: &PaymentsDb) {
    let readable = Preimage([13; 32]);
    db.add_incoming_payment(readable, invoice(13), 10, None)
        .await
        .unwrap();
    let corrupt = Preimage([14; 32]);
    {
        let conn = db.storage().get_connection().unwrap();
        conn.execute(
            "INSERT INTO incoming_payments (payment_hash, preimage, origin_type, origin_blob, created_at)
             VALUES (?, ?, 'INVOICE_V0', X'6E6F74206A736F6E', 11)",
            params![corrupt.payment_hash().to_string(), corrupt.to_string()],
        )
        .unwrap();
    }

    let listed = db.list_incoming_payments_by_time_range(0, 100).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].payment_hash(), readable.payment_hash());
    assert_eq!(db.list_expired_incoming_payments(0, 100).await.unwrap().len(), 1);

    let err = db
        .get_incoming_payment(corrupt.payment_hash())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::UnreadableRow {
            table: "incoming_payments",
            ..
        }
    ));
    // The row still counts.
    assert_eq!(db.count_payments().await.unwrap(), 2);
}

pub async fn test_metadata(db: &PaymentsDb) {
    let splice = splice_out(tx_id(15), 1);
    let id = WalletPaymentId::SpliceOutgoing(splice.id);
    db.add_splice_outgoing_payment(splice, Some(lnurl_metadata()))
        .await
        .unwrap();

    let stored = db.get_metadata(id).await.unwrap().unwrap();
    assert_eq!(stored.lnurl, lnurl_metadata().lnurl);
    assert_eq!(stored.original_fiat, lnurl_metadata().original_fiat);
    assert_eq!(stored.user_description, None);

    db.upsert_user_fields(id, Some("rent".to_string()), None)
        .await
        .unwrap();
    db.add_metadata(
        id,
        PaymentMetadata {
            original_fiat: Some(ExchangeRate {
                fiat_currency: "USD".to_string(),
                price: 1.0,
            }),
            user_description: Some("ignored".to_string()),
            ..Default::default()
        },
    )
    .await
    .unwrap();

    let stored = db.get_metadata(id).await.unwrap().unwrap();
    assert_eq!(stored.original_fiat, lnurl_metadata().original_fiat);
    assert_eq!(stored.lnurl, lnurl_metadata().lnurl);
    assert_eq!(stored.user_description.as_deref(), Some("rent"));
    assert!(stored.modified_at.is_some());

    db.upsert_user_fields(id, None, Some("paid twice".to_string()))
        .await
        .unwrap();
    let stored = db.get_metadata(id).await.unwrap().unwrap();
    assert_eq!(stored.user_description, None);
    assert_eq!(stored.user_notes.as_deref(), Some("paid twice"));
    assert_eq!(stored.lnurl, lnurl_metadata().lnurl);

    // User fields may be set on a payment without protocol metadata.
    let other = WalletPaymentId::LightningOutgoing(Uuid::new_v4());
    assert!(db.get_metadata(other).await.unwrap().is_none());
    db.upsert_user_fields(other, Some("gift".to_string()), None)
        .await
        .unwrap();
    let stored = db.get_metadata(other).await.unwrap().unwrap();
    assert!(stored.lnurl.is_none());
    assert_eq!(stored.user_description.as_deref(), Some("gift"));
}

pub async fn test_change_notifications(db: &PaymentsDb) {
    let changes = Arc::new(Mutex::new(Vec::new()));
    let listener_id = db
        .add_listener(Box::new(RecordingListener {
            changes: changes.clone(),
        }))
        .await;

    let preimage = Preimage([16; 32]);
    let id = WalletPaymentId::Incoming(preimage.payment_hash());
    db.add_incoming_payment(preimage, invoice(16), 1, None)
        .await
        .unwrap();
    db.receive_payment(preimage.payment_hash(), vec![lightning_part(1, None)], 2)
        .await
        .unwrap();
    // No-ops are silent.
    db.receive_payment(preimage.payment_hash(), vec![lightning_part(1, None)], 3)
        .await
        .unwrap();
    db.set_confirmed(tx_id(16), 4).await.unwrap();
    let _ = db.add_incoming_payment(preimage, invoice(16), 1, None).await;

    {
        let changes = changes.lock().await;
        let kinds: Vec<_> = changes.iter().map(|c| c.change).collect();
        assert_eq!(kinds, vec![ChangeKind::Added, ChangeKind::Completed]);
        assert!(changes.iter().all(|c| c.ids == vec![id]));
        assert!(changes.iter().all(|c| c.wallet_id == db.wallet_id()));
    }

    assert!(db.remove_listener(&listener_id).await);
    db.delete_incoming_payment(preimage.payment_hash())
        .await
        .unwrap();
    assert_eq!(changes.lock().await.len(), 2);
}

fn received_with_columns(db: &PaymentsDb, preimage: &Preimage) -> (String, Vec<u8>) {
    db.storage()
        .get_connection()
        .unwrap()
        .query_row(
            "SELECT received_with_type, received_with_blob FROM incoming_payments WHERE payment_hash = ?",
            params![preimage.payment_hash().to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .unwrap()
}

pub async fn test_legacy_received_parts(db: &PaymentsDb) {
    let new_channel = Preimage([17; 32]);
    let multiparts = Preimage([18; 32]);
    {
        let conn = db.storage().get_connection().unwrap();
        let multiparts_blob = format!(
            r#"[{{"type":"lightning","amount_msat":10000,"channel_id":"{channel}","htlc_id":1}},{{"type":"new_channel","amount_msat":30000,"fees_msat":2000,"channel_id":"{channel}"}}]"#,
            channel = hex::encode([6; 32])
        );
        for (preimage, tag, blob) in [
            (
                new_channel,
                "NEW_CHANNEL_V0",
                br#"{"fees_msat":3000,"channel_id":null}"#.to_vec(),
            ),
            (multiparts, "MULTIPARTS_V0", multiparts_blob.into_bytes()),
        ] {
            conn.execute(
                "INSERT INTO incoming_payments (payment_hash, preimage, origin_type, origin_blob, received_amount_msat, received_at, received_with_type, received_with_blob, created_at)
                 VALUES (?, ?, 'KEYSEND_V0', X'7B7D', 40000, 7, ?, ?, 1)",
                params![
                    preimage.payment_hash().to_string(),
                    preimage.to_string(),
                    tag,
                    blob
                ],
            )
            .unwrap();
        }
    }

    let stored = db
        .get_incoming_payment(new_channel.payment_hash())
        .await
        .unwrap()
        .unwrap();
    let parts = &stored.received.as_ref().unwrap().received_with;
    assert_eq!(parts.len(), 1);
    assert_eq!(parts[0].amount(), MilliSatoshi(40_000));
    assert_eq!(parts[0].tx_id(), None);

    let stored = db
        .get_incoming_payment(multiparts.payment_hash())
        .await
        .unwrap()
        .unwrap();
    let parts = &stored.received.as_ref().unwrap().received_with;
    assert_eq!(parts[1].amount(), MilliSatoshi(28_000));
    assert!(parts.iter().all(|part| part.tx_id().is_none()));

    // A channel opened without a known funding transaction is not linked.
    let fresh = Preimage([19; 32]);
    db.add_incoming_payment(fresh, invoice(19), 2, None)
        .await
        .unwrap();
    db.receive_payment(
        fresh.payment_hash(),
        vec![ReceivedWith::NewChannel {
            amount: MilliSatoshi(5_000),
            service_fee: MilliSatoshi(1_000),
            mining_fee: Satoshi(1),
            channel_id: ChannelId([7; 32]),
            tx_id: None,
            confirmed_at: None,
            locked_at: None,
        }],
        8,
    )
    .await
    .unwrap();
    assert!(db.list_unconfirmed_txs().await.unwrap().is_empty());
    assert!(
        db.list_incoming_payments_not_yet_confirmed()
            .await
            .unwrap()
            .is_empty()
    );

    // Chain events leave rows of retired encodings as stored.
    let stale_tx = tx_id(17);
    let legacy_id = WalletPaymentId::Incoming(new_channel.payment_hash());
    db.storage()
        .get_connection()
        .unwrap()
        .execute(
            "INSERT INTO link_tx_to_payments (tx_id, type, id) VALUES (?, ?, ?)",
            params![stale_tx.to_string(), legacy_id.db_type(), legacy_id.db_id()],
        )
        .unwrap();
    let before = received_with_columns(db, &new_channel);
    assert_eq!(before.0, "NEW_CHANNEL_V0");
    assert!(db.set_confirmed(stale_tx, 30).await.unwrap().is_empty());
    assert!(db.set_locked(stale_tx, 31).await.unwrap().is_empty());
    assert_eq!(received_with_columns(db, &new_channel), before);
    assert_eq!(received_with_columns(db, &multiparts).0, "MULTIPARTS_V0");
}

fn order_ids(rows: &[WalletPaymentOrderRow]) -> Vec<WalletPaymentId> {
    rows.iter().map(|row| row.id).collect()
}

#[allow(clippy::too_many_lines)]
pub async fn test_payments_order(db: &PaymentsDb) {
    let received = Preimage([20; 32]);
    db.add_incoming_payment(received, invoice(20), 10, None)
        .await
        .unwrap();
    db.receive_payment(received.payment_hash(), vec![lightning_part(1_000, None)], 20)
        .await
        .unwrap();
    let unpaid = Preimage([21; 32]);
    db.add_incoming_payment(unpaid, invoice(21), 11, None)
        .await
        .unwrap();
    let spliced_in = Preimage([22; 32]);
    let splice_in_tx = tx_id(21);
    db.add_incoming_payment(spliced_in, IncomingOrigin::KeySend, 16, None)
        .await
        .unwrap();
    db.receive_payment(
        spliced_in.payment_hash(),
        vec![lightning_part(2_000, Some(splice_in_tx))],
        17,
    )
    .await
    .unwrap();

    let outgoing = |n: u8, created_at: i64| {
        LightningOutgoingPayment::new(
            MilliSatoshi(1_000),
            node_id(),
            LightningOutgoingDetails::Normal {
                payment_request: format!("lnbc1order{n}"),
                payment_hash: Preimage([n; 32]).payment_hash(),
            },
            created_at,
        )
    };
    let in_flight = outgoing(23, 30);
    let failed = outgoing(24, 5);
    let sent = outgoing(25, 12);
    for payment in [&in_flight, &failed, &sent] {
        db.add_lightning_outgoing_payment(payment.clone(), None)
            .await
            .unwrap();
    }
    db.complete_lightning_outgoing_payment(
        failed.id,
        LightningOutgoingCompleted::Failed {
            reason: FinalFailure::NoAvailableChannels,
            completed_at: 25,
        },
    )
    .await
    .unwrap();
    db.complete_lightning_outgoing_payment(
        sent.id,
        LightningOutgoingCompleted::SucceededOffChain {
            preimage: Preimage([25; 32]),
            completed_at: 40,
        },
    )
    .await
    .unwrap();
    db.upsert_user_fields(
        WalletPaymentId::LightningOutgoing(sent.id),
        Some("lunch".to_string()),
        None,
    )
    .await
    .unwrap();

    let splice = splice_out(tx_id(22), 15);
    db.add_splice_outgoing_payment(splice.clone(), None)
        .await
        .unwrap();
    db.set_confirmed(splice.tx_id, 50).await.unwrap();

    let splice_id = WalletPaymentId::SpliceOutgoing(splice.id);
    let sent_id = WalletPaymentId::LightningOutgoing(sent.id);
    let in_flight_id = WalletPaymentId::LightningOutgoing(in_flight.id);
    let failed_id = WalletPaymentId::LightningOutgoing(failed.id);
    let received_id = WalletPaymentId::Incoming(received.payment_hash());
    let spliced_in_id = WalletPaymentId::Incoming(spliced_in.payment_hash());

    let all = db.list_payments_order(10, 0).await.unwrap();
    assert_eq!(
        order_ids(&all),
        vec![
            splice_id,
            sent_id,
            in_flight_id,
            failed_id,
            received_id,
            spliced_in_id
        ]
    );
    assert_eq!(
        all[2],
        WalletPaymentOrderRow {
            id: in_flight_id,
            created_at: 30,
            completed_at: None,
            metadata_modified_at: None,
        }
    );
    assert_eq!(all[1].completed_at, Some(40));
    assert!(all[1].metadata_modified_at.is_some());
    assert_eq!(all[0].completed_at, Some(50));

    assert_eq!(
        order_ids(&db.list_payments_order(2, 1).await.unwrap()),
        vec![sent_id, in_flight_id]
    );
    assert!(db.list_payments_order(10, 6).await.unwrap().is_empty());

    assert_eq!(
        order_ids(&db.list_recent_payments_order(25, 10, 0).await.unwrap()),
        vec![splice_id, sent_id, in_flight_id, failed_id]
    );
    assert_eq!(
        order_ids(&db.list_outgoing_in_flight_payments_order(10, 0).await.unwrap()),
        vec![in_flight_id]
    );

    assert_eq!(
        order_ids(
            &db.list_range_successful_payments_order(15, 45, 10, 0)
                .await
                .unwrap()
        ),
        vec![sent_id, received_id, spliced_in_id]
    );
    assert_eq!(
        order_ids(
            &db.list_range_successful_payments_order(15, 45, 1, 2)
                .await
                .unwrap()
        ),
        vec![spliced_in_id]
    );
    assert_eq!(db.count_range_successful_payments(15, 45).await.unwrap(), 3);
    assert_eq!(db.count_range_successful_payments(0, 100).await.unwrap(), 4);

    let waiting = db.list_incoming_payments_not_yet_confirmed().await.unwrap();
    assert_eq!(waiting.len(), 1);
    assert_eq!(waiting[0].payment_hash(), spliced_in.payment_hash());
    db.set_confirmed(splice_in_tx, 60).await.unwrap();
    assert!(
        db.list_incoming_payments_not_yet_confirmed()
            .await
            .unwrap()
            .is_empty()
    );
}
