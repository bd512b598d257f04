use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use rusqlite::{Connection, params};
use rusqlite_migration::{M, Migrations, SchemaVersion};
use tracing::{debug, info, warn};

use super::{
    codec::{incoming::decode_received_with, parse_type_version},
    legacy::ReceivedContext,
};
use crate::{
    error::{LedgerError, LedgerResult},
    models::{MilliSatoshi, WalletPaymentId},
};

const DEFAULT_DB_FILENAME: &str = "payments.sql";
const BUSY_TIMEOUT: Duration = Duration::from_secs(10);

/// SQLite file holding the payments of one wallet.
#[derive(Debug, Clone)]
pub(crate) struct SqliteStorage {
    db_dir: PathBuf,
}

impl SqliteStorage {
    /// Opens the database in `path`, creating and migrating it as needed.
    pub(crate) fn new(path: &Path) -> LedgerResult<Self> {
        let storage = Self {
            db_dir: path.to_path_buf(),
        };

        std::fs::create_dir_all(path)
            .map_err(|e| LedgerError::InitializationError(e.to_string()))?;

        storage.migrate()?;
        Ok(storage)
    }

    pub(crate) fn get_connection(&self) -> LedgerResult<Connection> {
        let conn = Connection::open(self.get_db_path())?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", true)?;
        Ok(conn)
    }

    pub(crate) fn get_db_path(&self) -> PathBuf {
        self.db_dir.join(DEFAULT_DB_FILENAME)
    }

    fn migrate(&self) -> LedgerResult<()> {
        let migrations =
            Migrations::new(Self::current_migrations().into_iter().map(M::up).collect());
        let mut conn = self.get_connection()?;
        let journal_mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!("Payments database journal mode: {journal_mode}");

        let previous_version = match migrations.current_version(&conn)? {
            SchemaVersion::Inside(previous_version) => previous_version.get(),
            _ => 0,
        };
        migrations.to_latest(&mut conn)?;
        info!(
            "Migrated payments database from version {previous_version} in {}",
            self.db_dir.display()
        );

        if previous_version > 0 && previous_version < 3 {
            Self::link_received_on_chain_parts(&mut conn)?;
        }

        Ok(())
    }

    /// Links the funding transactions of on-chain parts received before the
    /// link table existed.
    fn link_received_on_chain_parts(conn: &mut Connection) -> LedgerResult<()> {
        let mut stmt = conn.prepare(
            "SELECT payment_hash, origin_type, received_amount_msat, received_at, received_with_type, received_with_blob
             FROM incoming_payments
             WHERE received_with_type IS NOT NULL",
        )?;
        let rows: Vec<_> = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<u64>>(2)?,
                    row.get::<_, Option<i64>>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, Vec<u8>>(5)?,
                ))
            })?
            .collect::<Result<_, _>>()?;
        drop(stmt);

        let tx = conn.transaction()?;
        for (payment_hash, origin_type, amount, received_at, received_with_type, blob) in rows {
            let parts = parse_type_version(&origin_type)
                .and_then(|origin| {
                    let ctx = ReceivedContext {
                        received_amount: MilliSatoshi(amount.unwrap_or_default()),
                        received_at: received_at.unwrap_or_default(),
                        origin,
                    };
                    decode_received_with(parse_type_version(&received_with_type)?, &blob, &ctx)
                });
            let parts = match parts {
                Ok(parts) => parts,
                Err(e) => {
                    warn!("Not linking parts of unreadable incoming payment {payment_hash}: {e}");
                    continue;
                }
            };
            let Ok(hash) = payment_hash.parse() else {
                warn!("Not linking parts of incoming payment with invalid hash {payment_hash}");
                continue;
            };
            let id = WalletPaymentId::Incoming(hash);
            for tx_id in parts.iter().filter_map(|p| p.tx_id()) {
                tx.execute(
                    "INSERT OR IGNORE INTO link_tx_to_payments (tx_id, type, id) VALUES (?, ?, ?)",
                    params![tx_id.to_string(), id.db_type(), id.db_id()],
                )?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    pub(crate) fn current_migrations() -> Vec<&'static str> {
        vec![
            "CREATE TABLE IF NOT EXISTS incoming_payments (
              payment_hash TEXT NOT NULL PRIMARY KEY,
              preimage TEXT NOT NULL,
              origin_type TEXT NOT NULL,
              origin_blob BLOB NOT NULL,
              received_amount_msat INTEGER DEFAULT NULL,
              received_at INTEGER DEFAULT NULL,
              received_with_type TEXT DEFAULT NULL,
              received_with_blob BLOB DEFAULT NULL,
              created_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS incoming_payments_created_at_idx ON incoming_payments(created_at);
            CREATE INDEX IF NOT EXISTS incoming_payments_received_at_idx ON incoming_payments(received_at);
            CREATE TABLE IF NOT EXISTS lightning_outgoing_payments (
              id TEXT NOT NULL PRIMARY KEY,
              recipient_amount_msat INTEGER NOT NULL,
              recipient_node_id TEXT NOT NULL,
              payment_hash TEXT NOT NULL,
              details_type TEXT NOT NULL,
              details_blob BLOB NOT NULL,
              created_at INTEGER NOT NULL,
              completed_at INTEGER DEFAULT NULL,
              status_type TEXT DEFAULT NULL,
              status_blob BLOB DEFAULT NULL
            );
            CREATE INDEX IF NOT EXISTS lightning_outgoing_payments_payment_hash_idx ON lightning_outgoing_payments(payment_hash);
            CREATE INDEX IF NOT EXISTS lightning_outgoing_payments_created_at_idx ON lightning_outgoing_payments(created_at);
            CREATE TABLE IF NOT EXISTS lightning_outgoing_payment_parts (
              part_id TEXT NOT NULL PRIMARY KEY,
              part_parent_id TEXT NOT NULL REFERENCES lightning_outgoing_payments(id) ON DELETE CASCADE,
              part_amount_msat INTEGER NOT NULL,
              part_route TEXT NOT NULL,
              part_created_at INTEGER NOT NULL,
              part_completed_at INTEGER DEFAULT NULL,
              part_status_type TEXT DEFAULT NULL,
              part_status_blob BLOB DEFAULT NULL
            );
            CREATE INDEX IF NOT EXISTS lightning_outgoing_payment_parts_parent_idx ON lightning_outgoing_payment_parts(part_parent_id);
            CREATE TABLE IF NOT EXISTS outgoing_payment_closing_tx_parts (
              part_id TEXT NOT NULL PRIMARY KEY,
              part_parent_id TEXT NOT NULL REFERENCES lightning_outgoing_payments(id) ON DELETE CASCADE,
              part_tx_id TEXT NOT NULL,
              part_amount_sat INTEGER NOT NULL,
              part_closing_info_type TEXT DEFAULT NULL,
              part_closing_info_blob BLOB DEFAULT NULL,
              part_created_at INTEGER NOT NULL
            );",
            "CREATE TABLE IF NOT EXISTS payments_metadata (
              type INTEGER NOT NULL,
              id TEXT NOT NULL,
              lnurl_base_type TEXT DEFAULT NULL,
              lnurl_base_blob BLOB DEFAULT NULL,
              lnurl_description TEXT DEFAULT NULL,
              lnurl_metadata_type TEXT DEFAULT NULL,
              lnurl_metadata_blob BLOB DEFAULT NULL,
              lnurl_successAction_type TEXT DEFAULT NULL,
              lnurl_successAction_blob BLOB DEFAULT NULL,
              user_description TEXT DEFAULT NULL,
              user_notes TEXT DEFAULT NULL,
              modified_at INTEGER DEFAULT NULL,
              PRIMARY KEY (type, id)
            );",
            "CREATE TABLE IF NOT EXISTS channel_close_outgoing_payments (
              id TEXT NOT NULL PRIMARY KEY,
              recipient_amount_sat INTEGER NOT NULL,
              address TEXT NOT NULL,
              is_default_address INTEGER NOT NULL,
              mining_fees_sat INTEGER NOT NULL,
              tx_id TEXT NOT NULL,
              channel_id TEXT NOT NULL,
              closing_info_type TEXT NOT NULL,
              closing_info_blob BLOB NOT NULL,
              created_at INTEGER NOT NULL,
              confirmed_at INTEGER DEFAULT NULL,
              locked_at INTEGER DEFAULT NULL
            );
            CREATE TABLE IF NOT EXISTS splice_outgoing_payments (
              id TEXT NOT NULL PRIMARY KEY,
              recipient_amount_sat INTEGER NOT NULL,
              address TEXT NOT NULL,
              mining_fees_sat INTEGER NOT NULL,
              tx_id TEXT NOT NULL,
              channel_id TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              confirmed_at INTEGER DEFAULT NULL,
              locked_at INTEGER DEFAULT NULL
            );
            CREATE TABLE IF NOT EXISTS splice_cpfp_outgoing_payments (
              id TEXT NOT NULL PRIMARY KEY,
              mining_fees_sat INTEGER NOT NULL,
              tx_id TEXT NOT NULL,
              channel_id TEXT NOT NULL,
              created_at INTEGER NOT NULL,
              confirmed_at INTEGER DEFAULT NULL,
              locked_at INTEGER DEFAULT NULL
            );
            CREATE TABLE IF NOT EXISTS link_tx_to_payments (
              tx_id TEXT NOT NULL,
              type INTEGER NOT NULL,
              id TEXT NOT NULL,
              confirmed_at INTEGER DEFAULT NULL,
              locked_at INTEGER DEFAULT NULL,
              PRIMARY KEY (tx_id, type, id)
            );
            CREATE INDEX IF NOT EXISTS link_tx_to_payments_payment_idx ON link_tx_to_payments(type, id);",
            "CREATE TABLE IF NOT EXISTS inbound_liquidity_outgoing_payments (
              id TEXT NOT NULL PRIMARY KEY,
              mining_fees_sat INTEGER NOT NULL,
              tx_id TEXT NOT NULL,
              channel_id TEXT NOT NULL,
              lease_type TEXT NOT NULL,
              lease_blob BLOB NOT NULL,
              created_at INTEGER NOT NULL,
              confirmed_at INTEGER DEFAULT NULL,
              locked_at INTEGER DEFAULT NULL
            );",
            "ALTER TABLE payments_metadata ADD COLUMN original_fiat_type TEXT DEFAULT NULL;
            ALTER TABLE payments_metadata ADD COLUMN original_fiat_rate REAL DEFAULT NULL;",
            "CREATE INDEX IF NOT EXISTS channel_close_outgoing_payments_created_at_idx ON channel_close_outgoing_payments(created_at);
            CREATE INDEX IF NOT EXISTS splice_outgoing_payments_created_at_idx ON splice_outgoing_payments(created_at);
            CREATE INDEX IF NOT EXISTS splice_cpfp_outgoing_payments_created_at_idx ON splice_cpfp_outgoing_payments(created_at);
            CREATE INDEX IF NOT EXISTS inbound_liquidity_outgoing_payments_created_at_idx ON inbound_liquidity_outgoing_payments(created_at);",
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_valid() {
        let migrations =
            Migrations::new(SqliteStorage::current_migrations().into_iter().map(M::up).collect());
        assert!(migrations.validate().is_ok());
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let temp_dir = tempdir::TempDir::new("sqlite_storage_reopen").unwrap();
        let storage = SqliteStorage::new(temp_dir.path()).unwrap();
        drop(storage);
        let storage = SqliteStorage::new(temp_dir.path()).unwrap();
        let conn = storage.get_connection().unwrap();
        let foreign_keys: i64 = conn
            .query_row("PRAGMA foreign_keys", [], |row| row.get(0))
            .unwrap();
        assert_eq!(foreign_keys, 1);
    }

    #[test]
    fn test_upgrade_links_received_on_chain_parts() {
        let temp_dir = tempdir::TempDir::new("sqlite_storage_upgrade").unwrap();
        let db_path = temp_dir.path().join(DEFAULT_DB_FILENAME);
        let migrations = Migrations::new(
            SqliteStorage::current_migrations()
                .into_iter()
                .take(2)
                .map(M::up)
                .collect(),
        );
        let mut conn = Connection::open(&db_path).unwrap();
        migrations.to_latest(&mut conn).unwrap();

        let tx_id = "0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c0c";
        let blob = format!(
            r#"[{{"type":"splice_in","amount_msat":1000,"service_fee_msat":0,"mining_fee_sat":1,"channel_id":"{}","tx_id":"{tx_id}","confirmed_at":null,"locked_at":null}}]"#,
            hex::encode([1; 32])
        );
        let hash = crate::models::Preimage([1; 32]).payment_hash();
        conn.execute(
            "INSERT INTO incoming_payments (payment_hash, preimage, origin_type, origin_blob, received_amount_msat, received_at, received_with_type, received_with_blob, created_at)
             VALUES (?, ?, 'KEYSEND_V0', X'7B7D', 1000, 5, 'MULTIPARTS_V1', ?, 1)",
            params![hash.to_string(), hex::encode([1; 32]), blob.into_bytes()],
        )
        .unwrap();
        for n in [2_u8, 3] {
            let legacy = crate::models::Preimage([n; 32]);
            conn.execute(
                "INSERT INTO incoming_payments (payment_hash, preimage, origin_type, origin_blob, received_amount_msat, received_at, received_with_type, received_with_blob, created_at)
                 VALUES (?, ?, 'KEYSEND_V0', X'7B7D', 1000, 5, 'NEW_CHANNEL_V0', ?, 1)",
                params![
                    legacy.payment_hash().to_string(),
                    legacy.to_string(),
                    br#"{"fees_msat":100,"channel_id":null}"#.to_vec()
                ],
            )
            .unwrap();
        }
        drop(conn);

        let storage = SqliteStorage::new(temp_dir.path()).unwrap();
        let conn = storage.get_connection().unwrap();
        let linked: String = conn
            .query_row(
                "SELECT id FROM link_tx_to_payments WHERE tx_id = ?",
                params![tx_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(linked, hash.to_string());
        // Pay-to-open parts without a known funding transaction stay unlinked.
        let links: i64 = conn
            .query_row("SELECT COUNT(*) FROM link_tx_to_payments", [], |row| row.get(0))
            .unwrap();
        assert_eq!(links, 1);
    }
}
