use rusqlite::{Connection, OptionalExtension, Row, params};

use super::codec::{
    CodecError, TypeVersion,
    lnurl::{
        LnurlBaseTypeVersion, LnurlMetadataTypeVersion, LnurlSuccessActionTypeVersion,
        decode_base, decode_metadata, decode_success_action, encode_base, encode_metadata,
        encode_success_action,
    },
    parse_type_version,
};
use crate::{
    error::{LedgerError, LedgerResult},
    models::{ExchangeRate, LnurlPayMetadata, PaymentMetadata, WalletPaymentId},
};

const TABLE: &str = "payments_metadata";

struct MetadataRow {
    lnurl_base_type: Option<String>,
    lnurl_base_blob: Option<Vec<u8>>,
    lnurl_description: Option<String>,
    lnurl_metadata_type: Option<String>,
    lnurl_metadata_blob: Option<Vec<u8>>,
    lnurl_success_action_type: Option<String>,
    lnurl_success_action_blob: Option<Vec<u8>>,
    user_description: Option<String>,
    user_notes: Option<String>,
    modified_at: Option<i64>,
    original_fiat_type: Option<String>,
    original_fiat_rate: Option<f64>,
}

fn map_metadata_row(row: &Row<'_>) -> Result<MetadataRow, rusqlite::Error> {
    Ok(MetadataRow {
        lnurl_base_type: row.get(0)?,
        lnurl_base_blob: row.get(1)?,
        lnurl_description: row.get(2)?,
        lnurl_metadata_type: row.get(3)?,
        lnurl_metadata_blob: row.get(4)?,
        lnurl_success_action_type: row.get(5)?,
        lnurl_success_action_blob: row.get(6)?,
        user_description: row.get(7)?,
        user_notes: row.get(8)?,
        modified_at: row.get(9)?,
        original_fiat_type: row.get(10)?,
        original_fiat_rate: row.get(11)?,
    })
}

impl MetadataRow {
    fn decode(self, id: &WalletPaymentId) -> LedgerResult<PaymentMetadata> {
        let lnurl = match (
            self.lnurl_base_type,
            self.lnurl_base_blob,
            self.lnurl_description,
            self.lnurl_metadata_type,
            self.lnurl_metadata_blob,
        ) {
            (None, None, None, None, None) => None,
            (
                Some(base_type),
                Some(base_blob),
                Some(description),
                Some(metadata_type),
                Some(metadata_blob),
            ) => {
                let pay = parse_type_version::<LnurlBaseTypeVersion>(&base_type)
                    .and_then(|type_version| decode_base(type_version, &base_blob))
                    .map_err(|e| LedgerError::unreadable(TABLE, id, &base_type, &e))?;
                let metadata = parse_type_version::<LnurlMetadataTypeVersion>(&metadata_type)
                    .and_then(|type_version| decode_metadata(type_version, &metadata_blob))
                    .map_err(|e| LedgerError::unreadable(TABLE, id, &metadata_type, &e))?;
                let success_action = match (
                    self.lnurl_success_action_type,
                    self.lnurl_success_action_blob,
                ) {
                    (Some(action_type), Some(action_blob)) => Some(
                        parse_type_version::<LnurlSuccessActionTypeVersion>(&action_type)
                            .and_then(|type_version| {
                                decode_success_action(type_version, &action_blob)
                            })
                            .map_err(|e| LedgerError::unreadable(TABLE, id, &action_type, &e))?,
                    ),
                    _ => None,
                };
                Some(LnurlPayMetadata {
                    pay,
                    description,
                    metadata,
                    success_action,
                })
            }
            (base_type, ..) => {
                return Err(LedgerError::unreadable(
                    TABLE,
                    id,
                    base_type.unwrap_or_default(),
                    &CodecError::InvalidValue("incomplete lnurl columns".to_string()),
                ));
            }
        };

        let original_fiat = self
            .original_fiat_type
            .zip(self.original_fiat_rate)
            .map(|(fiat_currency, price)| ExchangeRate {
                fiat_currency,
                price,
            });

        Ok(PaymentMetadata {
            lnurl,
            original_fiat,
            user_description: self.user_description,
            user_notes: self.user_notes,
            modified_at: self.modified_at,
        })
    }
}

/// Queries over the side information attached to payments.
pub(crate) struct MetadataQueries<'a> {
    conn: &'a Connection,
}

impl<'a> MetadataQueries<'a> {
    pub(crate) fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Writes the metadata known when the payment is created.
    ///
    /// Protocol fields already stored are kept. User fields are only written
    /// when the row does not exist yet.
    pub(crate) fn add(&self, id: &WalletPaymentId, metadata: &PaymentMetadata) -> LedgerResult<()> {
        let lnurl = metadata
            .lnurl
            .as_ref()
            .map(|lnurl| -> Result<_, CodecError> {
                let base = encode_base(&lnurl.pay)?;
                let lnurl_metadata = encode_metadata(&lnurl.metadata)?;
                let success_action = lnurl
                    .success_action
                    .as_ref()
                    .map(encode_success_action)
                    .transpose()?;
                Ok((base, lnurl_metadata, success_action))
            })
            .transpose()?;
        let (base, lnurl_metadata, success_action) = match lnurl {
            Some((base, lnurl_metadata, success_action)) => {
                (Some(base), Some(lnurl_metadata), success_action)
            }
            None => (None, None, None),
        };
        let (base_type, base_blob) = base.unzip();
        let (metadata_type, metadata_blob) = lnurl_metadata.unzip();
        let (action_type, action_blob) = success_action.unzip();

        self.conn.execute(
            "INSERT INTO payments_metadata (type, id, lnurl_base_type, lnurl_base_blob, lnurl_description, lnurl_metadata_type, lnurl_metadata_blob, lnurl_successAction_type, lnurl_successAction_blob, user_description, user_notes, modified_at, original_fiat_type, original_fiat_rate)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(type, id) DO UPDATE SET
               lnurl_base_type = COALESCE(lnurl_base_type, excluded.lnurl_base_type),
               lnurl_base_blob = COALESCE(lnurl_base_blob, excluded.lnurl_base_blob),
               lnurl_description = COALESCE(lnurl_description, excluded.lnurl_description),
               lnurl_metadata_type = COALESCE(lnurl_metadata_type, excluded.lnurl_metadata_type),
               lnurl_metadata_blob = COALESCE(lnurl_metadata_blob, excluded.lnurl_metadata_blob),
               lnurl_successAction_type = COALESCE(lnurl_successAction_type, excluded.lnurl_successAction_type),
               lnurl_successAction_blob = COALESCE(lnurl_successAction_blob, excluded.lnurl_successAction_blob),
               original_fiat_type = COALESCE(original_fiat_type, excluded.original_fiat_type),
               original_fiat_rate = COALESCE(original_fiat_rate, excluded.original_fiat_rate)",
            params![
                id.db_type(),
                id.db_id(),
                base_type.map(TypeVersion::tag),
                base_blob,
                metadata.lnurl.as_ref().map(|l| l.description.as_str()),
                metadata_type.map(TypeVersion::tag),
                metadata_blob,
                action_type.map(TypeVersion::tag),
                action_blob,
                metadata.user_description,
                metadata.user_notes,
                metadata.modified_at,
                metadata.original_fiat.as_ref().map(|f| f.fiat_currency.as_str()),
                metadata.original_fiat.as_ref().map(|f| f.price),
            ],
        )?;
        Ok(())
    }

    pub(crate) fn get(&self, id: &WalletPaymentId) -> LedgerResult<Option<PaymentMetadata>> {
        self.conn
            .query_row(
                "SELECT lnurl_base_type, lnurl_base_blob, lnurl_description, lnurl_metadata_type, lnurl_metadata_blob, lnurl_successAction_type, lnurl_successAction_blob, user_description, user_notes, modified_at, original_fiat_type, original_fiat_rate
                 FROM payments_metadata
                 WHERE type = ? AND id = ?",
                params![id.db_type(), id.db_id()],
                map_metadata_row,
            )
            .optional()?
            .map(|row| row.decode(id))
            .transpose()
    }

    /// Replaces the user fields, leaving protocol fields untouched.
    pub(crate) fn upsert_user_fields(
        &self,
        id: &WalletPaymentId,
        user_description: Option<&str>,
        user_notes: Option<&str>,
        modified_at: i64,
    ) -> LedgerResult<()> {
        self.conn.execute(
            "INSERT INTO payments_metadata (type, id, user_description, user_notes, modified_at)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(type, id) DO UPDATE SET
               user_description = excluded.user_description,
               user_notes = excluded.user_notes,
               modified_at = excluded.modified_at",
            params![
                id.db_type(),
                id.db_id(),
                user_description,
                user_notes,
                modified_at
            ],
        )?;
        Ok(())
    }

    pub(crate) fn delete(&self, id: &WalletPaymentId) -> LedgerResult<bool> {
        let changed = self.conn.execute(
            "DELETE FROM payments_metadata WHERE type = ? AND id = ?",
            params![id.db_type(), id.db_id()],
        )?;
        Ok(changed == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::sqlite::SqliteStorage;

    #[test]
    fn test_incomplete_lnurl_columns_are_unreadable() {
        let temp_dir = tempdir::TempDir::new("metadata_incomplete").unwrap();
        let storage = SqliteStorage::new(temp_dir.path()).unwrap();
        let conn = storage.get_connection().unwrap();
        let id = WalletPaymentId::LightningOutgoing(uuid::Uuid::new_v4());
        conn.execute(
            "INSERT INTO payments_metadata (type, id, lnurl_base_type) VALUES (?, ?, 'PAY_V0')",
            params![id.db_type(), id.db_id()],
        )
        .unwrap();

        let err = MetadataQueries::new(&conn).get(&id).unwrap_err();
        assert!(matches!(err, LedgerError::UnreadableRow { table: TABLE, .. }));
    }
}
