use std::path::PathBuf;

use crate::{
    config::Network,
    ensure_ledger,
    error::{LedgerError, LedgerResult},
};

/// Directory holding the database of one wallet: `<data_dir>/<network>/<wallet_id>`.
pub fn default_storage_path(
    data_dir: &str,
    network: Network,
    wallet_id: &str,
) -> LedgerResult<PathBuf> {
    ensure_ledger!(
        !wallet_id.is_empty()
            && wallet_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
        LedgerError::InvalidInput(format!("Invalid wallet id: {wallet_id:?}"))
    );
    Ok(PathBuf::from(data_dir).join(network.to_string()).join(wallet_id))
}
