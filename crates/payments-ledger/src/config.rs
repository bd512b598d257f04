use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, LedgerResult};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Regtest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Root directory, databases live in `<data_dir>/<network>/<wallet_id>`.
    pub data_dir: String,
    pub network: Network,
    pub wallet_id: String,
    /// `EnvFilter` directives for [`crate::init_logging`].
    pub log_filter: Option<String>,
}

pub fn default_config(network: Network) -> LedgerConfig {
    LedgerConfig {
        data_dir: ".data".to_string(),
        network,
        wallet_id: "default".to_string(),
        log_filter: None,
    }
}

impl LedgerConfig {
    /// Layers the defaults, the TOML file at `path` when given and the
    /// `PAYMENTS_LEDGER_*` environment variables, later layers winning.
    pub fn load(path: Option<&Path>) -> LedgerResult<Self> {
        let mut figment = Figment::new().merge(Serialized::defaults(default_config(
            Network::default(),
        )));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment
            .merge(Env::prefixed("PAYMENTS_LEDGER_"))
            .extract()
            .map_err(|e| LedgerError::InitializationError(format!("Invalid config: {e}")))
    }
}
