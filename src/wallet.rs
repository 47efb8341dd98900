//! Signing credentials for the accounts the relayer submits from

use crate::config::WalletConfig;
use crate::error::{RelayerError, RelayerResult};

use dashmap::DashMap;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::Address;
use tracing::info;

/// In-memory set of signing wallets keyed by address.
///
/// Keys are loaded at start-up and only read afterwards.
pub struct Keyring {
    wallets: DashMap<Address, LocalWallet>,
    default_account: Option<Address>,
}

impl Keyring {
    /// Empty keyring
    pub fn new() -> Self {
        Self {
            wallets: DashMap::new(),
            default_account: None,
        }
    }

    /// Load the default key and any extra keys named in the config
    pub fn from_config(config: &WalletConfig) -> RelayerResult<Self> {
        let mut keyring = Self::new();

        if let Some(var) = &config.private_key_env {
            let key = std::env::var(var).map_err(|_| {
                RelayerError::Wallet(format!(
                    "No wallet configured. Set {} to the relayer private key",
                    var
                ))
            })?;
            let address = keyring.insert_key(&key)?;
            keyring.default_account = Some(address);
            info!("Default signing account: {:?}", address);
        }

        for var in &config.extra_key_envs {
            let key = std::env::var(var)
                .map_err(|_| RelayerError::Wallet(format!("{} is not set", var)))?;
            let address = keyring.insert_key(&key)?;
            info!("Loaded signing account {:?} from {}", address, var);
        }

        Ok(keyring)
    }

    /// Parse a hex private key and register it, returning its address
    pub fn insert_key(&self, private_key: &str) -> RelayerResult<Address> {
        let wallet = private_key
            .trim()
            .trim_start_matches("0x")
            .parse::<LocalWallet>()
            .map_err(|e| RelayerError::Wallet(format!("Invalid private key: {}", e)))?;
        let address = wallet.address();
        self.wallets.insert(address, wallet);
        Ok(address)
    }

    /// Make `address` the default account
    pub fn set_default(&mut self, address: Address) -> RelayerResult<()> {
        if !self.wallets.contains_key(&address) {
            return Err(RelayerError::UnknownAccount { account: address });
        }
        self.default_account = Some(address);
        Ok(())
    }

    pub fn default_account(&self) -> Option<Address> {
        self.default_account
    }

    /// Wallet for `account`, bound to `chain_id` for signing
    pub fn signer_for(&self, account: Address, chain_id: u64) -> RelayerResult<LocalWallet> {
        self.wallets
            .get(&account)
            .map(|w| w.value().clone().with_chain_id(chain_id))
            .ok_or(RelayerError::UnknownAccount { account })
    }

    pub fn accounts(&self) -> Vec<Address> {
        self.wallets.iter().map(|e| *e.key()).collect()
    }
}

impl Default for Keyring {
    fn default() -> Self {
        Self::new()
    }
}
