//! Network selection and per-network wallet configuration.

use meridian_types::crypto::wallet_address_from_tag;
use meridian_types::AccountAddress;
use std::sync::OnceLock;

/// The networks a node can run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
    Stagenet,
    /// Private single-node chain used by tests; mainnet rules with short
    /// stake locks.
    Fakechain,
}

/// Fixed per-network wallets that receive scheduled coinbase outputs.
///
/// The wallets rotated over the chain's history: governance moved to the
/// bridge wallet, then to the replacement bridge wallet, then to the new
/// governance wallet; the dev fund rotated once. Selection by hard fork
/// happens in the miner-tx builder.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub governance_wallet: AccountAddress,
    pub bridge_wallet: AccountAddress,
    pub new_bridge_wallet: AccountAddress,
    pub dev_fund_wallet: AccountAddress,
    pub new_gov_wallet: AccountAddress,
    pub new_dev_wallet: AccountAddress,
}

impl NetworkConfig {
    fn derive(prefix: &str) -> NetworkConfig {
        NetworkConfig {
            governance_wallet: wallet_address_from_tag(&format!("{prefix}-governance")),
            bridge_wallet: wallet_address_from_tag(&format!("{prefix}-bridge")),
            new_bridge_wallet: wallet_address_from_tag(&format!("{prefix}-bridge-2")),
            dev_fund_wallet: wallet_address_from_tag(&format!("{prefix}-dev-fund")),
            new_gov_wallet: wallet_address_from_tag(&format!("{prefix}-governance-2")),
            new_dev_wallet: wallet_address_from_tag(&format!("{prefix}-dev-fund-2")),
        }
    }

    /// The wallet set of a network.
    pub fn get(network: Network) -> &'static NetworkConfig {
        static MAINNET: OnceLock<NetworkConfig> = OnceLock::new();
        static TESTNET: OnceLock<NetworkConfig> = OnceLock::new();
        static STAGENET: OnceLock<NetworkConfig> = OnceLock::new();
        match network {
            Network::Mainnet | Network::Fakechain => {
                MAINNET.get_or_init(|| NetworkConfig::derive("meridian-mainnet"))
            }
            Network::Testnet => TESTNET.get_or_init(|| NetworkConfig::derive("meridian-testnet")),
            Network::Stagenet => {
                STAGENET.get_or_init(|| NetworkConfig::derive("meridian-stagenet"))
            }
        }
    }

    /// The wallet receiving governance outputs at a hard fork.
    pub fn governance_wallet_at(&self, hf: u8) -> &AccountAddress {
        if hf < 11 {
            &self.governance_wallet
        } else if hf < 14 {
            &self.bridge_wallet
        } else if hf < 19 {
            &self.new_bridge_wallet
        } else {
            &self.new_gov_wallet
        }
    }

    /// The wallet receiving dev-fund outputs at a hard fork.
    pub fn dev_fund_wallet_at(&self, hf: u8) -> &AccountAddress {
        if hf < 19 {
            &self.dev_fund_wallet
        } else {
            &self.new_dev_wallet
        }
    }
}
