use serde::{Deserialize, Serialize};
use solana_sdk::{commitment_config::CommitmentConfig, packet::PACKET_DATA_SIZE};
use std::{fmt, str::FromStr, time::Duration};

/// Largest serialized transaction the cluster accepts.
pub const MAX_TX_SIZE: usize = PACKET_DATA_SIZE;

/// Cooldown between two batches of the same run.
pub const DEFAULT_INTER_BATCH_DELAY: Duration = Duration::from_secs(2);

/// How often a pending signature is polled while waiting for confirmation.
pub const CONFIRMATION_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub const LAMPORTS_DECIMALS: u8 = 9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    Mainnet,
    Devnet,
    Testnet,
    Localnet,
}

impl Network {
    /// Guess the cluster from an RPC endpoint. Anything mentioning mainnet is
    /// treated as production.
    pub fn from_rpc_url(url: &str) -> Self {
        let url = url.to_lowercase();
        if url.contains("mainnet") {
            Network::Mainnet
        } else if url.contains("devnet") {
            Network::Devnet
        } else if url.contains("testnet") {
            Network::Testnet
        } else if url.contains("localhost") || url.contains("127.0.0.1") {
            Network::Localnet
        } else {
            Network::Devnet
        }
    }

    pub fn is_production(self) -> bool {
        matches!(self, Network::Mainnet)
    }

    pub fn confirmation_policy(self) -> ConfirmationPolicy {
        if self.is_production() {
            ConfirmationPolicy {
                commitment: CommitmentConfig::finalized(),
                timeout: Duration::from_secs(120),
            }
        } else {
            ConfirmationPolicy {
                commitment: CommitmentConfig::confirmed(),
                timeout: Duration::from_secs(30),
            }
        }
    }

    /// Environment label sent to the remote draw service.
    pub fn environment(self) -> &'static str {
        if self.is_production() {
            "production"
        } else {
            "development"
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Network::Mainnet => "mainnet",
            Network::Devnet => "devnet",
            Network::Testnet => "testnet",
            Network::Localnet => "localnet",
        };
        f.write_str(name)
    }
}

impl FromStr for Network {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "mainnet-beta" => Ok(Network::Mainnet),
            "devnet" => Ok(Network::Devnet),
            "testnet" => Ok(Network::Testnet),
            "localnet" | "localhost" => Ok(Network::Localnet),
            other => Err(format!("unknown network '{}'", other)),
        }
    }
}

/// Commitment level and timeout used while waiting for a batch to land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub commitment: CommitmentConfig,
    pub timeout: Duration,
}

/// What to do with a recipient whose instructions alone exceed `MAX_TX_SIZE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Emit the recipient as an oversized single-recipient batch.
    #[default]
    AcceptSingleton,
    /// Fail the whole build.
    Reject,
}

/// Tunables for one distribution run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub network: Network,
    pub confirmation: ConfirmationPolicy,
    pub inter_batch_delay: Duration,
    pub overflow: OverflowPolicy,
    /// Compute unit price in microlamports; 0 disables the compute budget instruction.
    pub priority_fee: u64,
    /// Upper bound on how long a wallet signature may stay pending. `None` waits forever.
    pub sign_timeout: Option<Duration>,
}

impl RunConfig {
    pub fn for_network(network: Network) -> Self {
        Self {
            network,
            confirmation: network.confirmation_policy(),
            inter_batch_delay: DEFAULT_INTER_BATCH_DELAY,
            overflow: OverflowPolicy::default(),
            priority_fee: 0,
            sign_timeout: None,
        }
    }
}
