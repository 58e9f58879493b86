use crate::{error::WalletRejection, rpc::SolanaRpc};
use solana_sdk::{
    hash::Hash,
    instruction::Instruction,
    message::Message,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::Transaction,
};
use std::{fmt, str::FromStr, sync::Arc};

/// One batch's instructions, addressed and ready to be signed.
#[derive(Debug, Clone)]
pub struct TransferUnit {
    pub message: Message,
    pub recent_blockhash: Hash,
}

impl TransferUnit {
    pub fn new(instructions: &[Instruction], fee_payer: &Pubkey, recent_blockhash: Hash) -> Self {
        Self {
            message: Message::new_with_blockhash(instructions, Some(fee_payer), &recent_blockhash),
            recent_blockhash,
        }
    }
}

/// Signs transfer units and hands them to the cluster. Signing may wait on a
/// person; broadcasting only talks to the network.
#[allow(async_fn_in_trait)]
pub trait Wallet {
    fn fee_payer(&self) -> Pubkey;

    async fn sign(&self, unit: TransferUnit) -> Result<Transaction, WalletRejection>;

    async fn broadcast(&self, tx: &Transaction) -> Result<Signature, WalletRejection>;
}

/// Signature a signed transaction will be known by on chain.
pub fn transaction_signature(tx: &Transaction) -> Option<Signature> {
    tx.signatures
        .first()
        .copied()
        .filter(|signature| *signature != Signature::default())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalletProvider {
    Keypair,
    Phantom,
    Solflare,
}

impl WalletProvider {
    /// Browser extensions cannot be driven from a terminal.
    pub fn is_supported(self) -> bool {
        matches!(self, WalletProvider::Keypair)
    }
}

impl fmt::Display for WalletProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WalletProvider::Keypair => "keypair",
            WalletProvider::Phantom => "phantom",
            WalletProvider::Solflare => "solflare",
        };
        f.write_str(name)
    }
}

impl FromStr for WalletProvider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "keypair" | "file" => Ok(WalletProvider::Keypair),
            "phantom" => Ok(WalletProvider::Phantom),
            "solflare" => Ok(WalletProvider::Solflare),
            other => Err(format!("unknown wallet provider '{}'", other)),
        }
    }
}

/// Signs with a local keypair and submits through the RPC node.
pub struct KeypairWallet {
    keypair: Keypair,
    rpc: Arc<SolanaRpc>,
}

impl KeypairWallet {
    pub fn new(keypair: Keypair, rpc: Arc<SolanaRpc>) -> Self {
        Self { keypair, rpc }
    }
}

impl Wallet for KeypairWallet {
    fn fee_payer(&self) -> Pubkey {
        self.keypair.pubkey()
    }

    async fn sign(&self, unit: TransferUnit) -> Result<Transaction, WalletRejection> {
        let mut tx = Transaction::new_unsigned(unit.message);
        tx.try_sign(&[&self.keypair], unit.recent_blockhash)
            .map_err(|e| WalletRejection::Other(e.to_string()))?;
        Ok(tx)
    }

    async fn broadcast(&self, tx: &Transaction) -> Result<Signature, WalletRejection> {
        self.rpc
            .send_transaction(tx)
            .await
            .map_err(|e| WalletRejection::classify(&e.to_string()))
    }
}

/// Stand-in for providers that only exist inside a browser.
pub struct UnsupportedWallet {
    provider: WalletProvider,
    fee_payer: Pubkey,
}

impl UnsupportedWallet {
    pub fn new(provider: WalletProvider, fee_payer: Pubkey) -> Self {
        Self { provider, fee_payer }
    }
}

impl Wallet for UnsupportedWallet {
    fn fee_payer(&self) -> Pubkey {
        self.fee_payer
    }

    async fn sign(&self, _unit: TransferUnit) -> Result<Transaction, WalletRejection> {
        Err(WalletRejection::ProviderUnsupported(self.provider.to_string()))
    }

    async fn broadcast(&self, _tx: &Transaction) -> Result<Signature, WalletRejection> {
        Err(WalletRejection::ProviderUnsupported(self.provider.to_string()))
    }
}
