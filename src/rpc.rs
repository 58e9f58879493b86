use crate::{
    config::CONFIRMATION_POLL_INTERVAL,
    error::{DropError, Result},
    transfer::FungibleToken,
};
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use solana_client::{client_error::ClientError, nonblocking::rpc_client::RpcClient};
use solana_sdk::{
    commitment_config::CommitmentConfig, hash::Hash, program_pack::Pack, pubkey::Pubkey,
    signature::Signature, transaction::Transaction,
};
use solana_transaction_status::TransactionConfirmationStatus;
use spl_associated_token_account::get_associated_token_address;
use spl_token::state::Mint;
use std::{num::NonZeroU32, time::Duration};
use tokio::time::{sleep, Instant};

/// Result of waiting for a signature to reach a commitment level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmOutcome {
    Confirmed,
    /// The transaction landed but its execution failed.
    Failed(String),
    TimedOut,
}

/// The cluster operations the distribution pipeline needs.
#[allow(async_fn_in_trait)]
pub trait NetworkRpc {
    /// A recent blockhash to address the next transaction with.
    async fn freshness_token(&self) -> Result<Hash>;

    async fn account_exists(&self, address: &Pubkey) -> Result<bool>;

    async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
        timeout: Duration,
    ) -> Result<ConfirmOutcome>;

    /// One-shot status lookup; `None` when the cluster does not know the
    /// signature or the transaction failed.
    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionConfirmationStatus>>;
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// JSON-RPC backed implementation.
pub struct SolanaRpc {
    client: RpcClient,
    rate_limiter: Option<Limiter>,
    poll_interval: Duration,
}

impl SolanaRpc {
    pub fn new(url: String, rate_limit: u32) -> Self {
        Self {
            client: RpcClient::new_with_commitment(url, CommitmentConfig::confirmed()),
            rate_limiter: NonZeroU32::new(rate_limit)
                .map(|per_second| RateLimiter::direct(Quota::per_second(per_second))),
            poll_interval: CONFIRMATION_POLL_INTERVAL,
        }
    }

    pub fn url(&self) -> String {
        self.client.url()
    }

    async fn pace(&self) {
        if let Some(limiter) = &self.rate_limiter {
            limiter.until_ready().await;
        }
    }

    pub async fn send_transaction(
        &self,
        tx: &Transaction,
    ) -> std::result::Result<Signature, ClientError> {
        self.pace().await;
        self.client.send_transaction(tx).await
    }

    pub async fn balance(&self, address: &Pubkey) -> Result<u64> {
        self.pace().await;
        self.client
            .get_balance(address)
            .await
            .map_err(|e| DropError::network("getBalance", e))
    }

    /// Read the mint's decimals and work out which token account pays.
    /// Without an explicit source, the owner's associated account is used.
    pub async fn token_context(
        &self,
        mint: &Pubkey,
        source: Option<Pubkey>,
        owner: &Pubkey,
    ) -> Result<FungibleToken> {
        self.pace().await;
        let mint_account = self
            .client
            .get_account(mint)
            .await
            .map_err(|e| DropError::network("getAccountInfo", e))?;
        let mint_data = Mint::unpack(&mint_account.data).map_err(|e| DropError::InvalidAddress {
            address: mint.to_string(),
            reason: format!("not an SPL mint: {}", e),
        })?;

        Ok(FungibleToken {
            mint: *mint,
            source: source.unwrap_or_else(|| get_associated_token_address(owner, mint)),
            decimals: mint_data.decimals,
        })
    }
}

impl NetworkRpc for SolanaRpc {
    async fn freshness_token(&self) -> Result<Hash> {
        self.pace().await;
        self.client
            .get_latest_blockhash()
            .await
            .map_err(|e| DropError::network("getLatestBlockhash", e))
    }

    async fn account_exists(&self, address: &Pubkey) -> Result<bool> {
        self.pace().await;
        let response = self
            .client
            .get_account_with_commitment(address, self.client.commitment())
            .await
            .map_err(|e| DropError::network("getAccountInfo", e))?;
        Ok(response.value.is_some())
    }

    async fn confirm(
        &self,
        signature: &Signature,
        commitment: CommitmentConfig,
        timeout: Duration,
    ) -> Result<ConfirmOutcome> {
        let deadline = Instant::now() + timeout;

        loop {
            self.pace().await;
            // Transport hiccups while polling are retried until the deadline.
            if let Ok(response) = self.client.get_signature_statuses(&[*signature]).await {
                if let Some(Some(status)) = response.value.first() {
                    if let Some(err) = &status.err {
                        return Ok(ConfirmOutcome::Failed(err.to_string()));
                    }
                    if status.satisfies_commitment(commitment) {
                        return Ok(ConfirmOutcome::Confirmed);
                    }
                }
            }

            if Instant::now() + self.poll_interval > deadline {
                return Ok(ConfirmOutcome::TimedOut);
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<TransactionConfirmationStatus>> {
        self.pace().await;
        let response = self
            .client
            .get_signature_statuses(&[*signature])
            .await
            .map_err(|e| DropError::network("getSignatureStatuses", e))?;

        Ok(match response.value.into_iter().next().flatten() {
            Some(status) if status.err.is_none() => Some(status.confirmation_status()),
            _ => None,
        })
    }
}
