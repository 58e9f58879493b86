//! In-memory collaborators shared by the unit tests.

use crate::{
    error::{DropError, Result, WalletRejection},
    recipient::{Recipient, RecipientSource},
    rpc::{ConfirmOutcome, NetworkRpc},
    wallet::{TransferUnit, Wallet},
};
use solana_sdk::{
    commitment_config::CommitmentConfig,
    hash::Hash,
    pubkey::Pubkey,
    signature::{Keypair, Signature, Signer},
    transaction::Transaction,
};
use solana_transaction_status::TransactionConfirmationStatus;
use std::{
    collections::{HashSet, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

pub fn recipients(count: usize) -> Vec<Recipient> {
    (1..=count as u64)
        .map(|id| Recipient {
            id,
            address: Pubkey::new_unique(),
            username: format!("user{}", id),
            source: RecipientSource::Imported,
        })
        .collect()
}

#[derive(Default)]
pub struct MockRpc {
    accounts: HashSet<Pubkey>,
    failing_probes: bool,
    failing_blockhash: bool,
    probes: AtomicUsize,
    confirmations: Mutex<VecDeque<Result<ConfirmOutcome>>>,
    statuses: Mutex<VecDeque<Result<Option<TransactionConfirmationStatus>>>>,
    commitments: Mutex<Vec<(CommitmentConfig, Duration)>>,
}

impl MockRpc {
    pub fn with_account(mut self, address: Pubkey) -> Self {
        self.accounts.insert(address);
        self
    }

    pub fn failing_probes(mut self) -> Self {
        self.failing_probes = true;
        self
    }

    pub fn failing_blockhash(mut self) -> Self {
        self.failing_blockhash = true;
        self
    }

    /// Queue confirmation results; once drained every wait confirms.
    pub fn confirming(self, outcomes: Vec<Result<ConfirmOutcome>>) -> Self {
        if let Ok(mut queue) = self.confirmations.lock() {
            queue.extend(outcomes);
        }
        self
    }

    /// Queue status lookups; once drained every lookup reports confirmed.
    pub fn with_statuses(self, statuses: Vec<Result<Option<TransactionConfirmationStatus>>>) -> Self {
        if let Ok(mut queue) = self.statuses.lock() {
            queue.extend(statuses);
        }
        self
    }

    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    pub fn commitments(&self) -> Vec<(CommitmentConfig, Duration)> {
        self.commitments.lock().unwrap().clone()
    }
}

impl NetworkRpc for MockRpc {
    async fn freshness_token(&self) -> Result<Hash> {
        if self.failing_blockhash {
            return Err(DropError::network("getLatestBlockhash", "connection refused"));
        }
        Ok(Hash::new_unique())
    }

    async fn account_exists(&self, address: &Pubkey) -> Result<bool> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.failing_probes {
            return Err(DropError::network("getAccountInfo", "connection refused"));
        }
        Ok(self.accounts.contains(address))
    }

    async fn confirm(
        &self,
        _signature: &Signature,
        commitment: CommitmentConfig,
        timeout: Duration,
    ) -> Result<ConfirmOutcome> {
        self.commitments.lock().unwrap().push((commitment, timeout));
        self.confirmations
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(ConfirmOutcome::Confirmed))
    }

    async fn signature_status(
        &self,
        _signature: &Signature,
    ) -> Result<Option<TransactionConfirmationStatus>> {
        self.statuses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(Some(TransactionConfirmationStatus::Confirmed)))
    }
}

pub struct MockWallet {
    payer: Keypair,
    rejections: Mutex<VecDeque<std::result::Result<(), WalletRejection>>>,
    broadcast_failures: Mutex<VecDeque<WalletRejection>>,
    hang: bool,
    broadcast_delay: Option<Duration>,
    units: Mutex<Vec<TransferUnit>>,
    delivered: Mutex<Vec<Signature>>,
}

impl Default for MockWallet {
    fn default() -> Self {
        Self {
            payer: Keypair::new(),
            rejections: Mutex::new(VecDeque::new()),
            broadcast_failures: Mutex::new(VecDeque::new()),
            hang: false,
            broadcast_delay: None,
            units: Mutex::new(Vec::new()),
            delivered: Mutex::new(Vec::new()),
        }
    }
}

impl MockWallet {
    /// Queue signing results; once drained every request is signed.
    pub fn replying(self, replies: Vec<std::result::Result<(), WalletRejection>>) -> Self {
        self.rejections.lock().unwrap().extend(replies);
        self
    }

    /// Never answers a signing request.
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    /// The node receives each transaction at once but answers after `delay`.
    pub fn slow_to_answer(mut self, delay: Duration) -> Self {
        self.broadcast_delay = Some(delay);
        self
    }

    /// Fail the next broadcast with `rejection`.
    pub fn failing_broadcast(self, rejection: WalletRejection) -> Self {
        self.broadcast_failures.lock().unwrap().push_back(rejection);
        self
    }

    pub fn units(&self) -> Vec<TransferUnit> {
        self.units.lock().unwrap().clone()
    }

    /// Signatures of the transactions that reached the node.
    pub fn delivered(&self) -> Vec<Signature> {
        self.delivered.lock().unwrap().clone()
    }
}

impl Wallet for MockWallet {
    fn fee_payer(&self) -> Pubkey {
        self.payer.pubkey()
    }

    async fn sign(&self, unit: TransferUnit) -> std::result::Result<Transaction, WalletRejection> {
        self.units.lock().unwrap().push(unit.clone());
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.rejections.lock().unwrap().pop_front().unwrap_or(Ok(()))?;

        let mut tx = Transaction::new_unsigned(unit.message);
        tx.try_sign(&[&self.payer], unit.recent_blockhash)
            .map_err(|e| WalletRejection::Other(e.to_string()))?;
        Ok(tx)
    }

    async fn broadcast(&self, tx: &Transaction) -> std::result::Result<Signature, WalletRejection> {
        if let Some(rejection) = self.broadcast_failures.lock().unwrap().pop_front() {
            return Err(rejection);
        }
        let signature = tx.signatures[0];
        self.delivered.lock().unwrap().push(signature);
        if let Some(delay) = self.broadcast_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(signature)
    }
}
