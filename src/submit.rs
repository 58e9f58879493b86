use crate::{
    batch::{preamble, Batch},
    cancel::CancelToken,
    config::{ConfirmationPolicy, RunConfig},
    error::WalletRejection,
    events::{Event, EventSink},
    rpc::{ConfirmOutcome, NetworkRpc},
    wallet::{transaction_signature, TransferUnit, Wallet},
};
use serde::{Deserialize, Serialize};
use solana_sdk::{signature::Signature, transaction::Transaction};
use solana_transaction_status::TransactionConfirmationStatus;
use std::{fmt, time::Duration};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchStatus {
    Pending,
    Submitted,
    ConfirmedOk,
    ConfirmedTimeout,
    StatusCheckedOk,
    StatusCheckedUnclear,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            BatchStatus::ConfirmedOk
                | BatchStatus::StatusCheckedOk
                | BatchStatus::StatusCheckedUnclear
                | BatchStatus::Failed
        )
    }

    pub fn is_success(self) -> bool {
        matches!(self, BatchStatus::ConfirmedOk | BatchStatus::StatusCheckedOk)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Submitted => "submitted",
            BatchStatus::ConfirmedOk => "confirmed",
            BatchStatus::ConfirmedTimeout => "confirmation timed out",
            BatchStatus::StatusCheckedOk => "confirmed after status check",
            BatchStatus::StatusCheckedUnclear => "unclear after status check",
            BatchStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// Terminal result of driving one batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub status: BatchStatus,
    pub signature: Option<Signature>,
    pub error: Option<String>,
}

impl BatchOutcome {
    fn failed(signature: Option<Signature>, error: impl ToString) -> Self {
        Self {
            status: BatchStatus::Failed,
            signature,
            error: Some(error.to_string()),
        }
    }

    fn settled(status: BatchStatus, signature: Signature) -> Self {
        Self {
            status,
            signature: Some(signature),
            error: None,
        }
    }
}

/// Drives a single batch from `Pending` to a terminal status.
pub struct Submitter<'a, R, W> {
    rpc: &'a R,
    wallet: &'a W,
    confirmation: ConfirmationPolicy,
    sign_timeout: Option<Duration>,
    priority_fee: u64,
}

impl<'a, R: NetworkRpc, W: Wallet> Submitter<'a, R, W> {
    pub fn new(rpc: &'a R, wallet: &'a W, config: &RunConfig) -> Self {
        Self {
            rpc,
            wallet,
            confirmation: config.confirmation,
            sign_timeout: config.sign_timeout,
            priority_fee: config.priority_fee,
        }
    }

    pub async fn submit(
        &self,
        batch: &Batch,
        cancel: &CancelToken,
        events: &impl EventSink,
    ) -> BatchOutcome {
        self.submit_tracked(batch, cancel, events, &mut |_, _| {}).await
    }

    /// Like [`Submitter::submit`], reporting every intermediate status with
    /// the signature it belongs to.
    pub async fn submit_tracked(
        &self,
        batch: &Batch,
        cancel: &CancelToken,
        events: &impl EventSink,
        progress: &mut impl FnMut(BatchStatus, Signature),
    ) -> BatchOutcome {
        let blockhash = match self.rpc.freshness_token().await {
            Ok(hash) => hash,
            Err(e) => return BatchOutcome::failed(None, e),
        };

        let mut instructions = preamble(self.priority_fee);
        instructions.extend(batch.instructions.iter().cloned());
        let unit = TransferUnit::new(&instructions, &self.wallet.fee_payer(), blockhash);

        // Rejections are final for this batch
        let tx = match self.sign(unit, cancel).await {
            Ok(tx) => tx,
            Err(rejection) => return BatchOutcome::failed(None, rejection),
        };
        let Some(signed) = transaction_signature(&tx) else {
            return BatchOutcome::failed(None, "wallet returned an unsigned transaction");
        };

        // Not cancellable: the node may already hold the transaction.
        let signature = match self.wallet.broadcast(&tx).await {
            Ok(signature) => signature,
            Err(
                rejection @ (WalletRejection::InsufficientFunds(_)
                | WalletRejection::SimulationFailed(_)
                | WalletRejection::UserRejected
                | WalletRejection::ProviderUnsupported(_)),
            ) => return BatchOutcome::failed(None, rejection),
            Err(_) => signed,
        };
        progress(BatchStatus::Submitted, signature);
        events.emit(Event::BatchSubmitted {
            sequence_index: batch.sequence_index,
            signature,
        });

        self.settle(batch.sequence_index, signature, events, progress).await
    }

    /// Only signing races the cancel token and the signing timeout.
    async fn sign(&self, unit: TransferUnit, cancel: &CancelToken) -> Result<Transaction, WalletRejection> {
        let signing = async move {
            match self.sign_timeout {
                Some(limit) => tokio::time::timeout(limit, self.wallet.sign(unit))
                    .await
                    .unwrap_or_else(|_| Err(WalletRejection::TimedOut(limit.as_secs()))),
                None => self.wallet.sign(unit).await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(WalletRejection::Cancelled),
            result = signing => result,
        }
    }

    /// Once broadcast, a batch always reaches a terminal status.
    async fn settle(
        &self,
        sequence_index: usize,
        signature: Signature,
        events: &impl EventSink,
        progress: &mut impl FnMut(BatchStatus, Signature),
    ) -> BatchOutcome {
        let confirmation = self
            .rpc
            .confirm(&signature, self.confirmation.commitment, self.confirmation.timeout)
            .await;

        match confirmation {
            Ok(ConfirmOutcome::Confirmed) => BatchOutcome::settled(BatchStatus::ConfirmedOk, signature),
            Ok(ConfirmOutcome::Failed(err)) => BatchOutcome::failed(Some(signature), err),
            Ok(ConfirmOutcome::TimedOut) | Err(_) => {
                progress(BatchStatus::ConfirmedTimeout, signature);
                events.emit(Event::ConfirmationTimedOut {
                    sequence_index,
                    signature,
                });
                self.check_status(signature).await
            }
        }
    }

    async fn check_status(&self, signature: Signature) -> BatchOutcome {
        match self.rpc.signature_status(&signature).await {
            Ok(Some(TransactionConfirmationStatus::Confirmed))
            | Ok(Some(TransactionConfirmationStatus::Finalized)) => {
                BatchOutcome::settled(BatchStatus::StatusCheckedOk, signature)
            }
            Ok(status) => BatchOutcome {
                status: BatchStatus::StatusCheckedUnclear,
                signature: Some(signature),
                error: Some(match status {
                    Some(status) => format!("confirmation timed out; last status {:?}", status),
                    None => "confirmation timed out; signature status unknown".to_string(),
                }),
            },
            Err(e) => BatchOutcome {
                status: BatchStatus::StatusCheckedUnclear,
                signature: Some(signature),
                error: Some(format!("confirmation timed out; status check failed: {}", e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        batch::BatchBuilder,
        cancel::cancel_pair,
        config::Network,
        error::DropError,
        events::{Recorder, Silent},
        testing::{recipients, MockRpc, MockWallet},
        transfer::TransferAsset,
    };
    use solana_sdk::{commitment_config::CommitmentConfig, compute_budget};

    async fn single_batch(payer: solana_sdk::pubkey::Pubkey) -> Batch {
        let rpc = MockRpc::default();
        let builder = BatchBuilder::new(&rpc, TransferAsset::Native, payer, 1_000);
        builder
            .build(&recipients(3), &Silent)
            .await
            .unwrap()
            .remove(0)
    }

    fn devnet() -> RunConfig {
        RunConfig::for_network(Network::Devnet)
    }

    #[tokio::test]
    async fn test_confirmed_batch() {
        let rpc = MockRpc::default();
        let wallet = MockWallet::default();
        let batch = single_batch(wallet.fee_payer()).await;
        let recorder = Recorder::default();

        let outcome = Submitter::new(&rpc, &wallet, &devnet())
            .submit(&batch, &CancelToken::never(), &recorder)
            .await;

        assert_eq!(outcome.status, BatchStatus::ConfirmedOk);
        assert!(outcome.signature.is_some());
        assert!(outcome.error.is_none());

        let units = wallet.units();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].message.account_keys[0], wallet.fee_payer());
        assert_eq!(units[0].message.instructions.len(), 3);
        assert_eq!(
            rpc.commitments(),
            vec![(CommitmentConfig::confirmed(), Duration::from_secs(30))]
        );
        assert!(matches!(recorder.events()[0], Event::BatchSubmitted { sequence_index: 0, .. }));
    }

    #[tokio::test]
    async fn test_mainnet_waits_for_finalized() {
        let rpc = MockRpc::default();
        let wallet = MockWallet::default();
        let batch = single_batch(wallet.fee_payer()).await;

        Submitter::new(&rpc, &wallet, &RunConfig::for_network(Network::Mainnet))
            .submit(&batch, &CancelToken::never(), &Silent)
            .await;

        assert_eq!(
            rpc.commitments(),
            vec![(CommitmentConfig::finalized(), Duration::from_secs(120))]
        );
    }

    #[tokio::test]
    async fn test_priority_fee_is_prepended() {
        let rpc = MockRpc::default();
        let wallet = MockWallet::default();
        let batch = single_batch(wallet.fee_payer()).await;
        let mut config = devnet();
        config.priority_fee = 5_000;

        Submitter::new(&rpc, &wallet, &config)
            .submit(&batch, &CancelToken::never(), &Silent)
            .await;

        let message = &wallet.units()[0].message;
        assert_eq!(message.instructions.len(), 4);
        let program = message.program_id(0).unwrap();
        assert_eq!(*program, compute_budget::id());
    }

    #[tokio::test]
    async fn test_wallet_rejection_fails_without_signature() {
        let rpc = MockRpc::default();
        let wallet = MockWallet::default().replying(vec![Err(WalletRejection::UserRejected)]);
        let batch = single_batch(wallet.fee_payer()).await;

        let outcome = Submitter::new(&rpc, &wallet, &devnet())
            .submit(&batch, &CancelToken::never(), &Silent)
            .await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert!(outcome.signature.is_none());
        assert_eq!(outcome.error.as_deref(), Some("user rejected the signature request"));
        assert!(rpc.commitments().is_empty());
    }

    #[tokio::test]
    async fn test_blockhash_failure_fails_batch() {
        let rpc = MockRpc::default().failing_blockhash();
        let wallet = MockWallet::default();
        let batch = single_batch(wallet.fee_payer()).await;

        let outcome = Submitter::new(&rpc, &wallet, &devnet())
            .submit(&batch, &CancelToken::never(), &Silent)
            .await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert!(wallet.units().is_empty());
        assert!(outcome.error.unwrap().contains("getLatestBlockhash"));
    }

    #[tokio::test]
    async fn test_on_chain_error_fails_with_signature() {
        let rpc = MockRpc::default().confirming(vec![Ok(ConfirmOutcome::Failed(
            "InstructionError(0, Custom(1))".into(),
        ))]);
        let wallet = MockWallet::default();
        let batch = single_batch(wallet.fee_payer()).await;

        let outcome = Submitter::new(&rpc, &wallet, &devnet())
            .submit(&batch, &CancelToken::never(), &Silent)
            .await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert!(outcome.signature.is_some());
    }

    #[tokio::test]
    async fn test_timeout_resolved_by_status_check() {
        for landed in [
            TransactionConfirmationStatus::Confirmed,
            TransactionConfirmationStatus::Finalized,
        ] {
            let rpc = MockRpc::default()
                .confirming(vec![Ok(ConfirmOutcome::TimedOut)])
                .with_statuses(vec![Ok(Some(landed))]);
            let wallet = MockWallet::default();
            let batch = single_batch(wallet.fee_payer()).await;
            let recorder = Recorder::default();

            let outcome = Submitter::new(&rpc, &wallet, &devnet())
                .submit(&batch, &CancelToken::never(), &recorder)
                .await;

            assert_eq!(outcome.status, BatchStatus::StatusCheckedOk);
            assert!(outcome.status.is_success());
            assert!(recorder
                .events()
                .iter()
                .any(|e| matches!(e, Event::ConfirmationTimedOut { .. })));
        }
    }

    #[tokio::test]
    async fn test_timeout_left_unclear() {
        let cases: Vec<crate::error::Result<Option<TransactionConfirmationStatus>>> = vec![
            Ok(Some(TransactionConfirmationStatus::Processed)),
            Ok(None),
            Err(DropError::network("getSignatureStatuses", "503")),
        ];
        for status in cases {
            let rpc = MockRpc::default()
                .confirming(vec![Ok(ConfirmOutcome::TimedOut)])
                .with_statuses(vec![status]);
            let wallet = MockWallet::default();
            let batch = single_batch(wallet.fee_payer()).await;

            let outcome = Submitter::new(&rpc, &wallet, &devnet())
                .submit(&batch, &CancelToken::never(), &Silent)
                .await;

            assert_eq!(outcome.status, BatchStatus::StatusCheckedUnclear);
            assert!(!outcome.status.is_success());
            assert!(outcome.signature.is_some());
            assert!(outcome.error.is_some());
        }
    }

    #[tokio::test]
    async fn test_confirm_transport_error_goes_to_status_check() {
        let rpc = MockRpc::default()
            .confirming(vec![Err(DropError::network("getSignatureStatuses", "reset"))]);
        let wallet = MockWallet::default();
        let batch = single_batch(wallet.fee_payer()).await;

        let outcome = Submitter::new(&rpc, &wallet, &devnet())
            .submit(&batch, &CancelToken::never(), &Silent)
            .await;

        assert_eq!(outcome.status, BatchStatus::StatusCheckedOk);
    }

    #[tokio::test]
    async fn test_cancel_while_signing() {
        let rpc = MockRpc::default();
        let wallet = MockWallet::default().hanging();
        let batch = single_batch(wallet.fee_payer()).await;
        let (handle, token) = cancel_pair();
        let submitter = Submitter::new(&rpc, &wallet, &devnet());

        let (outcome, _) = tokio::join!(submitter.submit(&batch, &token, &Silent), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            handle.cancel();
        });

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.error, Some(WalletRejection::Cancelled.to_string()));
    }

    #[tokio::test]
    async fn test_sign_timeout() {
        let rpc = MockRpc::default();
        let wallet = MockWallet::default().hanging();
        let batch = single_batch(wallet.fee_payer()).await;
        let mut config = devnet();
        config.sign_timeout = Some(Duration::from_millis(20));

        let outcome = Submitter::new(&rpc, &wallet, &config)
            .submit(&batch, &CancelToken::never(), &Silent)
            .await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.error, Some(WalletRejection::TimedOut(0).to_string()));
    }

    #[tokio::test]
    async fn test_cancel_after_delivery_keeps_signature() {
        let rpc = MockRpc::default();
        let wallet = MockWallet::default().slow_to_answer(Duration::from_millis(200));
        let batch = single_batch(wallet.fee_payer()).await;
        let (handle, token) = cancel_pair();
        let submitter = Submitter::new(&rpc, &wallet, &devnet());

        let (outcome, _) = tokio::join!(submitter.submit(&batch, &token, &Silent), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            handle.cancel();
        });

        let delivered = wallet.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(outcome.status, BatchStatus::ConfirmedOk);
        assert_eq!(outcome.signature, Some(delivered[0]));
        assert!(outcome.error.is_none());
        assert_eq!(rpc.commitments().len(), 1);
    }

    #[tokio::test]
    async fn test_unclear_broadcast_error_goes_to_confirmation() {
        let rpc = MockRpc::default()
            .confirming(vec![Ok(ConfirmOutcome::TimedOut)])
            .with_statuses(vec![Ok(Some(TransactionConfirmationStatus::Confirmed))]);
        let wallet = MockWallet::default()
            .failing_broadcast(WalletRejection::Other("connection reset by peer".into()));
        let batch = single_batch(wallet.fee_payer()).await;

        let outcome = Submitter::new(&rpc, &wallet, &devnet())
            .submit(&batch, &CancelToken::never(), &Silent)
            .await;

        assert_eq!(outcome.status, BatchStatus::StatusCheckedOk);
        assert!(outcome.signature.is_some());
    }

    #[tokio::test]
    async fn test_preflight_rejection_fails_batch() {
        let rpc = MockRpc::default();
        let wallet = MockWallet::default()
            .failing_broadcast(WalletRejection::SimulationFailed("custom program error: 0x1".into()));
        let batch = single_batch(wallet.fee_payer()).await;

        let outcome = Submitter::new(&rpc, &wallet, &devnet())
            .submit(&batch, &CancelToken::never(), &Silent)
            .await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert!(outcome.signature.is_none());
        assert!(outcome.error.unwrap().contains("simulation failed"));
        assert!(rpc.commitments().is_empty());
    }

    #[tokio::test]
    async fn test_timed_out_batch_reports_each_status() {
        let rpc = MockRpc::default()
            .confirming(vec![Ok(ConfirmOutcome::TimedOut)])
            .with_statuses(vec![Ok(Some(TransactionConfirmationStatus::Finalized))]);
        let wallet = MockWallet::default();
        let batch = single_batch(wallet.fee_payer()).await;
        let mut seen: Vec<(BatchStatus, Signature)> = Vec::new();

        let outcome = Submitter::new(&rpc, &wallet, &devnet())
            .submit_tracked(&batch, &CancelToken::never(), &Silent, &mut |status, signature| {
                seen.push((status, signature))
            })
            .await;

        let statuses: Vec<BatchStatus> = seen.iter().map(|(status, _)| *status).collect();
        assert_eq!(statuses, vec![BatchStatus::Submitted, BatchStatus::ConfirmedTimeout]);
        assert!(seen.iter().all(|(_, signature)| Some(*signature) == outcome.signature));
        assert_eq!(outcome.status, BatchStatus::StatusCheckedOk);
    }

    #[test]
    fn test_terminal_states() {
        assert!(!BatchStatus::Pending.is_terminal());
        assert!(!BatchStatus::Submitted.is_terminal());
        assert!(!BatchStatus::ConfirmedTimeout.is_terminal());
        assert!(BatchStatus::StatusCheckedUnclear.is_terminal());
        assert!(!BatchStatus::StatusCheckedUnclear.is_success());
        assert!(BatchStatus::ConfirmedOk.is_success());
    }
}
