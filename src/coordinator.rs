use crate::{
    batch::Batch,
    cancel::CancelToken,
    config::{Network, RunConfig},
    error::Result,
    events::{Event, EventSink},
    recipient::RejectedRecipient,
    rpc::NetworkRpc,
    submit::{BatchOutcome, BatchStatus, Submitter},
    transfer::{Amount, TokenKind, TransferAsset},
    wallet::Wallet,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// A planned distribution and the status of each of its batches.
#[derive(Debug)]
pub struct DistributionRun {
    batches: Vec<Batch>,
    amount: Amount,
    asset: TransferAsset,
    outcomes: Vec<BatchOutcome>,
    cancelled: bool,
}

impl DistributionRun {
    pub fn new(batches: Vec<Batch>, amount: Amount, asset: TransferAsset) -> Self {
        let outcomes = batches
            .iter()
            .map(|_| BatchOutcome {
                status: BatchStatus::Pending,
                signature: None,
                error: None,
            })
            .collect();
        Self {
            batches,
            amount,
            asset,
            outcomes,
            cancelled: false,
        }
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    pub fn outcomes(&self) -> &[BatchOutcome] {
        &self.outcomes
    }

    pub fn amount(&self) -> &Amount {
        &self.amount
    }

    pub fn token_kind(&self) -> TokenKind {
        self.asset.kind()
    }

    pub fn status(&self, sequence_index: usize) -> Option<BatchStatus> {
        self.outcomes.get(sequence_index).map(|o| o.status)
    }

    pub fn was_cancelled(&self) -> bool {
        self.cancelled
    }

    /// Every batch reached a terminal status.
    pub fn is_complete(&self) -> bool {
        self.outcomes.iter().all(|o| o.status.is_terminal())
    }

    pub fn total_recipients(&self) -> usize {
        self.batches.iter().map(|b| b.recipients.len()).sum()
    }

    fn recipients_where(&self, predicate: impl Fn(BatchStatus) -> bool) -> usize {
        self.batches
            .iter()
            .zip(&self.outcomes)
            .filter(|(_, outcome)| predicate(outcome.status))
            .map(|(batch, _)| batch.recipients.len())
            .sum()
    }

    pub fn success_count(&self) -> usize {
        self.recipients_where(BatchStatus::is_success)
    }

    /// Recipients in batches that ended without a confirmed transfer.
    pub fn fail_count(&self) -> usize {
        self.recipients_where(|status| status.is_terminal() && !status.is_success())
    }

    /// Recipients in batches that were never attempted.
    pub fn skipped_count(&self) -> usize {
        self.recipients_where(|status| !status.is_terminal())
    }

    fn record(&mut self, sequence_index: usize, outcome: BatchOutcome) {
        if let Some(slot) = self.outcomes.get_mut(sequence_index) {
            if !slot.status.is_terminal() {
                *slot = outcome;
            }
        }
    }
}

/// Runs batches one after another with a cooldown in between.
pub struct RunCoordinator<'a, R, W> {
    submitter: Submitter<'a, R, W>,
    inter_batch_delay: Duration,
    cancel: CancelToken,
}

impl<'a, R: NetworkRpc, W: Wallet> RunCoordinator<'a, R, W> {
    pub fn new(rpc: &'a R, wallet: &'a W, config: &RunConfig, cancel: CancelToken) -> Self {
        Self {
            submitter: Submitter::new(rpc, wallet, config),
            inter_batch_delay: config.inter_batch_delay,
            cancel,
        }
    }

    pub async fn execute(&self, run: &mut DistributionRun, events: &impl EventSink) {
        let total = run.batches.len();
        let mut first_recipient = 1;

        for index in 0..total {
            if self.cancel.is_cancelled() {
                run.cancelled = true;
                events.emit(Event::RunCancelled {
                    remaining_batches: total - index,
                });
                break;
            }

            let DistributionRun { batches, outcomes, .. } = &mut *run;
            let batch = &batches[index];
            let last_recipient = first_recipient + batch.recipients.len() - 1;
            events.emit(Event::BatchStarted {
                sequence_index: batch.sequence_index,
                total_batches: total,
                first_recipient,
                last_recipient,
            });
            first_recipient = last_recipient + 1;

            let slot = &mut outcomes[index];
            let outcome = self
                .submitter
                .submit_tracked(batch, &self.cancel, events, &mut |status, signature| {
                    slot.status = status;
                    slot.signature = Some(signature);
                })
                .await;
            events.emit(Event::BatchFinished {
                sequence_index: batch.sequence_index,
                status: outcome.status,
                signature: outcome.signature,
                error: outcome.error.clone(),
            });
            run.record(index, outcome);

            if index + 1 < total {
                events.emit(Event::Cooldown {
                    delay: self.inter_batch_delay,
                });
                tokio::select! {
                    _ = tokio::time::sleep(self.inter_batch_delay) => {}
                    _ = self.cancel.cancelled() => {}
                }
            }
        }

        events.emit(Event::RunFinished {
            success_count: run.success_count(),
            fail_count: run.fail_count(),
        });
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub sequence_index: usize,
    pub recipients: Vec<String>,
    pub status: BatchStatus,
    pub signature: Option<String>,
    pub error: Option<String>,
    pub estimated_size_bytes: Option<usize>,
    pub oversized: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedEntry {
    pub id: u64,
    pub address: String,
    pub reason: String,
}

/// Persistent summary of a finished (or cancelled) run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributionReport {
    pub created_at: DateTime<Utc>,
    pub network: Network,
    pub token_kind: TokenKind,
    #[serde(default)]
    pub mint: Option<String>,
    pub amount_per_recipient: String,
    pub total_recipients: usize,
    pub success_count: usize,
    pub fail_count: usize,
    pub skipped_count: usize,
    pub cancelled: bool,
    pub rejected: Vec<RejectedEntry>,
    pub batches: Vec<BatchReport>,
    #[serde(default)]
    pub winners: Vec<String>,
}

impl DistributionReport {
    pub fn from_run(run: &DistributionRun, network: Network, rejected: &[RejectedRecipient]) -> Self {
        let batches = run
            .batches
            .iter()
            .zip(&run.outcomes)
            .map(|(batch, outcome)| BatchReport {
                sequence_index: batch.sequence_index,
                recipients: batch.recipients.iter().map(|r| r.address.to_string()).collect(),
                status: outcome.status,
                signature: outcome.signature.map(|s| s.to_string()),
                error: outcome.error.clone(),
                estimated_size_bytes: batch.estimated_size_bytes,
                oversized: batch.oversized,
            })
            .collect();

        Self {
            created_at: Utc::now(),
            network,
            token_kind: run.token_kind(),
            mint: match &run.asset {
                TransferAsset::Native => None,
                TransferAsset::Fungible(token) => Some(token.mint.to_string()),
            },
            amount_per_recipient: run.amount.ui.clone(),
            total_recipients: run.total_recipients(),
            success_count: run.success_count(),
            fail_count: run.fail_count(),
            skipped_count: run.skipped_count(),
            cancelled: run.cancelled,
            rejected: rejected
                .iter()
                .map(|r| RejectedEntry {
                    id: r.raw.id,
                    address: r.raw.address.clone(),
                    reason: r.error.to_string(),
                })
                .collect(),
            batches,
            winners: Vec::new(),
        }
    }

    pub fn with_winners(mut self, winners: Vec<String>) -> Self {
        self.winners = winners;
        self
    }

    /// Signatures of every batch that was broadcast.
    pub fn signatures(&self) -> Vec<&str> {
        self.batches
            .iter()
            .filter_map(|b| b.signature.as_deref())
            .collect()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let data = serde_json::to_string_pretty(self)?;
        fs::write(path, data)?;
        Ok(())
    }
}
