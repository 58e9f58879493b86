use crate::{
    config::{OverflowPolicy, MAX_TX_SIZE},
    error::{DropError, Result},
    events::{Event, EventSink},
    recipient::Recipient,
    rpc::NetworkRpc,
    transfer::TransferAsset,
};
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction, hash::Hash, instruction::Instruction,
    message::Message, pubkey::Pubkey, transaction::Transaction,
};

/// Base fee per signature, in lamports.
const BASE_FEE_LAMPORTS: u64 = 5_000;
/// Compute units assumed per transaction when pricing the priority fee.
const ESTIMATED_COMPUTE_UNITS: u64 = 200_000;
/// Rent-exempt minimum of a token account, in lamports.
const TOKEN_ACCOUNT_RENT_LAMPORTS: u64 = 2_039_280;

/// A group of transfers submitted as one transaction.
#[derive(Debug, Clone)]
pub struct Batch {
    pub sequence_index: usize,
    pub recipients: Vec<Recipient>,
    /// Transfer instructions only; the compute budget preamble is added at submission.
    pub instructions: Vec<Instruction>,
    /// Includes the preamble. `None` when the transaction could not be serialized.
    pub estimated_size_bytes: Option<usize>,
    /// A lone recipient whose instructions exceed the size limit.
    pub oversized: bool,
    pub accounts_created: usize,
}

#[derive(Default)]
struct WorkingBatch {
    recipients: Vec<Recipient>,
    instructions: Vec<Instruction>,
    size: Option<usize>,
    accounts_created: usize,
}

impl WorkingBatch {
    fn push(&mut self, recipient: &Recipient, ixs: Vec<Instruction>, size: Option<usize>, created: bool) {
        self.recipients.push(recipient.clone());
        self.instructions.extend(ixs);
        self.size = size;
        if created {
            self.accounts_created += 1;
        }
    }

    fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }

    fn close(&mut self, sequence_index: usize, oversized: bool) -> Batch {
        let working = std::mem::take(self);
        Batch {
            sequence_index,
            recipients: working.recipients,
            instructions: working.instructions,
            estimated_size_bytes: working.size,
            oversized,
            accounts_created: working.accounts_created,
        }
    }
}

/// Greedy size-bounded packer.
pub struct BatchBuilder<'a, R> {
    rpc: &'a R,
    asset: TransferAsset,
    payer: Pubkey,
    amount: u64,
    priority_fee: u64,
    overflow: OverflowPolicy,
    max_size: usize,
}

impl<'a, R: NetworkRpc> BatchBuilder<'a, R> {
    pub fn new(rpc: &'a R, asset: TransferAsset, payer: Pubkey, amount: u64) -> Self {
        Self {
            rpc,
            asset,
            payer,
            amount,
            priority_fee: 0,
            overflow: OverflowPolicy::default(),
            max_size: MAX_TX_SIZE,
        }
    }

    pub fn priority_fee(mut self, micro_lamports: u64) -> Self {
        self.priority_fee = micro_lamports;
        self
    }

    pub fn overflow(mut self, policy: OverflowPolicy) -> Self {
        self.overflow = policy;
        self
    }

    pub fn max_size(mut self, bytes: usize) -> Self {
        self.max_size = bytes;
        self
    }

    /// Instructions every batch starts with.
    pub fn preamble(&self) -> Vec<Instruction> {
        preamble(self.priority_fee)
    }

    /// Serialized size of a transaction carrying `instructions`, with one
    /// placeholder signature per required signer.
    pub fn estimate_size(&self, instructions: &[Instruction]) -> Option<usize> {
        let mut all_instructions = self.preamble();
        all_instructions.extend_from_slice(instructions);

        // The blockhash value does not change the size.
        let message = Message::new_with_blockhash(&all_instructions, Some(&self.payer), &Hash::default());
        let tx = Transaction::new_unsigned(message);
        bincode::serialize(&tx).ok().map(|bytes| bytes.len())
    }

    fn fits(&self, size: Option<usize>) -> bool {
        size.map_or(false, |size| size <= self.max_size)
    }

    async fn needs_account(&self, recipient: &Recipient, events: &impl EventSink) -> Result<bool> {
        match &self.asset {
            TransferAsset::Native => Ok(false),
            TransferAsset::Fungible(token) => {
                let exists = self.rpc.account_exists(&token.destination(&recipient.address)).await?;
                if !exists {
                    events.emit(Event::AccountMissing {
                        recipient: recipient.address.to_string(),
                    });
                }
                Ok(!exists)
            }
        }
    }

    /// Pack `recipients` into ordered batches. Every recipient lands in
    /// exactly one batch and the original order is kept across batches.
    pub async fn build(&self, recipients: &[Recipient], events: &impl EventSink) -> Result<Vec<Batch>> {
        let mut batches: Vec<Batch> = Vec::new();
        let mut working = WorkingBatch::default();

        for recipient in recipients {
            let create_account = self.needs_account(recipient, events).await?;
            let ixs = self
                .asset
                .instructions(&self.payer, &recipient.address, self.amount, create_account)?;

            // Test adding this recipient
            let test_batch = {
                let mut test = working.instructions.clone();
                test.extend(ixs.iter().cloned());
                test
            };
            let size = self.estimate_size(&test_batch);
            if self.fits(size) {
                working.push(recipient, ixs, size, create_account);
                continue;
            }

            if !working.is_empty() {
                batches.push(working.close(batches.len(), false));
            }

            let alone = self.estimate_size(&ixs);
            if self.fits(alone) {
                working.push(recipient, ixs, alone, create_account);
                continue;
            }

            match self.overflow {
                OverflowPolicy::Reject => {
                    return Err(DropError::OversizedRecipient {
                        address: recipient.address.to_string(),
                        size: alone,
                        limit: self.max_size,
                    })
                }
                OverflowPolicy::AcceptSingleton => {
                    events.emit(Event::OversizedBatch {
                        sequence_index: batches.len(),
                        size: alone,
                    });
                    working.push(recipient, ixs, alone, create_account);
                    batches.push(working.close(batches.len(), true));
                }
            }
        }

        if !working.is_empty() {
            batches.push(working.close(batches.len(), false));
        }

        events.emit(Event::BatchesPlanned {
            batches: batches.len(),
            recipients: recipients.len(),
        });
        Ok(batches)
    }
}

pub(crate) fn preamble(priority_fee: u64) -> Vec<Instruction> {
    if priority_fee > 0 {
        vec![ComputeBudgetInstruction::set_compute_unit_price(priority_fee)]
    } else {
        Vec::new()
    }
}

/// Dry-run view of a batch plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub batches: usize,
    pub recipients: usize,
    pub accounts_to_create: usize,
    pub largest_batch_bytes: usize,
    pub oversized_batches: usize,
    pub estimated_fee_lamports: u64,
    pub estimated_rent_lamports: u64,
}

impl PlanSummary {
    pub fn from_batches(batches: &[Batch], priority_fee: u64) -> Self {
        let accounts_to_create: usize = batches.iter().map(|b| b.accounts_created).sum();
        let priority_lamports = priority_fee.saturating_mul(ESTIMATED_COMPUTE_UNITS) / 1_000_000;
        Self {
            batches: batches.len(),
            recipients: batches.iter().map(|b| b.recipients.len()).sum(),
            accounts_to_create,
            largest_batch_bytes: batches
                .iter()
                .filter_map(|b| b.estimated_size_bytes)
                .max()
                .unwrap_or(0),
            oversized_batches: batches.iter().filter(|b| b.oversized).count(),
            estimated_fee_lamports: (batches.len() as u64)
                .saturating_mul(BASE_FEE_LAMPORTS.saturating_add(priority_lamports)),
            estimated_rent_lamports: (accounts_to_create as u64).saturating_mul(TOKEN_ACCOUNT_RENT_LAMPORTS),
        }
    }
}
