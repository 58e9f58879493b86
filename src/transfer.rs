use crate::{
    config::LAMPORTS_DECIMALS,
    error::{DropError, Result},
};
use serde::{Deserialize, Serialize};
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};
use spl_associated_token_account::{
    get_associated_token_address, instruction::create_associated_token_account_idempotent,
};
use spl_token::instruction::transfer_checked;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Native,
    Fungible,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Native => f.write_str("native"),
            TokenKind::Fungible => f.write_str("fungible"),
        }
    }
}

/// An SPL mint together with the account the tokens are paid from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FungibleToken {
    pub mint: Pubkey,
    pub source: Pubkey,
    pub decimals: u8,
}

impl FungibleToken {
    pub fn destination(&self, owner: &Pubkey) -> Pubkey {
        get_associated_token_address(owner, &self.mint)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferAsset {
    Native,
    Fungible(FungibleToken),
}

impl TransferAsset {
    pub fn kind(&self) -> TokenKind {
        match self {
            TransferAsset::Native => TokenKind::Native,
            TransferAsset::Fungible(_) => TokenKind::Fungible,
        }
    }

    pub fn decimals(&self) -> u8 {
        match self {
            TransferAsset::Native => LAMPORTS_DECIMALS,
            TransferAsset::Fungible(token) => token.decimals,
        }
    }

    /// Instructions paying `amount` base units to `recipient`. For SPL tokens
    /// an idempotent account creation goes first when the destination token
    /// account does not exist yet.
    pub fn instructions(
        &self,
        payer: &Pubkey,
        recipient: &Pubkey,
        amount: u64,
        create_account: bool,
    ) -> Result<Vec<Instruction>> {
        match self {
            TransferAsset::Native => Ok(vec![system_instruction::transfer(payer, recipient, amount)]),
            TransferAsset::Fungible(token) => {
                let mut instructions = Vec::with_capacity(2);
                if create_account {
                    instructions.push(create_associated_token_account_idempotent(
                        payer,
                        recipient,
                        &token.mint,
                        &spl_token::id(),
                    ));
                }
                let ix = transfer_checked(
                    &spl_token::id(),
                    &token.source,
                    &token.mint,
                    &token.destination(recipient),
                    payer,
                    &[],
                    amount,
                    token.decimals,
                )
                .map_err(|e| DropError::Serialization(e.to_string()))?;
                instructions.push(ix);
                Ok(instructions)
            }
        }
    }
}

/// A per-recipient amount, kept both as typed and in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Amount {
    pub ui: String,
    pub base_units: u64,
}

impl Amount {
    /// Parse a decimal string such as `"0.001"`. Digits beyond `decimals` are
    /// truncated; zero, negative and malformed amounts are rejected.
    pub fn parse(input: &str, decimals: u8) -> Result<Self> {
        let invalid = || DropError::InvalidAmount(input.to_string());
        let trimmed = input.trim();
        if trimmed.is_empty() || trimmed.starts_with('-') || trimmed.starts_with('+') {
            return Err(invalid());
        }

        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed, ""),
        };
        if whole.is_empty() && fraction.is_empty() {
            return Err(invalid());
        }
        if !whole.chars().all(|c| c.is_ascii_digit()) || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid());
        }

        let scale = 10u64.checked_pow(decimals as u32).ok_or_else(invalid)?;
        let whole_units = if whole.is_empty() {
            0
        } else {
            whole.parse::<u64>().map_err(|_| invalid())?
        };

        let kept: String = fraction.chars().take(decimals as usize).collect();
        let fraction_units = if kept.is_empty() {
            0
        } else {
            let padded = format!("{:0<width$}", kept, width = decimals as usize);
            padded.parse::<u64>().map_err(|_| invalid())?
        };

        let base_units = whole_units
            .checked_mul(scale)
            .and_then(|units| units.checked_add(fraction_units))
            .ok_or_else(invalid)?;
        if base_units == 0 {
            return Err(invalid());
        }

        Ok(Self {
            ui: trimmed.to_string(),
            base_units,
        })
    }
}

pub fn amount_to_ui(amount: u64, decimals: u8) -> f64 {
    amount as f64 / 10_f64.powi(decimals as i32)
}
