use crate::{
    error::{DropError, Result},
    events::{Event, EventSink},
};
use csv::Reader;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::{fmt, path::Path, str::FromStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RecipientSource {
    Manual,
    Generated,
    #[default]
    Imported,
    Draw,
}

impl fmt::Display for RecipientSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecipientSource::Manual => "manual",
            RecipientSource::Generated => "generated",
            RecipientSource::Imported => "imported",
            RecipientSource::Draw => "draw",
        };
        f.write_str(name)
    }
}

/// A recipient as it comes in, before the address is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawRecipient {
    pub id: u64,
    pub address: String,
    pub username: String,
    pub source: RecipientSource,
}

/// A recipient whose address is a valid public key. Only the resolver builds these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id: u64,
    pub address: Pubkey,
    pub username: String,
    pub source: RecipientSource,
}

impl Recipient {
    pub(crate) fn new(raw: &RawRecipient, address: Pubkey) -> Self {
        Self {
            id: raw.id,
            address,
            username: raw.username.clone(),
            source: raw.source,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
struct RecipientRow {
    address: String,
    #[serde(default)]
    username: String,
    #[serde(default)]
    source: Option<RecipientSource>,
}

/// Read `address,username[,source]` rows. Ids are 1-based row numbers.
pub fn load_recipients(csv_path: &Path) -> Result<Vec<RawRecipient>> {
    let mut reader = Reader::from_path(csv_path)?;
    let mut recipients = Vec::new();

    for (index, result) in reader.deserialize().enumerate() {
        let row: RecipientRow = result?;
        let id = index as u64 + 1;
        let username = if row.username.trim().is_empty() {
            format!("user{}", id)
        } else {
            row.username.trim().to_string()
        };
        recipients.push(RawRecipient {
            id,
            address: row.address.trim().to_string(),
            username,
            source: row.source.unwrap_or_default(),
        });
    }

    Ok(recipients)
}

pub fn write_recipients(csv_path: &Path, recipients: &[RawRecipient]) -> Result<()> {
    let mut writer = csv::Writer::from_path(csv_path)?;
    for recipient in recipients {
        writer.serialize(RecipientRow {
            address: recipient.address.clone(),
            username: recipient.username.clone(),
            source: Some(recipient.source),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn is_alias(address: &str) -> bool {
    let lower = address.to_lowercase();
    lower.len() > 4 && lower.ends_with(".sol")
}

pub fn parse_pubkey(address: &str) -> Result<Pubkey> {
    Pubkey::from_str(address).map_err(|e| DropError::InvalidAddress {
        address: address.to_string(),
        reason: e.to_string(),
    })
}

/// Turns a human-readable alias (a `.sol` domain) into a key.
#[allow(async_fn_in_trait)]
pub trait AliasResolver {
    async fn resolve(&self, alias: &str) -> Result<Pubkey>;
}

/// Refuses every alias.
pub struct NoAliasResolver;

impl AliasResolver for NoAliasResolver {
    async fn resolve(&self, alias: &str) -> Result<Pubkey> {
        Err(DropError::UnsupportedAlias(alias.to_string()))
    }
}

pub const DEFAULT_SNS_PROXY: &str = "https://sns-sdk-proxy.bonfida.workers.dev";

#[derive(Debug, Deserialize)]
struct SnsResponse {
    #[serde(default)]
    s: Option<String>,
    #[serde(default)]
    result: Option<String>,
}

/// Resolves `.sol` domains through the Bonfida SNS proxy.
pub struct SnsResolver {
    http: reqwest::Client,
    base_url: String,
}

impl SnsResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl AliasResolver for SnsResolver {
    async fn resolve(&self, alias: &str) -> Result<Pubkey> {
        let failed = |reason: String| DropError::AliasResolution {
            alias: alias.to_string(),
            reason,
        };

        let url = format!("{}/resolve/{}", self.base_url, alias.to_lowercase());
        let response: SnsResponse = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| failed(e.to_string()))?
            .json()
            .await
            .map_err(|e| failed(e.to_string()))?;

        match (response.s.as_deref(), response.result) {
            (Some("error"), detail) => Err(failed(detail.unwrap_or_else(|| "unknown domain".into()))),
            (_, Some(result)) => Pubkey::from_str(&result)
                .map_err(|_| failed(format!("proxy returned a malformed key '{}'", result))),
            (_, None) => Err(failed("empty response".into())),
        }
    }
}

#[derive(Debug)]
pub struct RejectedRecipient {
    pub raw: RawRecipient,
    pub error: DropError,
}

#[derive(Debug, Default)]
pub struct Resolution {
    pub accepted: Vec<Recipient>,
    pub rejected: Vec<RejectedRecipient>,
}

pub struct RecipientResolver<A> {
    aliases: A,
}

impl<A: AliasResolver> RecipientResolver<A> {
    pub fn new(aliases: A) -> Self {
        Self { aliases }
    }

    pub async fn resolve(&self, raw: &RawRecipient) -> Result<Recipient> {
        let address = raw.address.trim();
        if address.is_empty() {
            return Err(DropError::InvalidAddress {
                address: String::new(),
                reason: "empty address".into(),
            });
        }

        let key = if is_alias(address) {
            self.aliases.resolve(address).await?
        } else {
            parse_pubkey(address)?
        };
        Ok(Recipient::new(raw, key))
    }

    /// Validate every recipient, keeping input order. Invalid entries are
    /// reported and left out; an empty result is an error.
    pub async fn resolve_all(
        &self,
        raws: &[RawRecipient],
        events: &impl EventSink,
    ) -> Result<Resolution> {
        let mut resolution = Resolution::default();

        for raw in raws {
            match self.resolve(raw).await {
                Ok(recipient) => {
                    if is_alias(&raw.address) {
                        events.emit(Event::AliasResolved {
                            alias: raw.address.clone(),
                            address: recipient.address.to_string(),
                        });
                    }
                    resolution.accepted.push(recipient);
                }
                Err(error) => {
                    events.emit(Event::RecipientRejected {
                        id: raw.id,
                        address: raw.address.clone(),
                        reason: error.to_string(),
                    });
                    resolution.rejected.push(RejectedRecipient {
                        raw: raw.clone(),
                        error,
                    });
                }
            }
        }

        if resolution.accepted.is_empty() {
            return Err(DropError::NoRecipients);
        }
        Ok(resolution)
    }
}

/// Keys and `.sol` domains found in free text.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct AddressMatches {
    pub addresses: Vec<String>,
    pub domains: Vec<String>,
}

const BASE58_ALPHABET: &str = "123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz";

/// Pull Solana keys and `.sol` domains out of a bio, website or reply body.
pub fn extract_addresses(text: &str) -> AddressMatches {
    let mut matches = AddressMatches::default();

    let tokens = text.split(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')));
    for token in tokens {
        let token = token.trim_matches('.');
        if token.is_empty() {
            continue;
        }

        if is_alias(token) {
            let label = &token[..token.len() - 4];
            let valid_label = label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            let domain = token.to_lowercase();
            if valid_label && !matches.domains.contains(&domain) {
                matches.domains.push(domain);
            }
            continue;
        }

        if (32..=44).contains(&token.len())
            && token.chars().all(|c| BASE58_ALPHABET.contains(c))
            && Pubkey::from_str(token).is_ok()
            && !matches.addresses.iter().any(|a| a == token)
        {
            matches.addresses.push(token.to_string());
        }
    }

    matches
}
