use crate::{
    error::{DropError, Result},
    recipient::{extract_addresses, AddressMatches},
};
use governor::{
    clock::DefaultClock,
    state::{direct::NotKeyed, InMemoryState},
    Quota, RateLimiter,
};
use reqwest::StatusCode;
use serde::Deserialize;
use std::{num::NonZeroU32, time::Duration};

pub const DEFAULT_V2EX_BASE: &str = "https://www.v2ex.com";

/// The member API allows roughly one lookup per second.
const LOOKUPS_PER_SECOND: NonZeroU32 = NonZeroU32::MIN;

/// Finds payout addresses published on a user's profile.
#[allow(async_fn_in_trait)]
pub trait ProfileLookup {
    /// `None` when the user does not exist.
    async fn lookup(&self, username: &str) -> Result<Option<AddressMatches>>;
}

/// Skips lookups; every user reads as unknown.
pub struct NoProfileLookup;

impl ProfileLookup for NoProfileLookup {
    async fn lookup(&self, _username: &str) -> Result<Option<AddressMatches>> {
        Ok(None)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MemberProfile {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    solana_address: Option<String>,
    #[serde(default)]
    bio: Option<String>,
    #[serde(default)]
    website: Option<String>,
    #[serde(default)]
    tagline: Option<String>,
}

impl MemberProfile {
    /// Explicit address first, then bio, website and tagline.
    fn addresses(&self) -> AddressMatches {
        let mut matches = AddressMatches::default();
        if let Some(address) = self.solana_address.as_deref().map(str::trim) {
            if !address.is_empty() {
                matches.addresses.push(address.to_string());
            }
        }

        for text in [&self.bio, &self.website, &self.tagline].into_iter().flatten() {
            let found = extract_addresses(text);
            for address in found.addresses {
                if !matches.addresses.contains(&address) {
                    matches.addresses.push(address);
                }
            }
            for domain in found.domains {
                if !matches.domains.contains(&domain) {
                    matches.domains.push(domain);
                }
            }
        }
        matches
    }
}

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Looks members up through the V2EX member API.
pub struct V2exProfileLookup {
    client: reqwest::Client,
    base_url: String,
    rate_limiter: Limiter,
}

impl V2exProfileLookup {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| DropError::network("profile lookup", e))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            rate_limiter: RateLimiter::direct(Quota::per_second(LOOKUPS_PER_SECOND)),
        })
    }
}

impl ProfileLookup for V2exProfileLookup {
    async fn lookup(&self, username: &str) -> Result<Option<AddressMatches>> {
        self.rate_limiter.until_ready().await;

        let response = self
            .client
            .get(format!("{}/api/members/show.json", self.base_url))
            .query(&[("username", username)])
            .send()
            .await
            .map_err(|e| DropError::network("profile lookup", e))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DropError::network("profile lookup", response.status()));
        }

        let profile: MemberProfile = response
            .json()
            .await
            .map_err(|e| DropError::network("profile lookup", e))?;
        if profile.username.is_none() {
            return Ok(None);
        }
        Ok(Some(profile.addresses()))
    }
}
