use super::Candidate;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use serde_aux::field_attributes::deserialize_number_from_string;
use std::{fs, path::Path};

/// Post metadata passed along to the remote draw service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostInfo {
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub author: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reply {
    #[serde(default, deserialize_with = "deserialize_number_from_string")]
    pub floor: u32,
    #[serde(default, alias = "userId")]
    pub username: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "solanaAddresses")]
    pub addresses: Vec<String>,
    #[serde(default, alias = "solanaDomains")]
    pub domains: Vec<String>,
}

/// A parsed post with its replies, as produced by the post scraper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostSnapshot {
    pub title: String,
    #[serde(alias = "sourceUrl")]
    pub url: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, alias = "detailedReplies")]
    pub replies: Vec<Reply>,
}

impl PostSnapshot {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }

    /// One candidate per reply, in reply order. Missing floors fall back to
    /// the reply position and blank usernames get a placeholder.
    pub fn candidates(&self) -> Vec<Candidate> {
        self.replies
            .iter()
            .enumerate()
            .map(|(index, reply)| {
                let username = reply.username.trim();
                Candidate {
                    username: if username.is_empty() {
                        format!("user{}", index + 1)
                    } else {
                        username.to_string()
                    },
                    address: reply.addresses.first().cloned(),
                    addresses: reply.addresses.clone(),
                    floor: if reply.floor == 0 { index as u32 + 1 } else { reply.floor },
                    content: reply.content.clone(),
                    duplicate: None,
                }
            })
            .collect()
    }

    /// One winner per ten replies, rounded up.
    pub fn default_draw_count(&self) -> usize {
        (self.replies.len() + 9) / 10
    }

    pub fn post_info(&self) -> PostInfo {
        PostInfo {
            title: self.title.clone(),
            url: self.url.clone(),
            author: self.author.clone(),
        }
    }

    /// Every address mentioned anywhere in the thread, first mention first.
    pub fn all_addresses(&self) -> Vec<String> {
        let mut seen = Vec::new();
        for address in self.replies.iter().flat_map(|r| r.addresses.iter()) {
            if !seen.contains(address) {
                seen.push(address.clone());
            }
        }
        seen
    }
}
