//! Seeded winner selection over reply candidates.

pub mod profile;
pub mod remote;
pub mod resolution;
pub mod rng;
pub mod source;

pub use remote::{GithubCommit, HttpDrawService, NoRemote, RemoteDraw};
pub use resolution::{resolve_winners, ResolvedDraw, ResolvedWinner, UnresolvedPolicy};
pub use rng::Lcg;
pub use source::{PostInfo, PostSnapshot, Reply};

use crate::{
    config::Network,
    error::{DropError, Result},
    events::{Event, EventSink},
};
use chrono::{DateTime, Local};
use rand::Rng;
use remote::{RemoteDrawRequest, RemoteUser};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, fmt};

const SEED_ALPHABET: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const SEED_LEN: usize = 6;

/// Numeric seeds drive the generator directly; text seeds are hashed first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seed {
    Number(u64),
    Text(String),
}

impl Seed {
    /// A fresh six character base-36 seed, uppercase.
    pub fn random() -> Self {
        let mut rng = rand::thread_rng();
        let text = (0..SEED_LEN)
            .map(|_| SEED_ALPHABET[rng.gen_range(0..SEED_ALPHABET.len())] as char)
            .collect();
        Seed::Text(text)
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Seed::Number(n) => write!(f, "{}", n),
            Seed::Text(text) => f.write_str(text),
        }
    }
}

/// How the occurrences of one username were merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateGroup {
    pub occurrences: usize,
    pub distinct_addresses: Vec<String>,
    /// More than one distinct address; the candidate is left addressless.
    pub ambiguous: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub username: String,
    /// Payout address, if one is known.
    pub address: Option<String>,
    /// Every address the reply listed.
    #[serde(default)]
    pub addresses: Vec<String>,
    pub floor: u32,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub duplicate: Option<DuplicateGroup>,
}

impl Candidate {
    pub fn is_ambiguous(&self) -> bool {
        self.duplicate.as_ref().map_or(false, |group| group.ambiguous)
    }
}

/// Merge candidates sharing a username, keeping first-occurrence order and
/// the first occurrence's floor and content.
pub fn collapse_duplicates(pool: &[Candidate]) -> Vec<Candidate> {
    let mut order: Vec<&str> = Vec::new();
    let mut groups: Vec<Vec<&Candidate>> = Vec::new();

    for candidate in pool {
        match order.iter().position(|name| *name == candidate.username) {
            Some(index) => groups[index].push(candidate),
            None => {
                order.push(&candidate.username);
                groups.push(vec![candidate]);
            }
        }
    }

    groups
        .into_iter()
        .map(|occurrences| {
            let first = occurrences[0].clone();
            if occurrences.len() == 1 {
                return first;
            }

            let mut distinct: Vec<String> = Vec::new();
            for occurrence in &occurrences {
                let listed = occurrence.addresses.iter().chain(occurrence.address.iter());
                for address in listed {
                    if !distinct.contains(address) {
                        distinct.push(address.clone());
                    }
                }
            }

            let ambiguous = distinct.len() > 1;
            Candidate {
                address: if ambiguous { None } else { distinct.first().cloned() },
                duplicate: Some(DuplicateGroup {
                    occurrences: occurrences.len(),
                    distinct_addresses: distinct,
                    ambiguous,
                }),
                ..first
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrawMode {
    #[default]
    LocalOnly,
    RemoteFirst,
}

#[derive(Debug, Clone)]
pub struct DrawRequest {
    pub pool: Vec<Candidate>,
    /// Usernames that may not win, matched exactly.
    pub excluded: HashSet<String>,
    pub draw_count: usize,
    pub seed: Seed,
    pub mode: DrawMode,
    pub collapse_duplicates: bool,
    pub post: Option<PostInfo>,
}

impl DrawRequest {
    pub fn new(pool: Vec<Candidate>, draw_count: usize, seed: Seed) -> Self {
        Self {
            pool,
            excluded: HashSet::new(),
            draw_count,
            seed,
            mode: DrawMode::LocalOnly,
            collapse_duplicates: true,
            post: None,
        }
    }

    pub fn exclude(mut self, username: impl Into<String>) -> Self {
        self.excluded.insert(username.into());
        self
    }

    /// The candidates that may win, in pool order.
    pub fn eligible(&self) -> Result<Vec<Candidate>> {
        if self.pool.is_empty() {
            return Err(DropError::EmptyPool);
        }
        if self.draw_count == 0 {
            return Err(DropError::InvalidDrawCount(0));
        }

        let pool = if self.collapse_duplicates {
            collapse_duplicates(&self.pool)
        } else {
            self.pool.clone()
        };
        let eligible: Vec<Candidate> = pool
            .into_iter()
            .filter(|c| !self.excluded.contains(&c.username))
            .collect();

        if eligible.len() < self.draw_count {
            return Err(DropError::InsufficientCandidates {
                requested: self.draw_count,
                available: eligible.len(),
            });
        }
        Ok(eligible)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawResult {
    pub winners: Vec<Candidate>,
    /// Size of the eligible pool the winners came from.
    pub pool_size: usize,
    pub seed_used: Seed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Executor {
    Local,
    Remote,
}

/// A finished draw, plus what a replacement draw needs to continue from.
#[derive(Debug, Clone)]
pub struct DrawOutcome {
    pub result: DrawResult,
    pub executor: Executor,
    pub fallback_reason: Option<String>,
    pub github_commit: Option<GithubCommit>,
    /// Eligible candidates that did not win, in pool order.
    pub(crate) remaining: Vec<Candidate>,
    /// Generator state after the draw.
    pub(crate) rng: Lcg,
}

/// Shuffle pool positions and split them into winners and the rest.
fn pick(eligible: &[Candidate], count: usize, rng: &mut Lcg) -> (Vec<Candidate>, Vec<Candidate>) {
    let mut order: Vec<usize> = (0..eligible.len()).collect();
    rng::shuffle(&mut order, rng);

    let chosen: HashSet<usize> = order[..count].iter().copied().collect();
    let winners = order[..count].iter().map(|&i| eligible[i].clone()).collect();
    let remaining = eligible
        .iter()
        .enumerate()
        .filter(|(i, _)| !chosen.contains(i))
        .map(|(_, c)| c.clone())
        .collect();
    (winners, remaining)
}

/// Run the draw in process. Same request, same winners in the same order.
pub fn draw_local(request: &DrawRequest) -> Result<DrawOutcome> {
    let eligible = request.eligible()?;
    Ok(local_outcome(request, &eligible))
}

fn local_outcome(request: &DrawRequest, eligible: &[Candidate]) -> DrawOutcome {
    let mut rng = Lcg::from_seed(&request.seed);
    let (winners, remaining) = pick(eligible, request.draw_count, &mut rng);
    DrawOutcome {
        result: DrawResult {
            winners,
            pool_size: eligible.len(),
            seed_used: request.seed.clone(),
        },
        executor: Executor::Local,
        fallback_reason: None,
        github_commit: None,
        remaining,
        rng,
    }
}

/// Match remote winners back onto eligible candidates by username, using the
/// address to pick between same-named entries.
fn map_remote_winners(
    request: &DrawRequest,
    eligible: &[Candidate],
    winners: &[remote::RemoteWinner],
) -> std::result::Result<(Vec<Candidate>, Vec<Candidate>), String> {
    if winners.len() != request.draw_count {
        return Err(format!(
            "expected {} winners, got {}",
            request.draw_count,
            winners.len()
        ));
    }

    let mut taken: HashSet<usize> = HashSet::new();
    let mut mapped = Vec::with_capacity(winners.len());
    for winner in winners {
        let username = winner.username();
        if request.excluded.contains(username) {
            return Err(format!("excluded user '{}' was drawn", username));
        }

        let free = |i: &usize| eligible[*i].username == username && !taken.contains(i);
        let by_address = winner.address().and_then(|address| {
            (0..eligible.len())
                .filter(free)
                .find(|&i| eligible[i].address.as_deref() == Some(address))
        });
        let index = by_address
            .or_else(|| (0..eligible.len()).find(free))
            .ok_or_else(|| format!("unknown or repeated winner '{}'", username))?;

        taken.insert(index);
        mapped.push(eligible[index].clone());
    }

    let remaining = eligible
        .iter()
        .enumerate()
        .filter(|(i, _)| !taken.contains(i))
        .map(|(_, c)| c.clone())
        .collect();
    Ok((mapped, remaining))
}

/// Runs draws locally or through a remote service, falling back to local
/// execution whenever the remote path cannot be used.
pub struct DrawEngine<D> {
    remote: D,
    environment: &'static str,
}

impl<D: RemoteDraw> DrawEngine<D> {
    pub fn new(remote: D, network: Network) -> Self {
        Self {
            remote,
            environment: network.environment(),
        }
    }

    pub async fn draw(&self, request: &DrawRequest, events: &impl EventSink) -> Result<DrawOutcome> {
        let eligible = request.eligible()?;

        let outcome = match request.mode {
            DrawMode::LocalOnly => local_outcome(request, &eligible),
            DrawMode::RemoteFirst => match self.draw_remote(request, &eligible).await {
                Ok(outcome) => outcome,
                Err(reason) => {
                    events.emit(Event::DrawFallback {
                        reason: reason.clone(),
                    });
                    DrawOutcome {
                        fallback_reason: Some(reason),
                        ..local_outcome(request, &eligible)
                    }
                }
            },
        };

        events.emit(Event::DrawCompleted {
            winners: outcome.result.winners.len(),
            pool_size: outcome.result.pool_size,
            remote: outcome.executor == Executor::Remote,
        });
        Ok(outcome)
    }

    async fn draw_remote(
        &self,
        request: &DrawRequest,
        eligible: &[Candidate],
    ) -> std::result::Result<DrawOutcome, String> {
        match self.remote.is_live().await {
            Ok(true) => {}
            Ok(false) => return Err("remote draw service is not available".into()),
            Err(e) => return Err(e.to_string()),
        }

        let mut excluded: Vec<String> = request.excluded.iter().cloned().collect();
        excluded.sort();
        let wire = RemoteDrawRequest {
            users: request
                .pool
                .iter()
                .map(|c| RemoteUser {
                    username: c.username.clone(),
                    publickey: c.address.clone().unwrap_or_default(),
                })
                .collect(),
            exclude_users: excluded,
            draw_count: request.draw_count,
            seed: request.seed.clone(),
            environment: self.environment.to_string(),
            post_info: request.post.clone(),
        };

        let response = self.remote.draw(&wire).await.map_err(|e| e.to_string())?;
        if !response.success {
            return Err(format!(
                "remote draw failed: {}",
                response.error.as_deref().unwrap_or("no reason given")
            ));
        }
        let (winners, remaining) = map_remote_winners(request, eligible, &response.winners)
            .map_err(|reason| format!("remote result rejected: {}", reason))?;

        // Continue from where a local shuffle of the same pool would stop.
        let mut rng = Lcg::from_seed(&request.seed);
        rng.advance(eligible.len().saturating_sub(1));

        Ok(DrawOutcome {
            result: DrawResult {
                winners,
                pool_size: eligible.len(),
                seed_used: request.seed.clone(),
            },
            executor: Executor::Remote,
            fallback_reason: None,
            github_commit: response.github_commit,
            remaining,
            rng,
        })
    }
}

/// Text to post back into the thread once winners are known.
pub fn announcement(winners: &[Candidate], completed_at: DateTime<Local>) -> String {
    let mentions: Vec<String> = winners.iter().map(|w| format!("@{}", w.username)).collect();
    format!(
        "{}\n\nThe draw is complete; the users above are the winners.\n\nMode: draw only (no airdrop)\n\nWinners: {}\n\nCompleted at: {}\n",
        mentions.join(" "),
        winners.len(),
        completed_at.format("%Y-%m-%d %H:%M:%S"),
    )
}

/// Announcement for a draw that was also paid out.
pub fn payout_announcement(winners: &[Candidate], token: &str, signatures: &[&str], network: Network) -> String {
    let mentions: Vec<String> = winners.iter().map(|w| format!("@{}", w.username)).collect();
    let cluster = if network.is_production() {
        String::new()
    } else {
        format!("?cluster={}", network)
    };
    let link = |signature: &str| format!("https://explorer.solana.com/tx/{}{}", signature, cluster);

    let (transactions, links) = match signatures {
        [] => (
            "Transactions: pending".to_string(),
            "Explorer: check Solana Explorer later".to_string(),
        ),
        [signature] => (format!("TX: {}", signature), format!("Explorer: {}", link(signature))),
        many => (
            std::iter::once("Transactions:".to_string())
                .chain(many.iter().enumerate().map(|(i, s)| format!("Batch {}: {}", i + 1, s)))
                .collect::<Vec<_>>()
                .join("\n"),
            std::iter::once("Explorer:".to_string())
                .chain(many.iter().enumerate().map(|(i, s)| format!("Batch {}: {}", i + 1, link(s))))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    };

    format!(
        "{}\n\nThe airdrop has been sent.\n\nToken: {}\n\n{}\n\n{}",
        mentions.join(" "),
        token,
        transactions,
        links
    )
}
