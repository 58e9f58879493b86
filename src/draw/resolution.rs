use super::{pick, profile::ProfileLookup, Candidate, DrawOutcome};
use crate::{
    error::{DropError, Result},
    events::{Event, EventSink, LookupStatus, ResolutionProgress},
};
use std::collections::HashSet;

/// Extra attempts after a failed profile lookup.
const LOOKUP_RETRIES: usize = 2;

/// What to do with winners that still have no address after profile lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnresolvedPolicy {
    /// Drop them and draw the same number of replacements.
    Replace,
    /// Keep them, flagged as not distributable.
    Keep,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedWinner {
    pub candidate: Candidate,
    pub distributable: bool,
}

#[derive(Debug, Clone)]
pub struct ResolvedDraw {
    pub winners: Vec<ResolvedWinner>,
    /// Winners that were dropped for lack of an address.
    pub replaced: Vec<Candidate>,
    pub lookups: usize,
}

impl ResolvedDraw {
    pub fn distributable(&self) -> impl Iterator<Item = &Candidate> {
        self.winners
            .iter()
            .filter(|w| w.distributable)
            .map(|w| &w.candidate)
    }
}

fn progress(events: &impl EventSink, current: usize, total: usize, username: &str, status: LookupStatus) {
    events.emit(Event::ResolutionProgress(ResolutionProgress {
        current,
        total,
        username: username.to_string(),
        status,
    }));
}

/// Look up every addressless winner not tried before. Returns the number of
/// lookups made.
async fn lookup_missing<P: ProfileLookup>(
    winners: &mut [Candidate],
    lookup: &P,
    attempted: &mut HashSet<String>,
    events: &impl EventSink,
) -> usize {
    let pending: Vec<usize> = winners
        .iter()
        .enumerate()
        .filter(|(_, c)| c.address.is_none() && !attempted.contains(&c.username))
        .map(|(i, _)| i)
        .collect();
    if pending.is_empty() {
        return 0;
    }

    let total = pending.len();
    for (n, &index) in pending.iter().enumerate() {
        let username = winners[index].username.clone();
        attempted.insert(username.clone());
        progress(events, n + 1, total, &username, LookupStatus::Start);

        let mut attempt = lookup.lookup(&username).await;
        for _ in 0..LOOKUP_RETRIES {
            if attempt.is_ok() {
                break;
            }
            progress(events, n + 1, total, &username, LookupStatus::Retry);
            attempt = lookup.lookup(&username).await;
        }

        let status = match attempt {
            Ok(Some(found)) => match found.addresses.first().or(found.domains.first()) {
                Some(address) => {
                    winners[index].address = Some(address.clone());
                    LookupStatus::Success
                }
                None => LookupStatus::NotFound,
            },
            Ok(None) => LookupStatus::NotFound,
            Err(_) => LookupStatus::Error,
        };
        progress(events, n + 1, total, &username, status);
    }

    progress(events, total, total, "", LookupStatus::Complete);
    total
}

/// Fill in missing winner addresses from user profiles, then apply `policy`
/// to whoever is still unresolved. Replacements come from the eligible
/// candidates that did not win, drawn with the generator the draw left off
/// with, and go through the same lookup.
pub async fn resolve_winners<P: ProfileLookup>(
    outcome: DrawOutcome,
    lookup: &P,
    policy: UnresolvedPolicy,
    events: &impl EventSink,
) -> Result<ResolvedDraw> {
    let DrawOutcome {
        result,
        mut remaining,
        mut rng,
        ..
    } = outcome;
    let mut winners = result.winners;
    let mut replaced = Vec::new();
    let mut attempted = HashSet::new();
    let mut lookups = 0;

    loop {
        lookups += lookup_missing(&mut winners, lookup, &mut attempted, events).await;

        let unresolved: Vec<usize> = winners
            .iter()
            .enumerate()
            .filter(|(_, c)| c.address.is_none())
            .map(|(i, _)| i)
            .collect();
        if unresolved.is_empty() || policy == UnresolvedPolicy::Keep {
            break;
        }

        if remaining.len() < unresolved.len() {
            return Err(DropError::InsufficientCandidates {
                requested: unresolved.len(),
                available: remaining.len(),
            });
        }
        let (picked, rest) = pick(&remaining, unresolved.len(), &mut rng);
        remaining = rest;

        for (position, replacement) in unresolved.into_iter().zip(picked) {
            let removed = std::mem::replace(&mut winners[position], replacement);
            events.emit(Event::WinnerReplaced {
                removed: removed.username.clone(),
                replacement: winners[position].username.clone(),
            });
            replaced.push(removed);
        }
    }

    Ok(ResolvedDraw {
        winners: winners
            .into_iter()
            .map(|candidate| ResolvedWinner {
                distributable: candidate.address.is_some(),
                candidate,
            })
            .collect(),
        replaced,
        lookups,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        draw::{tests::candidate, DrawResult, Executor, Lcg, Seed},
        events::Recorder,
        recipient::AddressMatches,
    };
    use std::{collections::HashMap, sync::Mutex};

    #[derive(Default)]
    struct FakeProfiles {
        profiles: HashMap<String, Vec<String>>,
        failures: Mutex<HashMap<String, usize>>,
        calls: Mutex<Vec<String>>,
    }

    impl FakeProfiles {
        fn with(mut self, username: &str, addresses: &[&str]) -> Self {
            self.profiles.insert(
                username.to_string(),
                addresses.iter().map(|a| a.to_string()).collect(),
            );
            self
        }

        fn failing(self, username: &str) -> Self {
            self.flaky(username, usize::MAX)
        }

        /// Fail the first `times` lookups of `username`.
        fn flaky(self, username: &str, times: usize) -> Self {
            self.failures.lock().unwrap().insert(username.to_string(), times);
            self
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl ProfileLookup for FakeProfiles {
        async fn lookup(&self, username: &str) -> Result<Option<AddressMatches>> {
            self.calls.lock().unwrap().push(username.to_string());
            if let Some(left) = self.failures.lock().unwrap().get_mut(username) {
                if *left > 0 {
                    *left -= 1;
                    return Err(DropError::network("profile lookup", "503"));
                }
            }
            Ok(self.profiles.get(username).map(|addresses| AddressMatches {
                addresses: addresses.clone(),
                domains: Vec::new(),
            }))
        }
    }

    fn outcome(winners: Vec<Candidate>, remaining: Vec<Candidate>) -> DrawOutcome {
        DrawOutcome {
            result: DrawResult {
                pool_size: winners.len() + remaining.len(),
                winners,
                seed_used: Seed::Number(0),
            },
            executor: Executor::Local,
            fallback_reason: None,
            github_commit: None,
            remaining,
            rng: Lcg::new(0),
        }
    }

    fn standard_outcome() -> DrawOutcome {
        outcome(
            vec![candidate("a", Some("Pa")), candidate("b", None), candidate("c", None)],
            vec![candidate("d", Some("Pd")), candidate("e", None), candidate("f", Some("Pf"))],
        )
    }

    fn standard_profiles() -> FakeProfiles {
        FakeProfiles::default().with("c", &["Pc"]).with("e", &[])
    }

    #[tokio::test]
    async fn test_replace_draws_exactly_as_many() {
        let profiles = standard_profiles();
        let recorder = Recorder::default();

        let resolved = resolve_winners(standard_outcome(), &profiles, UnresolvedPolicy::Replace, &recorder)
            .await
            .unwrap();

        let names: Vec<&str> = resolved.winners.iter().map(|w| w.candidate.username.as_str()).collect();
        assert_eq!(names, vec!["a", "f", "c"]);
        assert!(resolved.winners.iter().all(|w| w.distributable));
        assert_eq!(resolved.winners[2].candidate.address.as_deref(), Some("Pc"));
        assert_eq!(resolved.replaced.len(), 1);
        assert_eq!(resolved.replaced[0].username, "b");
        assert_eq!(profiles.calls(), vec!["b", "c"]);
        assert!(recorder.events().contains(&Event::WinnerReplaced {
            removed: "b".into(),
            replacement: "f".into(),
        }));
    }

    #[tokio::test]
    async fn test_keep_flags_unresolved() {
        let profiles = standard_profiles();

        let resolved = resolve_winners(standard_outcome(), &profiles, UnresolvedPolicy::Keep, &Recorder::default())
            .await
            .unwrap();

        assert_eq!(resolved.winners.len(), 3);
        assert!(!resolved.winners[1].distributable);
        assert!(resolved.winners[2].distributable);
        assert!(resolved.replaced.is_empty());
        assert_eq!(resolved.distributable().count(), 2);
    }

    #[tokio::test]
    async fn test_replacements_are_resolved_recursively() {
        let profiles = FakeProfiles::default().with("e", &[]);
        let draw = outcome(vec![candidate("b", None)], vec![candidate("e", None)]);

        let err = resolve_winners(draw, &profiles, UnresolvedPolicy::Replace, &Recorder::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            DropError::InsufficientCandidates {
                requested: 1,
                available: 0
            }
        ));
        assert_eq!(profiles.calls(), vec!["b", "e"]);
    }

    #[tokio::test]
    async fn test_progress_events() {
        let profiles = standard_profiles().failing("b");
        let recorder = Recorder::default();

        let resolved = resolve_winners(standard_outcome(), &profiles, UnresolvedPolicy::Keep, &recorder)
            .await
            .unwrap();
        assert_eq!(resolved.lookups, 2);

        let progress: Vec<ResolutionProgress> = recorder
            .events()
            .into_iter()
            .filter_map(|e| match e {
                Event::ResolutionProgress(p) => Some(p),
                _ => None,
            })
            .collect();
        let statuses: Vec<LookupStatus> = progress.iter().map(|p| p.status).collect();
        assert_eq!(
            statuses,
            vec![
                LookupStatus::Start,
                LookupStatus::Retry,
                LookupStatus::Retry,
                LookupStatus::Error,
                LookupStatus::Start,
                LookupStatus::Success,
                LookupStatus::Complete,
            ]
        );
        assert_eq!(progress[3].percentage(), 50);
        assert_eq!(progress[6].percentage(), 100);
        assert_eq!(profiles.calls(), vec!["b", "b", "b", "c"]);
    }

    #[tokio::test]
    async fn test_failed_lookup_is_retried() {
        let profiles = FakeProfiles::default().with("b", &["Pb"]).flaky("b", 1);
        let draw = outcome(vec![candidate("b", None)], Vec::new());
        let recorder = Recorder::default();

        let resolved = resolve_winners(draw, &profiles, UnresolvedPolicy::Replace, &recorder)
            .await
            .unwrap();

        assert_eq!(resolved.winners[0].candidate.address.as_deref(), Some("Pb"));
        assert_eq!(profiles.calls(), vec!["b", "b"]);
        assert!(recorder.events().iter().any(|e| matches!(
            e,
            Event::ResolutionProgress(ResolutionProgress {
                status: LookupStatus::Retry,
                ..
            })
        )));
    }

    #[tokio::test]
    async fn test_nothing_to_resolve() {
        let profiles = FakeProfiles::default();
        let draw = outcome(vec![candidate("a", Some("Pa"))], Vec::new());

        let resolved = resolve_winners(draw, &profiles, UnresolvedPolicy::Replace, &Recorder::default())
            .await
            .unwrap();
        assert_eq!(resolved.lookups, 0);
        assert!(profiles.calls().is_empty());
    }
}
