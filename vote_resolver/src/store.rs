//! Contracts between the resolver and the storage that feeds it, plus an
//! in-memory implementation of all of them.
//!
//! The resolver never talks to a database directly: everything it reads goes
//! through [`BallotStore`] and [`VoterDirectory`], the validation predicate is
//! a [`Validator`], and results are written through [`OutcomeStore`].

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::debug;
use snafu::prelude::*;

use crate::config::{ItemId, ResultFlags, Status, Tier, VoterId};
use crate::contest::ContestKey;
use crate::writer::Outcome;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ******** Rows *********

/// One ballot: a voter choosing a candidate item for a base item. The
/// candidate is [`crate::ABSTAIN`] for an explicit abstention.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BallotRow {
    pub voter: VoterId,
    pub candidate: ItemId,
    pub cast_at: DateTime<Utc>,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CandidateRow {
    pub item: ItemId,
    pub value: Option<String>,
    pub annotation: Option<String>,
}

/// The value on record for a base item before the current round of voting.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BaselineRow {
    pub item: ItemId,
    pub value: Option<String>,
    pub annotation: Option<String>,
    pub status: Status,
}

/// "Absent an explicit vote, `organization` chooses `item` with `weight`."
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct DefaultVote {
    pub organization: String,
    pub item: ItemId,
    pub weight: u32,
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Voter {
    pub id: VoterId,
    pub organization: String,
    pub tier: Tier,
    pub active: bool,
}

/// An outcome as the store remembers it.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct StoredOutcome {
    pub outcome: Outcome,
    pub resolved_at: DateTime<Utc>,
}

// ******** Errors *********

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum StoreError {
    #[snafu(display("the store rejected the outcome of contest {key}: {message}"))]
    PersistRejected { key: ContestKey, message: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error + Send + Sync>, Some)))]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type StoreResult<T> = Result<T, StoreError>;

// ******** Contracts *********

pub trait BallotStore: Send + Sync {
    fn locales(&self) -> StoreResult<Vec<String>>;

    /// Every base item of the locale that has candidates, ballots or a
    /// baseline.
    fn base_items(&self, locale: &str) -> StoreResult<Vec<ItemId>>;

    fn load_ballots(&self, key: &ContestKey) -> StoreResult<Vec<BallotRow>>;

    fn load_candidates(&self, key: &ContestKey) -> StoreResult<Vec<CandidateRow>>;

    fn load_baseline(&self, key: &ContestKey) -> StoreResult<Option<BaselineRow>>;

    fn load_defaults(&self, _key: &ContestKey) -> StoreResult<Vec<DefaultVote>> {
        Ok(Vec::new())
    }

    fn latest_ballot(&self, key: &ContestKey) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.load_ballots(key)?.iter().map(|b| b.cast_at).max())
    }
}

pub trait VoterDirectory: Send + Sync {
    fn load_voter(&self, id: VoterId) -> Option<Voter>;
}

/// The validation predicate. `Ok(true)` disqualifies the candidate; an error
/// aborts the resolution of the contest.
pub trait Validator: Send + Sync {
    fn is_invalid(
        &self,
        locale: &str,
        candidate: ItemId,
        base_item: ItemId,
        value: &str,
    ) -> Result<bool, BoxError>;
}

/// A validator that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl Validator for AcceptAll {
    fn is_invalid(&self, _: &str, _: ItemId, _: ItemId, _: &str) -> Result<bool, BoxError> {
        Ok(false)
    }
}

pub trait OutcomeStore: Send + Sync {
    /// Replaces everything stored for the contest with this outcome. Either
    /// all of it is written or none of it.
    fn persist_outcome(&self, outcome: &Outcome, resolved_at: DateTime<Utc>) -> StoreResult<()>;

    fn stored_outcome(&self, key: &ContestKey) -> StoreResult<Option<StoredOutcome>>;

    fn outcome_timestamp(&self, key: &ContestKey) -> StoreResult<Option<DateTime<Utc>>> {
        Ok(self.stored_outcome(key)?.map(|s| s.resolved_at))
    }

    /// The result flags of every stored outcome of the locale.
    fn result_flags(&self, locale: &str) -> StoreResult<Vec<ResultFlags>>;

    fn set_locale_status(&self, locale: &str, status: ResultFlags) -> StoreResult<()>;

    fn locale_status(&self, locale: &str) -> StoreResult<Option<ResultFlags>>;
}

// ******** In-memory store *********

#[derive(Debug, Default)]
struct InputTables {
    voters: HashMap<VoterId, Voter>,
    candidates: BTreeMap<ContestKey, Vec<CandidateRow>>,
    baselines: BTreeMap<ContestKey, BaselineRow>,
    ballots: BTreeMap<ContestKey, Vec<BallotRow>>,
    defaults: BTreeMap<ContestKey, Vec<DefaultVote>>,
}

#[derive(Debug, Default)]
struct OutputTables {
    outcomes: BTreeMap<ContestKey, StoredOutcome>,
    // (organization, locale, base item)
    disputes: BTreeSet<(String, String, ItemId)>,
    locale_status: HashMap<String, ResultFlags>,
    rejecting: HashSet<ContestKey>,
}

/// Ballots, voters and outcomes held in memory.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inputs: Mutex<InputTables>,
    outputs: Mutex<OutputTables>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryStore {
    pub fn new() -> MemoryStore {
        MemoryStore::default()
    }

    pub fn add_voter(&self, voter: Voter) {
        lock(&self.inputs).voters.insert(voter.id, voter);
    }

    pub fn add_candidate(&self, key: &ContestKey, row: CandidateRow) {
        lock(&self.inputs)
            .candidates
            .entry(key.clone())
            .or_default()
            .push(row);
    }

    pub fn set_baseline(&self, key: &ContestKey, row: BaselineRow) {
        lock(&self.inputs).baselines.insert(key.clone(), row);
    }

    pub fn cast_ballot(&self, key: &ContestKey, row: BallotRow) {
        lock(&self.inputs)
            .ballots
            .entry(key.clone())
            .or_default()
            .push(row);
    }

    pub fn add_default(&self, key: &ContestKey, vote: DefaultVote) {
        lock(&self.inputs)
            .defaults
            .entry(key.clone())
            .or_default()
            .push(vote);
    }

    /// Makes every later write of an outcome for this contest fail.
    pub fn reject_outcomes_for(&self, key: &ContestKey) {
        lock(&self.outputs).rejecting.insert(key.clone());
    }

    pub fn accept_outcomes_for(&self, key: &ContestKey) {
        lock(&self.outputs).rejecting.remove(key);
    }

    /// Organizations recorded in dispute for the locale, with the base item.
    pub fn disputes(&self, locale: &str) -> Vec<(String, ItemId)> {
        lock(&self.outputs)
            .disputes
            .iter()
            .filter(|(_, l, _)| l == locale)
            .map(|(org, _, base)| (org.clone(), *base))
            .collect()
    }
}

impl BallotStore for MemoryStore {
    fn locales(&self) -> StoreResult<Vec<String>> {
        let inputs = lock(&self.inputs);
        let locales: BTreeSet<String> = inputs
            .candidates
            .keys()
            .chain(inputs.baselines.keys())
            .chain(inputs.ballots.keys())
            .map(|k| k.locale.clone())
            .collect();
        Ok(locales.into_iter().collect())
    }

    fn base_items(&self, locale: &str) -> StoreResult<Vec<ItemId>> {
        let inputs = lock(&self.inputs);
        let items: BTreeSet<ItemId> = inputs
            .candidates
            .keys()
            .chain(inputs.baselines.keys())
            .chain(inputs.ballots.keys())
            .filter(|k| k.locale == locale)
            .map(|k| k.base_item)
            .collect();
        Ok(items.into_iter().collect())
    }

    fn load_ballots(&self, key: &ContestKey) -> StoreResult<Vec<BallotRow>> {
        Ok(lock(&self.inputs)
            .ballots
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn load_candidates(&self, key: &ContestKey) -> StoreResult<Vec<CandidateRow>> {
        Ok(lock(&self.inputs)
            .candidates
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    fn load_baseline(&self, key: &ContestKey) -> StoreResult<Option<BaselineRow>> {
        Ok(lock(&self.inputs).baselines.get(key).cloned())
    }

    fn load_defaults(&self, key: &ContestKey) -> StoreResult<Vec<DefaultVote>> {
        Ok(lock(&self.inputs)
            .defaults
            .get(key)
            .cloned()
            .unwrap_or_default())
    }
}

impl VoterDirectory for MemoryStore {
    fn load_voter(&self, id: VoterId) -> Option<Voter> {
        lock(&self.inputs).voters.get(&id).cloned()
    }
}

impl OutcomeStore for MemoryStore {
    fn persist_outcome(&self, outcome: &Outcome, resolved_at: DateTime<Utc>) -> StoreResult<()> {
        let key = &outcome.key;
        let mut outputs = lock(&self.outputs);
        if outputs.rejecting.contains(key) {
            return PersistRejectedSnafu {
                key: key.clone(),
                message: "writes are disabled for this contest",
            }
            .fail();
        }
        // The whole replacement happens under one lock, so readers see either
        // the old outcome or the new one.
        outputs
            .disputes
            .retain(|(_, l, b)| !(*l == key.locale && *b == key.base_item));
        for org in outcome.disputes.iter() {
            outputs
                .disputes
                .insert((org.clone(), key.locale.clone(), key.base_item));
        }
        outputs.outcomes.insert(
            key.clone(),
            StoredOutcome {
                outcome: outcome.clone(),
                resolved_at,
            },
        );
        debug!("persist_outcome: {} -> {}", key, outcome.result);
        Ok(())
    }

    fn stored_outcome(&self, key: &ContestKey) -> StoreResult<Option<StoredOutcome>> {
        Ok(lock(&self.outputs).outcomes.get(key).cloned())
    }

    fn result_flags(&self, locale: &str) -> StoreResult<Vec<ResultFlags>> {
        Ok(lock(&self.outputs)
            .outcomes
            .iter()
            .filter(|(k, _)| k.locale == locale)
            .map(|(_, s)| s.outcome.result)
            .collect())
    }

    fn set_locale_status(&self, locale: &str, status: ResultFlags) -> StoreResult<()> {
        lock(&self.outputs)
            .locale_status
            .insert(locale.to_string(), status);
        Ok(())
    }

    fn locale_status(&self, locale: &str) -> StoreResult<Option<ResultFlags>> {
        Ok(lock(&self.outputs).locale_status.get(locale).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::OutputRecord;

    fn outcome(locale: &str, base: ItemId, disputes: &[&str]) -> Outcome {
        Outcome {
            key: ContestKey::new(locale, base),
            winner: Some(OutputRecord {
                tag: None,
                item: base + 1,
                value: Some("x".to_string()),
                status: Status::Provisional,
            }),
            alternates: Vec::new(),
            disputes: disputes.iter().map(|s| s.to_string()).collect(),
            conflicts: BTreeSet::new(),
            status: Status::Provisional,
            result: ResultFlags::GOOD,
        }
    }

    #[test]
    fn base_items_cover_all_inputs() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store.add_candidate(
            &ContestKey::new("fr", 10),
            CandidateRow {
                item: 11,
                value: Some("a".to_string()),
                annotation: None,
            },
        );
        store.cast_ballot(
            &ContestKey::new("fr", 20),
            BallotRow {
                voter: 1,
                candidate: 21,
                cast_at: now,
            },
        );
        store.set_baseline(
            &ContestKey::new("de", 30),
            BaselineRow {
                item: 30,
                value: None,
                annotation: None,
                status: Status::Missing,
            },
        );
        assert_eq!(store.base_items("fr").unwrap(), vec![10, 20]);
        assert_eq!(store.locales().unwrap(), vec!["de", "fr"]);
        assert_eq!(
            store.latest_ballot(&ContestKey::new("fr", 20)).unwrap(),
            Some(now)
        );
    }

    #[test]
    fn persist_replaces_disputes() {
        let store = MemoryStore::new();
        let now = Utc::now();
        store
            .persist_outcome(&outcome("fr", 10, &["Apple", "Google"]), now)
            .unwrap();
        store.persist_outcome(&outcome("fr", 20, &["IBM"]), now).unwrap();
        assert_eq!(store.disputes("fr").len(), 3);
        store.persist_outcome(&outcome("fr", 10, &[]), now).unwrap();
        assert_eq!(store.disputes("fr"), vec![("IBM".to_string(), 20)]);
        assert_eq!(store.result_flags("fr").unwrap().len(), 2);
    }

    #[test]
    fn rejected_write_keeps_previous_outcome() {
        let store = MemoryStore::new();
        let key = ContestKey::new("fr", 10);
        let first = Utc::now();
        store
            .persist_outcome(&outcome("fr", 10, &["Apple"]), first)
            .unwrap();
        store.reject_outcomes_for(&key);
        let res = store.persist_outcome(&outcome("fr", 10, &[]), Utc::now());
        assert!(matches!(res, Err(StoreError::PersistRejected { .. })));
        assert_eq!(store.outcome_timestamp(&key).unwrap(), Some(first));
        assert_eq!(store.disputes("fr"), vec![("Apple".to_string(), 10)]);
    }
}
