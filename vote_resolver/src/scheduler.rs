//! Re-resolution of stale contests.
//!
//! Contests are independent of each other: a batch fans them out over a few
//! worker threads, and a failure in one contest is reported without stopping
//! the others. The only serialization point is the contest itself, guarded
//! by [`ContestLocks`] so that two resolutions of the same contest never
//! interleave their writes.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;

use chrono::Utc;
use log::{debug, error, info, warn};
use snafu::prelude::*;

use crate::cache::VoterSnapshot;
use crate::config::{ResolverRules, ResultFlags};
use crate::contest::{Contest, ContestKey};
use crate::resolution::{resolve, PersistSnafu, ResolveError, StoreSnafu};
use crate::store::{BallotStore, OutcomeStore, StoreResult, Validator, VoterDirectory};
use crate::writer::{build_outcome, Outcome};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ******** Contest locks ********

/// At most one resolution in flight per contest.
#[derive(Default)]
pub struct ContestLocks {
    busy: Mutex<HashSet<ContestKey>>,
    released: Condvar,
}

/// Holds the lock of one contest until dropped.
pub struct ContestGuard<'a> {
    locks: &'a ContestLocks,
    key: ContestKey,
}

impl ContestLocks {
    pub fn new() -> ContestLocks {
        ContestLocks::default()
    }

    /// Blocks until the contest is free.
    pub fn acquire(&self, key: &ContestKey) -> ContestGuard<'_> {
        let mut busy = lock(&self.busy);
        while busy.contains(key) {
            debug!("waiting for contest {}", key);
            busy = self
                .released
                .wait(busy)
                .unwrap_or_else(PoisonError::into_inner);
        }
        busy.insert(key.clone());
        ContestGuard {
            locks: self,
            key: key.clone(),
        }
    }

    pub fn try_acquire(&self, key: &ContestKey) -> Option<ContestGuard<'_>> {
        let mut busy = lock(&self.busy);
        if !busy.insert(key.clone()) {
            return None;
        }
        Some(ContestGuard {
            locks: self,
            key: key.clone(),
        })
    }

    pub fn is_locked(&self, key: &ContestKey) -> bool {
        lock(&self.busy).contains(key)
    }
}

impl<'a> ContestGuard<'a> {
    pub fn key(&self) -> &ContestKey {
        &self.key
    }
}

impl<'a> Drop for ContestGuard<'a> {
    fn drop(&mut self) {
        lock(&self.locks.busy).remove(&self.key);
        self.locks.released.notify_all();
    }
}

// ******** Cancellation ********

/// Cancels a batch between two contests. A contest already started always
/// runs to completion.
#[derive(Clone, Default, Debug)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> CancelFlag {
        CancelFlag::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

// ******** Reports ********

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct BatchReport {
    pub locale: String,
    pub resolved: Vec<(ContestKey, ResultFlags)>,
    pub failed: Vec<(ContestKey, String)>,
    /// Stale contests left untouched because the batch was cancelled.
    pub skipped: Vec<ContestKey>,
    /// Union of the result flags of every contest of the locale.
    pub status: ResultFlags,
    /// Set when the locale itself could not be processed.
    pub error: Option<String>,
}

impl BatchReport {
    pub fn new(locale: &str) -> BatchReport {
        BatchReport {
            locale: locale.to_string(),
            resolved: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            status: ResultFlags::EMPTY,
            error: None,
        }
    }

    pub fn locale_failed(locale: &str, message: String) -> BatchReport {
        BatchReport {
            error: Some(message),
            ..BatchReport::new(locale)
        }
    }
}

/// Counts of the contests of a locale that need attention.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct LocaleSummary {
    pub locale: String,
    pub contests: usize,
    pub no_votes: usize,
    pub insufficient: usize,
    pub errors: usize,
    pub disputed: usize,
    pub status: ResultFlags,
}

impl LocaleSummary {
    pub fn needs_attention(&self) -> bool {
        self.status.is_bad()
    }
}

// ******** Resolver ********

/// Runs resolutions against the stores.
pub struct Resolver<'a> {
    ballots: &'a dyn BallotStore,
    voters: &'a dyn VoterDirectory,
    validator: &'a dyn Validator,
    outcomes: &'a dyn OutcomeStore,
    rules: ResolverRules,
    locks: Arc<ContestLocks>,
    cancel: CancelFlag,
}

impl<'a> Resolver<'a> {
    pub fn new(
        ballots: &'a dyn BallotStore,
        voters: &'a dyn VoterDirectory,
        validator: &'a dyn Validator,
        outcomes: &'a dyn OutcomeStore,
        rules: ResolverRules,
    ) -> Resolver<'a> {
        Resolver {
            ballots,
            voters,
            validator,
            outcomes,
            rules,
            locks: Arc::new(ContestLocks::new()),
            cancel: CancelFlag::new(),
        }
    }

    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Resolver<'a> {
        self.cancel = cancel;
        self
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Shares the contest locks of another resolver, so that two resolvers
    /// over the same stores never resolve the same contest at once.
    pub fn with_locks(mut self, locks: Arc<ContestLocks>) -> Resolver<'a> {
        self.locks = locks;
        self
    }

    pub fn locks(&self) -> &ContestLocks {
        &self.locks
    }

    pub fn shared_locks(&self) -> Arc<ContestLocks> {
        self.locks.clone()
    }

    pub fn rules(&self) -> &ResolverRules {
        &self.rules
    }

    /// Resolves one contest and replaces its stored outcome.
    pub fn resolve_contest(&self, key: &ContestKey) -> Result<Outcome, ResolveError> {
        self.resolve_with(key, self.voters)
    }

    fn resolve_with(
        &self,
        key: &ContestKey,
        voters: &dyn VoterDirectory,
    ) -> Result<Outcome, ResolveError> {
        let _guard = self.locks.acquire(key);
        // Ballots cast after this instant make the contest stale again.
        let resolved_at = Utc::now();
        let mut contest =
            Contest::populate(key.clone(), self.ballots, voters).context(StoreSnafu { key: key.clone() })?;
        let resolution = resolve(&mut contest, self.validator, &self.rules)?;
        let outcome = build_outcome(&contest, &resolution, &self.rules);
        self.outcomes
            .persist_outcome(&outcome, resolved_at)
            .context(PersistSnafu { key: key.clone() })?;
        Ok(outcome)
    }

    /// Contests whose ballots changed since their outcome was stored, or
    /// that were never resolved. A contest whose state cannot be read counts
    /// as stale, so that its resolution reports the failure.
    pub fn stale_contests(&self, locale: &str) -> StoreResult<Vec<ContestKey>> {
        let mut stale = Vec::new();
        for base_item in self.ballots.base_items(locale)? {
            let key = ContestKey::new(locale, base_item);
            let is_stale = match self.is_stale(&key) {
                Ok(b) => b,
                Err(e) => {
                    warn!("{}: cannot check staleness: {}", key, e);
                    true
                }
            };
            if is_stale {
                stale.push(key);
            }
        }
        debug!("stale_contests: {}: {}", locale, stale.len());
        Ok(stale)
    }

    fn is_stale(&self, key: &ContestKey) -> StoreResult<bool> {
        Ok(match self.outcomes.outcome_timestamp(key)? {
            Some(resolved_at) => self
                .ballots
                .latest_ballot(key)?
                .map_or(false, |t| t > resolved_at),
            None => {
                !self.ballots.load_candidates(key)?.is_empty()
                    || self.ballots.load_baseline(key)?.is_some()
            }
        })
    }

    /// Resolves every stale contest of a locale, then recomputes the locale
    /// status.
    pub fn run_locale(&self, locale: &str) -> StoreResult<BatchReport> {
        let stale = self.stale_contests(locale)?;
        info!("{}: {} stale contests", locale, stale.len());

        let snapshot = VoterSnapshot::new(self.voters);
        let next = AtomicUsize::new(0);
        let done: Mutex<Vec<(usize, Result<ResultFlags, String>)>> = Mutex::new(Vec::new());
        let workers = self.rules.workers.clamp(1, stale.len().max(1));

        thread::scope(|s| {
            for _ in 0..workers {
                s.spawn(|| loop {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let idx = next.fetch_add(1, Ordering::SeqCst);
                    let key = match stale.get(idx) {
                        Some(key) => key,
                        None => break,
                    };
                    let res = match self.resolve_with(key, &snapshot) {
                        Ok(outcome) => Ok(outcome.result),
                        Err(e @ ResolveError::Persist { .. }) => {
                            error!("{}", e);
                            Err(e.to_string())
                        }
                        Err(e) => {
                            warn!("{}", e);
                            Err(e.to_string())
                        }
                    };
                    lock(&done).push((idx, res));
                });
            }
        });

        let mut done = done.into_inner().unwrap_or_else(PoisonError::into_inner);
        done.sort_by_key(|(idx, _)| *idx);
        let mut report = BatchReport::new(locale);
        let mut seen = vec![false; stale.len()];
        for (idx, res) in done {
            seen[idx] = true;
            match res {
                Ok(flags) => report.resolved.push((stale[idx].clone(), flags)),
                Err(msg) => report.failed.push((stale[idx].clone(), msg)),
            }
        }
        report.skipped = stale
            .iter()
            .zip(seen)
            .filter(|(_, s)| !s)
            .map(|(k, _)| k.clone())
            .collect();
        if !report.skipped.is_empty() {
            info!(
                "{}: cancelled, {} contests left stale",
                locale,
                report.skipped.len()
            );
        }

        report.status = self.update_locale_status(locale)?;
        info!(
            "{}: resolved {} failed {} status {}",
            locale,
            report.resolved.len(),
            report.failed.len(),
            report.status
        );
        Ok(report)
    }

    /// Runs every locale of the ballot store, stopping early if cancelled.
    pub fn run_all(&self) -> StoreResult<Vec<BatchReport>> {
        let mut reports = Vec::new();
        for locale in self.ballots.locales()? {
            if self.cancel.is_cancelled() {
                break;
            }
            match self.run_locale(&locale) {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!("{}: locale failed: {}", locale, e);
                    reports.push(BatchReport::locale_failed(&locale, e.to_string()));
                }
            }
        }
        Ok(reports)
    }

    /// Stores the union of the result flags of every contest of the locale.
    pub fn update_locale_status(&self, locale: &str) -> StoreResult<ResultFlags> {
        let status = self
            .outcomes
            .result_flags(locale)?
            .into_iter()
            .fold(ResultFlags::EMPTY, |acc, f| acc | f);
        self.outcomes.set_locale_status(locale, status)?;
        Ok(status)
    }

    pub fn locale_summary(&self, locale: &str) -> StoreResult<LocaleSummary> {
        let flags = self.outcomes.result_flags(locale)?;
        let count = |f: ResultFlags| flags.iter().filter(|r| r.contains(f)).count();
        Ok(LocaleSummary {
            locale: locale.to_string(),
            contests: flags.len(),
            no_votes: count(ResultFlags::NO_VOTES),
            insufficient: count(ResultFlags::INSUFFICIENT),
            errors: count(ResultFlags::ERROR),
            disputed: count(ResultFlags::DISPUTED),
            status: self.outcomes.locale_status(locale)?.unwrap_or(ResultFlags::EMPTY),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StoreBuilder;
    use crate::config::{ItemId, Status, Tier};
    use crate::store::{
        AcceptAll, BallotRow, BaselineRow, BoxError, CandidateRow, DefaultVote, MemoryStore,
    };
    use chrono::{DateTime, Utc};
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn survey() -> MemoryStore {
        StoreBuilder::new()
            .voter(1, "Apple", Tier::Vetter)
            .voter(2, "Google", Tier::Vetter)
            .voter(3, "IBM", Tier::Street)
            .contest("fr", 100)
            .candidate(101, "Bonjour")
            .ballot(1, 101)
            .ballot(2, 101)
            .contest("fr", 200)
            .candidate(201, "Oui")
            .candidate(202, "Si")
            .ballot(1, 201)
            .ballot(2, 202)
            .contest("fr", 300)
            .candidate(301, "Non")
            .contest("fr", 400)
            .baseline(400, "Au revoir", Status::Approved)
            .contest("de", 100)
            .candidate(101, "Hallo")
            .ballot(3, 101)
            .build()
    }

    fn rules(workers: usize) -> ResolverRules {
        ResolverRules {
            workers,
            ..ResolverRules::DEFAULT_RULES
        }
    }

    #[test]
    fn batch_resolves_every_contest() {
        init();
        let store = survey();
        let resolver = Resolver::new(&store, &store, &AcceptAll, &store, rules(3));
        let report = resolver.run_locale("fr").unwrap();
        assert_eq!(report.resolved.len(), 4);
        assert!(report.failed.is_empty());
        assert!(report.skipped.is_empty());

        let flags: Vec<ResultFlags> = report.resolved.iter().map(|(_, f)| *f).collect();
        assert_eq!(
            flags,
            vec![
                ResultFlags::GOOD | ResultFlags::UNANIMOUS,
                ResultFlags::DISPUTED,
                ResultFlags::NO_VOTES,
                ResultFlags::GOOD | ResultFlags::NO_CHANGE,
            ]
        );
        assert_eq!(
            report.status,
            ResultFlags::GOOD
                | ResultFlags::UNANIMOUS
                | ResultFlags::DISPUTED
                | ResultFlags::NO_VOTES
                | ResultFlags::NO_CHANGE
        );
        assert_eq!(store.locale_status("fr").unwrap(), Some(report.status));

        let stored = store.stored_outcome(&ContestKey::new("fr", 100)).unwrap().unwrap();
        assert_eq!(stored.outcome.winning_value(), Some("Bonjour"));
        assert_eq!(stored.outcome.status, Status::Approved);

        let summary = resolver.locale_summary("fr").unwrap();
        assert_eq!(summary.contests, 4);
        assert_eq!(summary.disputed, 1);
        assert_eq!(summary.no_votes, 1);
        assert!(summary.needs_attention());
    }

    #[test]
    fn second_run_is_a_no_op() {
        init();
        let store = survey();
        let resolver = Resolver::new(&store, &store, &AcceptAll, &store, rules(1));
        resolver.run_locale("fr").unwrap();
        let before = store.stored_outcome(&ContestKey::new("fr", 200)).unwrap();
        assert!(resolver.stale_contests("fr").unwrap().is_empty());
        let report = resolver.run_locale("fr").unwrap();
        assert!(report.resolved.is_empty());
        assert_eq!(store.stored_outcome(&ContestKey::new("fr", 200)).unwrap(), before);

        let again = resolver.resolve_contest(&ContestKey::new("fr", 200)).unwrap();
        assert_eq!(Some(again), before.map(|s| s.outcome));
    }

    #[test]
    fn new_ballot_makes_a_contest_stale() {
        init();
        let store = survey();
        let resolver = Resolver::new(&store, &store, &AcceptAll, &store, rules(1));
        resolver.run_all().unwrap();
        let key = ContestKey::new("fr", 200);
        let resolved_at = store.outcome_timestamp(&key).unwrap().unwrap();
        store.cast_ballot(
            &key,
            BallotRow {
                voter: 3,
                candidate: 202,
                cast_at: resolved_at + Duration::seconds(1),
            },
        );
        assert_eq!(resolver.stale_contests("fr").unwrap(), vec![key.clone()]);
        let outcome = resolver.resolve_contest(&key).unwrap();
        assert_eq!(outcome.winning_value(), Some("Si"));
        assert_eq!(outcome.result, ResultFlags::GOOD);
    }

    #[test]
    fn failed_contest_does_not_block_the_others() {
        init();
        let store = survey();
        let blocked = ContestKey::new("fr", 200);
        store.reject_outcomes_for(&blocked);
        let resolver = Resolver::new(&store, &store, &AcceptAll, &store, rules(2));
        let report = resolver.run_locale("fr").unwrap();
        assert_eq!(report.resolved.len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, blocked);
        assert_eq!(store.stored_outcome(&blocked).unwrap(), None);

        store.accept_outcomes_for(&blocked);
        assert_eq!(resolver.stale_contests("fr").unwrap(), vec![blocked]);
        let report = resolver.run_locale("fr").unwrap();
        assert_eq!(report.resolved.len(), 1);
    }

    struct CancelOnFirstUse(CancelFlag);

    impl Validator for CancelOnFirstUse {
        fn is_invalid(&self, _: &str, _: ItemId, _: ItemId, _: &str) -> Result<bool, BoxError> {
            self.0.cancel();
            Ok(false)
        }
    }

    #[test]
    fn cancellation_stops_between_contests() {
        init();
        let store = survey();
        let cancel = CancelFlag::new();
        let validator = CancelOnFirstUse(cancel.clone());
        let resolver =
            Resolver::new(&store, &store, &validator, &store, rules(1)).with_cancel_flag(cancel);
        let report = resolver.run_locale("fr").unwrap();
        assert_eq!(report.resolved.len(), 1);
        assert_eq!(report.skipped.len(), 3);
        assert_eq!(report.status, ResultFlags::GOOD | ResultFlags::UNANIMOUS);
        assert!(resolver.cancel_flag().is_cancelled());
        assert!(resolver.run_all().unwrap().is_empty());
    }

    #[test]
    fn contest_lock_is_exclusive() {
        let locks = ContestLocks::new();
        let key = ContestKey::new("fr", 100);
        let other = ContestKey::new("fr", 200);
        let guard = locks.acquire(&key);
        assert!(locks.try_acquire(&key).is_none());
        assert!(locks.try_acquire(&other).is_some());
        thread::scope(|s| {
            let waiter = s.spawn(|| {
                let g = locks.acquire(&key);
                g.key().clone()
            });
            thread::sleep(StdDuration::from_millis(20));
            assert!(locks.is_locked(&key));
            drop(guard);
            assert_eq!(waiter.join().unwrap(), key);
        });
        assert!(!locks.is_locked(&key));
    }

    #[test]
    fn resolvers_can_share_contest_locks() {
        init();
        let store = survey();
        let first = Resolver::new(&store, &store, &AcceptAll, &store, rules(1));
        let second = Resolver::new(&store, &store, &AcceptAll, &store, rules(1))
            .with_locks(first.shared_locks());
        let key = ContestKey::new("fr", 100);
        let guard = first.locks().acquire(&key);
        assert!(second.locks().is_locked(&key));
        thread::scope(|s| {
            let pending = s.spawn(|| second.resolve_contest(&key));
            thread::sleep(StdDuration::from_millis(20));
            assert_eq!(store.stored_outcome(&key).unwrap(), None);
            drop(guard);
            let outcome = pending.join().unwrap().unwrap();
            assert_eq!(outcome.winning_value(), Some("Bonjour"));
        });
        assert!(store.stored_outcome(&key).unwrap().is_some());
        assert!(!first.locks().is_locked(&key));
    }

    /// Delegates to a memory store, but cannot read one contest nor the
    /// contests of one locale.
    struct FlakyStore<'a> {
        inner: &'a MemoryStore,
        broken_contest: ContestKey,
        broken_locale: &'a str,
    }

    impl<'a> FlakyStore<'a> {
        fn check(&self, key: &ContestKey) -> StoreResult<()> {
            if *key == self.broken_contest {
                whatever!("cannot read contest {}", key);
            }
            Ok(())
        }
    }

    impl<'a> BallotStore for FlakyStore<'a> {
        fn locales(&self) -> StoreResult<Vec<String>> {
            self.inner.locales()
        }

        fn base_items(&self, locale: &str) -> StoreResult<Vec<ItemId>> {
            if locale == self.broken_locale {
                whatever!("cannot list the contests of {}", locale);
            }
            self.inner.base_items(locale)
        }

        fn load_ballots(&self, key: &ContestKey) -> StoreResult<Vec<BallotRow>> {
            self.inner.load_ballots(key)
        }

        fn load_candidates(&self, key: &ContestKey) -> StoreResult<Vec<CandidateRow>> {
            self.check(key)?;
            self.inner.load_candidates(key)
        }

        fn load_baseline(&self, key: &ContestKey) -> StoreResult<Option<BaselineRow>> {
            self.inner.load_baseline(key)
        }

        fn load_defaults(&self, key: &ContestKey) -> StoreResult<Vec<DefaultVote>> {
            self.inner.load_defaults(key)
        }

        fn latest_ballot(&self, key: &ContestKey) -> StoreResult<Option<DateTime<Utc>>> {
            self.inner.latest_ballot(key)
        }
    }

    #[test]
    fn unreadable_contest_is_reported_as_failed() {
        init();
        let store = survey();
        let broken = ContestKey::new("fr", 200);
        let flaky = FlakyStore {
            inner: &store,
            broken_contest: broken.clone(),
            broken_locale: "",
        };
        let resolver = Resolver::new(&flaky, &store, &AcceptAll, &store, rules(2));
        assert!(resolver.stale_contests("fr").unwrap().contains(&broken));
        let report = resolver.run_locale("fr").unwrap();
        assert_eq!(report.resolved.len(), 3);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, broken);
        assert_eq!(report.error, None);
        let stored = store.stored_outcome(&ContestKey::new("fr", 100)).unwrap().unwrap();
        assert_eq!(stored.outcome.winning_value(), Some("Bonjour"));
        assert_eq!(store.stored_outcome(&broken).unwrap(), None);
    }

    #[test]
    fn unreadable_locale_does_not_stop_the_batch() {
        init();
        let store = survey();
        let flaky = FlakyStore {
            inner: &store,
            broken_contest: ContestKey::new("fr", 200),
            broken_locale: "de",
        };
        let resolver = Resolver::new(&flaky, &store, &AcceptAll, &store, rules(1));
        let reports = resolver.run_all().unwrap();
        assert_eq!(reports.len(), 2);
        let de = reports.iter().find(|r| r.locale == "de").unwrap();
        assert!(de.error.is_some());
        assert!(de.resolved.is_empty());
        let fr = reports.iter().find(|r| r.locale == "fr").unwrap();
        assert_eq!(fr.error, None);
        assert_eq!(fr.resolved.len(), 3);
        assert_eq!(fr.failed.len(), 1);
    }
}
