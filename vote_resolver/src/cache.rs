//! Explicitly owned caches. Nothing here is global: each cache belongs to
//! whoever created it, and is dropped with it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use log::debug;

use crate::config::{ItemId, VoterId};
use crate::store::{BoxError, Validator, Voter, VoterDirectory};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Memo over a voter directory, meant to live for a single batch run so
/// that changes to the directory are picked up by the next run.
pub struct VoterSnapshot<'a> {
    directory: &'a dyn VoterDirectory,
    voters: Mutex<HashMap<VoterId, Option<Voter>>>,
}

impl<'a> VoterSnapshot<'a> {
    pub fn new(directory: &'a dyn VoterDirectory) -> VoterSnapshot<'a> {
        VoterSnapshot {
            directory,
            voters: Mutex::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        lock(&self.voters).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<'a> VoterDirectory for VoterSnapshot<'a> {
    fn load_voter(&self, id: VoterId) -> Option<Voter> {
        if let Some(v) = lock(&self.voters).get(&id) {
            return v.clone();
        }
        let v = self.directory.load_voter(id);
        lock(&self.voters).insert(id, v.clone());
        v
    }
}

/// A bounded cache keyed by locale, evicting the least recently used entry.
pub struct LocaleCache<T> {
    capacity: usize,
    entries: HashMap<String, Arc<T>>,
    // Most recently used at the back.
    order: VecDeque<String>,
}

impl<T> LocaleCache<T> {
    pub fn new(capacity: usize) -> LocaleCache<T> {
        LocaleCache {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&mut self, locale: &str) -> Option<Arc<T>> {
        let found = self.entries.get(locale).cloned();
        if found.is_some() {
            self.touch(locale);
        }
        found
    }

    /// Returns the cached entry, or builds and caches it.
    pub fn get_or_try_insert_with<E, F>(&mut self, locale: &str, build: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(found) = self.get(locale) {
            return Ok(found);
        }
        let value = Arc::new(build()?);
        self.insert(locale, value.clone());
        Ok(value)
    }

    pub fn insert(&mut self, locale: &str, value: Arc<T>) {
        if self.entries.insert(locale.to_string(), value).is_some() {
            self.touch(locale);
            return;
        }
        self.order.push_back(locale.to_string());
        while self.entries.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    debug!("locale cache: evicting {}", oldest);
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }

    /// Drops the entry of a locale whose data changed.
    pub fn invalidate(&mut self, locale: &str) -> bool {
        self.order.retain(|l| l != locale);
        self.entries.remove(locale).is_some()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, locale: &str) -> bool {
        self.entries.contains_key(locale)
    }

    fn touch(&mut self, locale: &str) {
        if let Some(pos) = self.order.iter().position(|l| l == locale) {
            if let Some(l) = self.order.remove(pos) {
                self.order.push_back(l);
            }
        }
    }
}

/// Builds the validator of one locale.
pub trait ValidatorFactory: Send + Sync {
    fn build(&self, locale: &str) -> Result<Box<dyn Validator>, BoxError>;
}

/// A validator that delegates to per-locale validators, building each one
/// on first use and keeping a bounded number of them.
pub struct CachedValidator<F: ValidatorFactory> {
    factory: F,
    cache: Mutex<LocaleCache<Box<dyn Validator>>>,
}

impl<F: ValidatorFactory> CachedValidator<F> {
    pub fn new(factory: F, capacity: usize) -> CachedValidator<F> {
        CachedValidator {
            factory,
            cache: Mutex::new(LocaleCache::new(capacity)),
        }
    }

    /// To be called whenever the data of a locale changed.
    pub fn invalidate(&self, locale: &str) {
        if lock(&self.cache).invalidate(locale) {
            debug!("validator cache: invalidated {}", locale);
        }
    }

    pub fn clear(&self) {
        lock(&self.cache).clear();
    }

    pub fn cached_locales(&self) -> usize {
        lock(&self.cache).len()
    }
}

impl<F: ValidatorFactory> Validator for CachedValidator<F> {
    fn is_invalid(
        &self,
        locale: &str,
        candidate: ItemId,
        base_item: ItemId,
        value: &str,
    ) -> Result<bool, BoxError> {
        // The lock is released before validating.
        let validator = lock(&self.cache)
            .get_or_try_insert_with(locale, || self.factory.build(locale))?;
        validator.is_invalid(locale, candidate, base_item, value)
    }
}
