use std::time::{Duration as StdDuration, UNIX_EPOCH};

use chrono::{DateTime, Duration, Utc};

use crate::config::{ItemId, Status, Tier, VoterId, ABSTAIN};
use crate::contest::ContestKey;
use crate::store::{BallotRow, BaselineRow, CandidateRow, DefaultVote, MemoryStore, Voter};

/// A builder for filling a [`MemoryStore`].
///
/// Rows are added to the contest selected by the last call to
/// [`StoreBuilder::contest`]. Ballots added without an explicit time are
/// stamped one second apart, so later calls always win over earlier ones.
///
/// ```
/// use vote_resolver::builder::StoreBuilder;
/// use vote_resolver::Tier;
///
/// let store = StoreBuilder::new()
///     .voter(1, "Apple", Tier::Vetter)
///     .contest("fr", 100)
///     .candidate(101, "Bonjour")
///     .ballot(1, 101)
///     .build();
/// # let _ = store;
/// ```
pub struct StoreBuilder {
    _store: MemoryStore,
    _key: ContestKey,
    _clock: DateTime<Utc>,
}

impl StoreBuilder {
    pub fn new() -> StoreBuilder {
        StoreBuilder {
            _store: MemoryStore::new(),
            _key: ContestKey::new("root", 0),
            _clock: StoreBuilder::epoch(),
        }
    }

    /// The time of the first ballot stamped by the builder.
    pub fn epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from(UNIX_EPOCH + StdDuration::from_secs(1_700_000_000))
    }

    pub fn voter(self, id: VoterId, organization: &str, tier: Tier) -> StoreBuilder {
        self.add_voter(id, organization, tier, true)
    }

    pub fn inactive_voter(self, id: VoterId, organization: &str, tier: Tier) -> StoreBuilder {
        self.add_voter(id, organization, tier, false)
    }

    fn add_voter(self, id: VoterId, organization: &str, tier: Tier, active: bool) -> StoreBuilder {
        self._store.add_voter(Voter {
            id,
            organization: organization.to_string(),
            tier,
            active,
        });
        self
    }

    pub fn contest(mut self, locale: &str, base_item: ItemId) -> StoreBuilder {
        self._key = ContestKey::new(locale, base_item);
        self
    }

    pub fn candidate(self, item: ItemId, value: &str) -> StoreBuilder {
        self.add_candidate(item, Some(value), None)
    }

    pub fn annotated_candidate(self, item: ItemId, value: &str, annotation: &str) -> StoreBuilder {
        self.add_candidate(item, Some(value), Some(annotation))
    }

    fn add_candidate(self, item: ItemId, value: Option<&str>, annotation: Option<&str>) -> StoreBuilder {
        self._store.add_candidate(
            &self._key,
            CandidateRow {
                item,
                value: value.map(str::to_string),
                annotation: annotation.map(str::to_string),
            },
        );
        self
    }

    pub fn baseline(self, item: ItemId, value: &str, status: Status) -> StoreBuilder {
        self._store.set_baseline(
            &self._key,
            BaselineRow {
                item,
                value: Some(value.to_string()),
                annotation: None,
                status,
            },
        );
        self
    }

    /// A baseline row for the base item itself, with no value.
    pub fn empty_baseline(self, status: Status) -> StoreBuilder {
        let item = self._key.base_item;
        self._store.set_baseline(
            &self._key,
            BaselineRow {
                item,
                value: None,
                annotation: None,
                status,
            },
        );
        self
    }

    pub fn ballot(mut self, voter: VoterId, item: ItemId) -> StoreBuilder {
        self._clock = self._clock + Duration::seconds(1);
        let t = self._clock;
        self.ballot_at(voter, item, t)
    }

    pub fn abstain(self, voter: VoterId) -> StoreBuilder {
        self.ballot(voter, ABSTAIN)
    }

    pub fn ballot_at(self, voter: VoterId, item: ItemId, cast_at: DateTime<Utc>) -> StoreBuilder {
        self._store.cast_ballot(
            &self._key,
            BallotRow {
                voter,
                candidate: item,
                cast_at,
            },
        );
        self
    }

    pub fn default_vote(self, organization: &str, item: ItemId, weight: u32) -> StoreBuilder {
        self._store.add_default(
            &self._key,
            DefaultVote {
                organization: organization.to_string(),
                item,
                weight,
            },
        );
        self
    }

    pub fn build(self) -> MemoryStore {
        self._store
    }
}

impl Default for StoreBuilder {
    fn default() -> Self {
        StoreBuilder::new()
    }
}
