use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;

use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::config::{ItemId, Score, Status, Tier, VoterId, ABSTAIN};
use crate::store::{BallotStore, BaselineRow, StoreResult, Voter, VoterDirectory};

/// Identifies a contest: one base item in one locale.
#[derive(Eq, PartialEq, Debug, Clone, Hash, Ord, PartialOrd)]
pub struct ContestKey {
    pub locale: String,
    pub base_item: ItemId,
}

impl ContestKey {
    pub fn new(locale: impl Into<String>, base_item: ItemId) -> ContestKey {
        ContestKey {
            locale: locale.into(),
            base_item,
        }
    }
}

impl Display for ContestKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.locale, self.base_item)
    }
}

/// Index of a candidate inside its contest.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct CandidateId(pub(crate) usize);

/// One value competing to become the resolved value of the base item.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Candidate {
    pub item: ItemId,
    pub value: Option<String>,
    pub annotation: Option<String>,
    /// Everyone who chose this candidate, whatever their weight.
    pub voters: BTreeSet<VoterId>,
    /// Organizations whose tally selected this candidate.
    pub organizations: BTreeSet<String>,
    pub score: Score,
    pub disqualified: bool,
    /// Organizations for which this is the choice when they did not vote,
    /// with the weight of that default vote.
    pub default_for: BTreeMap<String, u32>,
}

impl Candidate {
    fn new(item: ItemId, value: Option<&str>, annotation: Option<&str>) -> Candidate {
        Candidate {
            item,
            value: value.map(str::to_string),
            annotation: annotation.map(str::to_string),
            voters: BTreeSet::new(),
            organizations: BTreeSet::new(),
            score: Score::EMPTY,
            disqualified: false,
            default_for: BTreeMap::new(),
        }
    }

    pub fn has_value(&self) -> bool {
        self.value.is_some()
    }

    pub fn value_str(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }
}

/// A ballot that survived ingestion, with the voter's details resolved.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct CastBallot {
    pub voter: VoterId,
    pub organization: String,
    pub tier: Tier,
    pub candidate: CandidateId,
    pub cast_at: DateTime<Utc>,
}

#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct Baseline {
    pub candidate: CandidateId,
    pub status: Status,
}

/// Everything known about one base item for one resolution run. A contest
/// is built from a snapshot of the stores, resolved once, then dropped.
#[derive(Debug, Clone)]
pub struct Contest {
    key: ContestKey,
    candidates: Vec<Candidate>,
    by_item: HashMap<ItemId, CandidateId>,
    by_identity: HashMap<(String, Option<String>), CandidateId>,
    by_value: HashMap<String, CandidateId>,
    ballots: Vec<CastBallot>,
    baseline: Option<Baseline>,
    annotation_conflicts: BTreeSet<String>,
    ballot_count: usize,
    latest_ballot: Option<DateTime<Utc>>,
    had_other_error: bool,
}

impl Contest {
    pub fn new(key: ContestKey) -> Contest {
        Contest {
            key,
            candidates: Vec::new(),
            by_item: HashMap::new(),
            by_identity: HashMap::new(),
            by_value: HashMap::new(),
            ballots: Vec::new(),
            baseline: None,
            annotation_conflicts: BTreeSet::new(),
            ballot_count: 0,
            latest_ballot: None,
            had_other_error: false,
        }
    }

    /// Reads the baseline, every candidate row, every ballot and every
    /// default vote recorded for the contest.
    pub fn populate(
        key: ContestKey,
        store: &dyn BallotStore,
        voters: &dyn VoterDirectory,
    ) -> StoreResult<Contest> {
        let mut contest = Contest::new(key);
        let key = contest.key.clone();

        if let Some(row) = store.load_baseline(&key)? {
            contest.set_baseline(&row);
        }
        for row in store.load_candidates(&key)? {
            contest.intern(row.item, row.value.as_deref(), row.annotation.as_deref());
        }

        // Only the latest ballot of each voter counts.
        let mut latest: BTreeMap<VoterId, (DateTime<Utc>, ItemId, bool)> = BTreeMap::new();
        for b in store.load_ballots(&key)? {
            contest.ballot_count += 1;
            contest.latest_ballot = contest.latest_ballot.max(Some(b.cast_at));
            let e = latest
                .entry(b.voter)
                .or_insert((b.cast_at, b.candidate, false));
            if b.cast_at > e.0 {
                *e = (b.cast_at, b.candidate, false);
            } else if b.cast_at == e.0 && b.candidate != e.1 {
                e.2 = true;
            }
        }
        for (voter_id, (cast_at, item, ambiguous)) in latest {
            if ambiguous {
                warn!(
                    "{}: voter {} cast conflicting ballots at {}, dropping them",
                    key, voter_id, cast_at
                );
                contest.had_other_error = true;
                continue;
            }
            if item == ABSTAIN {
                continue;
            }
            let voter = match voters.load_voter(voter_id) {
                Some(v) => v,
                None => {
                    warn!("{}: unknown voter {}, dropping ballot", key, voter_id);
                    contest.had_other_error = true;
                    continue;
                }
            };
            match contest.lookup_item(item) {
                Some(cid) => contest.add_ballot(&voter, cid, cast_at),
                None => {
                    warn!(
                        "{}: ballot of voter {} names unknown item {}, dropping it",
                        key, voter_id, item
                    );
                    contest.had_other_error = true;
                }
            }
        }

        for dv in store.load_defaults(&key)? {
            match contest.lookup_item(dv.item) {
                Some(cid) => contest.add_default(&dv.organization, cid, dv.weight),
                None => {
                    warn!(
                        "{}: default vote of {} names unknown item {}, dropping it",
                        key, dv.organization, dv.item
                    );
                    contest.had_other_error = true;
                }
            }
        }

        debug!(
            "populate: {} candidates: {} ballots: {} (read {})",
            key,
            contest.candidates.len(),
            contest.ballots.len(),
            contest.ballot_count
        );
        Ok(contest)
    }

    /// Returns the candidate for this value and annotation, creating it if
    /// needed. Item ids carrying the same value and annotation all map to the
    /// same candidate.
    pub fn intern(
        &mut self,
        item: ItemId,
        value: Option<&str>,
        annotation: Option<&str>,
    ) -> CandidateId {
        let plain = value.unwrap_or("").to_string();
        let identity = (plain.clone(), annotation.map(str::to_string));
        if let Some(cid) = self.by_identity.get(&identity).cloned() {
            self.by_item.entry(item).or_insert(cid);
            return cid;
        }
        if let Some(other) = self.by_value.get(&plain) {
            if self.candidates[other.0].annotation.as_deref() != annotation {
                debug!("{}: annotation conflict on {:?}", self.key, plain);
                self.annotation_conflicts.insert(plain.clone());
            }
        }
        if let Some(cid) = self.by_item.get(&item) {
            return *cid;
        }
        let cid = CandidateId(self.candidates.len());
        self.candidates.push(Candidate::new(item, value, annotation));
        self.by_item.insert(item, cid);
        self.by_identity.insert(identity, cid);
        self.by_value.insert(plain, cid);
        cid
    }

    pub fn set_baseline(&mut self, row: &BaselineRow) {
        let cid = self.intern(row.item, row.value.as_deref(), row.annotation.as_deref());
        self.baseline = Some(Baseline {
            candidate: cid,
            status: row.status,
        });
    }

    /// Records a voter's choice. Inactive voters are kept as voters of the
    /// candidate but carry no weight.
    pub fn add_ballot(&mut self, voter: &Voter, candidate: CandidateId, cast_at: DateTime<Utc>) {
        let tier = if voter.active { voter.tier } else { Tier::Locked };
        self.candidates[candidate.0].voters.insert(voter.id);
        self.ballots.push(CastBallot {
            voter: voter.id,
            organization: voter.organization.clone(),
            tier,
            candidate,
            cast_at,
        });
    }

    pub fn add_default(&mut self, organization: &str, candidate: CandidateId, weight: u32) {
        self.candidates[candidate.0]
            .default_for
            .insert(organization.to_string(), weight);
    }

    pub fn key(&self) -> &ContestKey {
        &self.key
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = CandidateId> {
        (0..self.candidates.len()).map(CandidateId)
    }

    pub fn candidates(&self) -> impl Iterator<Item = (CandidateId, &Candidate)> {
        self.candidates
            .iter()
            .enumerate()
            .map(|(idx, c)| (CandidateId(idx), c))
    }

    pub fn candidate(&self, cid: CandidateId) -> &Candidate {
        &self.candidates[cid.0]
    }

    pub(crate) fn candidate_mut(&mut self, cid: CandidateId) -> &mut Candidate {
        &mut self.candidates[cid.0]
    }

    pub fn lookup_item(&self, item: ItemId) -> Option<CandidateId> {
        self.by_item.get(&item).cloned()
    }

    pub fn ballots(&self) -> &[CastBallot] {
        &self.ballots
    }

    pub fn baseline(&self) -> Option<Baseline> {
        self.baseline
    }

    /// Values that appear with more than one annotation.
    pub fn annotation_conflicts(&self) -> &BTreeSet<String> {
        &self.annotation_conflicts
    }

    /// Number of ballots read, abstentions and dropped ballots included.
    pub fn ballot_count(&self) -> usize {
        self.ballot_count
    }

    pub fn latest_ballot(&self) -> Option<DateTime<Utc>> {
        self.latest_ballot
    }

    pub fn had_other_error(&self) -> bool {
        self.had_other_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StoreBuilder;

    #[test]
    fn same_value_collapses_onto_one_candidate() {
        let mut c = Contest::new(ContestKey::new("fr", 100));
        let a = c.intern(101, Some("Bonjour"), None);
        let b = c.intern(102, Some("Bonjour"), None);
        assert_eq!(a, b);
        assert_eq!(c.len(), 1);
        assert_eq!(c.lookup_item(102), Some(a));
        assert!(c.annotation_conflicts().is_empty());
    }

    #[test]
    fn annotation_makes_a_distinct_candidate() {
        let mut c = Contest::new(ContestKey::new("fr", 100));
        let a = c.intern(101, Some("Bonjour"), None);
        let b = c.intern(102, Some("Bonjour"), Some("ref-1"));
        assert_ne!(a, b);
        assert_eq!(c.len(), 2);
        assert!(c.annotation_conflicts().contains("Bonjour"));
    }

    #[test]
    fn populate_keeps_latest_ballot_per_voter() {
        let store = StoreBuilder::new()
            .voter(1, "Apple", Tier::Vetter)
            .contest("fr", 100)
            .candidate(101, "Bonjour")
            .candidate(102, "Salut")
            .ballot(1, 101)
            .ballot(1, 102)
            .build();
        let c = Contest::populate(ContestKey::new("fr", 100), &store, &store).unwrap();
        assert_eq!(c.ballot_count(), 2);
        assert_eq!(c.ballots().len(), 1);
        assert_eq!(c.ballots()[0].candidate, c.lookup_item(102).unwrap());
        assert!(!c.had_other_error());
    }

    #[test]
    fn populate_drops_inconsistent_ballots() {
        let t = StoreBuilder::epoch();
        let store = StoreBuilder::new()
            .voter(1, "Apple", Tier::Vetter)
            .voter(2, "Apple", Tier::Vetter)
            .contest("fr", 100)
            .candidate(101, "Bonjour")
            .candidate(102, "Salut")
            .ballot_at(1, 101, t)
            .ballot_at(1, 102, t)
            .ballot(2, 999)
            .ballot(3, 101)
            .build();
        let c = Contest::populate(ContestKey::new("fr", 100), &store, &store).unwrap();
        assert!(c.ballots().is_empty());
        assert!(c.had_other_error());
        assert_eq!(c.ballot_count(), 4);
    }

    #[test]
    fn abstention_and_inactive_voters() {
        let store = StoreBuilder::new()
            .voter(1, "Apple", Tier::Vetter)
            .inactive_voter(2, "Google", Tier::Admin)
            .contest("fr", 100)
            .candidate(101, "Bonjour")
            .abstain(1)
            .ballot(2, 101)
            .build();
        let c = Contest::populate(ContestKey::new("fr", 100), &store, &store).unwrap();
        assert_eq!(c.ballots().len(), 1);
        assert_eq!(c.ballots()[0].tier, Tier::Locked);
        assert!(c.candidate(c.lookup_item(101).unwrap()).voters.contains(&2));
    }

    #[test]
    fn baseline_without_value_is_tracked() {
        let store = StoreBuilder::new()
            .contest("fr", 100)
            .empty_baseline(Status::Unconfirmed)
            .build();
        let c = Contest::populate(ContestKey::new("fr", 100), &store, &store).unwrap();
        let b = c.baseline().unwrap();
        assert!(!c.candidate(b.candidate).has_value());
        assert_eq!(c.ballot_count(), 0);
    }
}
