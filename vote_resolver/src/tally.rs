//! Reduction of each organization's ballots to a single organizational vote.
//!
//! Within an organization only the most senior voters matter: the
//! organization votes for the candidate chosen by its most senior tier. When
//! voters of that same tier chose different candidates, the organization is
//! in dispute and its vote is not counted at all.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, warn};

use crate::config::{Score, Tier};
use crate::contest::{CandidateId, Contest};

#[derive(Eq, PartialEq, Debug, Clone)]
pub enum OrgVote {
    /// No countable vote: only locked voters, or every choice excluded.
    Abstained,
    Cast { candidate: CandidateId, tier: Tier },
    /// The most senior tier is split between these candidates.
    Disputed(BTreeSet<CandidateId>),
    Default { candidate: CandidateId },
}

#[derive(Eq, PartialEq, Debug, Clone)]
pub struct OrgTally {
    pub name: String,
    /// Every candidate chosen by at least one voter of the organization.
    pub choices: BTreeSet<CandidateId>,
    pub vote: OrgVote,
    pub weight: Score,
}

impl OrgTally {
    pub fn is_disputed(&self) -> bool {
        matches!(self.vote, OrgVote::Disputed(_))
    }

    /// The candidate receiving this organization's weight, if any.
    pub fn voted_for(&self) -> Option<CandidateId> {
        match self.vote {
            OrgVote::Cast { candidate, .. } | OrgVote::Default { candidate } => Some(candidate),
            _ => None,
        }
    }
}

/// Scores and organizational votes of a contest.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Tally {
    pub orgs: BTreeMap<String, OrgTally>,
    scores: Vec<Score>,
    supporters: Vec<BTreeSet<String>>,
}

impl Tally {
    pub fn score(&self, cid: CandidateId) -> Score {
        self.scores.get(cid.0).cloned().unwrap_or(Score::EMPTY)
    }

    /// Organizations whose tally selected the candidate.
    pub fn supporters(&self, cid: CandidateId) -> &BTreeSet<String> {
        &self.supporters[cid.0]
    }

    pub fn disputes(&self) -> BTreeSet<String> {
        self.orgs
            .values()
            .filter(|o| o.is_disputed())
            .map(|o| o.name.clone())
            .collect()
    }

    fn add(&mut self, contest: &Contest, org: &str, cid: CandidateId, weight: Score) {
        self.supporters[cid.0].insert(org.to_string());
        // A candidate without a value can be chosen but never scores.
        if contest.candidate(cid).has_value() {
            self.scores[cid.0] += weight;
        }
    }
}

/// Tallies the contest, ignoring the `excluded` candidates entirely.
pub fn tally_contest(contest: &Contest, excluded: &BTreeSet<CandidateId>) -> Tally {
    let mut tally = Tally {
        orgs: BTreeMap::new(),
        scores: vec![Score::EMPTY; contest.len()],
        supporters: vec![BTreeSet::new(); contest.len()],
    };

    // Most senior tier behind each candidate, per organization.
    let mut seniority: BTreeMap<&str, BTreeMap<CandidateId, Tier>> = BTreeMap::new();
    for b in contest.ballots() {
        let tier = seniority
            .entry(b.organization.as_str())
            .or_default()
            .entry(b.candidate)
            .or_insert(b.tier);
        if b.tier < *tier {
            *tier = b.tier;
        }
    }

    for (org, per_candidate) in seniority {
        let vote = organization_vote(&per_candidate, excluded);
        let weight = match &vote {
            OrgVote::Cast { tier, .. } => tier.vote_weight().unwrap_or(Score::EMPTY),
            _ => Score::EMPTY,
        };
        debug!("tally: {} {}: {:?} weight {}", contest.key(), org, vote, weight);
        if let OrgVote::Cast { candidate, .. } = vote {
            tally.add(contest, org, candidate, weight);
        }
        tally.orgs.insert(
            org.to_string(),
            OrgTally {
                name: org.to_string(),
                choices: per_candidate.keys().cloned().collect(),
                vote,
                weight,
            },
        );
    }

    apply_default_votes(contest, excluded, &mut tally);
    tally
}

fn organization_vote(
    per_candidate: &BTreeMap<CandidateId, Tier>,
    excluded: &BTreeSet<CandidateId>,
) -> OrgVote {
    let eligible = per_candidate.iter().filter(|(cid, _)| !excluded.contains(cid));
    let best = match eligible.clone().map(|(_, tier)| *tier).min() {
        Some(t) if t.vote_weight().is_some() => t,
        _ => return OrgVote::Abstained,
    };
    let top: BTreeSet<CandidateId> = eligible
        .filter(|(_, tier)| **tier == best)
        .map(|(cid, _)| *cid)
        .collect();
    match top.iter().next() {
        Some(cid) if top.len() == 1 => OrgVote::Cast {
            candidate: *cid,
            tier: best,
        },
        Some(_) => OrgVote::Disputed(top),
        None => OrgVote::Abstained,
    }
}

// Default votes only count for organizations that cast no ballot at all.
fn apply_default_votes(contest: &Contest, excluded: &BTreeSet<CandidateId>, tally: &mut Tally) {
    let mut defaults_per_org: BTreeMap<&str, Vec<(CandidateId, u32)>> = BTreeMap::new();
    for (cid, c) in contest.candidates() {
        for (org, weight) in c.default_for.iter() {
            defaults_per_org
                .entry(org.as_str())
                .or_default()
                .push((cid, *weight));
        }
    }

    for (org, defaults) in defaults_per_org {
        if tally.orgs.contains_key(org) {
            continue;
        }
        let (cid, weight) = match defaults.as_slice() {
            [single] => *single,
            _ => {
                warn!(
                    "{}: {} has {} default choices, ignoring them",
                    contest.key(),
                    org,
                    defaults.len()
                );
                continue;
            }
        };
        if excluded.contains(&cid) {
            continue;
        }
        let contested = contest
            .ids()
            .any(|other| other != cid && tally.score(other).is_positive());
        if weight == 1 && contested {
            debug!(
                "{}: suppressing the default vote of {} for {:?}",
                contest.key(),
                org,
                contest.candidate(cid).value
            );
            continue;
        }
        tally.add(contest, org, cid, Score(weight));
        tally.orgs.insert(
            org.to_string(),
            OrgTally {
                name: org.to_string(),
                choices: BTreeSet::new(),
                vote: OrgVote::Default { candidate: cid },
                weight: Score(weight),
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StoreBuilder;
    use crate::contest::ContestKey;
    use crate::store::MemoryStore;

    fn contest(store: &MemoryStore) -> Contest {
        Contest::populate(ContestKey::new("fr", 100), store, store).unwrap()
    }

    #[test]
    fn most_senior_voter_decides() {
        let store = StoreBuilder::new()
            .voter(1, "Apple", Tier::Vetter)
            .voter(2, "Apple", Tier::Admin)
            .contest("fr", 100)
            .candidate(101, "F")
            .candidate(102, "G")
            .ballot(1, 101)
            .ballot(2, 102)
            .build();
        let c = contest(&store);
        let t = tally_contest(&c, &BTreeSet::new());
        let g = c.lookup_item(102).unwrap();
        let f = c.lookup_item(101).unwrap();
        assert_eq!(t.score(g), Score(64));
        assert_eq!(t.score(f), Score::EMPTY);
        assert_eq!(t.orgs["Apple"].voted_for(), Some(g));
        assert_eq!(t.orgs["Apple"].choices.len(), 2);
    }

    #[test]
    fn tie_at_the_top_tier_is_a_dispute() {
        let store = StoreBuilder::new()
            .voter(1, "Apple", Tier::Vetter)
            .voter(2, "Apple", Tier::Vetter)
            .voter(3, "Apple", Tier::Street)
            .contest("fr", 100)
            .candidate(101, "F")
            .candidate(102, "G")
            .candidate(103, "H")
            .ballot(1, 101)
            .ballot(2, 102)
            .ballot(3, 103)
            .build();
        let c = contest(&store);
        let t = tally_contest(&c, &BTreeSet::new());
        assert!(t.orgs["Apple"].is_disputed());
        assert_eq!(t.orgs["Apple"].weight, Score::EMPTY);
        assert!(c.ids().all(|cid| t.score(cid) == Score::EMPTY));
        assert_eq!(t.disputes(), BTreeSet::from(["Apple".to_string()]));
    }

    #[test]
    fn excluded_candidate_leaves_the_next_choice() {
        let store = StoreBuilder::new()
            .voter(1, "Apple", Tier::Expert)
            .voter(2, "Apple", Tier::Vetter)
            .contest("fr", 100)
            .candidate(101, "bad")
            .candidate(102, "good")
            .ballot(1, 101)
            .ballot(2, 102)
            .build();
        let c = contest(&store);
        let bad = c.lookup_item(101).unwrap();
        let t = tally_contest(&c, &BTreeSet::from([bad]));
        assert_eq!(t.score(c.lookup_item(102).unwrap()), Score(4));
        assert_eq!(t.score(bad), Score::EMPTY);
    }

    #[test]
    fn locked_voters_do_not_count() {
        let store = StoreBuilder::new()
            .voter(1, "Apple", Tier::Locked)
            .contest("fr", 100)
            .candidate(101, "F")
            .ballot(1, 101)
            .build();
        let c = contest(&store);
        let t = tally_contest(&c, &BTreeSet::new());
        assert_eq!(t.orgs["Apple"].vote, OrgVote::Abstained);
        assert_eq!(t.score(c.lookup_item(101).unwrap()), Score::EMPTY);
    }

    #[test]
    fn default_vote_applies_without_ballots() {
        let store = StoreBuilder::new()
            .contest("fr", 100)
            .candidate(101, "F")
            .default_vote("Google", 101, 4)
            .build();
        let c = contest(&store);
        let t = tally_contest(&c, &BTreeSet::new());
        assert_eq!(t.score(c.lookup_item(101).unwrap()), Score(4));
        assert!(matches!(t.orgs["Google"].vote, OrgVote::Default { .. }));
    }

    #[test]
    fn default_vote_for_an_excluded_candidate_is_dropped() {
        let store = StoreBuilder::new()
            .voter(1, "Apple", Tier::Street)
            .contest("fr", 100)
            .candidate(101, "F")
            .candidate(102, "G")
            .default_vote("Google", 101, 4)
            .ballot(1, 102)
            .build();
        let c = contest(&store);
        let excluded = c.lookup_item(101).unwrap();
        let t = tally_contest(&c, &BTreeSet::from([excluded]));
        assert_eq!(t.score(excluded), Score::EMPTY);
        assert_eq!(t.score(c.lookup_item(102).unwrap()), Score(1));
        assert!(!t.orgs.contains_key("Google"));
    }

    #[test]
    fn default_vote_yields_to_an_explicit_vote() {
        let store = StoreBuilder::new()
            .voter(1, "Google", Tier::Street)
            .contest("fr", 100)
            .candidate(101, "F")
            .candidate(102, "G")
            .default_vote("Google", 101, 4)
            .ballot(1, 102)
            .build();
        let c = contest(&store);
        let t = tally_contest(&c, &BTreeSet::new());
        assert_eq!(t.score(c.lookup_item(101).unwrap()), Score::EMPTY);
        assert_eq!(t.score(c.lookup_item(102).unwrap()), Score(1));
    }

    #[test]
    fn weight_one_default_is_suppressed_in_a_contested_item() {
        let store = StoreBuilder::new()
            .voter(1, "Apple", Tier::Vetter)
            .contest("fr", 100)
            .candidate(101, "F")
            .candidate(102, "G")
            .default_vote("Google", 101, 1)
            .ballot(1, 102)
            .build();
        let c = contest(&store);
        let t = tally_contest(&c, &BTreeSet::new());
        assert_eq!(t.score(c.lookup_item(101).unwrap()), Score::EMPTY);
        assert!(!t.orgs.contains_key("Google"));
    }

    #[test]
    fn ambiguous_default_votes_are_dropped() {
        let store = StoreBuilder::new()
            .contest("fr", 100)
            .candidate(101, "F")
            .candidate(102, "G")
            .default_vote("Google", 101, 4)
            .default_vote("Google", 102, 4)
            .build();
        let c = contest(&store);
        let t = tally_contest(&c, &BTreeSet::new());
        assert!(c.ids().all(|cid| t.score(cid) == Score::EMPTY));
    }
}
