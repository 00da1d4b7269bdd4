//! Mapping of a resolution to the records stored for a contest.

use std::collections::BTreeSet;

use crate::config::{ItemId, ResolverRules, ResultFlags, Status};
use crate::contest::{Candidate, Contest, ContestKey};
use crate::resolution::Resolution;

/// Tag of a winner that failed validation but was kept under advisory rules.
pub const ADVISORY_TAG: &str = "proposed-x555";

/// One stored value for a base item: the winner (no tag) or a losing
/// alternate under a synthesized "proposed-x..." tag.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct OutputRecord {
    pub tag: Option<String>,
    /// The candidate item backing this record.
    pub item: ItemId,
    pub value: Option<String>,
    pub status: Status,
}

/// Everything stored for a contest, replaced as a whole at each resolution.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Outcome {
    pub key: ContestKey,
    pub winner: Option<OutputRecord>,
    pub alternates: Vec<OutputRecord>,
    pub disputes: BTreeSet<String>,
    /// Values proposed under more than one annotation.
    pub conflicts: BTreeSet<String>,
    pub status: Status,
    pub result: ResultFlags,
}

impl Outcome {
    pub fn winning_value(&self) -> Option<&str> {
        self.winner.as_ref().and_then(|w| w.value.as_deref())
    }
}

pub fn alternate_tag(n: u32) -> String {
    format!("proposed-x{}", n)
}

fn record(c: &Candidate, tag: Option<String>, status: Status) -> OutputRecord {
    OutputRecord {
        tag,
        item: c.item,
        value: c.value.clone(),
        status,
    }
}

/// Builds the records for a resolved contest.
///
/// Alternates are numbered in candidate item order, starting at the rules'
/// alternate base. A candidate gets no alternate record if it won, if it was
/// disqualified under strict rules, or if nobody voted for it.
pub fn build_outcome(contest: &Contest, resolution: &Resolution, rules: &ResolverRules) -> Outcome {
    let winner = resolution.winner.map(|w| {
        let c = contest.candidate(w);
        let tag = if c.disqualified && !rules.is_strict() {
            Some(ADVISORY_TAG.to_string())
        } else {
            None
        };
        record(c, tag, resolution.status)
    });

    let mut losers: Vec<&Candidate> = contest
        .candidates()
        .filter(|(cid, _)| Some(*cid) != resolution.winner)
        .map(|(_, c)| c)
        .filter(|c| !(c.disqualified && rules.is_strict()))
        .filter(|c| !c.voters.is_empty())
        .collect();
    losers.sort_by_key(|c| c.item);
    let alternates = losers
        .into_iter()
        .zip(rules.alternate_base..)
        .map(|(c, n)| record(c, Some(alternate_tag(n)), Status::Unconfirmed))
        .collect();

    Outcome {
        key: contest.key().clone(),
        winner,
        alternates,
        disputes: resolution.disputes.clone(),
        conflicts: resolution.conflicts.clone(),
        status: resolution.status,
        result: resolution.result,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StoreBuilder;
    use crate::config::{DisqualifyMode, Tier};
    use crate::resolution::resolve;
    use crate::store::{AcceptAll, BoxError, MemoryStore, Validator};

    struct RejectValue(&'static str);

    impl Validator for RejectValue {
        fn is_invalid(&self, _: &str, _: ItemId, _: ItemId, value: &str) -> Result<bool, BoxError> {
            Ok(value == self.0)
        }
    }

    fn outcome_of(store: &MemoryStore, validator: &dyn Validator, rules: &ResolverRules) -> Outcome {
        let mut c = Contest::populate(ContestKey::new("fr", 100), store, store).unwrap();
        let r = resolve(&mut c, validator, rules).unwrap();
        build_outcome(&c, &r, rules)
    }

    fn store() -> MemoryStore {
        StoreBuilder::new()
            .voter(1, "Apple", Tier::Expert)
            .voter(2, "Google", Tier::Vetter)
            .voter(3, "IBM", Tier::Street)
            .contest("fr", 100)
            .candidate(104, "unvoted")
            .candidate(103, "C")
            .candidate(102, "B")
            .candidate(101, "A")
            .ballot(1, 101)
            .ballot(2, 103)
            .ballot(3, 102)
            .build()
    }

    #[test]
    fn alternates_are_numbered_by_item() {
        let o = outcome_of(&store(), &AcceptAll, &ResolverRules::DEFAULT_RULES);
        let w = o.winner.as_ref().unwrap();
        assert_eq!(w.tag, None);
        assert_eq!(w.value.as_deref(), Some("A"));
        assert_eq!(w.status, Status::Approved);
        let tags: Vec<(Option<&str>, ItemId)> = o
            .alternates
            .iter()
            .map(|a| (a.tag.as_deref(), a.item))
            .collect();
        assert_eq!(
            tags,
            vec![(Some("proposed-x1000"), 102), (Some("proposed-x1001"), 103)]
        );
        assert!(o.alternates.iter().all(|a| a.status == Status::Unconfirmed));
    }

    #[test]
    fn resolving_twice_gives_the_same_records() {
        let store = store();
        let first = outcome_of(&store, &AcceptAll, &ResolverRules::DEFAULT_RULES);
        let second = outcome_of(&store, &AcceptAll, &ResolverRules::DEFAULT_RULES);
        assert_eq!(first, second);
    }

    #[test]
    fn advisory_winner_is_tagged() {
        let o = outcome_of(&store(), &RejectValue("A"), &ResolverRules::DEFAULT_RULES);
        let w = o.winner.unwrap();
        assert_eq!(w.tag.as_deref(), Some(ADVISORY_TAG));
        assert_eq!(w.value.as_deref(), Some("A"));
    }

    #[test]
    fn strict_loser_gets_no_alternate() {
        let rules = ResolverRules {
            disqualify_mode: DisqualifyMode::Strict,
            ..ResolverRules::DEFAULT_RULES
        };
        let o = outcome_of(&store(), &RejectValue("A"), &rules);
        assert_eq!(o.winning_value(), Some("C"));
        assert_eq!(o.winner.as_ref().unwrap().tag, None);
        let items: Vec<ItemId> = o.alternates.iter().map(|a| a.item).collect();
        assert_eq!(items, vec![102]);
        assert!(o.result.contains(ResultFlags::ERROR));
    }

    #[test]
    fn empty_contest_has_no_records() {
        let store = StoreBuilder::new().contest("fr", 100).build();
        let o = outcome_of(&store, &AcceptAll, &ResolverRules::DEFAULT_RULES);
        assert_eq!(o.winner, None);
        assert!(o.alternates.is_empty());
        assert_eq!(o.status, Status::Missing);
        assert_eq!(o.result, ResultFlags::NO_VOTES);
    }
}
