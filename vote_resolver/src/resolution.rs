//! The resolution of one contest: scoring, selection of the winner,
//! classification and the result type kept for auditing.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};

use log::{debug, info};
use snafu::prelude::*;

use crate::collation::{collator_for, Collator};
use crate::config::{ItemId, ResolverRules, ResultFlags, Score, Status, Tier};
use crate::contest::{CandidateId, Contest, ContestKey};
use crate::store::{BoxError, StoreError, Validator};
use crate::tally::{tally_contest, OrgVote, Tally};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum ResolveError {
    #[snafu(display("validating {value:?} (item {item}) in contest {key} failed: {source}"))]
    Validation {
        key: ContestKey,
        item: ItemId,
        value: String,
        source: BoxError,
    },

    #[snafu(display("could not load contest {key}: {source}"))]
    Store { key: ContestKey, source: StoreError },

    #[snafu(display("could not persist the outcome of contest {key}: {source}"))]
    Persist { key: ContestKey, source: StoreError },
}

impl ResolveError {
    pub fn key(&self) -> &ContestKey {
        match self {
            ResolveError::Validation { key, .. }
            | ResolveError::Store { key, .. }
            | ResolveError::Persist { key, .. } => key,
        }
    }
}

/// The outcome of the resolution algorithm for one contest, before it is
/// mapped to output records.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Resolution {
    pub winner: Option<CandidateId>,
    pub status: Status,
    /// Highest score among the candidates that may win (O).
    pub top: Score,
    /// Highest score among the other candidates that may win (N).
    pub next: Score,
    /// Candidates with the top score that lost the tie-break.
    pub tied: Vec<CandidateId>,
    /// Organizations whose own voters disagree at their most senior tier.
    pub disputes: BTreeSet<String>,
    /// The winner was kept from the baseline rather than elected.
    pub from_baseline: bool,
    /// Under strict disqualification, the raw tally elected a disqualified
    /// candidate.
    pub had_disqualified_winner: bool,
    /// Values proposed under more than one annotation.
    pub conflicts: BTreeSet<String>,
    /// A ballot was dropped or a value has conflicting annotations.
    pub had_other_error: bool,
    pub result: ResultFlags,
}

struct Selection {
    winner: Option<CandidateId>,
    top: Score,
    next: Score,
    tied: Vec<CandidateId>,
}

/// Resolves a populated contest.
///
/// Every candidate with a value goes through the validator first. Under
/// strict rules, disqualified candidates are then excluded from the tally
/// entirely; under advisory rules they are only flagged. The contest's
/// candidates are updated with their final score, supporting organizations
/// and disqualification.
///
/// A validator error aborts the resolution: nothing is returned for the
/// contest and nothing should be persisted.
pub fn resolve(
    contest: &mut Contest,
    validator: &dyn Validator,
    rules: &ResolverRules,
) -> Result<Resolution, ResolveError> {
    validate(contest, validator)?;
    let collator = collator_for(rules.tiebreak_mode);

    let excluded: BTreeSet<CandidateId> = if rules.is_strict() {
        contest
            .candidates()
            .filter(|(_, c)| c.disqualified)
            .map(|(cid, _)| cid)
            .collect()
    } else {
        BTreeSet::new()
    };

    // The raw tally only serves to find out if a disqualified candidate
    // would have won.
    let mut had_disqualified_winner = false;
    if !excluded.is_empty() {
        let raw = tally_contest(contest, &BTreeSet::new());
        let raw_selection = select_top(contest, &raw, &BTreeSet::new(), collator.as_ref());
        if let Some(w) = raw_selection.winner.filter(|w| excluded.contains(w)) {
            info!(
                "{}: disqualified candidate {:?} would have won, excluding it",
                contest.key(),
                contest.candidate(w).value
            );
            had_disqualified_winner = true;
        }
    }

    let tally = tally_contest(contest, &excluded);
    for cid in contest.ids().collect::<Vec<_>>() {
        let score = if excluded.contains(&cid) {
            Score::EMPTY
        } else {
            tally.score(cid)
        };
        let orgs = tally.supporters(cid).clone();
        let c = contest.candidate_mut(cid);
        c.score = score;
        c.organizations = orgs;
    }

    let selection = select_top(contest, &tally, &excluded, collator.as_ref());
    let mut winner = selection.winner;
    let mut status = match winner {
        Some(w) => classify(
            selection.top,
            selection.next,
            contest.candidate(w).organizations.len(),
            rules,
        ),
        None => Status::Missing,
    };
    debug!(
        "{}: tentative winner {:?} O={} N={} status {}",
        contest.key(),
        winner.map(|w| contest.candidate(w).value_str()),
        selection.top,
        selection.next,
        status
    );

    // Approved data is never downgraded by an inconclusive revote.
    let mut from_baseline = false;
    if let Some(b) = contest.baseline() {
        let usable = !excluded.contains(&b.candidate) && contest.candidate(b.candidate).has_value();
        if usable && Some(b.candidate) != winner {
            if b.status == Status::Approved && (winner.is_none() || status != Status::Approved) {
                winner = Some(b.candidate);
                status = Status::Approved;
                from_baseline = true;
            } else if winner.is_none() {
                winner = Some(b.candidate);
                status = b.status;
                from_baseline = true;
            }
        } else if usable && b.status == Status::Approved && status < Status::Approved {
            status = Status::Approved;
            from_baseline = true;
        }
    }

    let disputes = tally.disputes();
    let tied = if from_baseline {
        Vec::new()
    } else {
        selection.tied
    };
    let mut resolution = Resolution {
        winner,
        status,
        top: selection.top,
        next: selection.next,
        tied,
        disputes,
        from_baseline,
        had_disqualified_winner,
        conflicts: contest.annotation_conflicts().clone(),
        had_other_error: contest.had_other_error() || !contest.annotation_conflicts().is_empty(),
        result: ResultFlags::EMPTY,
    };
    resolution.result = result_flags(contest, &tally, &resolution);
    info!(
        "{}: winner {:?} status {} result {}",
        contest.key(),
        resolution.winner.map(|w| contest.candidate(w).value_str()),
        resolution.status,
        resolution.result
    );
    Ok(resolution)
}

// Each distinct value is checked once per contest.
fn validate(contest: &mut Contest, validator: &dyn Validator) -> Result<(), ResolveError> {
    let key = contest.key().clone();
    let mut seen: HashMap<String, bool> = HashMap::new();
    for cid in contest.ids().collect::<Vec<_>>() {
        let (item, value) = {
            let c = contest.candidate(cid);
            match &c.value {
                Some(v) => (c.item, v.clone()),
                None => continue,
            }
        };
        let invalid = match seen.get(&value) {
            Some(b) => *b,
            None => {
                let b = validator
                    .is_invalid(&key.locale, item, key.base_item, &value)
                    .context(ValidationSnafu {
                        key: key.clone(),
                        item,
                        value: value.clone(),
                    })?;
                seen.insert(value.clone(), b);
                b
            }
        };
        if invalid {
            debug!("{}: {:?} is disqualified", key, value);
        }
        contest.candidate_mut(cid).disqualified = invalid;
    }
    Ok(())
}

/// Orders equally scored candidates: by value under the collator, then
/// unannotated before annotated, then by item id.
fn tiebreak(contest: &Contest, collator: &dyn Collator, a: CandidateId, b: CandidateId) -> Ordering {
    let ca = contest.candidate(a);
    let cb = contest.candidate(b);
    collator
        .compare(ca.value_str(), cb.value_str())
        .then_with(|| ca.annotation.cmp(&cb.annotation))
        .then_with(|| ca.item.cmp(&cb.item))
}

fn select_top(
    contest: &Contest,
    tally: &Tally,
    excluded: &BTreeSet<CandidateId>,
    collator: &dyn Collator,
) -> Selection {
    let eligible: Vec<(CandidateId, Score)> = contest
        .candidates()
        .filter(|(cid, c)| c.has_value() && !excluded.contains(cid))
        .map(|(cid, _)| (cid, tally.score(cid)))
        .filter(|(_, s)| s.is_positive())
        .collect();

    let top = eligible.iter().map(|(_, s)| *s).max().unwrap_or(Score::EMPTY);
    let mut leaders: Vec<CandidateId> = eligible
        .iter()
        .filter(|(_, s)| *s == top)
        .map(|(cid, _)| *cid)
        .collect();
    leaders.sort_by(|a, b| tiebreak(contest, collator, *a, *b));

    let winner = leaders.first().cloned();
    let next = eligible
        .iter()
        .filter(|(cid, _)| Some(*cid) != winner)
        .map(|(_, s)| *s)
        .max()
        .unwrap_or(Score::EMPTY);
    let tied = leaders.into_iter().skip(1).collect();
    Selection {
        winner,
        top,
        next,
        tied,
    }
}

/// Classifies a winner from its score `top`, the best competing score `next`
/// and the number of organizations behind it.
pub fn classify(top: Score, next: Score, organizations: usize, rules: &ResolverRules) -> Status {
    let margin = top.0 >= 2 * next.0;
    if margin && top >= rules.approved_threshold {
        Status::Approved
    } else if margin
        && top >= rules.minimum_threshold
        && organizations >= rules.contributed_organizations
    {
        Status::Contributed
    } else if top > next && top >= rules.minimum_threshold {
        Status::Provisional
    } else {
        Status::Unconfirmed
    }
}

fn result_flags(contest: &Contest, tally: &Tally, r: &Resolution) -> ResultFlags {
    let mut flags = match r.winner {
        Some(_) if !r.tied.is_empty() && r.status < Status::Approved => ResultFlags::DISPUTED,
        Some(_) => ResultFlags::GOOD,
        None if contest.ballot_count() == 0 => ResultFlags::NO_VOTES,
        None => ResultFlags::INSUFFICIENT,
    };
    if r.had_disqualified_winner || r.had_other_error {
        flags = ResultFlags::ERROR;
    }

    let w = match r.winner {
        Some(w) => w,
        None => return flags,
    };
    for org in tally.orgs.values() {
        if let OrgVote::Cast { candidate, tier } = org.vote {
            if candidate == w && tier == Tier::Admin {
                flags |= ResultFlags::ADMIN;
            }
            if candidate == w && tier == Tier::Tc {
                flags |= ResultFlags::TC;
            }
        }
    }
    let others_scored = contest
        .ids()
        .any(|cid| cid != w && contest.candidate(cid).score.is_positive());
    if !others_scored && !contest.candidate(w).organizations.is_empty() {
        flags |= ResultFlags::UNANIMOUS;
    }
    if r.from_baseline && contest.ballot_count() == 0 {
        flags |= ResultFlags::NO_CHANGE;
    }
    if contest.candidate(w).value.as_deref() == Some("") {
        flags |= ResultFlags::REMOVAL;
    }
    flags
}
