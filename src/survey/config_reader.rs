use crate::survey::*;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyRules {
    #[serde(rename = "disqualifyMode")]
    pub disqualify_mode: Option<String>,
    #[serde(rename = "tiebreakMode")]
    pub tiebreak_mode: Option<String>,
    #[serde(rename = "approvedThreshold")]
    pub approved_threshold: Option<u32>,
    #[serde(rename = "minimumThreshold")]
    pub minimum_threshold: Option<u32>,
    #[serde(rename = "contributedOrganizations")]
    pub contributed_organizations: Option<usize>,
    #[serde(rename = "alternateBase")]
    pub alternate_base: Option<u32>,
    pub workers: Option<usize>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyVoter {
    pub id: VoterId,
    pub organization: String,
    pub tier: String,
    pub active: Option<bool>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyBaseline {
    pub item: ItemId,
    pub value: Option<String>,
    pub annotation: Option<String>,
    pub status: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyCandidate {
    pub item: ItemId,
    pub value: Option<String>,
    pub annotation: Option<String>,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyBallot {
    pub voter: VoterId,
    /// No item is an abstention.
    pub item: Option<ItemId>,
    pub timestamp: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyDefault {
    pub organization: String,
    pub item: ItemId,
    pub weight: u32,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyContest {
    pub locale: String,
    #[serde(rename = "baseItem")]
    pub base_item: ItemId,
    pub baseline: Option<SurveyBaseline>,
    #[serde(default)]
    pub candidates: Vec<SurveyCandidate>,
    #[serde(default)]
    pub ballots: Vec<SurveyBallot>,
    #[serde(default)]
    pub defaults: Vec<SurveyDefault>,
}

/// A value rejected by the validator, in one locale or in all of them.
#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct InvalidValue {
    pub locale: Option<String>,
    pub value: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct BallotFile {
    pub provider: Option<String>,
    #[serde(rename = "filePath")]
    pub file_path: String,
}

#[derive(Eq, PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct SurveyConfig {
    #[serde(rename = "surveyName")]
    pub survey_name: Option<String>,
    pub rules: Option<SurveyRules>,
    #[serde(default)]
    pub voters: Vec<SurveyVoter>,
    #[serde(default)]
    pub contests: Vec<SurveyContest>,
    #[serde(rename = "invalidValues", default)]
    pub invalid_values: Vec<InvalidValue>,
    #[serde(rename = "ballotFiles", default)]
    pub ballot_files: Vec<BallotFile>,
}

pub fn read_config(path: &str) -> SurveyResult<SurveyConfig> {
    let config_str = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let config: SurveyConfig = serde_json::from_str(&config_str).context(ParsingJsonSnafu {})?;
    debug!("config: {:?}", config);
    Ok(config)
}

pub fn read_summary(path: String) -> SurveyResult<JSValue> {
    let contents = fs::read_to_string(&path).context(OpeningJsonSnafu { path })?;
    debug!("read content: {:?}", contents);
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    Ok(js)
}

pub fn parse_timestamp(value: &str) -> SurveyResult<DateTime<Utc>> {
    let t = DateTime::parse_from_rfc3339(value).context(ParsingTimestampSnafu { value })?;
    Ok(t.with_timezone(&Utc))
}

pub fn validate_rules(survey_rules: &Option<SurveyRules>) -> SurveyResult<ResolverRules> {
    let defaults = ResolverRules::DEFAULT_RULES;
    let r = match survey_rules {
        Some(r) => r,
        None => return Ok(defaults),
    };
    let res = ResolverRules {
        disqualify_mode: match r.disqualify_mode.as_deref() {
            None | Some("advisory") => DisqualifyMode::Advisory,
            Some("strict") => DisqualifyMode::Strict,
            Some(x) => {
                whatever!("Cannot use disqualify mode {:?} (expected strict or advisory)", x)
            }
        },
        tiebreak_mode: match r.tiebreak_mode.as_deref() {
            None | Some("root") => TieBreakMode::RootCollation,
            Some("codepoint") => TieBreakMode::CodepointOrder,
            Some(x) => {
                whatever!("Cannot use tiebreak mode {:?} (expected root or codepoint)", x)
            }
        },
        approved_threshold: r
            .approved_threshold
            .map(Score)
            .unwrap_or(defaults.approved_threshold),
        minimum_threshold: r
            .minimum_threshold
            .map(Score)
            .unwrap_or(defaults.minimum_threshold),
        contributed_organizations: r
            .contributed_organizations
            .unwrap_or(defaults.contributed_organizations),
        alternate_base: r.alternate_base.unwrap_or(defaults.alternate_base),
        workers: match r.workers {
            Some(0) => whatever!("The number of workers must be positive"),
            Some(x) => x,
            None => defaults.workers,
        },
    };
    if res.minimum_threshold > res.approved_threshold {
        whatever!(
            "The minimum threshold {} is above the approved threshold {}",
            res.minimum_threshold,
            res.approved_threshold
        )
    }
    Ok(res)
}

/// Fills a store with everything declared in the configuration.
pub fn load_store(config: &SurveyConfig, store: &MemoryStore) -> SurveyResult<()> {
    for v in config.voters.iter() {
        let tier = match v.tier.parse::<Tier>() {
            Ok(t) => t,
            Err(msg) => whatever!("voter {}: {}", v.id, msg),
        };
        store.add_voter(Voter {
            id: v.id,
            organization: v.organization.clone(),
            tier,
            active: v.active.unwrap_or(true),
        });
    }

    for c in config.contests.iter() {
        let key = ContestKey::new(c.locale.as_str(), c.base_item);
        if let Some(b) = &c.baseline {
            let status = match b.status.parse::<Status>() {
                Ok(s) => s,
                Err(msg) => whatever!("contest {}: {}", key, msg),
            };
            store.set_baseline(
                &key,
                BaselineRow {
                    item: b.item,
                    value: b.value.clone(),
                    annotation: b.annotation.clone(),
                    status,
                },
            );
        }
        for cand in c.candidates.iter() {
            store.add_candidate(
                &key,
                CandidateRow {
                    item: cand.item,
                    value: cand.value.clone(),
                    annotation: cand.annotation.clone(),
                },
            );
        }
        for b in c.ballots.iter() {
            store.cast_ballot(
                &key,
                BallotRow {
                    voter: b.voter,
                    candidate: b.item.unwrap_or(ABSTAIN),
                    cast_at: parse_timestamp(&b.timestamp)?,
                },
            );
        }
        for d in c.defaults.iter() {
            store.add_default(
                &key,
                DefaultVote {
                    organization: d.organization.clone(),
                    item: d.item,
                    weight: d.weight,
                },
            );
        }
        debug!(
            "load_store: {}: {} candidates {} ballots",
            key,
            c.candidates.len(),
            c.ballots.len()
        );
    }
    Ok(())
}
