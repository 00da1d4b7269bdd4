use log::{debug, error, info, warn};

use snafu::{prelude::*, ErrorCompat, Snafu};
use vote_resolver::cache::CachedValidator;
use vote_resolver::store::{BallotRow, BaselineRow, CandidateRow, DefaultVote, Voter};
use vote_resolver::*;

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde_json::json;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use crate::survey::checks::ValueListFactory;
use crate::survey::config_reader::*;

mod checks;
pub mod config_reader;
mod io_csv;

/// Number of per-locale validators kept at the same time.
const VALIDATOR_CACHE_SIZE: usize = 16;

#[derive(Debug, Snafu)]
pub enum SurveyError {
    #[snafu(display("Error opening file {path}"))]
    OpeningJson {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Error parsing JSON: {source}"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Missing parent directory for {path}"))]
    MissingParentDir { path: String },
    #[snafu(display("Error opening CSV file {path}"))]
    CsvOpen { source: csv::Error, path: String },
    #[snafu(display("Error parsing CSV line {lineno}"))]
    CsvLineParse { source: csv::Error, lineno: usize },
    #[snafu(display("CSV line {lineno} is too short"))]
    CsvLineTooShort { lineno: usize },
    #[snafu(display("Could not read the number {value:?} on line {lineno}"))]
    ParsingNumber {
        source: std::num::ParseIntError,
        value: String,
        lineno: usize,
    },
    #[snafu(display("Could not read the timestamp {value:?}"))]
    ParsingTimestamp {
        source: chrono::ParseError,
        value: String,
    },
    #[snafu(display("Error writing the summary to {path}"))]
    WritingSummary {
        source: std::io::Error,
        path: String,
    },
    #[snafu(display("Store error: {source}"))]
    Store { source: StoreError },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

type SurveyResult<T> = Result<T, SurveyError>;

/// Overrides of the configuration given on the command line.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct RunOptions {
    pub out: Option<String>,
    pub input: Option<String>,
    pub input_type: Option<String>,
    pub locales: Option<Vec<String>>,
    pub workers: Option<usize>,
    pub strict: bool,
}

fn record_to_json(r: &OutputRecord) -> JSValue {
    json!({"tag": r.tag, "item": r.item, "value": r.value})
}

fn outcome_to_json(o: &Outcome) -> JSValue {
    let alternates: Vec<JSValue> = o.alternates.iter().map(record_to_json).collect();
    json!({
        "baseItem": o.key.base_item,
        "winner": o.winner.as_ref().map(record_to_json),
        "status": o.status.name(),
        "result": o.result.to_string(),
        "alternates": alternates,
        "disputes": o.disputes,
        "conflicts": o.conflicts,
    })
}

fn locale_to_json(
    resolver: &Resolver,
    store: &MemoryStore,
    report: &BatchReport,
) -> SurveyResult<JSValue> {
    let locale = report.locale.as_str();
    if let Some(msg) = &report.error {
        return Ok(json!({"locale": locale, "error": msg}));
    }
    let mut results: Vec<JSValue> = Vec::new();
    for base_item in store.base_items(locale).context(StoreSnafu {})? {
        let key = ContestKey::new(locale, base_item);
        if let Some(stored) = store.stored_outcome(&key).context(StoreSnafu {})? {
            results.push(outcome_to_json(&stored.outcome));
        }
    }
    let failed: Vec<JSValue> = report
        .failed
        .iter()
        .map(|(key, msg)| json!({"baseItem": key.base_item, "error": msg}))
        .collect();
    let summary = resolver.locale_summary(locale).context(StoreSnafu {})?;
    Ok(json!({
        "locale": locale,
        "status": summary.status.to_string(),
        "summary": {
            "contests": summary.contests,
            "noVotes": summary.no_votes,
            "insufficient": summary.insufficient,
            "errors": summary.errors,
            "disputed": summary.disputed,
        },
        "results": results,
        "failed": failed,
    }))
}

fn build_summary_js(
    config: &SurveyConfig,
    rules: &ResolverRules,
    resolver: &Resolver,
    store: &MemoryStore,
    reports: &[BatchReport],
) -> SurveyResult<JSValue> {
    let mut locales: Vec<JSValue> = Vec::new();
    for report in reports {
        locales.push(locale_to_json(resolver, store, report)?);
    }
    let disqualify_mode = match rules.disqualify_mode {
        DisqualifyMode::Strict => "strict",
        DisqualifyMode::Advisory => "advisory",
    };
    let tiebreak_mode = match rules.tiebreak_mode {
        TieBreakMode::RootCollation => "root",
        TieBreakMode::CodepointOrder => "codepoint",
    };
    Ok(json!({
        "config": {
            "survey": config.survey_name,
            "disqualifyMode": disqualify_mode,
            "tiebreakMode": tiebreak_mode,
        },
        "locales": locales,
    }))
}

fn read_ballot_data(path: &str, provider: Option<&str>) -> SurveyResult<Vec<io_csv::ParsedBallot>> {
    info!("Attempting to read ballot file {:?}", path);
    match provider.unwrap_or("csv") {
        "csv" => io_csv::read_csv_ballots(path),
        x => whatever!("Provider not implemented {:?}", x),
    }
}

pub fn run_survey(
    config_path: String,
    check_summary_path: Option<String>,
    options: &RunOptions,
) -> SurveyResult<JSValue> {
    let config_p = Path::new(config_path.as_str());
    let config = read_config(&config_path)?;
    info!("config: {:?}", config.survey_name);

    // Validate the rules:
    let mut rules = validate_rules(&config.rules)?;
    if options.strict {
        rules.disqualify_mode = DisqualifyMode::Strict;
    }
    match options.workers {
        Some(0) => whatever!("The number of workers must be positive"),
        Some(w) => rules.workers = w,
        None => {}
    }

    let store = MemoryStore::new();
    load_store(&config, &store)?;

    let root_p = config_p.parent().context(MissingParentDirSnafu {
        path: config_path.clone(),
    })?;
    let mut sources: Vec<(String, Option<String>)> = config
        .ballot_files
        .iter()
        .map(|f| {
            (
                root_p.join(&f.file_path).display().to_string(),
                f.provider.clone(),
            )
        })
        .collect();
    if let Some(input) = &options.input {
        sources.push((input.clone(), options.input_type.clone()));
    }
    for (path, provider) in sources {
        for pb in read_ballot_data(&path, provider.as_deref())? {
            store.cast_ballot(&pb.key, pb.row);
        }
    }

    let validator = CachedValidator::new(
        ValueListFactory::new(&config.invalid_values),
        VALIDATOR_CACHE_SIZE,
    );
    let resolver = Resolver::new(&store, &store, &validator, &store, rules.clone());

    let locales = match &options.locales {
        Some(l) => l.clone(),
        None => store.locales().context(StoreSnafu {})?,
    };
    let mut reports: Vec<BatchReport> = Vec::new();
    for locale in locales {
        let report = match resolver.run_locale(&locale) {
            Ok(report) => report,
            Err(e) => {
                error!("locale {} failed: {}", locale, e);
                BatchReport::locale_failed(&locale, e.to_string())
            }
        };
        for (key, msg) in report.failed.iter() {
            warn!("contest {} failed: {}", key, msg);
        }
        reports.push(report);
    }

    // Assemble the final json
    let result_js = build_summary_js(&config, &rules, &resolver, &store, &reports)?;
    let pretty_js_stats = serde_json::to_string_pretty(&result_js).context(ParsingJsonSnafu {})?;
    match options.out.as_deref() {
        None | Some("stdout") => println!("{}", pretty_js_stats),
        Some(path) => {
            fs::write(path, &pretty_js_stats).context(WritingSummarySnafu { path })?;
            info!("summary written to {:?}", path);
        }
    }

    // The reference summary, if provided for comparison
    if let Some(summary_p) = check_summary_path {
        let summary_ref = read_summary(summary_p)?;
        debug!("summary: {:?}", summary_ref);
        let pretty_js_summary_ref =
            serde_json::to_string_pretty(&summary_ref).context(ParsingJsonSnafu {})?;
        if pretty_js_summary_ref != pretty_js_stats {
            warn!("Found differences with the reference string");
            print_diff(
                pretty_js_summary_ref.as_str(),
                pretty_js_stats.as_ref(),
                "\n",
            );
            whatever!("Difference detected between calculated summary and reference summary")
        }
    }

    Ok(result_js)
}

fn run_survey_test(test_name: &str, config_lpath: &str, summary_lpath: &str) {
    let test_dir = option_env!("VETTING_TEST_DIR")
        .unwrap_or(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data"));
    info!("Running test {}", test_name);
    let res = run_survey(
        format!("{}/{}/{}", test_dir, test_name, config_lpath),
        Some(format!("{}/{}/{}", test_dir, test_name, summary_lpath)),
        &RunOptions::default(),
    );
    if let Err(e) = res {
        eprintln!("An error occured {}", e);
        if let Some(bt) = ErrorCompat::backtrace(&e) {
            eprintln!("trace: {}", bt);
        }
        panic!("test {} failed: {}", test_name, e);
    }
}

pub fn test_wrapper(test_name: &str) {
    run_survey_test(
        test_name,
        format!("{}_config.json", test_name).as_str(),
        format!("{}_expected_summary.json", test_name).as_str(),
    )
}
