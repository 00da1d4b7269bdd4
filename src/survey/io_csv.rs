// Primitives for reading CSV files of ballots.

use std::fs::File;

use csv::StringRecord;

use crate::survey::config_reader::parse_timestamp;
use crate::survey::*;

const LOCALE_COL: usize = 0;
const VOTER_COL: usize = 1;
const BASE_ITEM_COL: usize = 2;
const CANDIDATE_COL: usize = 3;
const TIMESTAMP_COL: usize = 4;

/// A ballot, as read from a file.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ParsedBallot {
    pub key: ContestKey,
    pub row: BallotRow,
}

/// Reads a file with the columns locale, voter, baseItem, candidateItem and
/// timestamp. The first row is a header.
pub fn read_csv_ballots(path: &str) -> SurveyResult<Vec<ParsedBallot>> {
    let mut res: Vec<ParsedBallot> = Vec::new();
    for (idx, line_r) in get_records(path)?.enumerate() {
        // The header is line 1.
        let lineno = idx + 2;
        let line = line_r.context(CsvLineParseSnafu { lineno })?;
        debug!("read_csv_ballots: {:?} {:?}", lineno, line);
        let locale = field(&line, LOCALE_COL, lineno)?;
        let voter = parse_int(field(&line, VOTER_COL, lineno)?, lineno)?;
        let base_item = parse_int(field(&line, BASE_ITEM_COL, lineno)?, lineno)?;
        let candidate = match field(&line, CANDIDATE_COL, lineno)? {
            "" => ABSTAIN,
            s => parse_int(s, lineno)?,
        };
        let cast_at = parse_timestamp(field(&line, TIMESTAMP_COL, lineno)?)?;
        res.push(ParsedBallot {
            key: ContestKey::new(locale, base_item),
            row: BallotRow {
                voter,
                candidate,
                cast_at,
            },
        });
    }
    info!("read {} ballots from {:?}", res.len(), path);
    Ok(res)
}

fn field(line: &StringRecord, col: usize, lineno: usize) -> SurveyResult<&str> {
    Ok(line.get(col).context(CsvLineTooShortSnafu { lineno })?.trim())
}

fn parse_int(value: &str, lineno: usize) -> SurveyResult<i32> {
    value
        .parse::<i32>()
        .context(ParsingNumberSnafu { value, lineno })
}

fn get_records(path: &str) -> SurveyResult<csv::StringRecordsIntoIter<File>> {
    let rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .context(CsvOpenSnafu { path })?;
    Ok(rdr.into_records())
}
