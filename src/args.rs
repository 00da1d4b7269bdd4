use clap::Parser;

/// This is a vote resolution program for locale data surveys.
#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// (file path) The file containing the survey: voters, contests, ballots and rules, in JSON.
    /// For more information about the file format, read the manual of the vote_resolver crate.
    #[clap(short, long, value_parser)]
    pub config: String,
    /// (file path) A reference file containing the summary of a survey in JSON format. If provided, vetting will
    /// check that the computed summary matches the reference.
    #[clap(short, long, value_parser)]
    pub reference: Option<String>,

    /// (file path, 'stdout' or empty) If specified, the summary of the survey will be written in JSON format to the given
    /// location. Defaults to the standard output.
    #[clap(short, long, value_parser)]
    pub out: Option<String>,

    /// (file path or empty) If specified, an extra file of ballots to load on top of the ones of the configuration.
    #[clap(short, long, value_parser)]
    pub input: Option<String>,

    /// (default csv) The type of the extra ballot file. Only csv is currently supported.
    #[clap(long, value_parser)]
    pub input_type: Option<String>,

    /// (list of locales or not specified) If specified, only these locales are resolved.
    #[clap(long, value_parser)]
    pub locale: Option<Vec<String>>,

    /// (number) The number of threads resolving contests. Overrides the value of the configuration.
    #[clap(long, value_parser)]
    pub workers: Option<usize>,

    /// If passed as an argument, candidates failing validation are removed from the vote instead of being flagged.
    #[clap(long, takes_value = false)]
    pub strict: bool,

    // Other arguments
    /// If passed as an argument, will turn on verbose logging to the standard output.
    #[clap(long, takes_value = false)]
    pub verbose: bool,
}
