use clap::Parser;
use log::LevelFilter;

mod args;
mod survey;

use crate::args::Args;
use crate::survey::RunOptions;

fn main() {
    let args = Args::parse();

    let mut logger = env_logger::Builder::from_default_env();
    if args.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    let options = RunOptions {
        out: args.out.clone(),
        input: args.input.clone(),
        input_type: args.input_type.clone(),
        locales: args.locale.clone(),
        workers: args.workers,
        strict: args.strict,
    };
    let res = survey::run_survey(args.config.clone(), args.reference.clone(), &options);
    if let Err(e) = res {
        eprintln!("An error occured: {}", e);
        std::process::exit(1);
    }
}
