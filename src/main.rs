use bert_transfer::{log::StderrLogger, Converter, LocalRegistry, TargetDefaults, IDENTIFIERS};
use clap::Parser;
use std::{path::PathBuf, process::ExitCode};

/// Converts Hugging Face BERT checkpoints into the target training layout.
#[derive(Parser, Debug)]
#[command(name = "bert-transfer", version)]
struct Args {
    /// Checkpoints to convert; all built-in ones when empty
    identifiers: Vec<String>,

    /// Directory holding one Hugging Face snapshot per identifier
    #[arg(long, default_value = "models")]
    source: PathBuf,

    /// Root of the `configs/<identifier>/` output tree
    #[arg(long, default_value = ".")]
    output: PathBuf,

    /// JSON file overriding the target default config
    #[arg(long)]
    defaults: Option<PathBuf>,

    /// Do not export `vocab.txt`
    #[arg(long)]
    skip_vocab: bool,

    /// Stop after the first identifier that fails
    #[arg(long)]
    fail_fast: bool,

    /// More logging; repeatable
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Less logging; repeatable
    #[arg(short, long, action = clap::ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,
}

fn main() -> ExitCode {
    let args = Args::parse();
    let level = bert_transfer::log::level_from_verbosity(args.verbose, args.quiet);
    if let Err(e) = StderrLogger::init(level) {
        eprintln!("{e}");
    }

    let defaults = match &args.defaults {
        Some(path) => match TargetDefaults::load(path) {
            Ok(defaults) => defaults,
            Err(e) => {
                log::error!("{e}");
                return ExitCode::FAILURE;
            }
        },
        None => TargetDefaults::default(),
    };

    let ids = if args.identifiers.is_empty() {
        IDENTIFIERS.iter().map(|s| s.to_string()).collect()
    } else {
        args.identifiers
    };

    let converter = Converter::new(LocalRegistry::new(args.source), args.output, defaults)
        .skip_vocab(args.skip_vocab);
    let reports = converter.convert_all(ids.iter().map(String::as_str), args.fail_fast);

    let mut failed = 0;
    for report in &reports {
        match &report.result {
            Ok(converted) => log::info!("{}: done, {} tensors", report.id, converted.tensors),
            Err(e) => {
                failed += 1;
                log::warn!("{}: {e}", report.id);
            }
        }
    }
    let skipped = ids.len() - reports.len();
    if skipped > 0 {
        log::warn!("{skipped} identifiers not attempted");
    }

    if failed == 0 {
        ExitCode::SUCCESS
    } else {
        log::error!("{failed} of {} identifiers failed", reports.len());
        ExitCode::FAILURE
    }
}
