use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use timegrep::cli::run::{RunSummary, SearchOptions};
use timegrep::exec::SeekReader;
use timegrep::query::RangeArgs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "timegrep")]
#[command(about = "Search dated log files in time order", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
#[command(after_help = "A leading term that names a subcommand runs that subcommand. \
Put `--` before the terms to search for it instead, as in `timegrep -- setup`.")]
struct Cli {
    /// Log progress to stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(flatten)]
    search: SearchArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Args)]
struct SearchArgs {
    /// Regular expressions a record must all match
    #[arg(value_name = "REGEXP")]
    terms: Vec<String>,

    /// Follow today's files instead of searching a range
    #[arg(short, long)]
    tail: bool,

    /// Log type to search (default: `default_type` from the config)
    #[arg(long = "type", value_name = "TYPE")]
    log_type: Option<String>,

    /// Print `timestamp<TAB>action<TAB>ms` per request instead of records
    #[arg(short, long)]
    perf: bool,

    /// Search this whole day
    #[arg(short, long, value_name = "DATE")]
    day: Option<String>,

    /// Start N days ago
    #[arg(short = 'b', long = "daysback", value_name = "N")]
    days_back: Option<u32>,

    /// Start N hours ago
    #[arg(short = 'o', long = "hoursback", value_name = "N")]
    hours_back: Option<u32>,

    #[arg(short, long, value_name = "TIME")]
    start: Option<String>,

    #[arg(short, long, value_name = "TIME")]
    end: Option<String>,

    /// Only search files from this host (repeatable)
    #[arg(long = "host", value_name = "HOST")]
    hosts: Vec<String>,

    /// Drop records matching this expression (repeatable)
    #[arg(short = 'x', long = "exclude", value_name = "REGEXP")]
    exclude: Vec<String>,

    /// Run the search on the configured remote hosts
    #[arg(long)]
    remote: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the filter on every configured remote host
    Setup,
    /// Copy a log file from near TIMESTAMP, using its seek index
    Cat {
        file: PathBuf,
        timestamp: u64,
        #[arg(long)]
        index_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_filter = if cli.verbose {
        "timegrep=debug"
    } else {
        "timegrep=warn"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Some(Commands::Setup) => match timegrep::cli::setup::run(cli.config.as_deref()).await {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fail(e),
        },
        Some(Commands::Cat {
            file,
            timestamp,
            index_dir,
        }) => match timegrep::cli::cat::run(&file, timestamp, index_dir.as_deref()) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => fail(format!("{}: {}", file.display(), e)),
        },
        None => {
            let options = search_options(cli.search, cli.config);
            match timegrep::cli::run::run(options).await {
                Ok(summary) => report(&summary),
                Err(e) => fail(e),
            }
        }
    }
}

fn search_options(args: SearchArgs, config: Option<PathBuf>) -> SearchOptions {
    SearchOptions {
        config,
        log_type: args.log_type,
        positive: args.terms,
        negative: args.exclude,
        range: RangeArgs {
            day: args.day,
            days_back: args.days_back,
            hours_back: args.hours_back,
            start: args.start,
            end: args.end,
        },
        hosts: args.hosts,
        tail: args.tail,
        perf: args.perf,
        remote: args.remote,
        seek_reader: std::env::current_exe().ok().map(|exe| SeekReader {
            program: exe.display().to_string(),
            args: vec!["cat".to_string()],
        }),
    }
}

fn report(summary: &RunSummary) -> ExitCode {
    if summary.interrupted {
        return ExitCode::from(130);
    }
    match summary.hint {
        Some(hint) => {
            eprintln!("{}", hint);
            ExitCode::from(2)
        }
        None => ExitCode::SUCCESS,
    }
}

fn fail(e: impl std::fmt::Display) -> ExitCode {
    eprintln!("timegrep: {}", e);
    ExitCode::FAILURE
}
