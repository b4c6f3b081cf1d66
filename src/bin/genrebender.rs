//! Look up genres for local audio files on MusicBrainz.
//!
//! Usage:
//!     genrebender check <PATH> [-V] [-r]
//!     genrebender add <PATH> [--check-only] [--replace] [-r]
//!     genrebender cache path|clear
//!
//! Global options: --cache-dir DIR, --refresh, --timeout SECONDS, --jobs N,
//! --show-config, --save-defaults

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use rayon::prelude::*;
use walkdir::WalkDir;

use genrebender::lookup::is_skip;
use genrebender::{
    is_supported_audio, Config, DiskCache, Enrichment, FetchContext, Fetcher, Field,
    GenreResolver, LoftyStore, MetadataStore, MusicBrainzClient, Resolution,
};

#[derive(Parser)]
#[command(name = "genrebender")]
#[command(about = "Look up MusicBrainz genres for audio files and write them into their tags")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Cache directory (default: platform cache dir)
    #[arg(long, global = true, value_name = "DIR", value_hint = clap::ValueHint::DirPath)]
    cache_dir: Option<PathBuf>,

    /// Ignore cached lookups and query MusicBrainz again
    #[arg(long, global = true)]
    refresh: bool,

    /// Time budget for resolving one file
    #[arg(long, global = true, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Number of files processed in parallel
    #[arg(short, long, global = true, default_value_t = 1)]
    jobs: usize,

    /// Show debug output, including candidate scores
    #[arg(short = 'V', long, global = true)]
    verbose: bool,

    /// Print the effective configuration
    #[arg(long)]
    show_config: bool,

    /// Save --cache-dir and --timeout as defaults and exit
    #[arg(long)]
    save_defaults: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Resolve genres and print them
    Check {
        /// Audio file or directory
        path: PathBuf,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Resolve genres and write them into the genre tag
    Add {
        /// Audio file or directory
        path: PathBuf,

        /// Resolve and print, but do not write
        #[arg(long)]
        check_only: bool,

        /// Replace existing genres instead of appending
        #[arg(long)]
        replace: bool,

        /// Descend into subdirectories
        #[arg(short, long)]
        recursive: bool,
    },

    /// Inspect or empty the lookup cache
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print the cache directory
    Path,
    /// Delete every cached lookup
    Clear,
}

#[derive(Clone, Copy)]
enum WriteMode {
    Never,
    Append,
    Replace,
}

enum Outcome {
    Found,
    NoMatch,
    Skipped,
    Failed,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    let saved_config = Config::load().unwrap_or_else(|e| {
        log::warn!("ignoring saved configuration: {}", e);
        Config::new()
    });

    // Options given explicitly on the command line
    let cmdline_config = Config {
        cache_dir: cli.cache_dir.clone(),
        item_timeout_secs: cli.timeout,
        ..Config::new()
    };

    if cli.save_defaults {
        let mut config_to_save = saved_config.clone();
        config_to_save.merge(&cmdline_config);
        let path = config_to_save.save().context("saving defaults")?;
        println!("Defaults saved to {:?}", path);
        println!();
        config_to_save.print("Saved configuration");
        return Ok(ExitCode::SUCCESS);
    }

    let mut config = Config::builtin_defaults();
    config.merge(&saved_config);
    config.merge(&cmdline_config);

    if cli.show_config {
        if let Ok(path) = Config::get_config_path() {
            println!("Config file: {:?}", path);
        }
        config.print("Effective configuration");
        if cli.command.is_none() {
            return Ok(ExitCode::SUCCESS);
        }
        println!();
    }

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(ExitCode::from(2));
    };

    let cache = DiskCache::new(config.cache_config()?);

    let (path, recursive, mode) = match command {
        Command::Cache { action: CacheAction::Path } => {
            println!("{}", cache.dir().display());
            return Ok(ExitCode::SUCCESS);
        }
        Command::Cache { action: CacheAction::Clear } => {
            let removed = cache.clear().context("clearing cache")?;
            println!("Removed {} cache entries from {}", removed, cache.dir().display());
            return Ok(ExitCode::SUCCESS);
        }
        Command::Check { path, recursive } => (path, recursive, WriteMode::Never),
        Command::Add { path, check_only, replace, recursive } => {
            let mode = match (check_only, replace) {
                (true, _) => WriteMode::Never,
                (false, true) => WriteMode::Replace,
                (false, false) => WriteMode::Append,
            };
            (path, recursive, mode)
        }
    };

    let files = collect_files(&path, recursive)?;
    if files.is_empty() {
        println!("No supported audio files under {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    log::info!("{} file(s) to process", files.len());

    let client = MusicBrainzClient::new(Fetcher::new(config.fetcher_config()), config.base_url());
    let resolver = GenreResolver::new(client, cache).with_refresh(cli.refresh);
    let item_timeout = config.item_timeout();
    let store = LoftyStore;

    let process = |file: &PathBuf| {
        let ctx = FetchContext::expiring_in(item_timeout);
        process_file(&resolver, &store, file, mode, &ctx)
    };

    let outcomes: Vec<Outcome> = if cli.jobs > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cli.jobs)
            .build()
            .context("starting worker threads")?;
        pool.install(|| files.par_iter().map(process).collect())
    } else {
        files.iter().map(process).collect()
    };

    Ok(summarize(&outcomes))
}

/// A single file is taken as given; directories are scanned for supported
/// audio files, sorted by path.
fn collect_files(path: &Path, recursive: bool) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        bail!("{} does not exist", path.display());
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(path)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                log::warn!("skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file() && is_supported_audio(entry.path()))
        .map(|entry| entry.into_path())
        .collect();
    files.sort();
    Ok(files)
}

fn process_file(
    resolver: &GenreResolver<MusicBrainzClient>,
    store: &dyn MetadataStore,
    path: &Path,
    mode: WriteMode,
    ctx: &FetchContext,
) -> Outcome {
    let name = path.display();
    let enrichment = match resolver.resolve_path(store, path, ctx) {
        Ok(Resolution::Found(enrichment)) => enrichment,
        Ok(Resolution::NoMatch) => {
            println!("{}: no match on MusicBrainz", name);
            return Outcome::NoMatch;
        }
        Err(e) if is_skip(&e) => {
            println!("{}: skipped ({})", name, e);
            return Outcome::Skipped;
        }
        Err(e) => {
            eprintln!("{}: {}", name, e);
            return Outcome::Failed;
        }
    };

    println!("{}", report(path, &enrichment));

    let replace = match mode {
        WriteMode::Never => return Outcome::Found,
        WriteMode::Append => false,
        WriteMode::Replace => true,
    };
    if enrichment.genres.is_empty() {
        return Outcome::Found;
    }
    match store.write_field(path, Field::Genre, &enrichment.genres, replace) {
        Ok(()) => Outcome::Found,
        Err(e) => {
            eprintln!("{}: {}", name, e);
            Outcome::Failed
        }
    }
}

fn report(path: &Path, e: &Enrichment) -> String {
    let list = |values: &[String]| {
        if values.is_empty() {
            "-".to_string()
        } else {
            values.join(", ")
        }
    };
    let origin = if e.from_cache { " (cached)" } else { "" };
    format!(
        "{}\n  recording: {}\n  source:    {:?} {}{}\n  genres:    {}\n  tags:      {}",
        path.display(),
        e.recording_mbid,
        e.source,
        e.source_mbid,
        origin,
        list(&e.genres),
        list(&e.tags)
    )
}

fn summarize(outcomes: &[Outcome]) -> ExitCode {
    let count = |f: fn(&Outcome) -> bool| outcomes.iter().filter(|o| f(o)).count();
    let found = count(|o| matches!(o, Outcome::Found));
    let no_match = count(|o| matches!(o, Outcome::NoMatch));
    let skipped = count(|o| matches!(o, Outcome::Skipped));
    let failed = count(|o| matches!(o, Outcome::Failed));

    println!();
    println!(
        "{} file(s): {} resolved, {} without match, {} skipped, {} failed",
        outcomes.len(),
        found,
        no_match,
        skipped,
        failed
    );
    if failed > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
