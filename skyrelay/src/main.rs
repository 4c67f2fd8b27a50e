//! skyrelay - Scheduled Bluesky curation
//!
//! One invocation is one run: fetch, filter, plan, repost and like, then
//! print a summary. Meant to be started by cron or a systemd timer.

use std::path::PathBuf;

use chrono::Utc;
use clap::{Parser, ValueEnum};
use libskyrelay::config::resolve_config_path;
use libskyrelay::logging::{LogFormat, LoggingConfig};
use libskyrelay::platforms::bluesky::BlueskyClient;
use libskyrelay::platforms::SocialClient;
use libskyrelay::{pipeline, Config, Result, RunSummary};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(name = "skyrelay")]
#[command(version)]
#[command(about = "Repost and like fresh original posts from a Bluesky feed")]
#[command(long_about = "\
skyrelay - Scheduled Bluesky curation

DESCRIPTION:
    skyrelay pulls posts from a feed generator, a list, or a set of
    authors, keeps the original, recent (and optionally media-bearing)
    ones, and reposts then likes them from your account at a controlled
    pace. Global and per-author caps bound each run, and a progress file
    ensures nothing is reposted twice.

    Each invocation performs exactly one run and exits. Schedule it with
    cron or a systemd timer; never run two at once against the same
    progress file (a lock file prevents it).

USAGE:
    # One run with the default config
    skyrelay

    # See what would be reposted without writing anything
    skyrelay --dry-run

    # Machine-readable summary
    skyrelay --config ~/.config/skyrelay/art.toml --format json

CONFIGURATION:
    Configuration file: ~/.config/skyrelay/config.toml
    (override with --config or SKYRELAY_CONFIG)

    [source]
    kind = \"feed\"             # feed | list | authors
    uri = \"at://did:plc:.../app.bsky.feed.generator/...\"

    [plan]
    order = \"oldest_first\"    # oldest_first | newest_first
    global_cap = 30
    per_author_cap = 2

    [pacing]
    mode = \"fixed\"            # fixed | spread | escalating
    delay = \"2s\"

CREDENTIALS:
    BSKY_USERNAME - handle or DID of the acting account
    BSKY_PASSWORD - app password (never your main password)

ENVIRONMENT:
    SKYRELAY_LOG_FORMAT - text, json or pretty (logs go to stderr)
    SKYRELAY_LOG_LEVEL  - error, warn, info, debug, trace

EXIT CODES:
    0 - Run completed (individual item failures are in the summary)
    1 - Runtime error (feed fetch failed, progress store unusable)
    2 - Authentication error
    3 - Invalid configuration or input
")]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Plan and report without reposting, liking or touching the progress store
    #[arg(long)]
    dry_run: bool,

    /// Safety ceiling on write calls for this run (overrides run.max_actions)
    #[arg(long, value_name = "N")]
    max_actions: Option<usize>,

    /// Repost only, skip the paired like
    #[arg(long)]
    no_like: bool,

    /// Summary output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Log output format (overrides SKYRELAY_LOG_FORMAT)
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// Enable verbose logging to stderr
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(&cli);

    match run(cli).await {
        Ok(summary) => {
            if !summary.is_success() {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(e.exit_code());
        }
    }
}

fn init_logging(cli: &Cli) {
    let mut logging = LoggingConfig::from_env();
    if let Some(format) = cli.log_format {
        logging.format = format;
    }
    logging.verbose = cli.verbose;
    logging.init();
}

async fn run(cli: Cli) -> Result<RunSummary> {
    let config_path = match cli.config {
        Some(path) => path,
        None => resolve_config_path()?,
    };
    let mut config = Config::load_from_path(&config_path)?;

    if cli.dry_run {
        config.run.dry_run = true;
    }
    if let Some(max_actions) = cli.max_actions {
        config.run.max_actions = max_actions;
    }
    if cli.no_like {
        config.run.like = false;
    }

    let credentials = config.credentials()?;
    let mut client = BlueskyClient::new(
        &config.account.service,
        credentials,
        config.request_timeout()?,
    )?;
    client.authenticate().await?;
    debug!(actor = client.actor_id().unwrap_or("-"), "Authenticated");

    let summary = pipeline::run(&client, &config, Utc::now()).await?;
    print_summary(&summary, cli.format);
    Ok(summary)
}

fn print_summary(summary: &RunSummary, format: OutputFormat) {
    match format {
        OutputFormat::Text => println!("{}", summary),
        OutputFormat::Json => match serde_json::to_string_pretty(summary) {
            Ok(json) => println!("{}", json),
            Err(e) => eprintln!("Error: failed to encode summary: {}", e),
        },
    }
}
