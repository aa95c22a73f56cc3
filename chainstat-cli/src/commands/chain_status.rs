use std::path::PathBuf;
use std::sync::Arc;

use clap::Args;
use tracing::debug;

use chainstat_core::agg::build_stats::BuildStats;
use chainstat_core::chain::ChainProcessor;
use chainstat_core::connect::{ConfigHandleFactory, ConnectionCache};
use chainstat_core::creds::EnvCredentials;
use chainstat_core::types::{AggregatedChainStatus, BuildId, ChainOutcome};

#[derive(Args, Debug)]
pub struct ChainStatusArgs {
    /// Root build id of the chain
    pub root: i32,

    /// Server code to query (default: the configured primary server)
    #[arg(short, long)]
    pub server: Option<String>,

    /// Logical branch the chain was requested for (overrides the branch
    /// recorded on the root build)
    #[arg(short, long)]
    pub branch: Option<String>,

    /// Path to chainstat.toml
    #[arg(short, long, env = "CHAINSTAT_CONFIG", default_value = "chainstat.toml")]
    pub config: PathBuf,

    /// Directory for per-server build databases (in-memory stores when unset)
    #[arg(long, env = "CHAINSTAT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Acting user identity (empty = anonymous)
    #[arg(short, long, env = "CHAINSTAT_USER", default_value = "")]
    pub user: String,

    /// Emit the aggregate as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: ChainStatusArgs) -> anyhow::Result<()> {
    let config = super::load_config(&args.config)?;

    let server = match &args.server {
        Some(code) => code.clone(),
        None => config
            .primary_server()
            .map(String::from)
            .ok_or_else(|| anyhow::anyhow!("Config declares no servers"))?,
    };

    debug!(server = %server, root = args.root, "requesting chain status");

    let creds = Arc::new(EnvCredentials::new(&args.user, config.servers.clone()));
    let factory = Arc::new(ConfigHandleFactory::new(config.clone(), args.data_dir.clone()));
    let cache = Arc::new(ConnectionCache::new(config, factory));
    let processor = ChainProcessor::new(cache);

    let outcome = processor
        .chain_status(BuildId(args.root), args.branch.as_deref(), &server, creds)
        .await?;

    match outcome {
        ChainOutcome::Status(status) => {
            if args.json {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                print_status(&status);
            }
            Ok(())
        }
        ChainOutcome::ChainNotFound => {
            anyhow::bail!("Chain not found: build {} on server {server}", args.root)
        }
        ChainOutcome::AccessDenied => {
            anyhow::bail!("Access denied for server {server}")
        }
    }
}

fn print_status(status: &AggregatedChainStatus) {
    let stats = BuildStats::from_status(status);

    println!(
        "Chain {} on {} — {}",
        status.root_id,
        status.branch,
        stats.printable_duration()
    );
    println!();
    println!("  Failed tests:     {}", status.failed_tests);
    println!("  Failed to finish: {}", status.failed_to_finish);

    let counters: Vec<String> = stats
        .short_names()
        .into_iter()
        .map(|(name, count)| format!("{name} {count}"))
        .collect();
    println!("  Problems:         {}", counters.join("  "));

    if status.deps_not_found {
        println!("  Note: some dependencies could not be fetched; summary is partial");
    }

    if !status.suites.is_empty() {
        println!();
        println!("  Failed suites:");
        for suite in &status.suites {
            let marker = if suite.failed_to_finish {
                " [did not finish]"
            } else {
                ""
            };
            println!("    {} ({}){marker}", suite.suite, suite.status);
            for failure in &suite.test_failures {
                let tag = if failure.new_failure { " (new)" } else { "" };
                println!("      {}{tag}", failure.name);
            }
        }
    }

    if !status.top_slow.is_empty() {
        println!();
        println!("  Slowest tests (avg):");
        for rank in &status.top_slow {
            println!("    {:>8} ms  {} :: {}", rank.value, rank.suite, rank.test);
        }
    }
    if !status.top_log.is_empty() {
        println!();
        println!("  Heaviest log producers:");
        for rank in &status.top_log {
            println!("    {:>8} B   {} :: {}", rank.value, rank.suite, rank.test);
        }
    }
}
