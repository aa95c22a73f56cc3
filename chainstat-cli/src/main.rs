use clap::Parser;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "chainstat",
    version,
    about = "Aggregate CI build-chain status across servers"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into a stable exit code.
///
/// Exit codes:
///   0 — success
///   1 — general/unknown error
///   2 — configuration error
///   3 — chain not found
///   4 — build store / database error
///   5 — upstream CI API error (auth, throttling, network)
///   6 — access denied
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    let msg = format!("{err:#}");
    let lower = msg.to_lowercase();

    if lower.contains("chain not found") {
        3
    } else if lower.contains("access denied") {
        6
    } else if lower.contains("config") || lower.contains("unknown server") {
        2
    } else if lower.contains("sqlite")
        || lower.contains("store error")
        || lower.contains("conflicting record")
        || lower.contains("database")
    {
        4
    } else if lower.contains("upstream")
        || lower.contains("credentials")
        || lower.contains("retries")
        || lower.contains("connection error")
    {
        5
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}
