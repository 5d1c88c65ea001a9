//! 🚀 trawl-cli: the front door, the bouncer, the maitre d' of trawl.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config, sets up logging, and then
//! lets the real code do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;
use tracing_subscriber::EnvFilter;

use trawl::report::{RunOutcome, render_failures, render_summary};

/// 🎣 Decode snappy-framed NDJSON objects into plain NDJSON files.
#[derive(Debug, Parser)]
#[command(name = "trawl", version, about)]
struct Args {
    /// 🔧 Path to the TOML config. Missing file means env vars (TRAWL_*) only.
    #[arg(default_value = "trawl.toml")]
    config: PathBuf,

    /// 📜 Cap on how many objects get listed
    #[arg(long)]
    max_objects: Option<usize>,

    /// 👷 Cap on concurrent workers
    #[arg(long)]
    max_workers: Option<usize>,

    /// 📁 Where decoded artifacts land
    #[arg(long)]
    output_dir: Option<PathBuf>,
}

/// 🚀 main(): the "I pressed F5 and held my breath" moment.
///
/// 🔧 Steps:
/// 1. Init tracing (so we can see what goes wrong, and when)
/// 2. Parse args
/// 3. Load config (the moment of truth)
/// 4. Run the thing (send it and pray 🙏)
/// 5. Print the report, exit non-zero if nothing made it
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 println! debugging is a lifestyle choice we're trying to move past
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();

    // 🔒 Validate the config file exists before we get too emotionally attached
    let the_config_file = match args.config.try_exists().with_context(|| {
        format!(
            "💀 Couldn't check whether the configuration file exists. Maybe it's an issue with \
             pwd/cwd and relative paths; use an absolute path to be absolutely certain. \
             Was checking here: '{}'",
            args.config.display()
        )
    })? {
        true => Some(args.config.as_path()),
        false => None,
    };

    let app_config = trawl::app_config::load_config(the_config_file)
        .context("💀 In trawl-cli, main, we couldn't load the config. Take a look at the file and the TRAWL_* env vars.")?
        .with_overrides(args.max_objects, args.max_workers, args.output_dir.clone());

    let result = trawl::run(app_config).await;

    let outcome = match result {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("💀 error: {}", err);
            // -- 🧅 peel the onion of sadness, one layer at a time
            let mut the_vibes_are_giving_connection_issues = false;
            for cause in err.chain().skip(1) {
                error!("⚠️  cause: {}", cause);
                let cause_str = cause.to_string();
                if cause_str.contains("dispatch failure")
                    || cause_str.contains("connection refused")
                    || cause_str.contains("Connection refused")
                    || cause_str.contains("dns error")
                {
                    the_vibes_are_giving_connection_issues = true;
                }
            }
            if the_vibes_are_giving_connection_issues {
                error!(
                    "🔧 hint: looks like the object store isn't reachable. Check the region, \
                     the endpoint_url if you set one, and whether your network can see S3 at all. ☕"
                );
            }
            std::process::exit(1);
        }
    };

    match &outcome {
        RunOutcome::NothingListed { prefix } => {
            error!("🕳️ nothing was listed under prefix '{}'. Check the bucket, prefix, and path.", prefix);
        }
        RunOutcome::Completed(report) => {
            println!("{}", render_summary(report));
            let the_failures = render_failures(report);
            if !the_failures.is_empty() {
                println!("{}", the_failures);
            }
        }
    }

    // 🗑️ Exit with prejudice when nothing made it. Process exitus maximus.
    if !outcome.is_success() {
        std::process::exit(1);
    }
    Ok(())
}
