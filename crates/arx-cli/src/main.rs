//! 🚀 arx-cli — the front door, the bouncer, the maitre d' of arx.
//!
//! 🎬 *[narrator voice]* "It all started with a simple main() function..."
//! 📦 This binary crate is the thin CLI wrapper that loads config, sets up logging,
//! and then lets the archiver do the heavy lifting. Like a manager. 🦆

use std::path::PathBuf;

use anyhow::{Context, Result};
use arx::metrics::MetricsFormat;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "arx-cli",
    version,
    about = "Moves finished workflow instances from live indices into dated archive indices"
)]
struct Cli {
    /// 📋 TOML config file. If it isn't there, ARX_* env vars and defaults carry the day.
    #[arg(long, short, default_value = "arx.toml")]
    config: PathBuf,

    /// 🖨️ How the final scoreboard is printed. `prometheus` emits text exposition.
    #[arg(long, value_enum, global = true, default_value_t = MetricsOutput::Table)]
    metrics_format: MetricsOutput,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
enum MetricsOutput {
    Table,
    Prometheus,
}

impl From<MetricsOutput> for MetricsFormat {
    fn from(output: MetricsOutput) -> Self {
        match output {
            MetricsOutput::Table => MetricsFormat::Table,
            MetricsOutput::Prometheus => MetricsFormat::Prometheus,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 🔄 Run archive cycles on a fixed delay until Ctrl-C.
    Run,
    /// 🎯 Run exactly one archive cycle and print the scoreboard.
    Once,
}

/// 🛑 A token that trips on Ctrl-C. The scheduler finishes its current cycle, then leaves.
fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trip = token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("🛑 Ctrl-C received. Finishing the current cycle, then stopping."),
            Err(err) => error!("💀 Couldn't listen for Ctrl-C ({err}). Stopping after the current cycle instead of never."),
        }
        trip.cancel();
    });
    token
}

/// 🚀 main() — where it all begins. The "I pressed F5 and held my breath" moment.
#[tokio::main]
async fn main() -> Result<()> {
    // 📡 RUST_LOG wins; otherwise info, because debug is a lot
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    // 🔒 A missing file is fine (env-only config). A path we can't even stat is not.
    let config_file = cli.config.as_path();
    let config_file_that_actually_exists = match config_file.try_exists().context(format!(
        "💀 Couldn't check whether the config file exists. Permissions? Cosmic rays? Was checking here: '{}'",
        config_file.display()
    ))? {
        true => Some(config_file),
        false => {
            info!(
                "📭 No config file at '{}'. Going with environment variables and defaults.",
                config_file.display()
            );
            None
        }
    };

    let app_config = arx::app_config::load_config(config_file_that_actually_exists)
        .context("💀 In arx-cli, main, we couldn't load the config. Take a look at the file and the ARX_* variables, make sure you didn't forget something obvious")?;

    let format = MetricsFormat::from(cli.metrics_format);
    let result = match cli.command {
        Command::Run => {
            let shutdown = shutdown_on_ctrl_c();
            arx::run(app_config, shutdown).await.map(|metrics| {
                println!("{}", metrics.render(format));
            })
        }
        Command::Once => arx::run_once(app_config).await.map(|(archived, metrics)| {
            info!(archived, "🎯 Single archive cycle done");
            println!("{}", metrics.render(format));
        }),
    };

    // 💀 Error handling: the part where we find out what went wrong
    // and print it in a way that's helpful at 3am
    if let Err(err) = result {
        error!("💀 error: {}", err);
        // -- 🧅 peel the onion of sadness, one tear-jerking layer at a time
        let mut the_vibes_are_giving_connection_issues = false;
        for cause in err.chain().skip(1) {
            error!("⚠️  cause: {}", cause);
            let cause_str = cause.to_string();
            if cause_str.contains("error sending request")
                || cause_str.contains("connection refused")
                || cause_str.contains("Connection refused")
                || cause_str.contains("tcp connect error")
                || cause_str.contains("dns error")
            {
                the_vibes_are_giving_connection_issues = true;
            }
        }

        if the_vibes_are_giving_connection_issues {
            error!(
                "🔧 hint: looks like Elasticsearch isn't reachable. \
                Double-check the store URL and that the cluster is actually running. \
                If you're using Docker, try `docker ps` to see what's up, \
                or `docker compose up -d` to resurrect it. ☕"
            );
        }

        std::process::exit(1);
    }

    Ok(())
}
