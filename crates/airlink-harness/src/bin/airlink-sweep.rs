use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use airlink_harness::{PlanConfig, Rig, SweepOutcome};

#[derive(Parser)]
#[command(name = "airlink-sweep", about = "Run a parameter sweep over a loopback link")]
struct Cli {
    /// Path to the sweep plan
    #[arg(short, long, default_value = "sweep.toml")]
    config: PathBuf,

    /// Override the probes sent per combination
    #[arg(short, long)]
    repeat: Option<u32>,

    /// Append a checksum to every probe
    #[arg(long)]
    checksum: bool,

    /// Fail unless every expected probe arrives intact
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if std::env::var("RUST_LOG_FORMAT").as_deref() == Ok("json") {
        airlink_harness::logging::init_json();
    } else {
        airlink_harness::logging::init();
    }

    let mut plan = match PlanConfig::load(&cli.config) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("failed to load plan from {}: {e}", cli.config.display());
            std::process::exit(1);
        }
    };
    if let Some(repeat) = cli.repeat {
        plan.repeat = repeat;
    }
    plan.checksum |= cli.checksum;

    let rig = match Rig::build(&plan) {
        Ok(rig) => Arc::new(rig),
        Err(e) => {
            tracing::error!("failed to build rig: {e}");
            std::process::exit(1);
        }
    };

    let stopper = rig.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received SIGINT, stopping sweep");
        stopper.request_stop();
    });

    if let Err(e) = rig.start().await {
        tracing::error!("failed to start sweep: {e}");
        std::process::exit(1);
    }
    let summary = match rig.finish().await {
        Ok(summary) => summary,
        Err(e) => {
            tracing::error!("sweep failed: {e}");
            std::process::exit(1);
        }
    };

    println!(
        "combinations {} run, {} skipped, {} retries in {:?}",
        summary.report.executed,
        summary.report.skipped,
        summary.report.retries,
        summary.report.elapsed
    );
    println!(
        "sent {} acked {} failed {}",
        summary.tx.sent,
        summary.tx.acked,
        summary.tx.total_failures()
    );
    println!(
        "expected {} received {} missed {} checksum errors {}",
        summary.expected, summary.received, summary.missed, summary.errors
    );
    for params in &summary.missed_params {
        let params: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        println!("  missed: {}", params.join(" "));
    }

    match &summary.report.outcome {
        SweepOutcome::Completed if cli.strict && !summary.is_clean() => std::process::exit(1),
        SweepOutcome::Completed => {}
        SweepOutcome::Stopped => std::process::exit(130),
        SweepOutcome::Failed { reason, .. } => {
            eprintln!("sweep failed: {reason}");
            std::process::exit(1);
        }
    }
}
