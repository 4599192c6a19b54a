use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use kernlat::collector::{self, RunOptions};
use kernlat::tools;

/// Run queue wait latency histogram (sched_wakeup to sched_switch).
#[derive(Debug, Parser)]
#[command(name = "runqlat")]
struct Opt {
    /// Collection window (e.g. 10s, 1m)
    #[arg(long, default_value = "10s", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// Output path stem; writes <stem>.csv and <stem>.summary.json
    #[arg(long)]
    out: Option<String>,

    /// Tail latency threshold in microseconds
    #[arg(long, default_value_t = 8)]
    tail_threshold_us: u64,

    /// Keep counts accumulated by earlier runs instead of zeroing the
    /// table at attach time
    #[arg(long)]
    keep_counts: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let opt = Opt::parse();

    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(if opt.verbose { "info" } else { "warn" }),
    )
    .init();

    let opts = RunOptions {
        duration: opt.duration,
        out: opt.out,
        tail_threshold_us: opt.tail_threshold_us,
        reset_counters: !opt.keep_counts,
    };
    println!("[runqlat] starting ({opts})");

    let mut bpf = kernlat::load_bpf().context("failed to load eBPF object")?;
    let report = collector::run(&mut bpf, &tools::RUNQLAT, &opts)
        .await
        .context("[runqlat] aborted")?;

    if let Some(paths) = &report.paths {
        println!(
            "[runqlat] saved: {} (+ {})",
            paths.histogram.display(),
            paths.summary.display()
        );
    }
    println!("[runqlat] done");
    Ok(())
}
