use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{Level, info};
use tracing_subscriber::EnvFilter;

use fanout_executor::{Executor, ExecutorConfig, ExecutorError};

#[derive(Parser)]
#[command(name = "fanout")]
#[command(about = "Run a batch of concurrent jobs and collect results in order")]
struct Cli {
    /// Path to a JSON executor config (defaults to FANOUT_CONFIG / XDG / ./fanout.json)
    #[arg(long, global = true, env = "FANOUT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit simulated slow jobs and print their outcomes
    Run {
        /// Number of jobs to submit
        #[arg(short, long, default_value_t = 10)]
        jobs: usize,
        /// Base latency of every job
        #[arg(long, default_value_t = 200)]
        latency_ms: u64,
        /// Extra per-job latency spread, so jobs finish out of order
        #[arg(long, default_value_t = 300)]
        jitter_ms: u64,
        /// Indices of jobs that should fail
        #[arg(long, value_delimiter = ',')]
        fail: Vec<usize>,
        /// Abort the batch on the first failure
        #[arg(long)]
        raise: bool,
        /// Limit how many jobs run at once
        #[arg(long)]
        max_concurrency: Option<usize>,
        /// Progress caption
        #[arg(long)]
        desc: Option<String>,
    },
    /// Print the resolved executor configuration
    ShowConfig,
}

fn load_config(path: Option<PathBuf>) -> Result<ExecutorConfig> {
    match path {
        Some(path) => ExecutorConfig::load(&path),
        None => ExecutorConfig::load_default(),
    }
}

/// Spread latencies deterministically so completion order differs from
/// submission order.
fn job_latency(index: usize, latency_ms: u64, jitter_ms: u64) -> Duration {
    let jitter = if jitter_ms == 0 {
        0
    } else {
        (index as u64).wrapping_mul(7919) % jitter_ms
    };
    Duration::from_millis(latency_ms + jitter)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("fanout_executor=info".parse()?))
        .with_max_level(Level::INFO)
        .init();

    let cli = Cli::parse();
    let mut config = load_config(cli.config)?;

    match cli.command {
        Commands::Run {
            jobs,
            latency_ms,
            jitter_ms,
            fail,
            raise,
            max_concurrency,
            desc,
        } => {
            if raise {
                config.raise_exceptions = true;
            }
            if max_concurrency.is_some() {
                config.max_concurrency = max_concurrency;
            }
            if let Some(desc) = desc {
                config.desc = desc;
            }
            config.validate()?;

            info!("Submitting {} job(s) (base latency {}ms)", jobs, latency_ms);
            let mut executor = Executor::new(config);
            for index in 0..jobs {
                let delay = job_latency(index, latency_ms, jitter_ms);
                let should_fail = fail.contains(&index);
                executor.submit_named(format!("job-{}", index), move || async move {
                    tokio::time::sleep(delay).await;
                    if should_fail {
                        return Err(anyhow!("simulated failure after {}ms", delay.as_millis()));
                    }
                    Ok(delay.as_millis() as u64)
                });
            }

            let started = Instant::now();
            let results = match executor.results() {
                Ok(results) => results,
                Err(err @ ExecutorError::BatchAborted { .. }) => {
                    println!("Batch aborted after {:.3}s: {}", started.elapsed().as_secs_f64(), err);
                    return Err(err.into());
                }
                Err(err) => return Err(err.into()),
            };

            println!("Collected {} result(s) in {:.3}s", results.len(), started.elapsed().as_secs_f64());
            for (index, outcome) in results.iter().enumerate() {
                match outcome {
                    Ok(ms) => println!("  [{}] ok after {}ms", index, ms),
                    Err(err) => println!("  [{}] error: {}", index, err),
                }
            }
        }
        Commands::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_latency_spreads_completion() {
        assert_eq!(job_latency(0, 100, 300), Duration::from_millis(100));
        assert_eq!(job_latency(1, 100, 300), Duration::from_millis(100 + 7919 % 300));
        assert_eq!(job_latency(5, 100, 0), Duration::from_millis(100));
    }

    #[test]
    fn test_cli_parses_run() {
        let cli = Cli::parse_from(["fanout", "run", "--jobs", "3", "--fail", "0,2", "--raise"]);
        match cli.command {
            Commands::Run { jobs, fail, raise, .. } => {
                assert_eq!(jobs, 3);
                assert_eq!(fail, vec![0, 2]);
                assert!(raise);
            }
            Commands::ShowConfig => panic!("expected run"),
        }
    }
}
