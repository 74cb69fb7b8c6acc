use clap::{Args, Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;

use peerbed::config::{artifact_size_bytes, default_superpeer_count, RunConfig};
use peerbed::coordinator::{self, RunOptions};
use peerbed::error::TestbedError;
use peerbed::runtime::ContainerlabRuntime;
use peerbed::transfer::wiring::role_config_from_env;
use peerbed::transfer::run_endpoint;
use peerbed::validate::QualityOptions;

/// Testbed harness for evaluating P2P file distribution overlays
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug)]
struct PlanArgs {
    /// Number of non-origin peers
    #[arg(short, long, default_value_t = 10)]
    peers: usize,

    /// Use the two-tier super-peer overlay instead of the star
    #[arg(long)]
    superpeers: bool,

    /// Number of super-peers (defaults to one per five peers)
    #[arg(long)]
    superpeer_count: Option<usize>,

    /// Artifact size choice in MB
    #[arg(long, default_value_t = 2)]
    file_size_mb: u32,

    /// Host path of the source artifact
    #[arg(long, default_value = "mydocument.pdf")]
    artifact: PathBuf,

    /// Output directory for plan artifacts and the topology document
    #[arg(short, long, default_value = "testbed_output")]
    output: PathBuf,

    /// Sampler seed for reproducible profiles
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Container image for every endpoint
    #[arg(long, default_value = "peerbed-testbed")]
    image: String,

    /// Path of this binary inside the endpoint image
    #[arg(long, default_value = "/usr/local/bin/peerbed")]
    endpoint_binary: String,

    /// Host path of the shaping script mounted into every endpoint
    #[arg(long, default_value = "apply-shaping.sh")]
    shaping_script: PathBuf,
}

impl PlanArgs {
    fn into_config(self) -> Result<RunConfig, TestbedError> {
        Ok(RunConfig {
            peer_count: self.peers,
            use_superpeers: self.superpeers,
            superpeer_count: self
                .superpeer_count
                .unwrap_or_else(|| default_superpeer_count(self.peers)),
            file_bytes: artifact_size_bytes(self.file_size_mb)?,
            artifact_path: self.artifact,
            output_dir: self.output,
            seed: self.seed,
            image: self.image,
            endpoint_binary: self.endpoint_binary,
            shaping_script_path: self.shaping_script,
        })
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate plan artifacts and the topology document
    Generate(PlanArgs),
    /// Full pipeline: generate, deploy, validate, record, tear down
    Run(PlanArgs),
    /// Shaping and integrity checks against an already deployed fabric
    Validate(PlanArgs),
    /// In-container workload; role and wiring come from the environment
    Endpoint,
}

fn dispatch(cli: Cli) -> Result<i32, TestbedError> {
    match cli.command {
        Command::Generate(args) => {
            let config = args.into_config()?;
            let plan = coordinator::generate(&config)?;
            info!(
                "plan ready: {} endpoints, topology at {}",
                plan.peers.len(),
                plan.topology_path.display()
            );
            Ok(0)
        }
        Command::Run(args) => {
            let config = args.into_config()?;
            let (prefix, name) = coordinator::runtime_prefix();
            let runtime = ContainerlabRuntime::new(prefix, name);
            let options = RunOptions::for_total_peers(config.peer_count + 1);
            let outcome = coordinator::execute(&config, &runtime, &options)?;
            info!(
                "run {} finished with {} failure(s)",
                outcome.record.test_id,
                outcome.failures.len()
            );
            Ok(outcome.exit_code())
        }
        Command::Validate(args) => {
            let config = args.into_config()?;
            let (prefix, name) = coordinator::runtime_prefix();
            let runtime = ContainerlabRuntime::new(prefix, name);
            let failures =
                coordinator::validate_deployed(&config, &runtime, &QualityOptions::default())?;
            if failures.is_empty() {
                info!("all validation checks passed");
                Ok(0)
            } else {
                for failure in &failures {
                    error!("{failure}");
                }
                Ok(1)
            }
        }
        Command::Endpoint => {
            let role = role_config_from_env()?;
            info!("endpoint starting as {role:?}");
            run_endpoint(&role)?;
            Ok(0)
        }
    }
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match dispatch(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_resolve_to_a_valid_config() {
        let cli = Cli::parse_from(["peerbed", "generate", "--peers", "5"]);
        match cli.command {
            Command::Generate(args) => {
                let config = args.into_config().unwrap();
                assert_eq!(config.peer_count, 5);
                assert_eq!(config.file_bytes, 2_239_815);
                assert_eq!(config.superpeer_count, 1);
                assert!(!config.use_superpeers);
            }
            other => panic!("expected generate, got {other:?}"),
        }
    }

    #[test]
    fn superpeer_flags_parse() {
        let cli = Cli::parse_from([
            "peerbed",
            "run",
            "--peers",
            "20",
            "--superpeers",
            "--superpeer-count",
            "3",
            "--file-size-mb",
            "8",
        ]);
        match cli.command {
            Command::Run(args) => {
                let config = args.into_config().unwrap();
                assert!(config.use_superpeers);
                assert_eq!(config.superpeer_count, 3);
                assert_eq!(config.file_bytes, 8_869_498);
            }
            other => panic!("expected run, got {other:?}"),
        }
    }
}
