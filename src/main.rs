//! Sandbox Pool - Entry Point
//!
//! `sandbox-pool runner` starts the in-container runner; `sandbox-pool run`
//! starts a pool on the local Docker daemon and runs one file through it.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result, miette};
use tracing::{Level, info, warn};
use tracing_subscriber::{EnvFilter, fmt};

use sandbox_pool::job::JobRequest;
use sandbox_pool::platform::LaunchOptions;
use sandbox_pool::pool::{PoolConfig, SandboxPool};
use sandbox_pool::runner::{self, RunnerConfig};

/// Sandbox Pool - Warm pools of single-use code execution containers.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the execution endpoint inside a sandbox container
    Runner {
        /// Port to listen on
        #[arg(long, env = "PORT", default_value_t = 3000)]
        port: u16,

        /// Directory with one `{language}.sh` launcher per language
        #[arg(long, default_value = "executors")]
        launchers_dir: PathBuf,

        /// Directory for per-request run directories
        #[arg(long)]
        work_root: Option<PathBuf>,
    },

    /// Start a pool, run one source file through it and print the results
    Run {
        /// Language of the source file
        #[arg(short, long)]
        language: String,

        /// Source file to run
        #[arg(short, long)]
        file: PathBuf,

        /// Input for one run; repeat for several runs
        #[arg(short, long = "input")]
        inputs: Vec<String>,

        /// Per-run timeout in milliseconds
        #[arg(long, default_value_t = 2000)]
        timeout_ms: u64,

        /// Container image with the runner
        #[arg(long, default_value = "code-runner:latest")]
        image: String,

        /// Number of warm sandboxes
        #[arg(long, default_value_t = 1)]
        pool_size: usize,

        /// Directory copied into each sandbox's shared mount
        #[arg(long)]
        template_dir: Option<PathBuf>,

        /// Host directory for sandbox working directories
        #[arg(long)]
        tmp_dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; `run` prints results on stdout
    let filter = if args.verbose {
        EnvFilter::from_default_env().add_directive(Level::DEBUG.into())
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    info!("Sandbox Pool v{}", env!("CARGO_PKG_VERSION"));

    match args.command {
        Command::Runner {
            port,
            launchers_dir,
            work_root,
        } => {
            let mut config = RunnerConfig::new()
                .with_port(port)
                .with_launchers_dir(launchers_dir);
            if let Some(work_root) = work_root {
                config = config.with_work_root(work_root);
            }
            runner::run(config).await?;
            Ok(())
        }
        Command::Run {
            language,
            file,
            inputs,
            timeout_ms,
            image,
            pool_size,
            template_dir,
            tmp_dir,
        } => {
            let code = tokio::fs::read_to_string(&file).await.into_diagnostic()?;

            let mut config = PoolConfig::new().with_launch(LaunchOptions::new(image));
            if let Some(dir) = template_dir {
                config = config.with_template_dir(dir);
            }
            if let Some(dir) = tmp_dir {
                config = config.with_tmp_dir(dir);
            }

            let pool = SandboxPool::docker(config).await?;
            pool.initialize(pool_size).await?;

            let mut request = JobRequest::new(code, language, Duration::from_millis(timeout_ms));
            if !inputs.is_empty() {
                request = request.with_inputs(inputs);
            }

            let outcome = pool.run(request).wait().await;
            pool.shutdown().await;
            let results = outcome?;

            let json = serde_json::to_string_pretty(&results).into_diagnostic()?;
            println!("{json}");

            let failed = results.iter().filter(|r| r.is_error).count();
            if failed > 0 {
                warn!(failed, "Some runs failed");
                return Err(miette!("{failed} of {} runs failed", results.len()));
            }
            Ok(())
        }
    }
}
