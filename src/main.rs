//! blocktune CLI
//!
//! Time GEMM launches per thread-block shape and sweep candidate shapes.

use std::error::Error;
use std::process::ExitCode;
use std::time::Duration;

use blocktune::{
    Accelerator, Backend, Harness, Outcome, ProblemSize, SimAccelerator, Sweep, SweepConfig,
    TrialConfig,
};
use blocktune_gpu::kernels::{GemmKernel, Kernel};
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blocktune")]
#[command(author, version, about = "GEMM thread-block shape benchmark harness")]
struct Cli {
    /// Accelerator: sim, cuda or auto
    #[arg(long, global = true, default_value = "auto")]
    backend: Backend,

    /// CUDA device ordinal
    #[arg(long, global = true, default_value_t = 0)]
    device: i32,

    /// Log harness phases (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone, Copy)]
struct ProblemArgs {
    /// Rows of A and C
    #[arg(short = 'm', long, default_value_t = 64)]
    m: u32,

    /// Columns of B and C
    #[arg(short = 'n', long, default_value_t = 64)]
    n: u32,

    /// Inner dimension
    #[arg(short = 'k', long, default_value_t = 64)]
    k: u32,
}

#[derive(Subcommand)]
enum Commands {
    /// Time one GEMM launch
    Trial {
        /// Block extent along columns
        #[arg(long, allow_hyphen_values = true)]
        block_x: i64,

        /// Block extent along rows
        #[arg(long, allow_hyphen_values = true)]
        block_y: i64,

        #[command(flatten)]
        problem: ProblemArgs,

        /// Fail if the kernel has not finished after this many ms
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Check C against the closed form after timing
        #[arg(long)]
        verify: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Time every block shape in a cartesian product of dimensions
    Sweep {
        /// Candidate dimensions for both x and y
        #[arg(long, value_delimiter = ',', default_values_t = blocktune::sweep::DEFAULT_DIMS)]
        dims: Vec<u32>,

        /// Trials per candidate; the fastest counts
        #[arg(long, default_value_t = 1)]
        repeats: usize,

        #[command(flatten)]
        problem: ProblemArgs,

        /// Per-trial deadline in ms
        #[arg(long)]
        timeout_ms: Option<u64>,

        /// Check C after every trial
        #[arg(long)]
        verify: bool,

        /// Run candidates concurrently (requires the `parallel` feature)
        #[arg(long)]
        parallel: bool,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the generated GEMM PTX
    Ptx {
        #[command(flatten)]
        problem: ProblemArgs,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "blocktune=debug" } else { "blocktune=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    if let Commands::Ptx { problem } = cli.command {
        let p = ProblemSize::new(problem.m, problem.n, problem.k)?;
        println!("{}", GemmKernel::naive(p.m, p.n, p.k).emit_ptx());
        return Ok(());
    }

    match cli.backend.resolve() {
        Backend::Cuda => run_cuda(cli.device, cli.command),
        _ => execute(SimAccelerator::new(), cli.command),
    }
}

#[cfg(feature = "cuda")]
fn run_cuda(device: i32, command: Commands) -> Result<(), Box<dyn Error>> {
    execute(blocktune::CudaAccelerator::new(device)?, command)
}

#[cfg(not(feature = "cuda"))]
fn run_cuda(_device: i32, _command: Commands) -> Result<(), Box<dyn Error>> {
    Err("blocktune was built without the `cuda` feature".into())
}

fn trial_config(
    problem: ProblemArgs,
    timeout_ms: Option<u64>,
    verify: bool,
) -> Result<TrialConfig, Box<dyn Error>> {
    let mut config = TrialConfig::new()
        .with_problem(ProblemSize::new(problem.m, problem.n, problem.k)?)
        .with_verification(verify);
    if let Some(ms) = timeout_ms {
        config = config.with_timeout(Duration::from_millis(ms));
    }
    Ok(config.build())
}

fn execute<A: Accelerator>(accelerator: A, command: Commands) -> Result<(), Box<dyn Error>> {
    match command {
        Commands::Trial {
            block_x,
            block_y,
            problem,
            timeout_ms,
            verify,
            json,
        } => {
            let harness = Harness::new(accelerator, trial_config(problem, timeout_ms, verify)?);
            let report = harness.run_dims(block_x, block_y)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "{} on {}: {:.4} ms ({} units, {} idle){}",
                    report.shape,
                    harness.accelerator().name(),
                    report.elapsed_ms,
                    report.geometry.total_units(),
                    report.geometry.idle_units(),
                    if report.verification.is_some() { ", verified" } else { "" }
                );
            }
            Ok(())
        }

        Commands::Sweep {
            dims,
            repeats,
            problem,
            timeout_ms,
            verify,
            parallel,
            json,
        } => {
            let config = SweepConfig::new()
                .with_dims(&dims)
                .with_repeats(repeats)
                .with_trial(trial_config(problem, timeout_ms, verify)?)
                .build();
            let sweep = Sweep::new(accelerator, config);
            let report = if parallel {
                run_parallel(&sweep)?
            } else {
                sweep.run()
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("{:>9}  {:>12}  status", "block", "elapsed_ms");
                for result in &report.results {
                    let shape = result.shape.to_string();
                    match &result.outcome {
                        Outcome::Completed { elapsed_ms } => {
                            println!("{:>9}  {:>12.4}  ok", shape, elapsed_ms);
                        }
                        Outcome::Pruned => println!("{:>9}  {:>12}  pruned", shape, "-"),
                        Outcome::Failed { kind, message } => {
                            println!("{:>9}  {:>12}  {}: {}", shape, "-", kind, message);
                        }
                    }
                }
                if let Some(best) = &report.best {
                    println!(
                        "best: {} ({:.4} ms)",
                        best.shape,
                        best.elapsed_ms().unwrap_or_default()
                    );
                }
            }

            if report.best.is_none() {
                return Err("no candidate completed".into());
            }
            Ok(())
        }

        Commands::Ptx { .. } => Ok(()),
    }
}

#[cfg(feature = "parallel")]
fn run_parallel<A: Accelerator>(
    sweep: &Sweep<A>,
) -> Result<blocktune::SweepReport, Box<dyn Error>> {
    Ok(sweep.run_parallel())
}

#[cfg(not(feature = "parallel"))]
fn run_parallel<A: Accelerator>(
    _sweep: &Sweep<A>,
) -> Result<blocktune::SweepReport, Box<dyn Error>> {
    Err("blocktune was built without the `parallel` feature".into())
}
