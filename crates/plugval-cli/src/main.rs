use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use parking_lot::Mutex;
use plugval_process::{ProcessOutput, ProcessRequest, ProcessRunner};
use plugval_thread::ManagedThread;
use plugval_utils::{format_duration_ms, time};
use tracing_subscriber::EnvFilter;

mod config;

use config::PlugvalConfig;

/// How long the main thread blocks between progress checks on the worker.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(100);

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => PlugvalConfig::default_path()?,
    };
    let config = PlugvalConfig::load(&config_path)?;

    match cli.command {
        Commands::Run(args) => execute_run(config, args),
        Commands::Config => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[derive(Parser)]
#[command(author, version, about = "Run plug-in validators as bounded background processes")]
struct Cli {
    /// Path to the JSON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a validator (or any program) with a timeout and output cap.
    Run(RunArgs),
    /// Print the resolved configuration.
    Config,
}

#[derive(Args)]
struct RunArgs {
    /// Kill the program after this many milliseconds.
    #[arg(long)]
    timeout_ms: Option<u64>,
    /// Keep at most this many bytes of output.
    #[arg(long)]
    max_output: Option<usize>,
    /// Kill the program as soon as the output cap is reached.
    #[arg(long)]
    kill_on_output_limit: bool,
    /// Program and arguments. Falls back to the configured validator.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn execute_run(mut config: PlugvalConfig, args: RunArgs) -> Result<ExitCode> {
    ManagedThread::set_as_main_thread();

    if let Some(timeout_ms) = args.timeout_ms {
        config.timeout_ms = timeout_ms;
    }
    if let Some(max_output) = args.max_output {
        config.max_output_bytes = max_output;
    }
    config.kill_on_output_limit |= args.kill_on_output_limit;

    let request = resolve_request(&config, args.command)?;
    let runner = ProcessRunner::new(config.runner_config());
    tracing::info!(
        program = %request.program,
        started = %time::format_time(&time::now(), "%Y-%m-%d %H:%M:%S"),
        "running validator"
    );

    let output = run_on_worker(runner, request)?;
    print!("{}", output.output);
    if output.truncated {
        eprintln!(
            "[plugval] output truncated: kept {} of {} bytes",
            output.output.len(),
            output.total_bytes
        );
    }
    if output.success {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "[plugval] {} after {}",
            output.outcome,
            format_duration_ms(output.elapsed)
        );
        Ok(ExitCode::FAILURE)
    }
}

fn resolve_request(config: &PlugvalConfig, command: Vec<String>) -> Result<ProcessRequest> {
    let mut parts = command.into_iter();
    if let Some(program) = parts.next() {
        return Ok(ProcessRequest::new(program).args(parts));
    }
    match &config.validator {
        Some(validator) => {
            Ok(ProcessRequest::new(validator.clone()).args(config.validator_args.clone()))
        }
        None => bail!("no program given and no validator configured"),
    }
}

/// Runs the request on a background worker while the calling thread stays free.
fn run_on_worker(runner: ProcessRunner, request: ProcessRequest) -> Result<ProcessOutput> {
    let slot: Arc<Mutex<Option<ProcessOutput>>> = Arc::new(Mutex::new(None));
    let worker = ManagedThread::named("plugval-runner");
    let result = Arc::clone(&slot);
    worker.set_task(move || {
        let output = runner.run(&request);
        *result.lock() = Some(output);
    })?;
    worker.start()?;

    let mut waited = Duration::ZERO;
    while !worker.wait_for_end(PROGRESS_INTERVAL) {
        waited += PROGRESS_INTERVAL;
        tracing::debug!(
            waited = %format_duration_ms(waited),
            main = ManagedThread::is_main_thread(),
            "validator still running"
        );
    }
    worker.stop();

    let output = slot.lock().take();
    output.context("validator worker finished without a result")
}
