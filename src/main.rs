use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use voltammetry_worker::{
    cli::WorkerCli,
    config::{Config, LogFormat},
    worker::{self, FrameSink, FrameWriter, StatusLineWriter, WorkerMessage},
    AppContext, WorkerRequest,
};

#[tokio::main]
async fn main() {
    let cli = WorkerCli::parse();
    let mut frames = FrameWriter::stdio();

    if let Err(e) = run(cli, &mut frames).await {
        error!(error = %e, "Worker failed");
        // stderr text that is not a task id fails the whole request
        if let Err(write_error) = frames.emit(WorkerMessage::Fatal(e.to_string())) {
            eprintln!("{}: {}", e, write_error);
        }
        std::process::exit(1);
    }
}

async fn run(cli: WorkerCli, frames: &mut FrameWriter<std::io::Stdout, std::io::Stderr>) -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_logging(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        locale = %config.locale,
        base_dir = %config.base_dir.display(),
        "Worker starting"
    );

    let command = cli.command.read_payload(std::io::stdin().lock())?;
    let request = WorkerRequest::try_from(command)?;
    let ctx = AppContext::new(config)?;
    worker::execute(&request, &ctx, frames).await?;

    info!(operation = %request.kind(), "Worker done");
    Ok(())
}

/// Initialize tracing/logging
///
/// Log lines go to stdout framed as status messages; stderr is reserved for
/// failures.
fn init_logging(config: &Config) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .json()
                        .with_ansi(false)
                        .with_writer(StatusLineWriter::stdout),
                )
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    fmt::layer()
                        .with_ansi(false)
                        .with_writer(StatusLineWriter::stdout),
                )
                .init();
        }
    }
}
