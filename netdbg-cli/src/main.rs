//! ABOUTME: Main entry point for the netdbg CLI
//! ABOUTME: Bootstraps logging, builds the debug session, serves the protocol

use anyhow::{Context, Result};
use clap::Parser;
use netdbg_cli::buildinfo;
use netdbg_cli::cli::Cli;
use netdbg_cli::transport::{serve, JsonLinesSink};
use netdbg_config::{LogConfig, LogDestination, NetdbgConfig};
use netdbg_core::types::ProcessId;
use netdbg_kernel::DebugSession;
use netdbg_protocol::LaunchArguments;
use std::io::{self, BufReader};
use std::net::TcpListener;
use std::sync::Arc;
use tracing::info;

fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.buildinfo {
        println!("{}", buildinfo::build_info());
        return Ok(());
    }

    // Destination priority: --log flag over LOG_OUTPUT over stderr.
    let log_config = LogConfig::from_env().with_flag(cli.log.as_deref());
    let _log_guard = setup_tracing(&log_config)?;

    let config = NetdbgConfig::load(cli.config.as_deref())?;
    info!(version = buildinfo::VERSION, "netdbg starting");

    run(&cli, &config)
}

/// Set up tracing. Priority: RUST_LOG filter when present, default
/// `info` otherwise. Log output never shares a stream with protocol
/// traffic unless explicitly requested.
fn setup_tracing(
    config: &LogConfig,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    match &config.destination {
        LogDestination::Stderr => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stderr)
                .with_target(false)
                .init();
            Ok(None)
        }
        LogDestination::Stdout => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(io::stdout)
                .with_target(false)
                .init();
            Ok(None)
        }
        LogDestination::File(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening log file {}", path.display()))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false)
                .init();
            Ok(Some(guard))
        }
    }
}

#[cfg(feature = "sandbox")]
fn build_session(
    config: &NetdbgConfig,
    events: Arc<JsonLinesSink>,
) -> Result<Arc<DebugSession>> {
    // The sandbox backend wires the in-tree mock runtime; a production
    // build swaps in the native runtime-debug binding here.
    use netdbg_kernel::testing::{MockEvalHelpers, MockEvaluator, MockProcess, MockRuntime};

    let process = MockProcess::new(std::process::id());
    let runtime = MockRuntime::new(process);
    Ok(DebugSession::new(
        runtime,
        Arc::new(MockEvaluator::new()),
        MockEvalHelpers::shared(),
        events,
        &config.session,
        None,
    ))
}

#[cfg(not(feature = "sandbox"))]
fn build_session(
    _config: &NetdbgConfig,
    _events: Arc<JsonLinesSink>,
) -> Result<Arc<DebugSession>> {
    anyhow::bail!(
        "this build carries no runtime-debug backend; rebuild with a backend feature enabled"
    )
}

/// Open the `--engineLogging` destination: stderr, stdout, or a file.
fn engine_writer(value: &str) -> Result<Box<dyn std::io::Write + Send>> {
    Ok(match value {
        "" | "stderr" => Box::new(io::stderr()),
        "stdout" => Box::new(io::stdout()),
        path => Box::new(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("opening engine log {path}"))?,
        ),
    })
}

fn make_sink(cli: &Cli, out: Box<dyn std::io::Write + Send>) -> Result<Arc<JsonLinesSink>> {
    Ok(match cli.engine_logging.as_deref() {
        Some(value) => JsonLinesSink::with_engine_log(out, engine_writer(value)?),
        None => JsonLinesSink::new(out),
    })
}

fn run(cli: &Cli, config: &NetdbgConfig) -> Result<()> {
    if let Some(port) = cli.server {
        let listener = TcpListener::bind(("127.0.0.1", port))
            .with_context(|| format!("binding server port {port}"))?;
        info!(port, "waiting for a front-end connection");
        let (stream, peer) = listener.accept().context("accepting connection")?;
        info!(%peer, "front-end connected");

        let events = make_sink(cli, Box::new(stream.try_clone()?))?;
        let session = build_session(config, Arc::clone(&events))?;
        bootstrap(&session, cli)?;
        serve(&session, BufReader::new(stream), &events)
    } else {
        let events = make_sink(cli, Box::new(io::stdout()))?;
        let session = build_session(config, Arc::clone(&events))?;
        bootstrap(&session, cli)?;
        serve(&session, io::stdin().lock(), &events)
    }
}

/// Apply `--attach` and `--run` before the request loop starts.
fn bootstrap(session: &Arc<DebugSession>, cli: &Cli) -> Result<()> {
    if let Some(pid) = cli.attach {
        session.initialize().context("initializing runtime")?;
        session
            .attach(ProcessId(pid))
            .with_context(|| format!("attaching to pid {pid}"))?;
        session
            .configuration_done()
            .context("finishing attach configuration")?;
        return Ok(());
    }

    if cli.run {
        let (program, args) = cli
            .program
            .split_first()
            .context("--run needs a program after --")?;
        session.initialize().context("initializing runtime")?;
        session
            .launch(LaunchArguments {
                program: program.clone(),
                args: args.to_vec(),
                ..LaunchArguments::default()
            })
            .context("launching program")?;
        session
            .configuration_done()
            .context("finishing launch configuration")?;
    }

    Ok(())
}
