//! ABOUTME: CLI argument parsing for the netdbg binary
//! ABOUTME: Flag-style surface: --attach, --run, --server, --log, -- program args

use clap::Parser;
use std::path::PathBuf;

/// Command-line interface of the netdbg debugger.
#[derive(Parser, Debug)]
#[command(name = "netdbg")]
#[command(version)]
#[command(about = "netdbg - managed-code source-level debugger")]
#[command(
    long_about = "netdbg attaches to (or launches) a managed-runtime process and serves a \
                  debug protocol to an IDE front-end over stdio or a TCP socket.

EXAMPLES:
    netdbg --server=4711                      # wait for an IDE on TCP port 4711
    netdbg --attach 1234                      # attach to pid 1234, protocol on stdio
    netdbg --run -- bin/app.dll arg1 arg2     # launch app.dll immediately
    netdbg --log=/tmp/netdbg.log --server     # log to a file

The LOG_OUTPUT environment variable (stdout, stderr, or a file path) selects the \
log destination when --log is not given."
)]
pub struct Cli {
    /// Attach to a running process by pid.
    #[arg(long, value_name = "PID")]
    pub attach: Option<u32>,

    /// Launch the program after `--` immediately, without waiting for a
    /// launch request.
    #[arg(long)]
    pub run: bool,

    /// Serve the protocol on a TCP port instead of stdio.
    #[arg(
        long,
        value_name = "PORT",
        num_args = 0..=1,
        default_missing_value = "4711"
    )]
    pub server: Option<u16>,

    /// Debugger log destination: stdout, stderr, or a file path.
    #[arg(long, value_name = "PATH", num_args = 0..=1, default_missing_value = "stderr")]
    pub log: Option<String>,

    /// Protocol-level log destination.
    #[arg(
        long = "engineLogging",
        value_name = "PATH",
        num_args = 0..=1,
        default_missing_value = "stderr"
    )]
    pub engine_logging: Option<String>,

    /// Print build information and exit.
    #[arg(long)]
    pub buildinfo: bool,

    /// Configuration file (defaults to netdbg.toml discovery).
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Program and arguments to debug, after `--`.
    #[arg(last = true, value_name = "PROGRAM [ARGS...]")]
    pub program: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_attach() {
        let cli = Cli::parse_from(["netdbg", "--attach", "1234"]);
        assert_eq!(cli.attach, Some(1234));
        assert!(!cli.run);
    }

    #[test]
    fn server_default_port() {
        let cli = Cli::parse_from(["netdbg", "--server"]);
        assert_eq!(cli.server, Some(4711));

        let cli = Cli::parse_from(["netdbg", "--server=9229"]);
        assert_eq!(cli.server, Some(9229));
    }

    #[test]
    fn program_after_double_dash() {
        let cli = Cli::parse_from(["netdbg", "--run", "--", "app.dll", "one", "two"]);
        assert!(cli.run);
        assert_eq!(cli.program, vec!["app.dll", "one", "two"]);
    }

    #[test]
    fn log_flag_defaults_to_stderr() {
        let cli = Cli::parse_from(["netdbg", "--log"]);
        assert_eq!(cli.log.as_deref(), Some("stderr"));

        let cli = Cli::parse_from(["netdbg", "--log=/tmp/x.log"]);
        assert_eq!(cli.log.as_deref(), Some("/tmp/x.log"));
    }
}
