mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(name = "dgmux", version, about = "Datagram multiplexer CLI")]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(
        long,
        value_name = "LEVEL",
        default_value = "warn",
        env = "DGMUX_LOG_LEVEL",
        global = true
    )]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simulate_subcommand() {
        let cli = Cli::try_parse_from([
            "dgmux",
            "simulate",
            "--clients",
            "4",
            "--reverse",
            "--channel",
            "1",
        ])
        .expect("simulate args should parse");

        let Command::Simulate(args) = cli.command else {
            panic!("expected simulate");
        };
        assert_eq!(args.clients, 4);
        assert_eq!(args.channel, 1);
        assert!(args.reverse);
    }

    #[test]
    fn rejects_conflicting_payload_args() {
        let err = Cli::try_parse_from(["dgmux", "fragment", "--data", "hello", "--size", "10"])
            .expect_err("conflicting args should fail");

        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn parses_global_format_after_subcommand() {
        let cli = Cli::try_parse_from(["dgmux", "fragment", "--size", "3", "--format", "pretty"])
            .expect("fragment args should parse");
        assert_eq!(cli.format, Some(OutputFormat::Pretty));
        assert!(matches!(cli.command, Command::Fragment(_)));
    }
}
