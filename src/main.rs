//! Purpose: `fileport` CLI entry point.
//! Role: Binary crate root; parses args, installs tracing, runs one command.
//! Invariants: stdout carries only command output (reply frames for `serve`, JSON for `stat`).
//! Invariants: Diagnostics go to stderr; errors are emitted as JSON when stderr is not a tty.
//! Invariants: Process exit code is derived from `to_exit_code`.
use std::io::{self, IsTerminal};
use std::path::PathBuf;

use clap::{Args, CommandFactory, Parser, Subcommand, ValueHint, error::ErrorKind as ClapErrorKind};
use clap_complete::aot::Shell;
use serde_json::{Map, Value, json};
use std::error::Error as StdError;
use tracing_subscriber::EnvFilter;

use fileport::core::config::PortConfig;
use fileport::core::error::{Error, ErrorKind, to_exit_code};

mod command_dispatch;
mod serve;

#[derive(Parser)]
#[command(
    name = "fileport",
    version,
    about = "Ordered, non-blocking file ports over a framed stdio transport",
    long_about = None,
    after_help = r#"EXAMPLES
  $ fileport serve < commands.bin > replies.bin
  $ fileport stat Cargo.toml
  $ fileport completion zsh > _fileport

NOTES
  - Frames on stdin and stdout are `length u32 BE | bytes`
  - RUST_LOG controls diagnostics on stderr (default: info)"#
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Clone, Debug, Default)]
struct PortArgs {
    #[arg(
        long,
        help = "Run tasks at or below this level inline: 0 none, 1 metadata, 2 everything"
    )]
    short_circuit: Option<i32>,
    #[arg(long, help = "Delay before buffered writes are flushed, in milliseconds")]
    write_delay_ms: Option<u64>,
    #[arg(long, help = "Bytes read per perform for whole-file and line reads")]
    segment_read: Option<usize>,
    #[arg(long, help = "Bytes written per perform when writes are chunked")]
    segment_write: Option<usize>,
    #[arg(long, help = "Chunk large writes even when they run on the worker pool")]
    segment_writes: bool,
}

impl PortArgs {
    /// Environment first, then flags.
    fn into_config(self) -> Result<PortConfig, Error> {
        let mut config = PortConfig::from_env()?;
        if let Some(level) = self.short_circuit {
            config = config.with_short_circuit(level);
        }
        if let Some(millis) = self.write_delay_ms {
            config = config.with_write_delay(std::time::Duration::from_millis(millis));
        }
        let read = self.segment_read.unwrap_or(config.segment_read);
        let write = self.segment_write.unwrap_or(config.segment_write);
        config = config.with_segments(read, write)?;
        if self.segment_writes {
            config = config.with_segment_writes(true);
        }
        Ok(config)
    }
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Serve one port over stdin/stdout frames until EOF or Ctrl-C")]
    Serve {
        #[command(flatten)]
        port: PortArgs,
    },
    #[command(about = "Stat a path through a port and print the result as JSON")]
    Stat {
        #[arg(help = "Path to stat", value_hint = ValueHint::AnyPath)]
        path: PathBuf,
        #[command(flatten)]
        port: PortArgs,
    },
    #[command(about = "Print shell completions")]
    Completion {
        #[arg(help = "Shell to generate completions for")]
        shell: Shell,
    },
}

fn main() {
    let exit_code = match run() {
        Ok(code) => code,
        Err(err) => {
            emit_error(&err);
            to_exit_code(err.kind())
        }
    };
    std::process::exit(exit_code);
}

fn run() -> Result<i32, Error> {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => match err.kind() {
            ClapErrorKind::DisplayHelp
            | ClapErrorKind::DisplayVersion
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                err.print().map_err(|io_err| {
                    Error::new(ErrorKind::Io)
                        .with_message("failed to write help")
                        .with_source(io_err)
                })?;
                let missing = err.kind() == ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand;
                return Ok(if missing { 2 } else { 0 });
            }
            _ => {
                return Err(Error::new(ErrorKind::Usage).with_message(clap_error_summary(&err)));
            }
        },
    };
    init_tracing();
    command_dispatch::dispatch_command(cli.command)?;
    Ok(0)
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(io::stderr)
        .try_init();
}

fn emit_error(err: &Error) {
    if io::stderr().is_terminal() {
        eprintln!("error: {}", error_message(err));
        if let Some(path) = err.path() {
            eprintln!("path: {}", path.display());
        }
        return;
    }
    let json = serde_json::to_string(&error_json(err)).unwrap_or_else(|_| {
        "{\"error\":{\"kind\":\"Internal\",\"message\":\"json encode failed\"}}".to_string()
    });
    eprintln!("{json}");
}

fn error_message(err: &Error) -> String {
    err.message()
        .map(str::to_string)
        .unwrap_or_else(|| format!("{:?} error", err.kind()))
}

fn error_json(err: &Error) -> Value {
    let mut inner = Map::new();
    inner.insert("kind".to_string(), json!(format!("{:?}", err.kind())));
    inner.insert("message".to_string(), json!(error_message(err)));
    if let Some(path) = err.path() {
        inner.insert("path".to_string(), json!(path.display().to_string()));
    }
    if err.kind() == ErrorKind::Io {
        inner.insert("errno".to_string(), json!(err.errno().as_str()));
    }
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
        causes.push(cause.to_string());
        source = cause.source();
    }
    if !causes.is_empty() {
        inner.insert("causes".to_string(), json!(causes));
    }
    let mut outer = Map::new();
    outer.insert("error".to_string(), Value::Object(inner));
    Value::Object(outer)
}

fn clap_error_summary(err: &clap::Error) -> String {
    for line in err.to_string().lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if let Some(rest) = trimmed.strip_prefix("error:") {
            return rest.trim().to_string();
        }
        return trimmed.to_string();
    }
    "invalid arguments".to_string()
}
