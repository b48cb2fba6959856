//! Purpose: Top-level CLI command dispatch for `fileport`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Each command builds its own runtime; nothing outlives the command.

use super::*;

pub(super) fn dispatch_command(command: Command) -> Result<(), Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "fileport", &mut io::stdout());
            Ok(())
        }
        Command::Serve { port } => {
            let config = port.into_config()?;
            runtime()?.block_on(serve::serve(config))
        }
        Command::Stat { path, port } => {
            let config = port.into_config()?;
            let info = runtime()?.block_on(serve::stat(config, path))?;
            let json = serde_json::to_string_pretty(&info).map_err(|err| {
                Error::new(ErrorKind::Internal)
                    .with_message("failed to encode file info")
                    .with_source(err)
            })?;
            println!("{json}");
            Ok(())
        }
    }
}

fn runtime() -> Result<tokio::runtime::Runtime, Error> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|err| {
            Error::new(ErrorKind::Internal)
                .with_message("failed to start runtime")
                .with_source(err)
        })
}
