mod cli;

use std::io::{self, Write};
use std::process::ExitCode;

use clap::Parser;
use sshpass_pty::{RealTerminal, Session, SessionError, SessionOutcome};

use cli::{join_command, Cli};

fn main() -> ExitCode {
    let cli = Cli::parse();

    // -v raises the default filter; RUST_LOG still wins.
    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let credential = match cli.credential_source() {
        Ok(source) => source,
        Err(e) => {
            eprintln!("sshpass: {e}");
            return ExitCode::FAILURE;
        }
    };

    let config = cli.session_config();
    if config.verbose {
        println!("cmd: {}", join_command(&config.command));
    }

    let result = Session::new(config, credential, RealTerminal::stdio()).run();
    ExitCode::from(report(&result, &mut io::stderr()))
}

/// Print the diagnostic for a failed session and return the exit status.
fn report(result: &Result<SessionOutcome, SessionError>, diag: &mut impl Write) -> u8 {
    if let Err(e) = result {
        let _ = writeln!(diag, "sshpass: {e}");
    }
    exit_status(result)
}

/// Process exit status for a finished session: 0 on success, 1 otherwise.
///
/// The child's own exit code is not propagated.
fn exit_status(result: &Result<SessionOutcome, SessionError>) -> u8 {
    match result {
        Ok(outcome) => {
            log::debug!("session finished: {outcome:?}");
            0
        }
        Err(SessionError::AuthenticationFailed) => 1,
        Err(e) => {
            log::debug!("session aborted: {e:?}");
            1
        }
    }
}
