//! kvdb-client: interactive shell for a kvdb server.
//!
//! Asks for credentials until the server accepts them, then reads one
//! command per line from standard input. Commands ending in `&` run in the
//! background and report when they finish.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error};

use kvdb::cli;
use kvdb::client::{CommandRunner, DatabaseClient, LoggerReporter};
use kvdb::protocol::AuthStatus;
use kvdb::store::KeyValueDb;

const PROMPT: &str = "> ";

/// Interactive client for a kvdb server.
#[derive(Parser, Debug)]
#[command(name = "kvdb-client")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Server address as <host>:<port> (defaults to the configured server)
    #[arg(value_name = "ADDRESS")]
    address: Option<String>,

    /// Path to configuration file
    #[arg(long, value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

/// Message printed for each authentication outcome.
const fn status_message(status: AuthStatus) -> &'static str {
    match status {
        AuthStatus::Success => "Authentication success",
        AuthStatus::SuccessNewUser => "Authentication success (new user registered)",
        AuthStatus::WrongCredentials => "Wrong credentials",
        AuthStatus::ExistingLogin => "That user is already logged in",
    }
}

/// Prints `prompt` and reads one line without its terminator.
///
/// Returns `None` at end of input.
fn prompt_line(input: &mut impl BufRead, prompt: &str) -> io::Result<Option<String>> {
    let mut stdout = io::stdout().lock();
    stdout.write_all(prompt.as_bytes())?;
    stdout.flush()?;
    drop(stdout);

    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

/// Prompts for credentials until the server accepts them.
///
/// Returns `false` if input ended first.
fn log_in(
    client: &DatabaseClient,
    input: &mut impl BufRead,
) -> Result<bool, Box<dyn std::error::Error>> {
    while !client.is_authenticated() {
        let Some(username) = prompt_line(input, "Username: ")? else {
            return Ok(false);
        };
        let Some(password) = prompt_line(input, "Password: ")? else {
            return Ok(false);
        };

        let status = client.authenticate(&username, &password)?;
        println!("{}", status_message(status));
    }
    Ok(true)
}

fn run(client: Arc<DatabaseClient>) -> Result<(), Box<dyn std::error::Error>> {
    let mut input = io::stdin().lock();
    if !log_in(&client, &mut input)? {
        return Ok(());
    }

    let database: Arc<dyn KeyValueDb> = client.clone();
    let runner = CommandRunner::new(database, Arc::new(LoggerReporter::stdio(PROMPT)));

    let Some(mut line) = prompt_line(&mut input, PROMPT)? else {
        return Ok(());
    };
    loop {
        if client.is_connection_broken() {
            return Err("connection to the server was lost".into());
        }

        match runner.parse_and_run(&line) {
            Ok(Some(_background)) => debug!("Command moved to the background"),
            Ok(None) => {}
            Err(e) => {
                let mut stderr = io::stderr().lock();
                write!(stderr, "{e}\n{PROMPT}")?;
                stderr.flush()?;
            }
        }

        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }
        let trimmed = line.trim_end_matches(['\r', '\n']).len();
        line.truncate(trimmed);
    }
}

/// Entry point for the kvdb client.
fn main() -> ExitCode {
    let args = Args::parse();

    let Some(cfg) = cli::load_config_or_report(args.config.as_deref()) else {
        return ExitCode::FAILURE;
    };
    cli::init_tracing(cli::log_level(args.verbose, args.quiet, &cfg.logging.level));

    let address = args
        .address
        .unwrap_or_else(|| format!("{}:{}", cfg.server.bind_address, cfg.server.port));

    let client = match DatabaseClient::connect(address.as_str(), cfg.client.conditions) {
        Ok(client) => Arc::new(client),
        Err(e) => {
            eprintln!("Failed to connect to {address}: {e}");
            return ExitCode::FAILURE;
        }
    };

    match run(client) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Client error");
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
