//! kvdb-server: serves an in-memory key-value database over TCP.
//!
//! Settings come from the configuration file; command-line flags override
//! them.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use kvdb::cli;
use kvdb::config::Config;
use kvdb::server::DatabaseServer;

/// Concurrent in-memory key-value database server.
#[derive(Parser, Debug)]
#[command(name = "kvdb-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(value_name = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// TCP port to listen on (0 picks a free port)
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(short, long, value_name = "ADDRESS")]
    bind: Option<String>,

    /// Maximum number of concurrently authenticated users
    #[arg(short = 'c', long)]
    max_connections: Option<usize>,

    /// Storage backend (simple, multi_condition, sharded)
    #[arg(long)]
    backend: Option<String>,

    /// Number of shards for the sharded backend
    #[arg(long)]
    shards: Option<usize>,

    /// Increase logging verbosity (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Decrease logging verbosity (only show errors)
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Applies command-line overrides on top of the loaded configuration.
    fn apply(&self, cfg: &mut Config) {
        if let Some(port) = self.port {
            cfg.server.port = port;
        }
        if let Some(bind) = &self.bind {
            cfg.server.bind_address.clone_from(bind);
        }
        if let Some(max_connections) = self.max_connections {
            cfg.server.max_connections = max_connections;
        }
        if let Some(backend) = &self.backend {
            cfg.backend.kind.clone_from(backend);
        }
        if let Some(shards) = self.shards {
            cfg.backend.shards = shards;
        }
    }
}

/// Entry point for the kvdb server.
fn main() -> ExitCode {
    let args = Args::parse();

    // Load configuration
    let Some(mut cfg) = cli::load_config_or_report(args.config.as_deref()) else {
        return ExitCode::FAILURE;
    };
    args.apply(&mut cfg);
    if let Err(e) = cfg.validate() {
        eprintln!("Configuration error: {e}");
        return ExitCode::FAILURE;
    }

    // Initialise logging
    cli::init_tracing(cli::log_level(args.verbose, args.quiet, &cfg.logging.level));

    let kind = match cfg.backend.kind() {
        Ok(kind) => kind,
        Err(e) => {
            error!(error = %e, "Invalid backend");
            return ExitCode::FAILURE;
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        backend = %kind,
        "Starting kvdb server"
    );

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "Failed to create Tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    let server = DatabaseServer::new(&cfg.server, &cfg.thread_pool, kind.build(), kind.name());

    let result = runtime.block_on(async move {
        let listener = DatabaseServer::bind(&cfg.server).await?;
        server.run(listener).await
    });

    match result {
        Ok(()) => {
            info!("Server shut down gracefully");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Server error");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Args::command().debug_assert();
    }

    #[test]
    fn overrides_replace_config_values() {
        let args = Args::parse_from([
            "kvdb-server",
            "--port",
            "4000",
            "--backend",
            "sharded",
            "--shards",
            "8",
        ]);
        let mut cfg = Config::default();
        args.apply(&mut cfg);

        assert_eq!(cfg.server.port, 4000);
        assert_eq!(cfg.backend.kind, "sharded");
        assert_eq!(cfg.backend.shards, 8);
        assert_eq!(cfg.server.bind_address, "127.0.0.1");
    }
}
