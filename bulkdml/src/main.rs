//! Entrypoint of the bulkdml binary
#![deny(rustdoc::broken_intra_doc_links, rustdoc::bare_urls, rust_2018_idioms)]
#![warn(
    missing_debug_implementations,
    clippy::explicit_iter_loop,
    clippy::use_self,
    clippy::clone_on_ref_ptr,
    clippy::future_not_send
)]

use bulkdml_clap_blocks::tokio::TokioWorkerConfig;
use dotenvy::dotenv;
use trogging::{
    TroggingGuard,
    cli::LoggingConfigBuilderExt,
    tracing_subscriber::{Registry, prelude::*},
};

mod commands {
    pub(crate) mod common;
    pub(crate) mod delete;
    pub(crate) mod dml;
    pub(crate) mod insert;
    pub(crate) mod rows;
    pub(crate) mod update;
    pub(crate) mod upsert;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "bulkdml",
    version,
    disable_help_flag = true,
    arg(
        clap::Arg::new("help")
            .short('h')
            .long("help")
            .help("Print help information")
            .action(clap::ArgAction::Help)
            .global(true)
    ),
    about = "Bulk insert, update, delete and upsert records of a remote record service",
    long_about = r#"Bulk insert, update, delete and upsert records of a remote record service

Rows are read from a CSV file with a header line, one record per row.

Examples:
    # Delete every account listed in accounts.csv
    bulkdml delete --entity account --file accounts.csv

    # Update contacts 50 at a time, carrying on past failed rows
    bulkdml update --entity contact --file contacts.csv --hints BATCH_SIZE_50,CONTINUE_ON_ERROR

    # Display all commands short form
    bulkdml -h

    # Run with full debug logging specified with LOG_FILTER
    LOG_FILTER=debug bulkdml insert --entity account --file accounts.csv
"#
)]
struct Config {
    #[clap(flatten)]
    runtime_config: TokioWorkerConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Create one record per row
    Insert(commands::insert::Config),

    /// Update the record identified by the primary key of each row
    Update(commands::update::Config),

    /// Delete the record identified by the primary key of each row
    Delete(commands::delete::Config),

    /// Create or update the record identified by the key of each row
    Upsert(commands::upsert::Config),
}

impl Command {
    fn common(&self) -> &commands::common::BulkDmlConfig {
        match self {
            Self::Insert(config) => &config.common,
            Self::Update(config) => &config.common,
            Self::Delete(config) => &config.common,
            Self::Upsert(config) => &config.common,
        }
    }
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    // the blocking pool has to be able to grow to the parallel minimum before any worker runs
    let min_blocking_threads = config
        .command
        .as_ref()
        .map_or(1, |c| c.common().tuning.min_worker_threads);
    let tokio_runtime = config
        .runtime_config
        .builder(min_blocking_threads)?
        .build()?;

    tokio_runtime.block_on(async move {
        fn handle_init_logs(r: Result<TroggingGuard, trogging::Error>) -> TroggingGuard {
            match r {
                Ok(guard) => guard,
                Err(e) => {
                    eprintln!("Initializing logs failed: {e}");
                    std::process::exit(ReturnCode::Failure as _);
                }
            }
        }

        let Some(command) = config.command else {
            println!("command required, -h/--help for help");
            return;
        };
        let _tracing_guard =
            handle_init_logs(init_logs_and_tracing(&command.common().logging_config));

        match command {
            Command::Insert(config) => {
                if let Err(e) = commands::insert::command(config).await {
                    eprintln!("Insert command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Command::Update(config) => {
                if let Err(e) = commands::update::command(config).await {
                    eprintln!("Update command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Command::Delete(config) => {
                if let Err(e) = commands::delete::command(config).await {
                    eprintln!("Delete command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Command::Upsert(config) => {
                if let Err(e) = commands::upsert::command(config).await {
                    eprintln!("Upsert command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // Ignore this - a missing env file is not an error, defaults will
            // be applied when initialising the Config struct.
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(1);
        }
    };
}

fn init_logs_and_tracing(
    config: &trogging::cli::LoggingConfig,
) -> Result<TroggingGuard, trogging::Error> {
    let log_layer = trogging::Builder::new()
        .with_default_log_filter("info")
        .with_logging_config(config)
        .build()?;

    let subscriber = Registry::default().with(log_layer);
    trogging::install_global(subscriber)
}
