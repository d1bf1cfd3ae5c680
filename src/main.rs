//! Command-line entry point for ferry.

use clap::{Parser, Subcommand};
use derive_more::{Display, Error};
use exn::{OptionExt, ResultExt};
use ferry_cache::{Database, Repository};
use ferry_config::Settings;
use ferry_extractor::{ApiRef, Extractor};
use ferry_fetch::Fetcher;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

type Result<T> = std::result::Result<T, exn::Exn<ErrorKind>>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
enum ErrorKind {
    #[display("could not load configuration")]
    Config,
    #[display("could not open the cache database")]
    Database,
    #[display("could not set up transports")]
    Transport,
    #[display("extraction failed for API {_0}")]
    Extract(#[error(not(source))] String),
    #[display("could not compute hashes for API {_0}")]
    Hash(#[error(not(source))] String),
}

/// Fetch, cache and extract remote data files.
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short, long, env = "FERRY_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download and extract the files of an API, printing each local path
    Extract {
        /// API name, or numeric id with --id
        api: String,
        #[arg(long)]
        id: bool,
    },
    /// Print the hash of an API and of each of its sources
    Hash {
        /// API name
        api: String,
    },
    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{err:?}");
            ExitCode::FAILURE
        },
    }
}

async fn run(cli: Cli) -> Result<()> {
    let settings = Settings::load(cli.config.as_deref()).or_raise(|| ErrorKind::Config)?;
    let db = Database::connect(&settings.database).await.or_raise(|| ErrorKind::Database)?;
    let result = match cli.command {
        Command::Extract { api, id } => extract(&db, settings, &api, id).await,
        Command::Hash { api } => hash(&db, &api).await,
        Command::Migrate => db.migrate().await.or_raise(|| ErrorKind::Database),
    };
    db.close().await;
    result
}

async fn extract(db: &Database, settings: Settings, api: &str, by_id: bool) -> Result<()> {
    let api_ref = api_ref(api, by_id)?;
    let fetcher = Fetcher::from_settings(&settings).or_raise(|| ErrorKind::Transport)?;
    let extractor = Extractor::new(Repository::from(db), fetcher, settings.extract);
    let paths = extractor.extract(api_ref).await.or_raise(|| ErrorKind::Extract(api.to_string()))?;
    tracing::info!(api, files = paths.len(), "extraction complete");
    for path in paths {
        println!("{}", path.display());
    }
    Ok(())
}

fn api_ref(api: &str, by_id: bool) -> Result<ApiRef> {
    Ok(match by_id {
        true => ApiRef::Id(api.parse::<i64>().or_raise(|| ErrorKind::Extract(api.to_string()))?),
        false => ApiRef::from(api),
    })
}

async fn hash(db: &Database, name: &str) -> Result<()> {
    let repo = Repository::from(db);
    let failed = || ErrorKind::Hash(name.to_string());
    let api = repo.get_api_by_name(name).await.or_raise(failed)?.ok_or_raise(failed)?;
    let hashes = repo.load_tree(api).await.or_raise(failed)?.hashes().or_raise(failed)?;
    println!("api\t{}", hashes.api.to_hex());
    for (source_id, hash) in hashes.sources {
        println!("source {source_id}\t{}", hash.to_hex());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("acme", false, ApiRef::Name("acme".to_string()))]
    #[case("42", true, ApiRef::Id(42))]
    #[case("42", false, ApiRef::Name("42".to_string()))]
    fn test_api_ref(#[case] api: &str, #[case] by_id: bool, #[case] expected: ApiRef) {
        assert_eq!(api_ref(api, by_id).unwrap(), expected);
    }

    #[test]
    fn test_api_ref_rejects_non_numeric_id() {
        let err = api_ref("acme", true).unwrap_err();
        assert_eq!(*err, ErrorKind::Extract("acme".to_string()));
    }

    #[test]
    fn test_cli_parses_extract_by_id() {
        let cli = Cli::try_parse_from(["ferry", "--verbose", "extract", "7", "--id"]).unwrap();
        assert!(cli.verbose);
        assert!(matches!(cli.command, Command::Extract { ref api, id: true } if api == "7"));
    }
}
