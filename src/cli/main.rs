/**
 * farmsync command line
 *
 * Inspects and drives the offline store of a farm client: queue and
 * dead-letter counts, manual drains, requeueing dead letters and clearing
 * the snapshot cache.
 */
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use farmsync::offline::OfflineSync;
use farmsync::shared::{SyncConfig, SyncError};
use std::path::PathBuf;
use uuid::Uuid;

fn cli() -> Command {
    Command::new("farmsync")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Offline queue and cache tools for the farm client")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file (defaults to FARMSYNC_* environment variables)"),
        )
        .arg(
            Arg::new("db")
                .long("db")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Offline database file"),
        )
        .arg(
            Arg::new("api-url")
                .long("api-url")
                .global(true)
                .help("Base URL of the farm API"),
        )
        .subcommand(
            Command::new("status")
                .about("Show pending and dead-letter counts and the last sync time")
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("dead-letters")
                .about("List dead-lettered operations with their reasons")
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("sync")
                .about("Drain the queue against the API now")
                .arg(json_flag()),
        )
        .subcommand(
            Command::new("requeue")
                .about("Move a dead letter back to the tail of the queue")
                .arg(Arg::new("id").required(true).help("Operation id")),
        )
        .subcommand(
            Command::new("discard")
                .about("Permanently delete a dead letter")
                .arg(Arg::new("id").required(true).help("Operation id")),
        )
        .subcommand(Command::new("clear-cache").about("Delete every cached snapshot"))
}

fn json_flag() -> Arg {
    Arg::new("json")
        .long("json")
        .action(ArgAction::SetTrue)
        .help("Output as JSON")
}

/// Global flags are read from the subcommand's matches, where clap puts them
fn load_config(matches: &ArgMatches) -> Result<SyncConfig, SyncError> {
    let mut config = match matches.get_one::<PathBuf>("config") {
        Some(path) => SyncConfig::from_file(path)?,
        None => SyncConfig::from_env()?,
    };

    if let Some(path) = matches.get_one::<PathBuf>("db") {
        config.database = farmsync::shared::DatabaseLocation::File(path.clone());
    }
    if let Some(url) = matches.get_one::<String>("api-url") {
        config.api_url = url.clone();
    }
    config.validate()?;
    Ok(config)
}

fn parse_id(args: &ArgMatches) -> Result<Uuid, SyncError> {
    let raw = args.get_one::<String>("id").map(String::as_str).unwrap_or_default();
    Uuid::parse_str(raw).map_err(|e| SyncError::invalid("id", e.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&env_filter))
        .with_writer(std::io::stderr)
        .init();

    let matches = cli().get_matches();
    let Some((command, args)) = matches.subcommand() else {
        return Ok(());
    };
    let sync = OfflineSync::open(load_config(args)?).await?;

    match (command, args) {
        ("status", args) => {
            let status = sync.status().await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&status)?);
            } else {
                println!("Phase:         {}", status.phase);
                println!("Pending:       {}", status.pending_operations);
                println!("Dead letters:  {}", status.dead_letters);
                println!("Last sync:     {}", status.last_sync.as_deref().unwrap_or("never"));
                if let Some(error) = &status.last_error {
                    println!("Last error:    {}", error);
                }
                let corrupt = sync.queue().corrupt_entries().await;
                if !corrupt.is_empty() {
                    println!("Corrupt rows:  {}", corrupt.len());
                }
            }
        }
        ("dead-letters", args) => {
            let dead_letters = sync.dead_letters().await?;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&dead_letters)?);
            } else if dead_letters.is_empty() {
                println!("No dead letters");
            } else {
                for dead in &dead_letters {
                    println!(
                        "{}  {:<6} {:<30} attempts={} [{}] {}",
                        dead.operation.id,
                        dead.operation.method,
                        dead.operation.path,
                        dead.operation.attempts,
                        dead.failure.as_str(),
                        dead.reason
                    );
                }
            }
        }
        ("sync", args) => {
            let report = sync.sync_now().await?;
            sync.teardown().await;
            if args.get_flag("json") {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("Status:        {:?}", report.status);
                println!("Applied:       {}", report.applied.len());
                println!("Dead-lettered: {}", report.dead_lettered.len());
                println!("Remaining:     {}", report.remaining);
                if let Some(id) = report.halted_on {
                    println!("Halted on:     {}", id);
                }
                for failure in &report.cache_refresh_failures {
                    println!("Cache refresh failed: {}", failure);
                }
            }
        }
        ("requeue", args) => {
            let op = sync.retry_dead_letter(parse_id(args)?).await?;
            println!("Requeued {} {} {}", op.id, op.method, op.path);
        }
        ("discard", args) => {
            let id = parse_id(args)?;
            sync.discard_dead_letter(id).await?;
            println!("Discarded {}", id);
        }
        ("clear-cache", _) => {
            let removed = sync.clear_cache().await?;
            println!("Cleared {} snapshot(s)", removed);
        }
        _ => {}
    }

    Ok(())
}
