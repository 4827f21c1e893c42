//! Realmkeep Administration CLI Tool
//!
//! Maintenance commands that run against the world store while the server
//! is down. Every writing command takes the global store lock first and
//! fails if a live server holds it.
//!
//! Usage:
//!   realmkeep-admin <COMMAND> [OPTIONS]
//!
//! Examples:
//!   realmkeep-admin seed --realm-name Windvale --width 128 --height 128
//!   realmkeep-admin repair --dry-run
//!   realmkeep-admin unlock --force
//!   realmkeep-admin status

use std::time::Instant;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use realmkeep_server::config::ServerConfig;
use realmkeep_server::game::repair::{find_violations, repair, Violation};
use realmkeep_server::game::seed::{seed_world, SeedPlan};
use realmkeep_server::store::{open_backend, GameStore};

/// Subcommand to run
enum Command {
    Seed(SeedPlan),
    Repair { dry_run: bool },
    Unlock { force: bool, yes: bool },
    Status,
}

/// CLI arguments
struct Args {
    command: Command,
    /// Verbose output
    verbose: bool,
}

fn take_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value for {}", flag))
}

fn parse_number<T: std::str::FromStr>(value: &str, flag: &str) -> Result<T, String> {
    value
        .parse()
        .map_err(|_| format!("Invalid value for {}: {}", flag, value))
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = std::env::args().collect();

    let mut command_name: Option<String> = None;
    let mut verbose = false;
    let mut plan = SeedPlan::default();
    let mut dry_run = false;
    let mut force = false;
    let mut yes = false;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--realm-name" | "-n" => {
                plan.realm_name = take_value(&args, &mut i, "--realm-name")?.to_string();
            }
            "--width" => {
                plan.width = parse_number(take_value(&args, &mut i, "--width")?, "--width")?;
            }
            "--height" => {
                plan.height = parse_number(take_value(&args, &mut i, "--height")?, "--height")?;
            }
            "--npcs" => {
                plan.npcs = parse_number(take_value(&args, &mut i, "--npcs")?, "--npcs")?;
            }
            "--seed" => {
                plan.rng_seed = parse_number(take_value(&args, &mut i, "--seed")?, "--seed")?;
            }
            "--dry-run" => {
                dry_run = true;
            }
            "--force" => {
                force = true;
            }
            "--yes" | "-y" => {
                yes = true;
            }
            "--verbose" | "-v" => {
                verbose = true;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown argument: {}", arg));
            }
            arg => {
                if command_name.is_some() {
                    return Err(format!("Unexpected argument: {}", arg));
                }
                command_name = Some(arg.to_string());
            }
        }
        i += 1;
    }

    let command = match command_name.as_deref() {
        Some("seed") => Command::Seed(plan),
        Some("repair") => Command::Repair { dry_run },
        Some("unlock") => Command::Unlock { force, yes },
        Some("status") => Command::Status,
        Some(other) => return Err(format!("Unknown command: {}", other)),
        None => return Err("Missing command".to_string()),
    };

    Ok(Args { command, verbose })
}

fn print_help() {
    println!(
        r#"
Realmkeep Administration Tool

Maintenance commands for the world store. Run them while the server is
stopped: writing commands take the global store lock and fail if it is held.

USAGE:
    realmkeep-admin <COMMAND> [OPTIONS]

COMMANDS:
    seed        Create a realm, its regions and a starting population
    repair      Rebuild region entity indexes from entity positions
    unlock      Break a stale global lock (requires --force)
    status      Show who holds the global lock

SEED OPTIONS:
    -n, --realm-name <NAME>  Realm name (default: Windvale)
        --width <TILES>      Realm width in tiles (default: 128)
        --height <TILES>     Realm height in tiles (default: 128)
        --npcs <N>           Number of wandering NPCs (default: 25)
        --seed <N>           RNG seed for NPC placement (default: 0)

REPAIR OPTIONS:
        --dry-run            List index violations without fixing them

UNLOCK OPTIONS:
        --force              Required; the lock is broken whoever holds it
    -y, --yes                Skip the confirmation prompt

OPTIONS:
    -v, --verbose            Enable verbose output
    -h, --help               Print this help message

CONFIGURATION:
    The backend is read from the server configuration file
    (REALMKEEP_CONFIG, default config/server.toml) and REALMKEEP_* overrides.
"#
    );
}

#[tokio::main]
async fn main() {
    // Parse arguments
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    // Initialize logging
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber).expect("Failed to set subscriber");

    if let Err(e) = run(args.command).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn open_store() -> Result<GameStore> {
    let config = ServerConfig::load().await?;
    let backend = open_backend(&config)
        .await
        .context("Failed to open the world store backend")?;
    Ok(GameStore::new(backend, &config.store))
}

async fn run(command: Command) -> Result<()> {
    let start_time = Instant::now();
    let store = open_store().await?;

    match command {
        Command::Seed(plan) => {
            store.try_lock().await.context("Is the server running?")?;
            let result = seed_world(&store, &plan).await;
            store.unlock().await?;
            let report = result?;

            info!(
                "Seeded realm {} ({}): {} regions, {} entities",
                report.realm_id, plan.realm_name, report.regions, report.entities
            );
            for (name, id) in &report.players {
                info!("  player {:<12} id {}", name, id);
            }
        }
        Command::Repair { dry_run: true } => {
            let violations = find_violations(&store).await?;
            for violation in &violations {
                match violation {
                    Violation::Stale {
                        realm_id,
                        region,
                        entity_id,
                    } => info!("realm {} region {}: stale entity {}", realm_id, region, entity_id),
                    Violation::Missing {
                        realm_id,
                        region,
                        entity_id,
                    } => info!("realm {} region {}: missing entity {}", realm_id, region, entity_id),
                }
            }
            info!("{} violations found", violations.len());
        }
        Command::Repair { dry_run: false } => {
            store.try_lock().await.context("Is the server running?")?;
            let result = repair(&store).await;
            store.unlock().await?;
            let report = result?;
            info!("Repair complete: {}", report);
        }
        Command::Unlock { force, yes } => {
            if !force {
                bail!("Breaking the lock requires --force");
            }
            let Some(holder) = store.lock_holder().await? else {
                info!("Global lock is not held");
                return Ok(());
            };
            warn!("Global lock is held by {}", holder);
            if !yes && !confirm("Make sure no server is running. Breaking the lock lets writers collide.").await? {
                info!("Aborted");
                return Ok(());
            }
            store.force_unlock().await?;
            info!("Lock broken");
        }
        Command::Status => match store.lock_holder().await? {
            Some(holder) => info!("Global lock held by {}", holder),
            None => info!("Global lock is free"),
        },
    }

    info!("Done in {:.2?}", start_time.elapsed());
    Ok(())
}

/// Ask for an explicit "yes" on stdin
async fn confirm(prompt: &str) -> Result<bool> {
    println!("{} Type 'yes' to continue:", prompt);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let answer = lines.next_line().await?.unwrap_or_default();
    Ok(answer.trim().eq_ignore_ascii_case("yes"))
}
