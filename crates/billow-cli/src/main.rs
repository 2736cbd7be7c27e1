use std::io::{self, Write};
use std::path::Path;

use anyhow::{Context, Result};
use billow_db::{Database, SharedDatabase};
use chrono::Utc;
use clap::Parser;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use billow_cli::commands::classify::Activity;
use billow_cli::commands::{classify, init, rules, run, sessions, status, sync_calendar};
use billow_cli::{Cli, Commands, Config, RulesAction};

/// Load config and open database, ensuring the parent directory exists.
fn open_database(config_path: Option<&Path>) -> Result<(Database, Config)> {
    let config = Config::load_from(config_path).context("failed to load configuration")?;
    tracing::debug!(?config, "loaded configuration");

    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }

    let db = Database::open(&config.database_path).with_context(|| {
        format!("failed to open database {}", config.database_path.display())
    })?;
    Ok((db, config))
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::builder()
            .with_default_directive(LevelFilter::WARN.into())
            .from_env_lossy()
    };
    // stdout carries command output
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    let mut stdout = io::stdout().lock();
    match cli.command {
        Some(Commands::Init) => {
            let (mut db, config) = open_database(cli.config.as_deref())?;
            init::run(&mut stdout, &mut db, &config.database_path)?;
        }
        Some(Commands::Run) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            run::run(&config, SharedDatabase::new(db))?;
        }
        Some(Commands::Status) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            status::run(&mut stdout, &db, &config.database_path)?;
        }
        Some(Commands::Sessions { date, json }) => {
            let (db, _config) = open_database(cli.config.as_deref())?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            sessions::run(&mut stdout, &db, date, json)?;
        }
        Some(Commands::Rules(action)) => {
            let (mut db, _config) = open_database(cli.config.as_deref())?;
            match action {
                RulesAction::List { json } => rules::list(&mut stdout, &db, json)?,
                RulesAction::Add {
                    match_type,
                    pattern,
                    category,
                    client,
                    billable,
                } => rules::add(
                    &mut stdout,
                    &mut db,
                    match_type,
                    &pattern,
                    category,
                    client,
                    billable,
                )?,
            }
        }
        Some(Commands::Classify {
            exe,
            title,
            domain,
            in_meeting,
        }) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            let activity = Activity {
                exe: &exe,
                title: title.as_deref(),
                domain: domain.as_deref(),
                in_meeting,
            };
            classify::run(&mut stdout, &db, &config.confidence, &activity)?;
        }
        Some(Commands::SyncCalendar) => {
            let (db, config) = open_database(cli.config.as_deref())?;
            sync_calendar::run(&mut stdout, &SharedDatabase::new(db), &config.calendar)?;
        }
        None => {
            use clap::CommandFactory;
            Cli::command().print_help()?;
            writeln!(stdout)?;
        }
    }

    Ok(())
}
