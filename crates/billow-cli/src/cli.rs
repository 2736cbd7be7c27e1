//! Command-line argument definitions.

use std::path::PathBuf;

use billow_core::{Billable, MatchType};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

/// Desktop activity tracker.
///
/// Turns foreground-window changes into classified, billable work sessions.
#[derive(Debug, Parser)]
#[command(name = "billow", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Create the database and seed the default rules.
    Init,

    /// Run the tracking agent, reading notifications from stdin.
    Run,

    /// Show database location, row counts and the last observed event.
    Status,

    /// List sessions of one UTC day.
    Sessions {
        /// Day to list (YYYY-MM-DD). Defaults to today (UTC).
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Output one JSON object per line.
        #[arg(long)]
        json: bool,
    },

    /// Inspect or extend the classification rules.
    #[command(subcommand)]
    Rules(RulesAction),

    /// Classify an activity against the stored rules without recording it.
    Classify {
        /// Executable name (e.g., EXCEL.EXE).
        #[arg(long)]
        exe: String,

        /// Window title.
        #[arg(long)]
        title: Option<String>,

        /// Browser domain.
        #[arg(long)]
        domain: Option<String>,

        /// Treat the activity as happening during an online meeting.
        #[arg(long)]
        in_meeting: bool,
    },

    /// Fetch today's online meetings once.
    SyncCalendar,
}

#[derive(Debug, Subcommand)]
pub enum RulesAction {
    /// List rules in evaluation order.
    List {
        /// Output as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Append a rule at the lowest priority.
    Add {
        /// One of: exe, domain, title_contains.
        #[arg(long)]
        match_type: MatchType,

        #[arg(long)]
        pattern: String,

        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        client: Option<String>,

        /// yes or no; omitted means unknown.
        #[arg(long)]
        billable: Option<Billable>,
    },
}
