//! Init command for creating the database.

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use billow_db::Database;

/// Runs the init command. Safe to repeat; rules are only seeded once.
pub fn run<W: Write>(writer: &mut W, db: &mut Database, db_path: &Path) -> Result<()> {
    db.initialize_schema()
        .context("failed to initialize database schema")?;
    let counts = db.table_counts()?;

    writeln!(writer, "Database: {}", db_path.display())?;
    writeln!(writer, "Rules:    {}", counts.rules)?;

    Ok(())
}
