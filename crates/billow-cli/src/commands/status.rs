//! Status command for showing what the store holds.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use billow_db::Database;

use super::sessions::format_time;

pub fn run<W: Write>(writer: &mut W, db: &Database, db_path: &Path) -> Result<()> {
    let counts = db.table_counts()?;

    writeln!(writer, "Billow status")?;
    writeln!(writer, "Database: {}", db_path.display())?;
    writeln!(writer, "Raw events:      {}", counts.raw_events)?;
    writeln!(writer, "Browser events:  {}", counts.browser_events)?;
    writeln!(writer, "Rules:           {}", counts.rules)?;
    writeln!(writer, "Sessions:        {}", counts.sessions)?;
    writeln!(writer, "Meeting windows: {}", counts.meeting_windows)?;

    let Some(last) = db.last_raw_event()? else {
        writeln!(writer, "No events recorded.")?;
        return Ok(());
    };
    let open = if last.ts_end == last.ts_start {
        " (open)"
    } else {
        ""
    };
    writeln!(
        writer,
        "Last event: {} {} {:?}{open}",
        format_time(last.ts_start),
        last.exe,
        last.window_title.unwrap_or_default()
    )?;

    Ok(())
}
