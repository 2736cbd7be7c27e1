//! One-shot calendar sync.

use std::io::Write;

use anyhow::{Context, Result};
use billow_db::SharedDatabase;
use chrono::Utc;

use crate::calendar::{self, GraphCalendar};
use crate::config::CalendarConfig;

/// Runs one sync attempt. Failures are reported, not returned.
pub fn run<W: Write>(writer: &mut W, db: &SharedDatabase, config: &CalendarConfig) -> Result<()> {
    let calendar = match GraphCalendar::from_config(config) {
        Ok(calendar) => calendar,
        Err(err) => {
            writeln!(writer, "Calendar sync skipped: {err}")?;
            return Ok(());
        }
    };

    let runtime = tokio::runtime::Runtime::new().context("failed to create tokio runtime")?;
    match runtime.block_on(calendar::sync_once(&calendar, db, Utc::now())) {
        Ok(count) => writeln!(writer, "Synced {count} meeting windows")?,
        Err(err) => writeln!(writer, "Calendar sync failed: {err}")?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use billow_db::Database;
    use insta::assert_snapshot;

    #[test]
    fn missing_token_skips_sync() {
        let db = SharedDatabase::new(Database::open_in_memory().unwrap());
        let mut output = Vec::new();
        run(&mut output, &db, &CalendarConfig::default()).unwrap();
        assert_snapshot!(
            String::from_utf8(output).unwrap(),
            @"Calendar sync skipped: calendar sync is not configured (set calendar.access_token)"
        );
    }

    #[test]
    fn unreachable_endpoint_is_reported() {
        let db = SharedDatabase::new(Database::open_in_memory().unwrap());
        let config = CalendarConfig {
            endpoint: "http://127.0.0.1:1/calendarView".to_string(),
            access_token: Some("token".to_string()),
            ..CalendarConfig::default()
        };
        let mut output = Vec::new();
        run(&mut output, &db, &config).unwrap();
        let output = String::from_utf8(output).unwrap();
        assert!(output.starts_with("Calendar sync failed: calendar request failed"));
    }
}
