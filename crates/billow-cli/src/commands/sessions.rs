//! Sessions command: one UTC day of sessions with per-category totals.

use std::collections::BTreeMap;
use std::io::Write;

use anyhow::{Context, Result};
use billow_core::{Billable, Session};
use billow_db::Database;
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};

/// Formats a timestamp as `YYYY-MM-DD HH:MM:SS` (UTC).
pub fn format_time(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Formats a duration in milliseconds as `1h 05m`, `4m 20s` or `15s`.
pub fn format_duration(ms: i64) -> String {
    let total_seconds = ms.max(0) / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours >= 1 {
        format!("{hours}h {minutes:02}m")
    } else if minutes >= 1 {
        format!("{minutes}m {seconds:02}s")
    } else {
        format!("{seconds}s")
    }
}

fn day_bounds(date: NaiveDate) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = date.and_time(NaiveTime::MIN).and_utc();
    (start, start + Duration::days(1))
}

pub fn run<W: Write>(writer: &mut W, db: &Database, date: NaiveDate, json: bool) -> Result<()> {
    let (start, end) = day_bounds(date);
    let sessions = db
        .list_sessions_in_range(start, end)
        .context("failed to load sessions")?;

    if json {
        for session in &sessions {
            writeln!(writer, "{}", serde_json::to_string(session)?)?;
        }
        return Ok(());
    }

    writeln!(writer, "Sessions {date} (UTC)")?;
    if sessions.is_empty() {
        writeln!(writer, "No sessions recorded.")?;
        return Ok(());
    }

    writeln!(writer)?;
    for session in &sessions {
        write_session(writer, session)?;
    }

    writeln!(writer)?;
    writeln!(writer, "By category:")?;
    let mut totals: BTreeMap<&str, i64> = BTreeMap::new();
    for session in &sessions {
        *totals.entry(session.category.as_str()).or_default() +=
            session.duration().num_milliseconds();
    }
    let mut totals: Vec<_> = totals.into_iter().collect();
    totals.sort_by_key(|(_, ms)| std::cmp::Reverse(*ms));
    let width = totals.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (category, ms) in &totals {
        writeln!(writer, "  {category:<width$}  {}", format_duration(*ms))?;
    }

    let total_ms: i64 = totals.iter().map(|(_, ms)| ms).sum();
    let billable_ms: i64 = sessions
        .iter()
        .filter(|session| session.billable == Billable::Yes)
        .map(|session| session.duration().num_milliseconds())
        .sum();
    writeln!(writer)?;
    writeln!(
        writer,
        "Total: {}  Billable: {}",
        format_duration(total_ms),
        format_duration(billable_ms)
    )?;

    Ok(())
}

fn write_session<W: Write>(writer: &mut W, session: &Session) -> Result<()> {
    let mut line = format!(
        "{}-{}  {:>7}  {}  {}",
        session.ts_start.format("%H:%M:%S"),
        session.ts_end.format("%H:%M:%S"),
        format_duration(session.duration().num_milliseconds()),
        session.category,
        session.exe,
    );
    if !session.primary_resource.is_empty() {
        line.push_str(&format!(" ({})", session.primary_resource));
    }
    if let Some(client) = &session.client {
        line.push_str(&format!(" client={client}"));
    }
    line.push_str(&format!(
        " billable={} confidence={}",
        session.billable, session.confidence
    ));
    writeln!(writer, "{line}")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use billow_core::Confidence;
    use chrono::TimeZone;
    use insta::assert_snapshot;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn session(
        start: i64,
        end: i64,
        exe: &str,
        resource: &str,
        category: &str,
        client: Option<&str>,
        billable: Billable,
    ) -> Session {
        Session {
            ts_start: at(start),
            ts_end: at(end),
            exe: exe.to_string(),
            primary_resource: resource.to_string(),
            category: category.to_string(),
            client: client.map(str::to_string),
            billable,
            confidence: Confidence::clamped(0.9),
        }
    }

    fn seeded() -> Database {
        let mut db = Database::open_in_memory().unwrap();
        for session in [
            session(0, 20, "chrome.exe", "A", "Other", None, Billable::Unknown),
            session(20, 260, "EXCEL.EXE", "ACME Q3.xlsx", "Spreadsheet", Some("Client A"), Billable::Yes),
            session(300, 4000, "OUTLOOK.EXE", "", "Email", None, Billable::No),
        ] {
            db.append_session(&session).unwrap();
        }
        // next day, excluded
        db.append_session(&session(86_400, 86_460, "EXCEL.EXE", "x", "Spreadsheet", None, Billable::Yes))
            .unwrap();
        db
    }

    fn render(db: &Database, json: bool) -> String {
        let mut output = Vec::new();
        let date = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        run(&mut output, db, date, json).unwrap();
        String::from_utf8(output).unwrap()
    }

    #[test]
    fn formats_durations() {
        assert_eq!(format_duration(15_000), "15s");
        assert_eq!(format_duration(260_000), "4m 20s");
        assert_eq!(format_duration(3_900_000), "1h 05m");
        assert_eq!(format_duration(-5), "0s");
    }

    #[test]
    fn lists_day_with_category_totals() {
        let db = seeded();
        assert_snapshot!(render(&db, false), @r"
        Sessions 2025-03-03 (UTC)

        09:00:00-09:00:20      20s  Other  chrome.exe (A) billable=unknown confidence=0.90
        09:00:20-09:04:20   4m 00s  Spreadsheet  EXCEL.EXE (ACME Q3.xlsx) client=Client A billable=yes confidence=0.90
        09:05:00-10:06:40   1h 01m  Email  OUTLOOK.EXE billable=no confidence=0.90

        By category:
          Email        1h 01m
          Spreadsheet  4m 00s
          Other        20s

        Total: 1h 06m  Billable: 4m 00s
        ");
    }

    #[test]
    fn json_output_is_one_session_per_line() {
        let db = seeded();
        let output = render(&db, true);
        let lines: Vec<_> = output.lines().collect();
        assert_eq!(lines.len(), 3);
        let excel: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(excel["category"], "Spreadsheet");
        assert_eq!(excel["client"], "Client A");
        assert_eq!(excel["billable"], "yes");
    }

    #[test]
    fn empty_day() {
        let db = Database::open_in_memory().unwrap();
        assert_snapshot!(render(&db, false), @r"
        Sessions 2025-03-03 (UTC)
        No sessions recorded.
        ");
    }
}
