//! Storage layer for billow.
//!
//! Provides persistence for observed intervals, rules, meeting windows and
//! finalized sessions using `rusqlite`.
//!
//! # Thread Safety
//!
//! The [`Database`] type wraps a `rusqlite::Connection`, which is `Send` but not `Sync`.
//! Every write that closes the previous open row is a read-modify-write, so
//! concurrent writers must be serialized. [`SharedDatabase`] wraps the
//! connection in a mutex and is the handle shared by the sessionizer, the
//! browser relay and calendar sync.
//!
//! # Schema
//!
//! ## Timestamp Format
//!
//! Timestamps are stored as TEXT in ISO 8601 format with millisecond precision
//! (e.g., `2024-01-15T10:30:00.000Z`). Because every value uses the same
//! format, lexicographic ordering matches chronological ordering and range
//! queries can compare strings directly.
//!
//! ## Open Intervals
//!
//! `raw_events` and `browser_events` rows are inserted open, with
//! `ts_end = ts_start`. Appending the next row first extends the previous
//! row's `ts_end` to the new row's `ts_start`, so each stream is contiguous.
//!
//! ## Billable
//!
//! `billable` columns are nullable integers: `1` yes, `0` no, `NULL` unknown.

mod shared;

use std::path::Path;
use std::time::Duration;

use billow_core::{
    Billable, BrowserEvent, Confidence, MatchType, MeetingWindow, RawEvent, Rule, Session,
    SessionStore,
};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Transaction, params};
use thiserror::Error;
use tracing::{debug, warn};

pub use shared::SharedDatabase;

/// How long a connection waits on a locked database file before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    /// An error from the underlying database.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    /// Failed to parse a stored timestamp.
    #[error("invalid timestamp in {table}: {timestamp}")]
    TimestampParse {
        table: &'static str,
        timestamp: String,
        #[source]
        source: chrono::ParseError,
    },
    /// A thread panicked while holding the shared connection.
    #[error("database lock poisoned")]
    Poisoned,
}

/// Database connection wrapper.
///
/// See the [module documentation](self) for thread safety considerations.
pub struct Database {
    conn: Connection,
}

/// Row counts per table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableCounts {
    pub raw_events: i64,
    pub browser_events: i64,
    pub rules: i64,
    pub sessions: i64,
    pub meeting_windows: i64,
}

/// Default rule set, seeded once into an empty `rules` table.
fn seed_rules() -> Vec<Rule> {
    let rule = |match_type, pattern: &str, category: &str, client: Option<&str>, billable| Rule {
        match_type,
        pattern: pattern.to_string(),
        category: Some(category.to_string()),
        client: client.map(str::to_string),
        billable,
    };
    vec![
        rule(MatchType::Exe, "ms-teams.exe", "Teams Chat/Browsing", None, Billable::Unknown),
        rule(MatchType::Exe, "Teams.exe", "Teams Chat/Browsing", None, Billable::Unknown),
        rule(MatchType::Exe, "OUTLOOK.EXE", "Email", None, Billable::Unknown),
        rule(MatchType::Exe, "EXCEL.EXE", "Spreadsheet", None, Billable::Yes),
        rule(MatchType::Exe, "WINWORD.EXE", "Document Editing", None, Billable::Yes),
        rule(MatchType::Exe, "POWERPNT.EXE", "Slides", None, Billable::Yes),
        rule(MatchType::Domain, "atlassian.net", "Jira/Confluence", None, Billable::Yes),
        rule(MatchType::Domain, "jira", "Jira/Confluence", None, Billable::Yes),
        rule(MatchType::Domain, "confluence", "Jira/Confluence", None, Billable::Yes),
        rule(MatchType::TitleContains, "Client A", "", Some("Client A"), Billable::Yes),
        rule(MatchType::TitleContains, "ACME", "", Some("Client A"), Billable::Yes),
    ]
}

impl Database {
    /// Opens a database at the given path, creating it if necessary.
    ///
    /// The database schema is automatically initialized on first open.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mut db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Opens an in-memory database.
    ///
    /// Useful for testing. The database is destroyed when the connection closes.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        let mut db = Self { conn };
        db.initialize_schema()?;
        Ok(db)
    }

    /// Creates all tables if absent and seeds the default rules into an
    /// empty rule table.
    ///
    /// This is idempotent - safe to call on an already-initialized database.
    pub fn initialize_schema(&mut self) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        tx.execute_batch(
            "
            -- Observed focus/idle intervals
            CREATE TABLE IF NOT EXISTS raw_events (
                id INTEGER PRIMARY KEY,
                ts_start TEXT NOT NULL,
                ts_end TEXT NOT NULL,
                exe TEXT NOT NULL,
                window_title TEXT,
                hwnd TEXT,
                was_idle INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX IF NOT EXISTS idx_raw_events_start ON raw_events(ts_start);

            -- Observed browser tab intervals
            CREATE TABLE IF NOT EXISTS browser_events (
                id INTEGER PRIMARY KEY,
                ts_start TEXT NOT NULL,
                ts_end TEXT NOT NULL,
                browser TEXT NOT NULL,
                domain TEXT,
                title TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_browser_events_start ON browser_events(ts_start);

            -- Classification rules; id order is evaluation order
            -- match_type: exe | domain | title_contains
            CREATE TABLE IF NOT EXISTS rules (
                id INTEGER PRIMARY KEY,
                match_type TEXT NOT NULL,
                pattern TEXT NOT NULL,
                category TEXT,
                client TEXT,
                billable INTEGER
            );

            -- Finalized sessions; never updated after insert
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY,
                ts_start TEXT NOT NULL,
                ts_end TEXT NOT NULL,
                exe TEXT NOT NULL,
                primary_resource TEXT,
                category TEXT,
                client TEXT,
                billable INTEGER,
                confidence REAL
            );

            CREATE INDEX IF NOT EXISTS idx_sessions_start ON sessions(ts_start);

            -- Replaced wholesale on each calendar sync
            CREATE TABLE IF NOT EXISTS meeting_windows (
                id INTEGER PRIMARY KEY,
                start_utc TEXT NOT NULL,
                end_utc TEXT NOT NULL,
                provider TEXT NOT NULL
            );
            ",
        )?;

        let count: i64 = tx.query_row("SELECT COUNT(*) FROM rules", [], |row| row.get(0))?;
        if count == 0 {
            let seeds = seed_rules();
            for rule in &seeds {
                insert_rule(&tx, rule)?;
            }
            debug!(count = seeds.len(), "seeded default rules");
        }
        tx.commit()?;
        Ok(())
    }

    /// Closes the previous open raw event at `event.ts_start` and inserts
    /// `event` as the new open row.
    ///
    /// An event older than the previous row starts where that row ends.
    pub fn append_raw_event(&mut self, event: &RawEvent) -> Result<i64, DbError> {
        let tx = self.conn.transaction()?;
        let previous_end = close_last_row(&tx, "raw_events", event.ts_start)?;
        let (ts_start, ts_end) = clamp_after(previous_end, event.ts_start, event.ts_end);
        tx.execute(
            "
            INSERT INTO raw_events (ts_start, ts_end, exe, window_title, hwnd, was_idle)
            VALUES (?, ?, ?, ?, ?, ?)
            ",
            params![
                format_timestamp(ts_start),
                format_timestamp(ts_end),
                event.exe,
                event.window_title,
                event.hwnd,
                event.was_idle,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Closes the last open raw event at `at`. Used on shutdown.
    pub fn close_open_raw_event(&mut self, at: DateTime<Utc>) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        close_last_row(&tx, "raw_events", at)?;
        tx.commit()?;
        Ok(())
    }

    /// Closes the last open browser event at `at`, so a later run does not
    /// stretch it across downtime.
    pub fn close_open_browser_event(&mut self, at: DateTime<Utc>) -> Result<(), DbError> {
        let tx = self.conn.transaction()?;
        close_last_row(&tx, "browser_events", at)?;
        tx.commit()?;
        Ok(())
    }

    /// Closes the previous open browser event at `event.ts_start` and inserts
    /// `event` as the new open row.
    pub fn append_browser_event(&mut self, event: &BrowserEvent) -> Result<i64, DbError> {
        let tx = self.conn.transaction()?;
        let previous_end = close_last_row(&tx, "browser_events", event.ts_start)?;
        let (ts_start, ts_end) = clamp_after(previous_end, event.ts_start, event.ts_end);
        tx.execute(
            "
            INSERT INTO browser_events (ts_start, ts_end, browser, domain, title)
            VALUES (?, ?, ?, ?, ?)
            ",
            params![
                format_timestamp(ts_start),
                format_timestamp(ts_end),
                event.browser,
                event.domain,
                event.title,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Inserts a finalized session. Callers must have resolved any merge.
    pub fn append_session(&mut self, session: &Session) -> Result<i64, DbError> {
        self.conn.execute(
            "
            INSERT INTO sessions
            (ts_start, ts_end, exe, primary_resource, category, client, billable, confidence)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
            params![
                format_timestamp(session.ts_start),
                format_timestamp(session.ts_end),
                session.exe,
                session.primary_resource,
                session.category,
                session.client,
                session.billable.to_flag(),
                session.confidence.value(),
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Atomically replaces all meeting windows.
    pub fn replace_meeting_windows(&mut self, windows: &[MeetingWindow]) -> Result<usize, DbError> {
        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM meeting_windows", [])?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO meeting_windows (start_utc, end_utc, provider) VALUES (?, ?, ?)",
            )?;
            for window in windows {
                stmt.execute(params![
                    format_timestamp(window.start),
                    format_timestamp(window.end),
                    window.provider,
                ])?;
            }
        }
        tx.commit()?;
        Ok(windows.len())
    }

    /// Lists rules in evaluation (storage) order.
    ///
    /// Rows with an unrecognized `match_type` are skipped.
    pub fn list_rules(&self) -> Result<Vec<Rule>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT id, match_type, pattern, category, client, billable
            FROM rules
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                Rule {
                    match_type: MatchType::Exe,
                    pattern: row.get(2)?,
                    category: row.get(3)?,
                    client: row.get(4)?,
                    billable: Billable::from_flag(row.get(5)?),
                },
            ))
        })?;
        let mut rules = Vec::new();
        for row in rows {
            let (id, match_type, mut rule) = row?;
            match match_type.parse::<MatchType>() {
                Ok(parsed) => {
                    rule.match_type = parsed;
                    rules.push(rule);
                }
                Err(err) => warn!(rule_id = id, error = %err, "skipping rule"),
            }
        }
        Ok(rules)
    }

    /// Appends a rule at the lowest priority.
    pub fn add_rule(&mut self, rule: &Rule) -> Result<i64, DbError> {
        let tx = self.conn.transaction()?;
        let id = insert_rule(&tx, rule)?;
        tx.commit()?;
        Ok(id)
    }

    /// Lists sessions starting within `[start, end)`, ordered by start.
    pub fn list_sessions_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Session>, DbError> {
        if end <= start {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(
            "
            SELECT ts_start, ts_end, exe, primary_resource, category, client, billable, confidence
            FROM sessions
            WHERE ts_start >= ? AND ts_start < ?
            ORDER BY ts_start ASC, id ASC
            ",
        )?;
        let rows = stmt.query_map([format_timestamp(start), format_timestamp(end)], |row| {
            Ok(SessionRow {
                ts_start: row.get(0)?,
                ts_end: row.get(1)?,
                exe: row.get(2)?,
                primary_resource: row.get(3)?,
                category: row.get(4)?,
                client: row.get(5)?,
                billable: row.get(6)?,
                confidence: row.get(7)?,
            })
        })?;
        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?.into_session()?);
        }
        Ok(sessions)
    }

    /// Returns browser intervals overlapping `[start, end)`, oldest first.
    ///
    /// The most recent row is still open; it is reported as extending to `end`.
    pub fn browser_events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BrowserEvent>, DbError> {
        let last_id: Option<i64> =
            self.conn
                .query_row("SELECT MAX(id) FROM browser_events", [], |row| row.get(0))?;
        let Some(last_id) = last_id else {
            return Ok(Vec::new());
        };
        let mut stmt = self.conn.prepare(
            "
            SELECT id, ts_start, ts_end, browser, domain, title
            FROM browser_events
            WHERE ts_start < ?1 AND (ts_end > ?2 OR id = ?3)
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map(
            params![format_timestamp(end), format_timestamp(start), last_id],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, Option<String>>(4)?,
                    row.get::<_, Option<String>>(5)?,
                ))
            },
        )?;
        let mut events = Vec::new();
        for row in rows {
            let (id, ts_start, ts_end, browser, domain, title) = row?;
            let ts_start = parse_timestamp(&ts_start, "browser_events")?;
            let mut ts_end = parse_timestamp(&ts_end, "browser_events")?;
            if id == last_id && ts_end == ts_start {
                ts_end = end.max(ts_start);
            }
            events.push(BrowserEvent {
                ts_start,
                ts_end,
                browser,
                domain,
                title,
            });
        }
        Ok(events)
    }

    /// Lists browser events ordered by insertion.
    pub fn list_browser_events(&self) -> Result<Vec<BrowserEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT ts_start, ts_end, browser, domain, title FROM browser_events ORDER BY id ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (ts_start, ts_end, browser, domain, title) = row?;
            events.push(BrowserEvent {
                ts_start: parse_timestamp(&ts_start, "browser_events")?,
                ts_end: parse_timestamp(&ts_end, "browser_events")?,
                browser,
                domain,
                title,
            });
        }
        Ok(events)
    }

    /// Lists raw events ordered by insertion.
    pub fn list_raw_events(&self) -> Result<Vec<RawEvent>, DbError> {
        let mut stmt = self.conn.prepare(
            "
            SELECT ts_start, ts_end, exe, window_title, hwnd, was_idle
            FROM raw_events
            ORDER BY id ASC
            ",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, Option<String>>(4)?,
                row.get::<_, bool>(5)?,
            ))
        })?;
        let mut events = Vec::new();
        for row in rows {
            let (ts_start, ts_end, exe, window_title, hwnd, was_idle) = row?;
            events.push(RawEvent {
                ts_start: parse_timestamp(&ts_start, "raw_events")?,
                ts_end: parse_timestamp(&ts_end, "raw_events")?,
                exe,
                window_title,
                hwnd,
                was_idle,
            });
        }
        Ok(events)
    }

    /// Returns the most recently appended raw event.
    pub fn last_raw_event(&self) -> Result<Option<RawEvent>, DbError> {
        let row = self
            .conn
            .query_row(
                "
                SELECT ts_start, ts_end, exe, window_title, hwnd, was_idle
                FROM raw_events
                ORDER BY id DESC
                LIMIT 1
                ",
                [],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                        row.get::<_, bool>(5)?,
                    ))
                },
            )
            .optional()?;
        row.map(|(ts_start, ts_end, exe, window_title, hwnd, was_idle)| {
            Ok(RawEvent {
                ts_start: parse_timestamp(&ts_start, "raw_events")?,
                ts_end: parse_timestamp(&ts_end, "raw_events")?,
                exe,
                window_title,
                hwnd,
                was_idle,
            })
        })
        .transpose()
    }

    /// Lists all meeting windows ordered by start.
    pub fn list_meeting_windows(&self) -> Result<Vec<MeetingWindow>, DbError> {
        self.query_meeting_windows(
            "SELECT start_utc, end_utc, provider FROM meeting_windows ORDER BY start_utc ASC, id ASC",
            [],
        )
    }

    /// Lists meeting windows overlapping `[start, end)`.
    pub fn meeting_windows_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeetingWindow>, DbError> {
        self.query_meeting_windows(
            "
            SELECT start_utc, end_utc, provider
            FROM meeting_windows
            WHERE start_utc < ? AND end_utc > ?
            ORDER BY start_utc ASC, id ASC
            ",
            [format_timestamp(end), format_timestamp(start)],
        )
    }

    fn query_meeting_windows<P: rusqlite::Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<MeetingWindow>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        let mut windows = Vec::new();
        for row in rows {
            let (start, end, provider) = row?;
            windows.push(MeetingWindow {
                start: parse_timestamp(&start, "meeting_windows")?,
                end: parse_timestamp(&end, "meeting_windows")?,
                provider,
            });
        }
        Ok(windows)
    }

    /// Counts rows in each table.
    pub fn table_counts(&self) -> Result<TableCounts, DbError> {
        let count = |table: &str| -> Result<i64, DbError> {
            Ok(self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })?)
        };
        Ok(TableCounts {
            raw_events: count("raw_events")?,
            browser_events: count("browser_events")?,
            rules: count("rules")?,
            sessions: count("sessions")?,
            meeting_windows: count("meeting_windows")?,
        })
    }
}

impl SessionStore for Database {
    type Error = DbError;

    fn rules(&self) -> Result<Vec<Rule>, DbError> {
        self.list_rules()
    }

    fn browser_events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BrowserEvent>, DbError> {
        Self::browser_events_between(self, start, end)
    }

    fn meeting_windows_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeetingWindow>, DbError> {
        Self::meeting_windows_between(self, start, end)
    }

    fn insert_session(&mut self, session: &Session) -> Result<(), DbError> {
        self.append_session(session).map(|_| ())
    }
}

#[derive(Debug)]
struct SessionRow {
    ts_start: String,
    ts_end: String,
    exe: String,
    primary_resource: Option<String>,
    category: Option<String>,
    client: Option<String>,
    billable: Option<i64>,
    confidence: Option<f64>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session, DbError> {
        Ok(Session {
            ts_start: parse_timestamp(&self.ts_start, "sessions")?,
            ts_end: parse_timestamp(&self.ts_end, "sessions")?,
            exe: self.exe,
            primary_resource: self.primary_resource.unwrap_or_default(),
            category: self.category.unwrap_or_default(),
            client: self.client,
            billable: Billable::from_flag(self.billable),
            confidence: Confidence::clamped(self.confidence.unwrap_or_default()),
        })
    }
}

/// Extends the newest row of `table` to `at` and returns its end, or `None`
/// when the table is empty.
///
/// `table` is always one of the two interval tables, never user input.
fn close_last_row(
    tx: &Transaction<'_>,
    table: &'static str,
    at: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, DbError> {
    let ts_end: Option<String> = tx
        .query_row(
            &format!(
                "
                UPDATE {table} SET ts_end = MAX(ts_start, ?)
                WHERE id = (SELECT MAX(id) FROM {table})
                RETURNING ts_end
                "
            ),
            [format_timestamp(at)],
            |row| row.get(0),
        )
        .optional()?;
    ts_end
        .map(|ts_end| parse_timestamp(&ts_end, table))
        .transpose()
}

/// Moves an interval so it starts no earlier than `previous_end`.
fn clamp_after(
    previous_end: Option<DateTime<Utc>>,
    ts_start: DateTime<Utc>,
    ts_end: DateTime<Utc>,
) -> (DateTime<Utc>, DateTime<Utc>) {
    let ts_start = previous_end.map_or(ts_start, |previous| previous.max(ts_start));
    (ts_start, ts_end.max(ts_start))
}

fn insert_rule(tx: &Transaction<'_>, rule: &Rule) -> Result<i64, DbError> {
    tx.execute(
        "
        INSERT INTO rules (match_type, pattern, category, client, billable)
        VALUES (?, ?, ?, ?, ?)
        ",
        params![
            rule.match_type.as_str(),
            rule.pattern,
            rule.category,
            rule.client,
            rule.billable.to_flag(),
        ],
    )?;
    Ok(tx.last_insert_rowid())
}

fn parse_timestamp(timestamp: &str, table: &'static str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(timestamp)
        .map(|parsed| parsed.with_timezone(&Utc))
        .map_err(|source| DbError::TimestampParse {
            table,
            timestamp: timestamp.to_string(),
            source,
        })
}

fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
}
