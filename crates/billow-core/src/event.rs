//! Observed intervals and derived sessions.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{Billable, Confidence};

/// Sentinel executable recorded while the user is idle.
pub const IDLE_EXE: &str = "IDLE";

/// Sentinel executable recorded when the user returns from idle.
pub const ACTIVE_EXE: &str = "ACTIVE";

/// Returns true for the idle/active sentinel executables.
pub fn is_sentinel_exe(exe: &str) -> bool {
    exe == IDLE_EXE || exe == ACTIVE_EXE
}

/// One observed focus or idle interval.
///
/// Rows are appended open (`ts_end == ts_start`) and closed when the next
/// row arrives, so a stream of raw events is contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    pub exe: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hwnd: Option<String>,
    pub was_idle: bool,
}

impl RawEvent {
    /// Creates an open foreground interval starting at `at`.
    pub fn focus(
        at: DateTime<Utc>,
        exe: impl Into<String>,
        title: impl Into<String>,
        hwnd: Option<String>,
    ) -> Self {
        Self {
            ts_start: at,
            ts_end: at,
            exe: exe.into(),
            window_title: Some(title.into()),
            hwnd,
            was_idle: false,
        }
    }

    /// Creates an open idle/active marker interval starting at `at`.
    pub fn idle_marker(at: DateTime<Utc>, idle: bool) -> Self {
        let (exe, title) = if idle {
            (IDLE_EXE, "Idle")
        } else {
            (ACTIVE_EXE, "Active")
        };
        Self {
            ts_start: at,
            ts_end: at,
            exe: exe.to_string(),
            window_title: Some(title.to_string()),
            hwnd: Some("0".to_string()),
            was_idle: idle,
        }
    }
}

/// One observed browser tab interval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserEvent {
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    pub browser: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl BrowserEvent {
    /// Creates an open tab interval starting at `at`.
    pub fn open(
        at: DateTime<Utc>,
        browser: impl Into<String>,
        domain: Option<String>,
        title: Option<String>,
    ) -> Self {
        Self {
            ts_start: at,
            ts_end: at,
            browser: browser.into(),
            domain,
            title,
        }
    }
}

/// A calendar window during which the user is in an online meeting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub provider: String,
}

impl MeetingWindow {
    /// Half-open containment: `start <= at < end`.
    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start <= at && at < self.end
    }
}

/// A finalized, categorized block of continuous focused activity.
///
/// Sessions are immutable once persisted; merging happens before insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub ts_start: DateTime<Utc>,
    pub ts_end: DateTime<Utc>,
    pub exe: String,
    pub primary_resource: String,
    pub category: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    pub billable: Billable,
    pub confidence: Confidence,
}

impl Session {
    pub fn duration(&self) -> Duration {
        self.ts_end - self.ts_start
    }

    /// Whether `other` has the same merge key: exe (case-insensitive),
    /// category and client.
    pub fn same_activity(&self, other: &Self) -> bool {
        self.exe.eq_ignore_ascii_case(&other.exe)
            && self.category == other.category
            && self.client == other.client
    }

    /// Extends this session to cover `later`, which must start at or after
    /// this session's end.
    pub(crate) fn absorb(&mut self, later: Self) {
        self.ts_end = later.ts_end;
        if self.primary_resource.is_empty() {
            self.primary_resource = later.primary_resource;
        }
        if self.billable != later.billable {
            self.billable = Billable::Unknown;
        }
        self.confidence = self.confidence.min(later.confidence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn session(exe: &str, start: i64, end: i64, billable: Billable) -> Session {
        Session {
            ts_start: at(start),
            ts_end: at(end),
            exe: exe.to_string(),
            primary_resource: String::new(),
            category: "Spreadsheet".to_string(),
            client: None,
            billable,
            confidence: Confidence::clamped(0.9),
        }
    }

    #[test]
    fn meeting_window_is_half_open() {
        let window = MeetingWindow {
            start: at(0),
            end: at(60),
            provider: "teamsForBusiness".to_string(),
        };
        assert!(window.contains(at(0)));
        assert!(window.contains(at(59)));
        assert!(!window.contains(at(60)));
    }

    #[test]
    fn same_activity_ignores_exe_case() {
        let a = session("EXCEL.EXE", 0, 30, Billable::Yes);
        let b = session("excel.exe", 40, 80, Billable::Yes);
        assert!(a.same_activity(&b));

        let mut c = b.clone();
        c.client = Some("ACME".to_string());
        assert!(!a.same_activity(&c));
    }

    #[test]
    fn absorb_extends_end_and_downgrades_conflicting_billable() {
        let mut a = session("EXCEL.EXE", 0, 30, Billable::Yes);
        let mut b = session("EXCEL.EXE", 40, 80, Billable::No);
        b.confidence = Confidence::clamped(0.5);
        a.absorb(b);
        assert_eq!(a.ts_start, at(0));
        assert_eq!(a.ts_end, at(80));
        assert_eq!(a.billable, Billable::Unknown);
        assert_eq!(a.confidence, Confidence::clamped(0.5));
    }

    #[test]
    fn idle_marker_uses_sentinels() {
        let idle = RawEvent::idle_marker(at(0), true);
        assert_eq!(idle.exe, IDLE_EXE);
        assert!(idle.was_idle);
        let active = RawEvent::idle_marker(at(5), false);
        assert_eq!(active.exe, ACTIVE_EXE);
        assert!(!active.was_idle);
        assert!(is_sentinel_exe(&active.exe));
    }
}
