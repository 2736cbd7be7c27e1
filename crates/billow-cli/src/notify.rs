//! Newline-delimited JSON notifications read by `billow run`.
//!
//! Each line is one object tagged by `type`:
//!
//! ```text
//! {"type":"focus","exe":"EXCEL.EXE","title":"Budget.xlsx","hwnd":"0x1a2b"}
//! {"type":"idle","idle":true}
//! {"type":"activity"}
//! {"type":"tab","url":"https://github.com/","title":"GitHub","browser":"chrome"}
//! {"type":"pause"}
//! {"type":"resume"}
//! ```
//!
//! Every variant accepts an optional RFC 3339 `ts`; it defaults to the time
//! the line is read.

use billow_core::Transition;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::tracker::Tracker;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Focus {
        exe: String,
        #[serde(default)]
        title: String,
        hwnd: Option<String>,
        ts: Option<DateTime<Utc>>,
    },
    Idle {
        idle: bool,
        ts: Option<DateTime<Utc>>,
    },
    Activity {
        ts: Option<DateTime<Utc>>,
    },
    Tab {
        url: String,
        title: Option<String>,
        browser: Option<String>,
        ts: Option<DateTime<Utc>>,
    },
    Pause {
        ts: Option<DateTime<Utc>>,
    },
    Resume {
        ts: Option<DateTime<Utc>>,
    },
}

impl Notification {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>, serde_json::Error> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        serde_json::from_str(line).map(Some)
    }

    pub const fn ts(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Focus { ts, .. }
            | Self::Idle { ts, .. }
            | Self::Activity { ts }
            | Self::Tab { ts, .. }
            | Self::Pause { ts }
            | Self::Resume { ts } => *ts,
        }
    }

    /// Applies the notification, stamping it with `now` if it has no `ts`.
    pub fn apply(self, tracker: &mut Tracker, now: DateTime<Utc>) -> Option<Transition> {
        let at = self.ts().unwrap_or(now);
        match self {
            Self::Focus {
                exe, title, hwnd, ..
            } => tracker.focus(at, &exe, &title, hwnd),
            Self::Idle { idle, .. } => tracker.idle_changed(at, idle),
            Self::Activity { .. } => tracker.activity(at),
            Self::Tab {
                url,
                title,
                browser,
                ..
            } => {
                tracker.tab(at, &url, title, browser);
                None
            }
            Self::Pause { .. } => tracker.pause(at),
            Self::Resume { .. } => tracker.resume(at),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_each_notification_type() {
        let focus = Notification::parse(
            r#"{"type":"focus","exe":"EXCEL.EXE","title":"Budget.xlsx","ts":"2025-03-03T09:00:00Z"}"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(
            focus,
            Notification::Focus {
                exe: "EXCEL.EXE".to_string(),
                title: "Budget.xlsx".to_string(),
                hwnd: None,
                ts: Some(Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap()),
            }
        );

        assert!(matches!(
            Notification::parse(r#"{"type":"idle","idle":true}"#).unwrap(),
            Some(Notification::Idle { idle: true, ts: None })
        ));
        assert!(matches!(
            Notification::parse(r#"{"type":"activity"}"#).unwrap(),
            Some(Notification::Activity { ts: None })
        ));
        assert!(matches!(
            Notification::parse(r#"{"type":"tab","url":"https://github.com/"}"#).unwrap(),
            Some(Notification::Tab { title: None, browser: None, .. })
        ));
        assert!(matches!(
            Notification::parse(r#"{"type":"pause"}"#).unwrap(),
            Some(Notification::Pause { .. })
        ));
        assert!(matches!(
            Notification::parse(r#"{"type":"resume"}"#).unwrap(),
            Some(Notification::Resume { .. })
        ));
    }

    #[test]
    fn focus_title_defaults_to_empty() {
        let parsed = Notification::parse(r#"{"type":"focus","exe":"explorer.exe"}"#)
            .unwrap()
            .unwrap();
        assert!(matches!(parsed, Notification::Focus { title, .. } if title.is_empty()));
    }

    #[test]
    fn blank_and_malformed_lines() {
        assert_eq!(Notification::parse("   ").unwrap(), None);
        assert!(Notification::parse("{not json").is_err());
        assert!(Notification::parse(r#"{"type":"scroll"}"#).is_err());
        assert!(Notification::parse(r#"{"type":"focus"}"#).is_err());
        assert!(Notification::parse(r#"{"type":"focus","exe":"a","ts":"yesterday"}"#).is_err());
    }
}
