//! Correlation helpers joining a closed focus segment with the browser and
//! meeting streams.
//!
//! Browser-tab changes and foreground-focus changes are not time-aligned, so
//! the domain of a browser segment is the one whose tab intervals overlap the
//! segment the longest.

use chrono::{DateTime, Duration, Utc};

use crate::domain::is_browser_exe;
use crate::event::{BrowserEvent, MeetingWindow};

/// Resolves the domain for a closed foreground segment `[start, end)`.
///
/// Returns `None` when `exe` is not a browser or no tab interval with a
/// domain overlaps the segment.
pub fn resolve_domain(
    exe: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    browser_events: &[BrowserEvent],
) -> Option<String> {
    if !is_browser_exe(exe) {
        return None;
    }
    dominant_domain(start, end, browser_events)
}

/// Picks the domain with the largest total overlap with `[start, end)`.
///
/// Ties go to the domain whose most recent overlapping tab started last.
pub fn dominant_domain(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    browser_events: &[BrowserEvent],
) -> Option<String> {
    // (domain, total overlap, latest start)
    let mut totals: Vec<(&str, Duration, DateTime<Utc>)> = Vec::new();
    for event in browser_events {
        let Some(domain) = event.domain.as_deref() else {
            continue;
        };
        let overlap = overlap(start, end, event.ts_start, event.ts_end);
        if overlap <= Duration::zero() {
            continue;
        }
        match totals.iter_mut().find(|(d, _, _)| *d == domain) {
            Some(entry) => {
                entry.1 += overlap;
                entry.2 = entry.2.max(event.ts_start);
            }
            None => totals.push((domain, overlap, event.ts_start)),
        }
    }
    totals
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| a.2.cmp(&b.2)))
        .map(|(domain, _, _)| domain.to_string())
}

fn overlap(
    a_start: DateTime<Utc>,
    a_end: DateTime<Utc>,
    b_start: DateTime<Utc>,
    b_end: DateTime<Utc>,
) -> Duration {
    let start = a_start.max(b_start);
    let end = a_end.min(b_end);
    end - start
}

/// Whether any window contains the instant `at` (`start <= at < end`).
pub fn in_meeting_at(windows: &[MeetingWindow], at: DateTime<Utc>) -> bool {
    windows.iter().any(|window| window.contains(at))
}

/// Whether the segment `[start, end)` happened during a meeting.
///
/// A segment counts as in-meeting when a window contains its midpoint. A
/// partly overlapping segment is classified all-in or all-out: 40 minutes
/// with the middle 25 in a meeting counts as meeting time, 60 minutes with
/// only the first 25 in a meeting does not. A meeting starting in the last
/// seconds of a long segment does not claim it.
pub fn segment_in_meeting(
    windows: &[MeetingWindow],
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> bool {
    let midpoint = start + (end - start) / 2;
    in_meeting_at(windows, midpoint)
}
