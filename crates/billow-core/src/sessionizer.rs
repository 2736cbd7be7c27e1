//! Focus-change state machine producing finalized sessions.
//!
//! # Algorithm Summary
//!
//! The sessionizer is either `Idle` (no segment yet) or tracking one
//! `(exe, title, start)` segment. Each focus change closes the current segment:
//!
//! 1. Segments shorter than `min_focus` are discarded as flicker.
//! 2. Idle/active sentinel segments are never emitted and break merging.
//! 3. Qualifying segments are correlated (browser domain, meeting windows),
//!    classified and held as the pending session.
//! 4. A pending session absorbs the next qualifying segment when exe, category
//!    and client match and the gap is below `merge_gap`. Otherwise it is
//!    persisted and replaced.
//!
//! Persisted sessions are never updated. A pending session is written once it
//! can no longer merge, or on [`Sessionizer::flush`] / [`Sessionizer::shutdown`].
//!
//! The sessionizer never fails: store errors are logged and the transition
//! still completes.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, warn};

use crate::correlation::{resolve_domain, segment_in_meeting};
use crate::domain::is_browser_exe;
use crate::event::{ACTIVE_EXE, IDLE_EXE, Session, is_sentinel_exe};
use crate::rules::{ConfidencePolicy, classify};
use crate::store::SessionStore;

/// Thresholds controlling segment qualification and merging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionizerConfig {
    /// Segments shorter than this are discarded.
    pub min_focus: Duration,
    /// Sessions separated by less than this (with the same activity) merge.
    pub merge_gap: Duration,
    pub confidence: ConfidencePolicy,
}

impl Default for SessionizerConfig {
    fn default() -> Self {
        Self {
            min_focus: Duration::seconds(15),
            merge_gap: Duration::seconds(120),
            confidence: ConfidencePolicy::default(),
        }
    }
}

/// The segment currently being tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub exe: String,
    pub title: String,
    pub start: DateTime<Utc>,
}

/// Sessionizer state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FocusState {
    /// No segment has been observed yet.
    Idle,
    Tracking(Segment),
}

/// What a focus change did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// First segment started; nothing closed.
    Started,
    /// Same exe and title as the current segment; ignored.
    Unchanged,
    /// The closed segment was too short.
    Discarded { duration: Duration },
    /// The closed segment was an idle/active sentinel.
    Untracked { duration: Duration },
    /// The closed segment became the pending session.
    Buffered,
    /// The closed segment was merged into the pending session.
    Merged,
}

/// Running accounting of closed time, in milliseconds.
///
/// `emitted + discarded + untracked` equals the total time between the first
/// focus change and the last closed segment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub emitted_ms: i64,
    pub discarded_ms: i64,
    pub untracked_ms: i64,
}

impl Tally {
    pub const fn total_ms(&self) -> i64 {
        self.emitted_ms + self.discarded_ms + self.untracked_ms
    }
}

/// Turns focus changes into sessions persisted through a [`SessionStore`].
#[derive(Debug)]
pub struct Sessionizer<S> {
    store: S,
    config: SessionizerConfig,
    state: FocusState,
    pending: Option<Session>,
    last_foreground: Option<(String, String)>,
    tally: Tally,
}

impl<S: SessionStore> Sessionizer<S> {
    pub fn new(store: S, config: SessionizerConfig) -> Self {
        Self {
            store,
            config,
            state: FocusState::Idle,
            pending: None,
            last_foreground: None,
            tally: Tally::default(),
        }
    }

    pub const fn store(&self) -> &S {
        &self.store
    }

    pub const fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub const fn state(&self) -> &FocusState {
        &self.state
    }

    /// The session held back for a possible merge, if any.
    pub const fn pending(&self) -> Option<&Session> {
        self.pending.as_ref()
    }

    pub const fn tally(&self) -> Tally {
        self.tally
    }

    pub const fn config(&self) -> &SessionizerConfig {
        &self.config
    }

    /// Handles a foreground change to `(exe, title)` at `now`.
    pub fn on_focus_change(&mut self, now: DateTime<Utc>, exe: &str, title: &str) -> Transition {
        let current_start = match &self.state {
            FocusState::Tracking(segment) if segment.exe == exe && segment.title == title => {
                return Transition::Unchanged;
            }
            FocusState::Tracking(segment) => Some(segment.start),
            FocusState::Idle => None,
        };

        let Some(current_start) = current_start else {
            debug!(exe, title, "started tracking");
            self.begin(now, exe, title);
            return Transition::Started;
        };

        self.flush_if_stale(current_start);

        let end = if now < current_start {
            warn!(%now, start = %current_start, "focus change went back in time; clamping");
            current_start
        } else {
            now
        };
        let transition = match self.take_segment() {
            Some(closed) => self.close_segment(closed, end),
            None => Transition::Started,
        };
        self.begin(end, exe, title);
        transition
    }

    /// Handles an idle toggle at `now`.
    ///
    /// Going idle switches to the `IDLE` sentinel. Coming back resumes the
    /// last real foreground application, or the `ACTIVE` sentinel if none is
    /// known.
    pub fn on_idle_change(&mut self, now: DateTime<Utc>, idle: bool) -> Transition {
        if idle {
            return self.on_focus_change(now, IDLE_EXE, "Idle");
        }
        match self.last_foreground.clone() {
            Some((exe, title)) => self.on_focus_change(now, &exe, &title),
            None => self.on_focus_change(now, ACTIVE_EXE, "Active"),
        }
    }

    /// Persists the pending session, if any. Returns true if one was written.
    pub fn flush(&mut self) -> bool {
        let Some(session) = self.pending.take() else {
            return false;
        };
        match self.store.insert_session(&session) {
            Ok(()) => {
                debug!(
                    exe = %session.exe,
                    category = %session.category,
                    start = %session.ts_start,
                    end = %session.ts_end,
                    "session persisted"
                );
                true
            }
            Err(err) => {
                warn!(error = %err, exe = %session.exe, "failed to persist session");
                false
            }
        }
    }

    /// Closes the in-progress segment at `now` and persists the pending
    /// session. A sub-threshold in-progress segment is discarded.
    pub fn shutdown(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        let transition = self.take_segment().map(|segment| {
            let end = now.max(segment.start);
            self.close_segment(segment, end)
        });
        self.flush();
        transition
    }

    fn take_segment(&mut self) -> Option<Segment> {
        match std::mem::replace(&mut self.state, FocusState::Idle) {
            FocusState::Tracking(segment) => Some(segment),
            FocusState::Idle => None,
        }
    }

    fn begin(&mut self, start: DateTime<Utc>, exe: &str, title: &str) {
        if !is_sentinel_exe(exe) {
            self.last_foreground = Some((exe.to_string(), title.to_string()));
        }
        self.state = FocusState::Tracking(Segment {
            exe: exe.to_string(),
            title: title.to_string(),
            start,
        });
    }

    /// Persists the pending session early when the segment starting at
    /// `next_start` can no longer merge with it.
    fn flush_if_stale(&mut self, next_start: DateTime<Utc>) {
        let stale = self
            .pending
            .as_ref()
            .is_some_and(|pending| next_start - pending.ts_end >= self.config.merge_gap);
        if stale {
            self.flush();
        }
    }

    fn close_segment(&mut self, segment: Segment, end: DateTime<Utc>) -> Transition {
        let duration = end - segment.start;

        if is_sentinel_exe(&segment.exe) {
            self.flush();
            self.tally.untracked_ms += duration.num_milliseconds();
            return Transition::Untracked { duration };
        }

        if duration < self.config.min_focus {
            debug!(exe = %segment.exe, ms = duration.num_milliseconds(), "discarded flicker");
            self.tally.discarded_ms += duration.num_milliseconds();
            return Transition::Discarded { duration };
        }

        let candidate = self.build_session(&segment, end);
        let mergeable = self.pending.as_ref().is_some_and(|pending| {
            pending.same_activity(&candidate)
                && candidate.ts_start - pending.ts_end < self.config.merge_gap
        });

        if mergeable {
            if let Some(pending) = self.pending.as_mut() {
                // The gap was counted as discarded flicker; it now belongs to the session.
                let gap_ms = (candidate.ts_start - pending.ts_end).num_milliseconds();
                self.tally.discarded_ms -= gap_ms;
                self.tally.emitted_ms += gap_ms + duration.num_milliseconds();
                pending.absorb(candidate);
                debug!(exe = %pending.exe, end = %pending.ts_end, "merged into pending session");
            }
            return Transition::Merged;
        }

        self.flush();
        self.tally.emitted_ms += duration.num_milliseconds();
        self.pending = Some(candidate);
        Transition::Buffered
    }

    fn build_session(&self, segment: &Segment, end: DateTime<Utc>) -> Session {
        let start = segment.start;

        let domain = if is_browser_exe(&segment.exe) {
            match self.store.browser_events_between(start, end) {
                Ok(events) => resolve_domain(&segment.exe, start, end, &events),
                Err(err) => {
                    warn!(error = %err, "browser domain lookup failed");
                    None
                }
            }
        } else {
            None
        };

        let in_meeting = match self.store.meeting_windows_between(start, end) {
            Ok(windows) => segment_in_meeting(&windows, start, end),
            Err(err) => {
                warn!(error = %err, "meeting window lookup failed");
                false
            }
        };

        let rules = self.store.rules().unwrap_or_else(|err| {
            warn!(error = %err, "failed to load rules; using default categories");
            Vec::new()
        });

        let title = Some(segment.title.as_str()).filter(|title| !title.is_empty());
        let classification = classify(
            &rules,
            &segment.exe,
            title,
            domain.as_deref(),
            in_meeting,
        );
        let confidence = self.config.confidence.score(&classification, in_meeting);

        Session {
            ts_start: start,
            ts_end: end,
            exe: segment.exe.clone(),
            primary_resource: domain.unwrap_or_else(|| segment.title.clone()),
            category: classification.category,
            client: classification.client,
            billable: classification.billable,
            confidence,
        }
    }
}
