//! The agent hub: records observed intervals and drives the sessionizer.
//!
//! Every event source (stdin notifications, the idle poller, the browser
//! relay) goes through one [`Tracker`] behind a [`TrackerHandle`], so raw
//! events and sessionizer callbacks are applied in the same order.

use std::sync::{Arc, Mutex};

use anyhow::{Result, anyhow};
use billow_core::domain::extract_domain;
use billow_core::{BrowserEvent, RawEvent, Sessionizer, SessionizerConfig, Tally, Transition};
use billow_db::SharedDatabase;
use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::idle::IdleMonitor;

/// Browser name recorded when the extension does not say.
const DEFAULT_BROWSER: &str = "browser";

pub struct Tracker {
    db: SharedDatabase,
    sessionizer: Sessionizer<SharedDatabase>,
    idle_monitor: Option<IdleMonitor>,
    /// Idle as last reported to the sessionizer.
    idle: bool,
    paused: bool,
}

impl Tracker {
    pub fn new(
        db: SharedDatabase,
        config: SessionizerConfig,
        idle_monitor: Option<IdleMonitor>,
    ) -> Self {
        Self {
            sessionizer: Sessionizer::new(db.clone(), config),
            db,
            idle_monitor,
            idle: false,
            paused: false,
        }
    }

    pub const fn is_paused(&self) -> bool {
        self.paused
    }

    pub const fn tally(&self) -> Tally {
        self.sessionizer.tally()
    }

    /// Records a foreground change. Ignored while paused.
    pub fn focus(
        &mut self,
        at: DateTime<Utc>,
        exe: &str,
        title: &str,
        hwnd: Option<String>,
    ) -> Option<Transition> {
        if self.paused {
            return None;
        }
        if let Some(monitor) = &mut self.idle_monitor {
            monitor.record_input(at);
        }
        // the focus row itself closes any idle marker
        self.idle = false;
        self.append_raw(&RawEvent::focus(at, exe, title, hwnd));
        Some(self.sessionizer.on_focus_change(at, exe, title))
    }

    /// Records user input that did not change focus.
    pub fn activity(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        if self.paused {
            return None;
        }
        if let Some(monitor) = &mut self.idle_monitor {
            monitor.record_input(at);
        }
        self.set_idle(at, false)
    }

    /// Applies an idle state reported by an external notifier.
    pub fn idle_changed(&mut self, at: DateTime<Utc>, idle: bool) -> Option<Transition> {
        if self.paused {
            return None;
        }
        if let Some(monitor) = &mut self.idle_monitor {
            if idle {
                monitor.force_idle();
            } else {
                monitor.record_input(at);
            }
        }
        self.set_idle(at, idle)
    }

    /// Polls the idle monitor at `now`.
    pub fn poll_idle(&mut self, now: DateTime<Utc>) -> Option<Transition> {
        if self.paused {
            return None;
        }
        let became_idle = self
            .idle_monitor
            .as_mut()
            .is_some_and(|monitor| monitor.observe(now));
        if became_idle {
            info!(at = %now, "user idle");
            self.set_idle(now, true)
        } else {
            None
        }
    }

    /// Records the active browser tab. Returns true if a row was written.
    pub fn tab(
        &mut self,
        at: DateTime<Utc>,
        url: &str,
        title: Option<String>,
        browser: Option<String>,
    ) -> bool {
        if self.paused {
            return false;
        }
        if let Some(monitor) = &mut self.idle_monitor {
            monitor.record_input(at);
        }
        let domain = extract_domain(url);
        let event = BrowserEvent::open(
            at,
            browser.unwrap_or_else(|| DEFAULT_BROWSER.to_string()),
            domain,
            title,
        );
        match self.db.with(|db| db.append_browser_event(&event)) {
            Ok(_) => {
                debug!(domain = ?event.domain, "browser tab recorded");
                true
            }
            Err(err) => {
                warn!(error = %err, "failed to record browser tab");
                false
            }
        }
    }

    /// Stops tracking as if the user went idle.
    pub fn pause(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        if self.paused {
            return None;
        }
        let transition = self.set_idle(at, true);
        self.paused = true;
        info!("tracking paused");
        transition
    }

    /// Resumes tracking as an idle→active toggle.
    pub fn resume(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        if !self.paused {
            return None;
        }
        self.paused = false;
        if let Some(monitor) = &mut self.idle_monitor {
            monitor.record_input(at);
        }
        info!("tracking resumed");
        self.set_idle(at, false)
    }

    /// Closes open intervals at `at`, finishes the current segment and
    /// persists any held session.
    pub fn shutdown(&mut self, at: DateTime<Utc>) -> Option<Transition> {
        let closed = self.db.with(|db| {
            db.close_open_raw_event(at)?;
            db.close_open_browser_event(at)
        });
        if let Err(err) = closed {
            warn!(error = %err, "failed to close open intervals");
        }
        let transition = self.sessionizer.shutdown(at);
        let tally = self.sessionizer.tally();
        info!(
            emitted_ms = tally.emitted_ms,
            discarded_ms = tally.discarded_ms,
            untracked_ms = tally.untracked_ms,
            "tracker stopped"
        );
        transition
    }

    fn set_idle(&mut self, at: DateTime<Utc>, idle: bool) -> Option<Transition> {
        if self.idle == idle {
            return None;
        }
        self.idle = idle;
        self.append_raw(&RawEvent::idle_marker(at, idle));
        Some(self.sessionizer.on_idle_change(at, idle))
    }

    fn append_raw(&self, event: &RawEvent) {
        if let Err(err) = self.db.with(|db| db.append_raw_event(event)) {
            warn!(error = %err, exe = %event.exe, "failed to record raw event");
        }
    }
}

/// Cloneable, lock-guarded access to the tracker.
#[derive(Clone)]
pub struct TrackerHandle {
    inner: Arc<Mutex<Tracker>>,
}

impl TrackerHandle {
    pub fn new(tracker: Tracker) -> Self {
        Self {
            inner: Arc::new(Mutex::new(tracker)),
        }
    }

    pub fn with<T>(&self, f: impl FnOnce(&mut Tracker) -> T) -> Result<T> {
        let mut tracker = self
            .inner
            .lock()
            .map_err(|_| anyhow!("tracker lock poisoned"))?;
        Ok(f(&mut tracker))
    }

    /// Runs `f` under the lock on tokio's blocking pool. Tracker calls write
    /// to SQLite, so async tasks go through here.
    pub async fn with_blocking<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Tracker) -> T + Send + 'static,
        T: Send + 'static,
    {
        let handle = self.clone();
        tokio::task::spawn_blocking(move || handle.with(f)).await?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billow_core::{ACTIVE_EXE, IDLE_EXE};
    use billow_db::Database;
    use chrono::{Duration, TimeZone};
    use std::thread;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    fn tracker(idle_monitor: Option<IdleMonitor>) -> (Tracker, SharedDatabase) {
        let db = SharedDatabase::new(Database::open_in_memory().unwrap());
        (
            Tracker::new(db.clone(), SessionizerConfig::default(), idle_monitor),
            db,
        )
    }

    fn sessions(db: &SharedDatabase) -> Vec<billow_core::Session> {
        db.with(|db| db.list_sessions_in_range(at(-3600), at(36000)))
            .unwrap()
    }

    #[test]
    fn focus_records_raw_events_and_sessions() {
        let (mut tracker, db) = tracker(None);
        tracker.focus(at(0), "EXCEL.EXE", "Budget.xlsx", Some("0x10".into()));
        tracker.focus(at(60), "OUTLOOK.EXE", "Inbox", None);
        tracker.shutdown(at(90));

        let raw = db.with(|db| db.list_raw_events()).unwrap();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].ts_end, at(60));
        assert_eq!(raw[1].ts_end, at(90));

        let sessions = sessions(&db);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].category, "Spreadsheet");
        assert_eq!(sessions[1].category, "Email");
        assert_eq!(sessions[1].ts_end, at(90));
    }

    #[test]
    fn idle_poll_ends_segment_and_input_resumes_it() {
        let (mut tracker, db) = tracker(Some(IdleMonitor::new(Duration::seconds(240))));
        tracker.focus(at(0), "WINWORD.EXE", "Contract.docx", None);
        assert_eq!(tracker.poll_idle(at(100)), None);
        assert!(tracker.poll_idle(at(240)).is_some());
        assert_eq!(tracker.poll_idle(at(243)), None);

        tracker.activity(at(600));
        tracker.shutdown(at(700));

        let raw = db.with(|db| db.list_raw_events()).unwrap();
        let exes: Vec<_> = raw.iter().map(|event| event.exe.as_str()).collect();
        assert_eq!(exes, vec!["WINWORD.EXE", IDLE_EXE, ACTIVE_EXE]);
        assert!(raw[1].was_idle);

        let sessions = sessions(&db);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].ts_end, at(240));
        assert_eq!(sessions[1].ts_start, at(600));
        assert_eq!(sessions[1].exe, "WINWORD.EXE");
        assert_eq!(tracker.tally().untracked_ms, 360_000);
    }

    #[test]
    fn paused_tracker_ignores_events_until_resume() {
        let (mut tracker, db) = tracker(None);
        tracker.focus(at(0), "EXCEL.EXE", "Budget.xlsx", None);
        assert!(tracker.pause(at(30)).is_some());
        assert!(tracker.is_paused());
        assert_eq!(tracker.focus(at(40), "OUTLOOK.EXE", "Inbox", None), None);
        assert!(!tracker.tab(at(45), "https://github.com/", None, None));
        assert_eq!(tracker.pause(at(50)), None);

        assert!(tracker.resume(at(100)).is_some());
        tracker.shutdown(at(200));

        let sessions = sessions(&db);
        assert_eq!(sessions.len(), 2);
        assert_eq!(sessions[0].ts_end, at(30));
        assert_eq!(sessions[1].exe, "EXCEL.EXE");
        assert_eq!(sessions[1].ts_start, at(100));
        assert!(db.with(|db| db.list_browser_events()).unwrap().is_empty());
    }

    #[test]
    fn tab_records_domain_and_feeds_browser_sessions() {
        let (mut tracker, db) = tracker(None);
        assert!(tracker.tab(
            at(0),
            "https://acme.atlassian.net/browse/PRJ-1",
            Some("PRJ-1".into()),
            None
        ));
        tracker.focus(at(1), "chrome.exe", "PRJ-1 - Jira", None);
        tracker.shutdown(at(61));

        let tabs = db.with(|db| db.list_browser_events()).unwrap();
        assert_eq!(tabs[0].browser, "browser");
        assert_eq!(tabs[0].domain.as_deref(), Some("acme.atlassian.net"));
        assert_eq!(tabs[0].ts_end, at(61));

        let sessions = sessions(&db);
        assert_eq!(sessions[0].primary_resource, "acme.atlassian.net");
        assert_eq!(sessions[0].category, "Jira/Confluence");
    }

    #[test]
    fn redundant_idle_reports_are_dropped() {
        let (mut tracker, db) = tracker(None);
        tracker.focus(at(0), "EXCEL.EXE", "Budget.xlsx", None);
        assert!(tracker.idle_changed(at(30), true).is_some());
        assert_eq!(tracker.idle_changed(at(40), true), None);
        assert!(tracker.idle_changed(at(50), false).is_some());
        assert_eq!(tracker.activity(at(55)), None);
        assert_eq!(db.with(|db| db.list_raw_events()).unwrap().len(), 3);
    }

    #[test]
    fn concurrent_producers_keep_streams_consistent() {
        let (tracker, db) = tracker(None);
        let handle = TrackerHandle::new(tracker);
        let apps = [
            ("EXCEL.EXE", "Budget.xlsx"),
            ("chrome.exe", "PRJ-1 - Jira"),
            ("OUTLOOK.EXE", "Inbox"),
        ];

        let focus = {
            let handle = handle.clone();
            thread::spawn(move || {
                for (step, (exe, title)) in (0..60_i64).zip(apps.iter().cycle()) {
                    handle
                        .with(|tracker| tracker.focus(at(step * 20), exe, title, None))
                        .unwrap();
                }
            })
        };
        let tabs = {
            let handle = handle.clone();
            thread::spawn(move || {
                for step in 0..40_i64 {
                    let url = if step % 2 == 0 {
                        "https://acme.atlassian.net/browse/PRJ-1"
                    } else {
                        "https://github.com/acme/app"
                    };
                    handle
                        .with(|tracker| tracker.tab(at(step * 30 + 5), url, None, None))
                        .unwrap();
                }
            })
        };
        let idle = {
            let handle = handle.clone();
            thread::spawn(move || {
                for step in 0..20_i64 {
                    handle
                        .with(|tracker| tracker.idle_changed(at(step * 60 + 45), step % 2 == 0))
                        .unwrap();
                }
            })
        };
        for producer in [focus, tabs, idle] {
            producer.join().unwrap();
        }
        handle.with(|tracker| tracker.shutdown(at(1500))).unwrap();

        let raw = db.with(|db| db.list_raw_events()).unwrap();
        assert!(raw.len() >= 60);
        assert!(raw.iter().all(|event| event.ts_end >= event.ts_start));
        for pair in raw.windows(2) {
            assert_eq!(pair[1].ts_start, pair[0].ts_end);
        }

        let browser = db.with(|db| db.list_browser_events()).unwrap();
        assert_eq!(browser.len(), 40);
        for pair in browser.windows(2) {
            assert_eq!(pair[1].ts_start, pair[0].ts_end);
        }

        let sessions = sessions(&db);
        assert!(!sessions.is_empty());
        assert!(
            sessions
                .iter()
                .all(|session| session.ts_end > session.ts_start)
        );
        for pair in sessions.windows(2) {
            assert!(pair[0].ts_end <= pair[1].ts_start, "overlap: {pair:?}");
        }
    }

    #[tokio::test]
    async fn blocking_access_reaches_tracker() {
        let (tracker, db) = tracker(None);
        let handle = TrackerHandle::new(tracker);
        handle
            .with_blocking(|tracker| tracker.focus(at(0), "EXCEL.EXE", "Budget.xlsx", None))
            .await
            .unwrap();
        let paused = handle
            .with_blocking(|tracker| tracker.is_paused())
            .await
            .unwrap();
        assert!(!paused);
        assert_eq!(db.with(|db| db.list_raw_events()).unwrap().len(), 1);
    }
}
