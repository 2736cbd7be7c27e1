use std::sync::{Arc, Mutex, MutexGuard};

use billow_core::{BrowserEvent, MeetingWindow, Rule, Session, SessionStore};
use chrono::{DateTime, Utc};

use crate::{Database, DbError};

/// A cloneable handle serializing all access to one [`Database`].
///
/// The focus tracker, browser relay and calendar sync each hold a clone.
#[derive(Clone)]
pub struct SharedDatabase {
    inner: Arc<Mutex<Database>>,
}

impl SharedDatabase {
    pub fn new(db: Database) -> Self {
        Self {
            inner: Arc::new(Mutex::new(db)),
        }
    }

    /// Locks the connection for the duration of `f`.
    pub fn with<T>(&self, f: impl FnOnce(&mut Database) -> Result<T, DbError>) -> Result<T, DbError> {
        let mut guard = self.lock()?;
        f(&mut guard)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Database>, DbError> {
        self.inner.lock().map_err(|_| DbError::Poisoned)
    }
}

impl SessionStore for SharedDatabase {
    type Error = DbError;

    fn rules(&self) -> Result<Vec<Rule>, DbError> {
        self.lock()?.list_rules()
    }

    fn browser_events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BrowserEvent>, DbError> {
        self.lock()?.browser_events_between(start, end)
    }

    fn meeting_windows_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeetingWindow>, DbError> {
        self.lock()?.meeting_windows_between(start, end)
    }

    fn insert_session(&mut self, session: &Session) -> Result<(), DbError> {
        self.lock()?.append_session(session).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use billow_core::RawEvent;
    use chrono::TimeZone;
    use std::thread;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 3, 9, 0, 0).unwrap() + chrono::Duration::seconds(secs)
    }

    #[test]
    fn concurrent_appends_stay_contiguous() {
        let shared = SharedDatabase::new(Database::open_in_memory().unwrap());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let shared = shared.clone();
                thread::spawn(move || {
                    for step in 0..25 {
                        let event = RawEvent::focus(
                            at(worker * 1000 + step),
                            format!("worker{worker}.exe"),
                            "",
                            None,
                        );
                        shared.with(|db| db.append_raw_event(&event)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let events = shared.with(|db| db.list_raw_events()).unwrap();
        assert_eq!(events.len(), 100);
        for pair in events.windows(2) {
            // interleaved workers append out of order; rows still abut
            assert!(pair[0].ts_end >= pair[0].ts_start);
            assert_eq!(pair[1].ts_start, pair[0].ts_end);
        }
    }

    #[test]
    fn shared_handle_acts_as_session_store() {
        let mut shared = SharedDatabase::new(Database::open_in_memory().unwrap());
        assert_eq!(shared.rules().unwrap().len(), 11);

        let session = Session {
            ts_start: at(0),
            ts_end: at(30),
            exe: "OUTLOOK.EXE".to_string(),
            primary_resource: "Inbox".to_string(),
            category: "Email".to_string(),
            client: None,
            billable: billow_core::Billable::Unknown,
            confidence: billow_core::Confidence::clamped(0.9),
        };
        shared.insert_session(&session).unwrap();
        let stored = shared
            .with(|db| db.list_sessions_in_range(at(0), at(60)))
            .unwrap();
        assert_eq!(stored, vec![session]);
    }
}
