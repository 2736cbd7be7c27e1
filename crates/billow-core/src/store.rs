//! The persistence seam used by the sessionizer.

use chrono::{DateTime, Utc};

use crate::event::{BrowserEvent, MeetingWindow, Session};
use crate::rules::Rule;

/// Storage operations the sessionizer depends on.
///
/// Implemented by the SQLite store; tests use in-memory fakes.
pub trait SessionStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Returns the rule snapshot in evaluation order.
    fn rules(&self) -> Result<Vec<Rule>, Self::Error>;

    /// Returns browser intervals overlapping `[start, end)`.
    ///
    /// A still-open interval is reported as extending to `end`.
    fn browser_events_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BrowserEvent>, Self::Error>;

    /// Returns meeting windows overlapping `[start, end)`.
    fn meeting_windows_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<MeetingWindow>, Self::Error>;

    /// Persists a finalized session. Any merge has already happened.
    fn insert_session(&mut self, session: &Session) -> Result<(), Self::Error>;
}
