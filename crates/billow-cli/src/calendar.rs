//! Online-meeting windows from the Microsoft Graph calendar.
//!
//! Fetches today's (UTC) `calendarView`, keeps online meetings whose
//! provider matches the configured filter, and replaces the stored meeting
//! windows with the result.

use std::fmt;
use std::time::Duration;

use billow_core::MeetingWindow;
use billow_db::{DbError, SharedDatabase};
use chrono::{DateTime, NaiveDateTime, NaiveTime, Utc};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::config::CalendarConfig;

/// Request timeout for calendar calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const SELECT_FIELDS: &str = "subject,start,end,isOnlineMeeting,onlineMeetingProvider";
/// Upper bound on followed `@odata.nextLink` pages.
const MAX_PAGES: usize = 20;

#[derive(Debug, Error)]
pub enum CalendarError {
    #[error("calendar sync is not configured (set calendar.access_token)")]
    NotConfigured,
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("calendar request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("calendar API returned {status}: {body}")]
    Api {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("invalid calendar timestamp {value:?}")]
    Timestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("failed to store meeting windows: {0}")]
    Store(#[from] DbError),
    #[error("meeting window store task failed: {0}")]
    StoreTask(#[from] tokio::task::JoinError),
}

#[derive(Debug, Deserialize)]
pub struct CalendarView {
    #[serde(default)]
    pub value: Vec<CalendarEvent>,
    #[serde(rename = "@odata.nextLink")]
    pub next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarEvent {
    #[serde(default)]
    pub subject: Option<String>,
    pub start: GraphDateTime,
    pub end: GraphDateTime,
    #[serde(default)]
    pub is_online_meeting: Option<bool>,
    #[serde(default)]
    pub online_meeting_provider: Option<String>,
}

/// Graph `dateTimeTimeZone`; requests ask for UTC so `timeZone` is ignored.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDateTime {
    pub date_time: String,
}

fn parse_graph_datetime(value: &str) -> Result<DateTime<Utc>, CalendarError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| naive.and_utc())
        .map_err(|source| CalendarError::Timestamp {
            value: value.to_string(),
            source,
        })
}

/// Keeps online meetings whose provider contains `provider_filter`
/// (case-insensitive). Windows that do not end after they start are dropped.
pub fn meeting_windows(
    events: &[CalendarEvent],
    provider_filter: &str,
) -> Result<Vec<MeetingWindow>, CalendarError> {
    let filter = provider_filter.to_lowercase();
    let mut windows = Vec::new();
    for event in events {
        if event.is_online_meeting != Some(true) {
            continue;
        }
        let Some(provider) = event
            .online_meeting_provider
            .as_deref()
            .filter(|provider| provider.to_lowercase().contains(&filter))
        else {
            continue;
        };
        let start = parse_graph_datetime(&event.start.date_time)?;
        let end = parse_graph_datetime(&event.end.date_time)?;
        if end <= start {
            debug!(subject = ?event.subject, "skipping empty meeting");
            continue;
        }
        windows.push(MeetingWindow {
            start,
            end,
            provider: provider.to_string(),
        });
    }
    Ok(windows)
}

/// The UTC day containing `now`, as `[midnight, next midnight)`.
fn utc_day(now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = now.date_naive().and_time(NaiveTime::MIN).and_utc();
    (start, start + chrono::Duration::days(1))
}

pub struct GraphCalendar {
    http: reqwest::Client,
    endpoint: String,
    access_token: String,
    provider_filter: String,
}

impl fmt::Debug for GraphCalendar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphCalendar")
            .field("endpoint", &self.endpoint)
            .field("access_token", &"[REDACTED]")
            .field("provider_filter", &self.provider_filter)
            .finish_non_exhaustive()
    }
}

impl GraphCalendar {
    pub fn from_config(config: &CalendarConfig) -> Result<Self, CalendarError> {
        let access_token = config
            .access_token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(CalendarError::NotConfigured)?
            .to_string();
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(CalendarError::ClientBuild)?;
        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            access_token,
            provider_filter: config.provider_filter.clone(),
        })
    }

    /// Fetches the online meetings of the UTC day containing `now`.
    pub async fn todays_meetings(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MeetingWindow>, CalendarError> {
        let (start, end) = utc_day(now);
        let start = start.to_rfc3339();
        let end = end.to_rfc3339();

        let mut request = self.http.get(&self.endpoint).query(&[
            ("startDateTime", start.as_str()),
            ("endDateTime", end.as_str()),
            ("$select", SELECT_FIELDS),
        ]);
        let mut windows = Vec::new();
        for _ in 0..MAX_PAGES {
            let page = self.fetch_page(request).await?;
            windows.extend(meeting_windows(&page.value, &self.provider_filter)?);
            let Some(next) = page.next_link else {
                return Ok(windows);
            };
            request = self.http.get(next);
        }
        warn!(pages = MAX_PAGES, "calendar view truncated");
        Ok(windows)
    }

    async fn fetch_page(&self, request: reqwest::RequestBuilder) -> Result<CalendarView, CalendarError> {
        let response = request
            .bearer_auth(&self.access_token)
            .header("Prefer", r#"outlook.timezone="UTC""#)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CalendarError::Api { status, body });
        }
        Ok(response.json().await?)
    }
}

/// Runs one sync: fetch today's meetings and replace the stored windows.
pub async fn sync_once(
    calendar: &GraphCalendar,
    db: &SharedDatabase,
    now: DateTime<Utc>,
) -> Result<usize, CalendarError> {
    let windows = calendar.todays_meetings(now).await?;
    let db = db.clone();
    let count =
        tokio::task::spawn_blocking(move || db.with(|db| db.replace_meeting_windows(&windows)))
            .await??;
    info!(count, "synced meeting windows");
    Ok(count)
}

/// Syncs immediately and then every `interval` until `shutdown` flips.
/// Failures are logged and retried on the next tick.
pub async fn run_sync_task(
    calendar: GraphCalendar,
    db: SharedDatabase,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(err) = sync_once(&calendar, &db, Utc::now()).await {
                    warn!(error = %err, "calendar sync failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("calendar sync stopped");
}
