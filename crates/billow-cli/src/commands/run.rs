//! The long-running tracking agent.
//!
//! Reads notifications from stdin and runs the browser relay, the idle poller
//! and calendar sync alongside. Ctrl-C or end of input stops every source,
//! then the tracker closes open intervals and persists the held session.
//!
//! Input that ends while replaying stamped notifications shuts down at the
//! last stamp, so a replay never stretches its final segment to the present.

use anyhow::{Context, Result};
use billow_core::Tally;
use billow_db::SharedDatabase;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::calendar::{self, CalendarError, GraphCalendar};
use crate::config::Config;
use crate::idle::IdleMonitor;
use crate::notify::Notification;
use crate::relay::Relay;
use crate::tracker::{Tracker, TrackerHandle};

/// Runs the agent on stdin until Ctrl-C or end of input.
pub fn run(config: &Config, db: SharedDatabase) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;
    runtime.block_on(run_agent(config, db, tokio::io::stdin()))?;
    Ok(())
}

/// Runs the agent on `input`. Returns the time accounting at shutdown.
pub async fn run_agent<R>(config: &Config, db: SharedDatabase, input: R) -> Result<Tally>
where
    R: AsyncRead + Unpin,
{
    let idle_monitor = config
        .idle
        .enabled
        .then(|| IdleMonitor::new(config.idle.threshold()));
    let tracker = TrackerHandle::new(Tracker::new(
        db.clone(),
        config.sessionizer_config(),
        idle_monitor,
    ));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    if config.relay.enabled {
        match Relay::bind(&config.relay.listen).await {
            Ok(relay) => tasks.push(tokio::spawn(relay.serve(tracker.clone(), shutdown_rx.clone()))),
            Err(err) => warn!(error = %err, "browser relay disabled"),
        }
    }

    if config.idle.enabled {
        tasks.push(tokio::spawn(poll_idle(
            tracker.clone(),
            config.idle.poll_interval(),
            shutdown_rx.clone(),
        )));
    }

    match GraphCalendar::from_config(&config.calendar) {
        Ok(graph) => tasks.push(tokio::spawn(calendar::run_sync_task(
            graph,
            db.clone(),
            config.calendar.sync_interval(),
            shutdown_rx.clone(),
        ))),
        Err(CalendarError::NotConfigured) => info!("calendar sync disabled"),
        Err(err) => warn!(error = %err, "calendar sync disabled"),
    }

    info!("tracking started");
    let replay_end = read_notifications(&tracker, input).await?;

    // stop sources before closing intervals
    let _ = shutdown_tx.send(true);
    for task in tasks {
        if let Err(err) = task.await {
            warn!(error = %err, "background task failed");
        }
    }

    let shutdown_at = replay_end.unwrap_or_else(Utc::now);
    tracker
        .with_blocking(move |tracker| {
            tracker.shutdown(shutdown_at);
            tracker.tally()
        })
        .await
}

/// Applies notifications until input ends or Ctrl-C.
///
/// Returns the `ts` of the last applied notification when input reached its
/// end and that notification carried one; `None` otherwise.
async fn read_notifications<R>(tracker: &TrackerHandle, input: R) -> Result<Option<DateTime<Utc>>>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(input).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut last_ts = None;

    loop {
        let line = tokio::select! {
            line = lines.next_line() => line,
            _ = &mut ctrl_c => {
                info!("interrupted");
                return Ok(None);
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => {
                info!("input closed");
                return Ok(last_ts);
            }
            Err(err) => {
                warn!(error = %err, "failed to read notifications");
                return Ok(None);
            }
        };
        match Notification::parse(&line) {
            Ok(Some(notification)) => {
                debug!(?notification, "notification");
                last_ts = notification.ts();
                let now = Utc::now();
                tracker
                    .with_blocking(move |tracker| notification.apply(tracker, now))
                    .await?;
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, line = %line, "dropping malformed notification"),
        }
    }
}

async fn poll_idle(
    tracker: TrackerHandle,
    interval: std::time::Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = Utc::now();
                let polled = tracker
                    .with_blocking(move |tracker| tracker.poll_idle(now))
                    .await;
                if let Err(err) = polled {
                    warn!(error = %err, "idle poll failed");
                    break;
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!("idle poller stopped");
}
