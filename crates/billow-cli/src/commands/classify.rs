//! Classify command: a dry run of the rules engine.

use std::io::Write;

use anyhow::{Context, Result};
use billow_core::rules::DefaultBucket;
use billow_core::{ConfidencePolicy, MatchSource, classify};
use billow_db::Database;

/// An activity to classify.
#[derive(Debug, Clone, Default)]
pub struct Activity<'a> {
    pub exe: &'a str,
    pub title: Option<&'a str>,
    pub domain: Option<&'a str>,
    pub in_meeting: bool,
}

fn describe_source(source: MatchSource) -> String {
    match source {
        MatchSource::MeetingOverride => "meeting override".to_string(),
        MatchSource::Rule { index, match_type } => format!("rule {} ({match_type})", index + 1),
        MatchSource::Default { bucket } => {
            let bucket = match bucket {
                DefaultBucket::Application => "application",
                DefaultBucket::Browser => "browser",
                DefaultBucket::Other => "other",
            };
            format!("default ({bucket})")
        }
    }
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    policy: &ConfidencePolicy,
    activity: &Activity<'_>,
) -> Result<()> {
    let rules = db.list_rules().context("failed to load rules")?;
    let classification = classify(
        &rules,
        activity.exe,
        activity.title,
        activity.domain,
        activity.in_meeting,
    );
    let confidence = policy.score(&classification, activity.in_meeting);

    writeln!(writer, "Category:   {}", classification.category)?;
    writeln!(
        writer,
        "Client:     {}",
        classification.client.as_deref().unwrap_or("-")
    )?;
    writeln!(writer, "Billable:   {}", classification.billable)?;
    writeln!(writer, "Confidence: {confidence}")?;
    writeln!(writer, "Matched:    {}", describe_source(classification.source))?;
    Ok(())
}
