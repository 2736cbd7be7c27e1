//! Rules commands: list the rule table and append new rules.

use std::io::Write;

use anyhow::{Context, Result};
use billow_core::{Billable, MatchType, Rule};
use billow_db::Database;

/// One-line human description of a rule.
fn describe(rule: &Rule) -> String {
    let category = rule
        .category
        .as_deref()
        .filter(|category| !category.trim().is_empty())
        .unwrap_or("(default)");
    let mut line = format!(
        "{:<14}  {:<14}  {category}",
        rule.match_type.as_str(),
        rule.pattern
    );
    if let Some(client) = &rule.client {
        line.push_str(" client=");
        line.push_str(client);
    }
    if rule.billable != Billable::Unknown {
        line.push_str(" billable=");
        line.push_str(rule.billable.as_str());
    }
    line
}

pub fn list<W: Write>(writer: &mut W, db: &Database, json: bool) -> Result<()> {
    let rules = db.list_rules().context("failed to load rules")?;

    if json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&rules)?)?;
        return Ok(());
    }

    writeln!(writer, "Rules (evaluation order):")?;
    if rules.is_empty() {
        writeln!(writer, "No rules defined.")?;
    }
    for (index, rule) in rules.iter().enumerate() {
        writeln!(writer, "{:>2}. {}", index + 1, describe(rule))?;
    }
    Ok(())
}

pub fn add<W: Write>(
    writer: &mut W,
    db: &mut Database,
    match_type: MatchType,
    pattern: &str,
    category: Option<String>,
    client: Option<String>,
    billable: Option<Billable>,
) -> Result<()> {
    let rule = Rule::new(
        match_type,
        pattern,
        category,
        client,
        billable.unwrap_or_default(),
    )?;
    db.add_rule(&rule).context("failed to add rule")?;
    let position = db.list_rules()?.len();
    writeln!(writer, "Added rule {position}: {}", describe(&rule))?;
    Ok(())
}
