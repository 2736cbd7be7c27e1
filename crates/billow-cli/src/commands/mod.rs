//! CLI subcommand implementations.

pub mod classify;
pub mod init;
pub mod rules;
pub mod run;
pub mod sessions;
pub mod status;
pub mod sync_calendar;
