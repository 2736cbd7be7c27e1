//! Billow tracking agent.
//!
//! Wires the event sources (stdin notifications, idle polling, the browser
//! relay, calendar sync) to the sessionizer and the SQLite store.

pub mod calendar;
mod cli;
pub mod commands;
mod config;
pub mod idle;
pub mod notify;
pub mod relay;
pub mod tracker;

pub use cli::{Cli, Commands, RulesAction};
pub use config::{CalendarConfig, Config, IdleConfig, RelayConfig, TrackingConfig};
