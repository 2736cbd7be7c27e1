//! Core domain logic for billow.
//!
//! This crate contains the fundamental types and logic for:
//! - Classification: ordered rule matching with a meeting override and default categories
//! - Correlation: joining focus segments with browser tabs and meeting windows
//! - Sessionization: turning focus changes into merged, non-overlapping sessions

pub mod correlation;
pub mod domain;
pub mod event;
pub mod rules;
pub mod sessionizer;
pub mod store;
pub mod types;

pub use event::{ACTIVE_EXE, BrowserEvent, IDLE_EXE, MeetingWindow, RawEvent, Session};
pub use rules::{Classification, ConfidencePolicy, MatchSource, MatchType, Rule, classify};
pub use sessionizer::{Sessionizer, SessionizerConfig, Tally, Transition};
pub use store::SessionStore;
pub use types::{Billable, Confidence, ValidationError};
