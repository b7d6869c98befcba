//! The three-stage strategy pipeline: `EventDetector` →
//! `FundSelector` → an ordered `SignalFilter` chain, plus the scoring
//! function that drafts a signal before the filters run.

pub mod detector;
pub mod filters;
pub mod scoring;
pub mod selector;

pub use detector::EventDetector;
pub use filters::SignalFilter;
pub use scoring::{draft_signal, ScoringConfig};
pub use selector::FundSelector;
