#![warn(
    clippy::all,
    clippy::nursery,
    clippy::pedantic,
    clippy::style,
    clippy::complexity,
    clippy::perf,
    clippy::correctness,
    clippy::suspicious,
    clippy::unwrap_used,
    clippy::expect_used
)]
#![allow(
    clippy::similar_names,
    clippy::missing_safety_doc,
    clippy::missing_panics_doc,
    clippy::missing_errors_doc
)]

//! Bounded multi-turn conversation memory.
//!
//! The store keeps user/assistant turns oldest first and enforces two
//! budgets: a character budget on the context sent with each request, and
//! an item budget on the resident history.

mod history;

pub use history::{ConversationStore, HistoryConfig, HistoryStats};
