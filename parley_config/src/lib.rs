#![deny(
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

//! Client configuration: an immutable snapshot of endpoint, model,
//! credentials, generation parameters, history bounds and retry policy.
//!
//! A configuration is normally read from a flat JSON object such as
//! `~/parley/config.json`; every key except `apiKey` has a default.

mod error;
pub mod schema;

pub use error::ConfigError;
pub use schema::{Configuration, keys};
