// API crate clippy configuration
#![allow(clippy::single_match)] // Clearer in some cases
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Senalign API Library
//!
//! This crate contains the HTTP server components for the Senalign token
//! and payment core: routing, request validation, error mapping, and the
//! adapter to the external analysis pipeline.

pub mod analysis;
pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
