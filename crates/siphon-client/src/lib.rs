//! Siphon Client - HTTP client for the search analytics reporting API
//!
//! This crate provides [`SearchConsoleClient`], the production
//! implementation of [`siphon_core::SearchAnalyticsClient`].
//!
//! # Overview
//!
//! The client handles bearer authentication, request building, response
//! parsing, and retry with exponential backoff for rate limits and transient
//! server errors. Callers cancel a request by dropping its future.

pub mod search_console;

// Re-export main client types
pub use search_console::{DEFAULT_API_BASE, SearchConsoleClient};
