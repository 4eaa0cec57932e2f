//! Siphon DB - SQLite storage layer for synced search analytics rows.
//!
//! This crate implements [`siphon_core::RecordStore`] on top of SQLite via
//! `sqlx`.
//!
//! # Overview
//!
//! The main components are:
//! - [`SqliteRecordStore`] - row upserts, resume lookup, property markers,
//!   sync log and retention deletes
//! - [`PropertySyncStatus`], [`SyncLogRow`] - read models for bookkeeping tables

mod repository;

pub use repository::{PropertySyncStatus, SqliteRecordStore, SyncLogRow};
