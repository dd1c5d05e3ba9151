//! statetable - Transactional state tables for a blockchain storage layer
//!
//! # Architecture
//!
//! The crate is organized into logical modules:
//!
//! ## Rows & Schema
//! - [`entry`] - Versioned row records (fields, status, block number)
//! - [`schema`] - Table identity, declared fields, key conditions
//!
//! ## Overlay & Rollback
//! - [`table`] - Dirty overlay per table: reads, writes, undo, commit
//! - [`changelog`] - Append-only change log and savepoints
//! - [`state`] - Per-height container sharing one log across tables
//!
//! ## Consensus Commitment
//! - [`hasher`] - Deterministic aggregate hash over visible rows
//!
//! ## Persistence
//! - [`backend`] - Durable storage seam consumed by the overlay
//! - [`persistence`] - SQLite and in-memory backend implementations
//!
//! ## Utilities
//! - [`error`] - Error types

#![forbid(unsafe_code)]

// ============================================================================
// Rows & Schema
// ============================================================================
pub mod entry;
pub mod schema;

// ============================================================================
// Overlay & Rollback
// ============================================================================
pub mod changelog;
pub mod state;
pub mod table;

// ============================================================================
// Consensus Commitment
// ============================================================================
pub mod hasher;

// ============================================================================
// Persistence
// ============================================================================
pub mod backend;
pub mod persistence;

// ============================================================================
// Utilities
// ============================================================================
pub mod error;

pub use backend::StateBackend;
pub use changelog::{Change, ChangeKind, ChangeLog, Recorder};
pub use entry::{Entry, EntryStatus};
pub use error::{Result, StateError};
pub use hasher::{Sha256Hash, ZERO_HASH};
pub use persistence::{MemoryBackend, SqliteBackend};
pub use schema::{Condition, KeyOp, TableInfo};
pub use state::StateStorage;
pub use table::Table;
