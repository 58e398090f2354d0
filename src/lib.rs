//! # xacoord
//!
//! A two-phase-commit transaction coordinator with:
//! - A CRC32-checked write-ahead journal of transaction status transitions
//! - Position-ordered participation of XA resources in each phase
//! - Heuristic outcome classification
//! - Incremental crash recovery against the journal's dangling transactions
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TransactionManager                          │
//! │         (begin / recover_now / background recovery)          │
//! └──────────┬──────────────────────────────────┬───────────────┘
//!            │                                  │
//! ┌──────────▼──────────┐            ┌──────────▼──────────────┐
//! │     Transaction     │            │   ResourceRegistry      │
//! │ PositionalScheduler │            │ (producers, failed flag)│
//! └──────────┬──────────┘            └──────────┬──────────────┘
//!            │                                  │
//! ┌──────────▼──────────┐            ┌──────────▼──────────────┐
//! │  Preparer/Committer │            │  IncrementalRecoverer   │
//! │     /Rollbacker     │            │   + RecoveryHelper      │
//! │  (PhaseEngine jobs) │            └──────────┬──────────────┘
//! └──────────┬──────────┘                       │
//!            │                                  │
//!            └───────────────┬──────────────────┘
//!                            ▼
//!                   ┌─────────────────┐
//!                   │     Journal     │
//!                   │ (dual-file WAL) │
//!                   └─────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod uid;

pub mod journal;
pub mod scheduler;
pub mod resource;
pub mod twopc;
pub mod transaction;
pub mod recovery;
pub mod manager;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{CoordError, Result};
pub use config::{JournalKind, TmConfig};
pub use journal::{Journal, LogRecord, Status};
pub use manager::TransactionManager;
pub use resource::{ResourceProducer, ResourceRegistry, XaError, XaErrorCode, XaResource, Xid};
pub use scheduler::PositionalScheduler;
pub use transaction::Transaction;
pub use uid::{Uid, UidGenerator};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of xacoord
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
