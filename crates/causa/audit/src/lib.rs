//! Causa Audit — the append-only, hash-chained record of every kernel decision.
//!
//! Each [`AuditEntry`] carries `entry_hash = hash(entry without entry_hash)`
//! and the previous entry's hash; the first entry links to the all-zero
//! genesis hash. Grants and denials are recorded with equal completeness.
//!
//! The [`IntegrityVerifier`] re-walks a chain (in memory or as JSONL bytes)
//! and reports the first hash mismatch, broken link or sign of truncation.

#![deny(unsafe_code)]

pub mod entry;
pub mod error;
pub mod integrity;
pub mod log;

pub use entry::{AuditEntry, AuditEvent, SnapshotRef};
pub use error::{AuditError, Result};
pub use integrity::{
    ChainReport, ChainViolation, IntegrityChain, IntegrityVerifier, VerifyOptions, ViolationKind,
};
pub use log::{encode_line, read_entries, AuditLog};
