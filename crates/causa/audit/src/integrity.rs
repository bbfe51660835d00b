//! Integrity verification for audit chains.
//!
//! The verifier re-walks a chain from genesis and reports the first entry
//! that breaks it. It works on typed entries (in-memory logs) and on raw
//! JSONL bytes (files), where it additionally rejects torn or
//! non-canonical lines.

use std::path::Path;

use causa_crypto::{canonical_bytes, ZERO_HASH};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::entry::{hash_of_unhashed, AuditEntry, AuditEvent};
use crate::error::Result;

/// Running head of a chain being written.
#[derive(Debug, Clone)]
pub struct IntegrityChain {
    last_hash: String,
    entry_count: u64,
    sealed: bool,
}

impl IntegrityChain {
    pub fn new() -> Self {
        Self {
            last_hash: ZERO_HASH.to_string(),
            entry_count: 0,
            sealed: false,
        }
    }

    /// `prev_entry_hash` for the next entry.
    pub fn previous_hash(&self) -> &str {
        &self.last_hash
    }

    /// `seq` for the next entry.
    pub fn next_seq(&self) -> u64 {
        self.entry_count
    }

    pub fn update(&mut self, entry: &AuditEntry) {
        self.last_hash = entry.entry_hash.clone();
        self.entry_count += 1;
        if matches!(entry.event, AuditEvent::SessionSealed { .. }) {
            self.sealed = true;
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }
}

impl Default for IntegrityChain {
    fn default() -> Self {
        Self::new()
    }
}

/// What broke the chain.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ViolationKind {
    #[error("line is not a valid audit entry: {reason}")]
    Malformed { reason: String },

    #[error("line is not in canonical encoding")]
    NonCanonical,

    #[error("entry hash mismatch (declared {declared}, recomputed {recomputed})")]
    HashMismatch { declared: String, recomputed: String },

    #[error("broken chain link (expected prev {expected}, found {found})")]
    BrokenLink { expected: String, found: String },

    #[error("first entry is not anchored at genesis (found prev {found})")]
    NotAnchored { found: String },

    #[error("sequence gap (expected seq {expected}, found {found})")]
    SequenceGap { expected: u64, found: u64 },

    #[error("entry appended after session seal")]
    EntryAfterSeal,

    #[error("seal declares {declared} entries but {actual} precede it")]
    SealCountMismatch { declared: u64, actual: u64 },

    #[error("final line is torn (no trailing newline)")]
    TornTail,

    #[error("session is not sealed")]
    MissingSeal,
}

impl ViolationKind {
    /// Violations that indicate the log was cut short rather than edited.
    pub fn is_truncation(&self) -> bool {
        matches!(
            self,
            ViolationKind::TornTail
                | ViolationKind::MissingSeal
                | ViolationKind::NotAnchored { .. }
                | ViolationKind::SequenceGap { .. }
        )
    }
}

/// First violation found while walking a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainViolation {
    /// Zero-based entry index (line index for files).
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    pub kind: ViolationKind,
}

impl std::fmt::Display for ChainViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "entry {}: {}", self.index, self.kind)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainReport {
    pub valid: bool,
    pub total_entries: usize,
    pub verified_entries: usize,
    pub sealed: bool,
    /// Hash of the last verified entry, genesis if none.
    pub head_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub violation: Option<ChainViolation>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VerifyOptions {
    /// Treat a missing `session_sealed` entry as truncation.
    pub require_seal: bool,
}

impl VerifyOptions {
    pub fn sealed() -> Self {
        Self { require_seal: true }
    }
}

struct ChainWalker {
    expected_prev: String,
    expected_seq: u64,
    sealed: bool,
    verified: usize,
}

impl ChainWalker {
    fn new() -> Self {
        Self {
            expected_prev: ZERO_HASH.to_string(),
            expected_seq: 0,
            sealed: false,
            verified: 0,
        }
    }

    fn check(&mut self, entry: &AuditEntry, recomputed: String) -> std::result::Result<(), ViolationKind> {
        if self.sealed {
            return Err(ViolationKind::EntryAfterSeal);
        }
        if entry.seq != self.expected_seq {
            return Err(ViolationKind::SequenceGap {
                expected: self.expected_seq,
                found: entry.seq,
            });
        }
        if recomputed != entry.entry_hash {
            return Err(ViolationKind::HashMismatch {
                declared: entry.entry_hash.clone(),
                recomputed,
            });
        }
        if entry.prev_entry_hash != self.expected_prev {
            return Err(if self.verified == 0 {
                ViolationKind::NotAnchored {
                    found: entry.prev_entry_hash.clone(),
                }
            } else {
                ViolationKind::BrokenLink {
                    expected: self.expected_prev.clone(),
                    found: entry.prev_entry_hash.clone(),
                }
            });
        }
        if let AuditEvent::SessionSealed { entry_count } = entry.event {
            if entry_count != self.expected_seq {
                return Err(ViolationKind::SealCountMismatch {
                    declared: entry_count,
                    actual: self.expected_seq,
                });
            }
            self.sealed = true;
        }

        self.expected_prev = entry.entry_hash.clone();
        self.expected_seq += 1;
        self.verified += 1;
        Ok(())
    }

    fn report(
        self,
        total_entries: usize,
        violation: Option<ChainViolation>,
        options: VerifyOptions,
    ) -> ChainReport {
        let violation = violation.or_else(|| {
            (options.require_seal && !self.sealed).then(|| ChainViolation {
                index: self.verified,
                seq: None,
                kind: ViolationKind::MissingSeal,
            })
        });
        ChainReport {
            valid: violation.is_none(),
            total_entries,
            verified_entries: self.verified,
            sealed: self.sealed,
            head_hash: self.expected_prev,
            violation,
        }
    }
}

/// Verifies the integrity of audit chains.
pub struct IntegrityVerifier;

impl IntegrityVerifier {
    /// Walk typed entries in order.
    pub fn verify_entries(entries: &[AuditEntry], options: VerifyOptions) -> Result<ChainReport> {
        let mut walker = ChainWalker::new();
        for (index, entry) in entries.iter().enumerate() {
            let recomputed = entry.compute_hash()?;
            if let Err(kind) = walker.check(entry, recomputed) {
                let violation = ChainViolation {
                    index,
                    seq: Some(entry.seq),
                    kind,
                };
                return Ok(walker.report(entries.len(), Some(violation), options));
            }
        }
        Ok(walker.report(entries.len(), None, options))
    }

    /// Walk raw JSONL bytes. Every line must be the canonical encoding of
    /// its entry and the file must end with a newline.
    pub fn verify_bytes(bytes: &[u8], options: VerifyOptions) -> ChainReport {
        let torn = !bytes.is_empty() && !bytes.ends_with(b"\n");
        let body = bytes.strip_suffix(b"\n").unwrap_or(bytes);
        let lines: Vec<&[u8]> = if bytes.is_empty() {
            Vec::new()
        } else {
            body.split(|b| *b == b'\n').collect()
        };
        let total = lines.len();

        let mut walker = ChainWalker::new();
        for (index, line) in lines.iter().enumerate() {
            let is_last = index + 1 == total;
            match Self::check_line(&mut walker, line) {
                Ok(()) => {}
                Err((seq, kind)) => {
                    // An unparseable final line without newline is a torn write.
                    let kind = if torn && is_last && matches!(kind, ViolationKind::Malformed { .. }) {
                        ViolationKind::TornTail
                    } else {
                        kind
                    };
                    let violation = ChainViolation { index, seq, kind };
                    return walker.report(total, Some(violation), options);
                }
            }
        }

        let violation = torn.then(|| ChainViolation {
            index: total.saturating_sub(1),
            seq: None,
            kind: ViolationKind::TornTail,
        });
        walker.report(total, violation, options)
    }

    pub fn verify_file(path: impl AsRef<Path>, options: VerifyOptions) -> Result<ChainReport> {
        let bytes = std::fs::read(path.as_ref())?;
        Ok(Self::verify_bytes(&bytes, options))
    }

    fn check_line(
        walker: &mut ChainWalker,
        line: &[u8],
    ) -> std::result::Result<(), (Option<u64>, ViolationKind)> {
        let malformed = |reason: String| (None, ViolationKind::Malformed { reason });

        let value: Value = serde_json::from_slice(line).map_err(|e| malformed(e.to_string()))?;
        let seq = value.get("seq").and_then(Value::as_u64);

        let canonical = canonical_bytes(&value).map_err(|e| malformed(e.to_string()))?;
        if canonical != line {
            return Err((seq, ViolationKind::NonCanonical));
        }

        let recomputed = hash_of_unhashed(value.clone()).map_err(|e| malformed(e.to_string()))?;
        let entry: AuditEntry =
            serde_json::from_value(value).map_err(|e| (seq, ViolationKind::Malformed { reason: e.to_string() }))?;

        walker.check(&entry, recomputed).map_err(|kind| (seq, kind))
    }
}
