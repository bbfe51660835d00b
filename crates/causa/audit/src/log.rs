//! The append-only log and its JSONL file sink.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use causa_crypto::to_canonical_bytes;
use tracing::debug;

use crate::entry::{AuditEntry, AuditEvent};
use crate::error::{AuditError, Result};
use crate::integrity::{ChainReport, IntegrityChain, IntegrityVerifier, VerifyOptions};

/// One canonical line per entry, flushed on every append.
#[derive(Debug)]
struct JsonlSink {
    path: PathBuf,
    file: File,
}

impl JsonlSink {
    fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            file,
        })
    }

    fn write(&mut self, entry: &AuditEntry) -> Result<()> {
        self.file.write_all(&encode_line(entry)?)?;
        self.file.flush()?;
        Ok(())
    }
}

/// Hash-chained, append-only audit log with a single writer.
#[derive(Debug)]
pub struct AuditLog {
    entries: Vec<AuditEntry>,
    chain: IntegrityChain,
    sink: Option<JsonlSink>,
}

impl AuditLog {
    pub fn in_memory() -> Self {
        Self {
            entries: Vec::new(),
            chain: IntegrityChain::new(),
            sink: None,
        }
    }

    /// Start a new log file at `path`, replacing any existing file.
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self {
            entries: Vec::new(),
            chain: IntegrityChain::new(),
            sink: Some(JsonlSink::create(path.as_ref())?),
        })
    }

    /// Append `event` at logical `tick` and return the written entry.
    pub fn append(&mut self, tick: u64, event: AuditEvent) -> Result<&AuditEntry> {
        if self.chain.is_sealed() {
            return Err(AuditError::Sealed);
        }
        let entry = AuditEntry::link(
            self.chain.next_seq(),
            tick,
            event,
            self.chain.previous_hash().to_string(),
        )?;
        if let Some(sink) = self.sink.as_mut() {
            sink.write(&entry)?;
        }
        self.chain.update(&entry);
        debug!(seq = entry.seq, tick, kind = entry.event.kind(), "audit entry appended");
        self.entries.push(entry);
        Ok(&self.entries[self.entries.len() - 1])
    }

    /// Close the session. Nothing can be appended afterwards.
    pub fn seal(&mut self, tick: u64) -> Result<&AuditEntry> {
        let entry_count = self.chain.entry_count();
        self.append(tick, AuditEvent::SessionSealed { entry_count })
    }

    pub fn is_sealed(&self) -> bool {
        self.chain.is_sealed()
    }

    pub fn entries(&self) -> &[AuditEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn head_hash(&self) -> &str {
        self.chain.previous_hash()
    }

    pub fn path(&self) -> Option<&Path> {
        self.sink.as_ref().map(|s| s.path.as_path())
    }

    pub fn verify(&self, options: VerifyOptions) -> Result<ChainReport> {
        IntegrityVerifier::verify_entries(&self.entries, options)
    }
}

/// Canonical bytes of `entry` followed by a newline.
pub fn encode_line(entry: &AuditEntry) -> Result<Vec<u8>> {
    let mut line = to_canonical_bytes(entry)?;
    line.push(b'\n');
    Ok(line)
}

/// Parse every line of a log file. Does not verify the chain; call
/// [`IntegrityVerifier::verify_file`] first.
pub fn read_entries(path: impl AsRef<Path>) -> Result<Vec<AuditEntry>> {
    let text = std::fs::read_to_string(path.as_ref())?;
    text.lines()
        .filter(|line| !line.is_empty())
        .map(|line| serde_json::from_str(line).map_err(AuditError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step(step: u64) -> AuditEvent {
        AuditEvent::StepStarted {
            step,
            salt_commitment: None,
        }
    }

    #[test]
    fn append_links_entries() {
        let mut log = AuditLog::in_memory();
        let first = log.append(0, step(0)).unwrap().entry_hash.clone();
        let second = log.append(1, step(1)).unwrap().clone();
        assert_eq!(second.prev_entry_hash, first);
        assert_eq!(second.seq, 1);
        assert_eq!(log.head_hash(), second.entry_hash);
    }

    #[test]
    fn sealed_log_rejects_appends() {
        let mut log = AuditLog::in_memory();
        log.append(0, step(0)).unwrap();
        log.seal(1).unwrap();
        assert!(log.is_sealed());
        assert!(matches!(log.append(2, step(2)), Err(AuditError::Sealed)));
        assert!(log.verify(VerifyOptions::sealed()).unwrap().valid);
    }

    #[test]
    fn file_sink_writes_verifiable_lines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let mut log = AuditLog::create(&path).unwrap();
        for i in 0..3 {
            log.append(i, step(i)).unwrap();
        }
        log.seal(3).unwrap();

        let report = IntegrityVerifier::verify_file(&path, VerifyOptions::sealed()).unwrap();
        assert!(report.valid, "{:?}", report.violation);
        assert_eq!(report.total_entries, 4);
        assert_eq!(read_entries(&path).unwrap(), log.entries());
    }
}
