//! Shared progress-tracking shapes for downloads, exports, and peer
//! transfers (spec.md §3 `TransferProgress`/`DownloadProgress`/`ExportProgress`,
//! §4.8 progress registry).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TransferStatus {
    Pending,
    Transferring,
    Complete,
    Failed,
}

/// One in-flight or completed transfer, keyed externally by operation id
/// (download/export) or `(peer_id, artifact)` (peer pull).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferProgress {
    pub total_bytes: u64,
    pub bytes_transferred: u64,
    pub status: TransferStatus,
    pub error: Option<String>,
}

impl TransferProgress {
    pub fn pending(total_bytes: u64) -> Self {
        TransferProgress { total_bytes, bytes_transferred: 0, status: TransferStatus::Pending, error: None }
    }

    /// Advances `bytes_transferred` monotonically; a writer publishing a
    /// smaller count than the current snapshot is a bug upstream, not
    /// something this type silently tolerates.
    pub fn advance(&mut self, bytes_transferred: u64) {
        debug_assert!(bytes_transferred >= self.bytes_transferred);
        self.bytes_transferred = self.bytes_transferred.max(bytes_transferred);
        if self.status == TransferStatus::Pending {
            self.status = TransferStatus::Transferring;
        }
    }

    pub fn complete(&mut self) {
        self.status = TransferStatus::Complete;
        self.bytes_transferred = self.total_bytes;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = TransferStatus::Failed;
        self.error = Some(error.into());
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, TransferStatus::Complete | TransferStatus::Failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advance_moves_to_transferring() {
        let mut p = TransferProgress::pending(100);
        p.advance(10);
        assert_eq!(p.status, TransferStatus::Transferring);
        assert_eq!(p.bytes_transferred, 10);
    }

    #[test]
    fn advance_never_regresses() {
        let mut p = TransferProgress::pending(100);
        p.advance(50);
        p.advance(20);
        assert_eq!(p.bytes_transferred, 50);
    }

    #[test]
    fn complete_sets_bytes_to_total() {
        let mut p = TransferProgress::pending(100);
        p.advance(40);
        p.complete();
        assert_eq!(p.bytes_transferred, 100);
        assert!(p.is_terminal());
    }

    #[test]
    fn fail_records_error_and_is_terminal() {
        let mut p = TransferProgress::pending(100);
        p.fail("peer unreachable");
        assert!(p.is_terminal());
        assert_eq!(p.error.as_deref(), Some("peer unreachable"));
    }
}
