//! Whole-tree snapshot file format.
//!
//! Layout, little-endian throughout:
//!
//! - total_records: 8 bytes
//! - tree_height: 8 bytes
//! - record_count: 8 bytes
//! - record_count fixed-layout records ([`Record::WIRE_SIZE`] bytes each)
//!
//! A snapshot stores only the record sequence; structure is rebuilt on load
//! by batch insertion, so the stored height is informational.

use bytes::{Buf, BufMut, BytesMut};
use probedb_common::{ProbeError, Record, Result};
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tracing::info;

/// In-memory image of a snapshot file.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Record total recorded at save time.
    pub total_records: u64,
    /// Tree height recorded at save time.
    pub tree_height: u64,
    /// The full record sequence in id order.
    pub records: Vec<Record>,
}

impl Snapshot {
    /// Size of the snapshot header in bytes.
    pub const HEADER_SIZE: usize = 24;

    /// Serializes the snapshot to bytes.
    pub fn to_bytes(&self) -> BytesMut {
        let mut buf =
            BytesMut::with_capacity(Self::HEADER_SIZE + self.records.len() * Record::WIRE_SIZE);
        buf.put_u64_le(self.total_records);
        buf.put_u64_le(self.tree_height);
        buf.put_u64_le(self.records.len() as u64);
        for record in &self.records {
            buf.extend_from_slice(&record.to_bytes());
        }
        buf
    }

    /// Deserializes a snapshot from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < Self::HEADER_SIZE {
            return Err(ProbeError::SnapshotTruncated {
                expected: Self::HEADER_SIZE,
                actual: data.len(),
            });
        }

        let mut header = &data[..Self::HEADER_SIZE];
        let total_records = header.get_u64_le();
        let tree_height = header.get_u64_le();
        let record_count = header.get_u64_le();

        let record_count = usize::try_from(record_count).map_err(|_| {
            ProbeError::SnapshotCorrupted(format!("absurd record count: {}", record_count))
        })?;
        let body_size = record_count.checked_mul(Record::WIRE_SIZE).ok_or_else(|| {
            ProbeError::SnapshotCorrupted(format!("absurd record count: {}", record_count))
        })?;
        let expected = Self::HEADER_SIZE + body_size;
        if data.len() < expected {
            return Err(ProbeError::SnapshotTruncated {
                expected,
                actual: data.len(),
            });
        }

        let mut records = Vec::with_capacity(record_count);
        for chunk in data[Self::HEADER_SIZE..expected].chunks_exact(Record::WIRE_SIZE) {
            records.push(Record::from_bytes(chunk));
        }

        Ok(Self {
            total_records,
            tree_height,
            records,
        })
    }

    /// Writes the snapshot to a file, replacing any existing content.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let buf = self.to_bytes();
        let mut file = File::create(path)?;
        file.write_all(&buf)?;
        file.sync_all()?;
        info!(
            path = %path.display(),
            records = self.records.len(),
            "snapshot written"
        );
        Ok(())
    }

    /// Reads a snapshot from a file.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        let snapshot = Self::from_bytes(&data)?;
        info!(
            path = %path.display(),
            records = snapshot.records.len(),
            "snapshot loaded"
        );
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_snapshot(n: i64) -> Snapshot {
        Snapshot {
            total_records: n as u64,
            tree_height: 2,
            records: (0..n)
                .map(|id| Record::new(id, id as f64 * 1.5, (id % 4) as i32, 0, id))
                .collect(),
        }
    }

    #[test]
    fn test_header_size() {
        assert_eq!(Snapshot::HEADER_SIZE, 24);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let original = sample_snapshot(100);
        let bytes = original.to_bytes();
        assert_eq!(
            bytes.len(),
            Snapshot::HEADER_SIZE + 100 * Record::WIRE_SIZE
        );

        let recovered = Snapshot::from_bytes(&bytes).unwrap();
        assert_eq!(recovered.total_records, 100);
        assert_eq!(recovered.tree_height, 2);
        assert_eq!(recovered.records, original.records);
    }

    #[test]
    fn test_empty_snapshot_roundtrip() {
        let original = sample_snapshot(0);
        let recovered = Snapshot::from_bytes(&original.to_bytes()).unwrap();
        assert_eq!(recovered.total_records, 0);
        assert!(recovered.records.is_empty());
    }

    #[test]
    fn test_truncated_header_rejected() {
        let err = Snapshot::from_bytes(&[0u8; 10]).unwrap_err();
        assert!(matches!(err, ProbeError::SnapshotTruncated { .. }));
    }

    #[test]
    fn test_truncated_body_rejected() {
        let original = sample_snapshot(10);
        let bytes = original.to_bytes();
        let err = Snapshot::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, ProbeError::SnapshotTruncated { .. }));
    }

    #[test]
    fn test_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.snapshot");

        let original = sample_snapshot(500);
        original.write_to_file(&path).unwrap();

        let recovered = Snapshot::read_from_file(&path).unwrap();
        assert_eq!(recovered.total_records, original.total_records);
        assert_eq!(recovered.records, original.records);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Snapshot::read_from_file(&dir.path().join("nope")).unwrap_err();
        assert!(matches!(err, ProbeError::Io(_)));
    }
}
