//! The fixed-schema record type stored in the tree.

use serde::{Deserialize, Serialize};

/// A single row of the dataset.
///
/// Records are totally ordered by `id` and never mutated after insertion.
/// The wire layout is fixed-size little-endian, packed without padding:
///
/// - id: 8 bytes
/// - amount: 8 bytes (IEEE-754 bits)
/// - region: 4 bytes
/// - product_id: 4 bytes
/// - timestamp: 8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Primary key; defines the total order of the dataset.
    pub id: i64,
    /// The numeric measure that aggregates operate on.
    pub amount: f64,
    /// Region dimension.
    pub region: i32,
    /// Product dimension.
    pub product_id: i32,
    /// Event timestamp (seconds or millis, opaque to the engine).
    pub timestamp: i64,
}

impl Record {
    /// Size of a record on the wire in bytes.
    pub const WIRE_SIZE: usize = 32;

    /// Creates a new record.
    pub fn new(id: i64, amount: f64, region: i32, product_id: i32, timestamp: i64) -> Self {
        Self {
            id,
            amount,
            region,
            product_id,
            timestamp,
        }
    }

    /// Serializes the record to its wire layout.
    pub fn to_bytes(&self) -> [u8; Self::WIRE_SIZE] {
        let mut buf = [0u8; Self::WIRE_SIZE];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..16].copy_from_slice(&self.amount.to_le_bytes());
        buf[16..20].copy_from_slice(&self.region.to_le_bytes());
        buf[20..24].copy_from_slice(&self.product_id.to_le_bytes());
        buf[24..32].copy_from_slice(&self.timestamp.to_le_bytes());
        buf
    }

    /// Deserializes a record from its wire layout.
    ///
    /// The slice must hold at least [`Record::WIRE_SIZE`] bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        let id = i64::from_le_bytes([
            buf[0], buf[1], buf[2], buf[3], buf[4], buf[5], buf[6], buf[7],
        ]);
        let amount = f64::from_le_bytes([
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);
        let region = i32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let product_id = i32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]);
        let timestamp = i64::from_le_bytes([
            buf[24], buf[25], buf[26], buf[27], buf[28], buf[29], buf[30], buf[31],
        ]);

        Self {
            id,
            amount,
            region,
            product_id,
            timestamp,
        }
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new(0, 0.0, 0, 0, 0)
    }
}
