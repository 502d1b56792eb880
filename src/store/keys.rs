//! Key layout and encoding utilities for the migration store partitions.
//!
//! Partition structure:
//! - `jobs`: job:{id:016} -> MigrationJob (JSON)
//! - `items`: item:{id:016} -> MigrationItem (JSON)
//!           byjob:{job_id:016}:{item_id:016} -> item id (u64 BE)
//!           doc:{job_id:016}:{uuid} -> item id (u64 BE, uniqueness guard)
//! - `outbox`: evt:{id:016} -> OutboxEvent (JSON)
//!           idem:{key} -> event id (u64 BE, uniqueness guard)
//!           byjob:{job_id:016}:{event_id:016} -> event id (u64 BE)
//! - `metadata`: seq:{name} -> next sequence value (u64 BE)
//!
//! Zero-padded decimal ids keep lexicographic partition order equal to
//! insertion order, so prefix scans walk rows oldest first.

use crate::ids::DocumentUuid;

/// Encode a job key: job:{id:016}
pub fn encode_job_key(id: u64) -> Vec<u8> {
    format!("job:{:016}", id).into_bytes()
}

/// Encode an item key: item:{id:016}
pub fn encode_item_key(id: u64) -> Vec<u8> {
    format!("item:{:016}", id).into_bytes()
}

/// Encode an event key: evt:{id:016}
pub fn encode_event_key(id: u64) -> Vec<u8> {
    format!("evt:{:016}", id).into_bytes()
}

/// Encode a per-job secondary index key: byjob:{job_id:016}:{row_id:016}
pub fn encode_byjob_key(job_id: u64, row_id: u64) -> Vec<u8> {
    format!("byjob:{:016}:{:016}", job_id, row_id).into_bytes()
}

/// Encode a per-job index prefix for range scans: byjob:{job_id:016}:
pub fn encode_byjob_prefix(job_id: u64) -> Vec<u8> {
    format!("byjob:{:016}:", job_id).into_bytes()
}

/// Encode the (job, document) uniqueness key: doc:{job_id:016}:{uuid}
pub fn encode_doc_key(job_id: u64, uuid: DocumentUuid) -> Vec<u8> {
    format!("doc:{:016}:{}", job_id, uuid).into_bytes()
}

/// Encode an idempotency key row: idem:{key}
pub fn encode_idem_key(key: &str) -> Vec<u8> {
    format!("idem:{}", key).into_bytes()
}

/// Encode a sequence counter key: seq:{name}
pub fn encode_seq_key(name: &str) -> Vec<u8> {
    format!("seq:{}", name).into_bytes()
}

/// Decode a u64 row reference stored as big-endian bytes.
pub fn decode_row_ref(value: &[u8]) -> Option<u64> {
    Some(u64::from_be_bytes(value.try_into().ok()?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_key_encoding() {
        assert_eq!(encode_job_key(42), b"job:0000000000000042");
    }

    #[test]
    fn test_event_key_encoding() {
        assert_eq!(encode_event_key(7), b"evt:0000000000000007");
    }

    #[test]
    fn test_byjob_prefix_matches_keys() {
        let prefix = encode_byjob_prefix(3);
        let key = encode_byjob_key(3, 99);
        assert!(key.starts_with(&prefix));

        let other = encode_byjob_key(4, 99);
        assert!(!other.starts_with(&prefix));
    }

    #[test]
    fn test_key_order_follows_id_order() {
        assert!(encode_event_key(9) < encode_event_key(10));
        assert!(encode_item_key(99) < encode_item_key(100));
    }

    #[test]
    fn test_doc_key_contains_uuid() {
        let uuid = DocumentUuid::new();
        let key = encode_doc_key(1, uuid);
        let key_str = String::from_utf8(key).unwrap();
        assert!(key_str.ends_with(&uuid.to_string()));
    }

    #[test]
    fn test_row_ref_roundtrip() {
        let bytes = 123u64.to_be_bytes();
        assert_eq!(decode_row_ref(&bytes), Some(123));
        assert_eq!(decode_row_ref(b"short"), None);
    }
}
