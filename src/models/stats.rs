use serde::Serialize;

/// Deduplication statistics, system-wide or restricted to one user's records.
///
/// `total_storage_bytes` is the hypothetical non-deduplicated size: every
/// record charged the full size of the blob it references.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupStats {
    pub unique_files: i64,
    pub total_files: i64,
    pub unique_storage_bytes: i64,
    pub total_storage_bytes: i64,
    pub savings_bytes: i64,
    pub savings_percentage: f64,
}

impl DedupStats {
    pub fn from_counts(
        unique_files: i64,
        total_files: i64,
        unique_storage_bytes: i64,
        total_storage_bytes: i64,
    ) -> Self {
        let savings_bytes = total_storage_bytes - unique_storage_bytes;
        let savings_percentage = if total_storage_bytes > 0 {
            savings_bytes as f64 / total_storage_bytes as f64 * 100.0
        } else {
            0.0
        };

        Self {
            unique_files,
            total_files,
            unique_storage_bytes,
            total_storage_bytes,
            savings_bytes,
            savings_percentage,
        }
    }
}
