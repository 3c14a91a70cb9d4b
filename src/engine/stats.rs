// Batch aggregation: counts and byte totals over one submitted batch.

use serde::Serialize;

use super::orchestrator::BatchItemResult;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchTotals {
    pub total_processed: usize,
    pub total_successful: usize,
    pub total_errors: usize,
    pub total_original_size: u64,
    pub total_compressed_size: u64,
    /// Percentage, rounded to two decimals.
    pub total_savings: f64,
}

/// Accumulates item results. Owned by a single batch; no sharing.
#[derive(Debug, Default)]
pub struct BatchStats {
    processed: usize,
    successful: usize,
    errors: usize,
    original_bytes: u64,
    compressed_bytes: u64,
}

impl BatchStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes only count for successful items.
    pub fn record(&mut self, item: &BatchItemResult) {
        self.processed += 1;
        if item.success {
            self.successful += 1;
            self.original_bytes += item.original_size;
            self.compressed_bytes += item.compressed_size;
        } else {
            self.errors += 1;
        }
    }

    pub fn snapshot(&self) -> BatchTotals {
        BatchTotals {
            total_processed: self.processed,
            total_successful: self.successful,
            total_errors: self.errors,
            total_original_size: self.original_bytes,
            total_compressed_size: self.compressed_bytes,
            total_savings: savings_percent(self.original_bytes, self.compressed_bytes),
        }
    }
}

/// `100 * (1 - compressed/original)` rounded to two decimals, zero for no input.
pub fn savings_percent(original: u64, compressed: u64) -> f64 {
    if original == 0 {
        return 0.0;
    }
    let pct = 100.0 * (1.0 - compressed as f64 / original as f64);
    (pct * 100.0).round() / 100.0
}
