//! Allocation statistics and memory budget.

use std::collections::BTreeMap;

/// Default fraction of the heap budget above which usage is reported.
pub const DEFAULT_BUDGET_WARNING_THRESHOLD: f32 = 0.9;

/// Live allocations in one memory type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryTypeStats {
    pub allocation_count: usize,
    pub bytes: u64,
}

/// Snapshot of allocator usage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AllocationStats {
    /// Bytes reserved in native memory blocks.
    pub total_bytes: u64,
    /// Bytes bound to live allocations.
    pub used_bytes: u64,
    /// Number of live allocations.
    pub allocation_count: usize,
    /// `1 - used / total`, zero when nothing is reserved.
    pub fragmentation_ratio: f32,
    /// Highest `used_bytes` since creation or the last reset.
    pub peak_used_bytes: u64,
    /// Number of native memory blocks.
    pub block_count: usize,
    /// Live allocations per memory type index.
    pub per_memory_type: BTreeMap<u32, MemoryTypeStats>,
}

/// Fraction of reserved memory not bound to any allocation.
pub fn fragmentation_ratio(used_bytes: u64, total_bytes: u64) -> f32 {
    if total_bytes == 0 {
        return 0.0;
    }
    let ratio = 1.0 - used_bytes as f64 / total_bytes as f64;
    ratio.clamp(0.0, 1.0) as f32
}

/// Memory budget across all heaps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MemoryBudget {
    pub total_bytes: u64,
    pub used_bytes: u64,
    pub usage_ratio: f32,
    /// Usage reached the warning threshold.
    pub over_budget: bool,
    pub threshold: f32,
}

impl MemoryBudget {
    pub fn new(total_bytes: u64, used_bytes: u64, threshold: f32) -> Self {
        let usage_ratio = if total_bytes == 0 {
            0.0
        } else {
            (used_bytes as f64 / total_bytes as f64) as f32
        };
        Self {
            total_bytes,
            used_bytes,
            usage_ratio,
            over_budget: total_bytes > 0 && usage_ratio >= threshold,
            threshold,
        }
    }
}

/// Whether a warning threshold lies in `(0, 1]`.
pub fn is_valid_threshold(threshold: f32) -> bool {
    threshold > 0.0 && threshold <= 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fragmentation_of_empty_allocator_is_zero() {
        assert_relative_eq!(fragmentation_ratio(0, 0), 0.0);
    }

    #[test]
    fn fragmentation_ratio_of_half_used_blocks() {
        assert_relative_eq!(fragmentation_ratio(512, 1024), 0.5);
        assert_relative_eq!(fragmentation_ratio(1024, 1024), 0.0);
        // Dedicated memory can make used exceed the block report.
        assert_relative_eq!(fragmentation_ratio(2048, 1024), 0.0);
    }

    #[test]
    fn budget_threshold() {
        let budget = MemoryBudget::new(1000, 899, DEFAULT_BUDGET_WARNING_THRESHOLD);
        assert!(!budget.over_budget);

        let budget = MemoryBudget::new(1000, 900, DEFAULT_BUDGET_WARNING_THRESHOLD);
        assert!(budget.over_budget);
        assert_relative_eq!(budget.usage_ratio, 0.9);

        let empty = MemoryBudget::new(0, 0, DEFAULT_BUDGET_WARNING_THRESHOLD);
        assert!(!empty.over_budget);
    }

    #[test]
    fn threshold_validation() {
        assert!(is_valid_threshold(0.5));
        assert!(is_valid_threshold(1.0));
        assert!(!is_valid_threshold(0.0));
        assert!(!is_valid_threshold(1.5));
        assert!(!is_valid_threshold(f32::NAN));
    }
}
