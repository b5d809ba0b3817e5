//! Allocator configuration.

use super::pool::{DEFAULT_CUSTOM_POOL_SIZE, LARGE_BUFFER_SIZE, MEDIUM_BUFFER_SIZE};
use super::stats::DEFAULT_BUDGET_WARNING_THRESHOLD;
use bitflags::bitflags;
use gpu_allocator::AllocatorDebugSettings;

/// Pool selection heuristic for future allocations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AllocationStrategy {
    /// Dedicated memory above the large size class.
    #[default]
    Default,
    /// Always sub-allocate from blocks.
    SpeedOptimized,
    /// Dedicated memory above the medium size class.
    MemoryOptimized,
}

impl AllocationStrategy {
    /// Requirement size above which a resource gets its own memory object.
    pub fn dedicated_threshold(self) -> Option<u64> {
        match self {
            Self::Default => Some(LARGE_BUFFER_SIZE),
            Self::SpeedOptimized => None,
            Self::MemoryOptimized => Some(MEDIUM_BUFFER_SIZE),
        }
    }
}

bitflags! {
    /// Defragmentation algorithm selection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct DefragmentationFlags: u32 {
        const FAST = 1;
        const BALANCED = 1 << 1;
        const FULL = 1 << 2;
    }
}

impl DefragmentationFlags {
    /// Name of the algorithm these flags select; empty flags mean balanced.
    pub fn algorithm_name(self) -> &'static str {
        if self.contains(Self::FULL) {
            "Full"
        } else if self.contains(Self::FAST) {
            "Fast"
        } else {
            "Balanced"
        }
    }
}

/// Configuration for [`MemoryAllocator`](super::MemoryAllocator).
#[derive(Debug, Clone)]
pub struct AllocatorConfig {
    pub strategy: AllocationStrategy,
    /// Fraction of the heap budget above which usage is reported, in `(0, 1]`.
    pub budget_warning_threshold: f32,
    /// Alignment applied by `align_buffer_size` instead of the size-class defaults.
    pub custom_buffer_alignment: Option<u64>,
    /// Block size of dedicated pools; checked against device limits.
    pub custom_pool_size: u64,
    /// Assert on unknown-handle frees and invalid maps.
    pub strict_handle_checks: bool,
    /// Trace every allocation and free.
    pub log_allocations: bool,
    /// Debug settings forwarded to gpu-allocator.
    pub debug_settings: AllocatorDebugSettings,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            strategy: AllocationStrategy::Default,
            budget_warning_threshold: DEFAULT_BUDGET_WARNING_THRESHOLD,
            custom_buffer_alignment: None,
            custom_pool_size: DEFAULT_CUSTOM_POOL_SIZE,
            strict_handle_checks: cfg!(debug_assertions),
            log_allocations: false,
            debug_settings: AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: cfg!(debug_assertions),
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
        }
    }
}

impl AllocatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(mut self, strategy: AllocationStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn with_budget_warning_threshold(mut self, threshold: f32) -> Self {
        self.budget_warning_threshold = threshold;
        self
    }

    pub fn with_buffer_alignment(mut self, alignment: u64) -> Self {
        self.custom_buffer_alignment = Some(alignment);
        self
    }

    pub fn with_custom_pool_size(mut self, size: u64) -> Self {
        self.custom_pool_size = size;
        self
    }

    pub fn with_strict_handle_checks(mut self, strict: bool) -> Self {
        self.strict_handle_checks = strict;
        self
    }

    pub fn with_allocation_logging(mut self, enabled: bool) -> Self {
        self.log_allocations = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_thresholds() {
        assert_eq!(
            AllocationStrategy::Default.dedicated_threshold(),
            Some(LARGE_BUFFER_SIZE)
        );
        assert_eq!(AllocationStrategy::SpeedOptimized.dedicated_threshold(), None);
        assert_eq!(
            AllocationStrategy::MemoryOptimized.dedicated_threshold(),
            Some(MEDIUM_BUFFER_SIZE)
        );
    }

    #[test]
    fn defragmentation_algorithm_names() {
        assert_eq!(DefragmentationFlags::empty().algorithm_name(), "Balanced");
        assert_eq!(DefragmentationFlags::FAST.algorithm_name(), "Fast");
        assert_eq!(DefragmentationFlags::BALANCED.algorithm_name(), "Balanced");
        assert_eq!(
            (DefragmentationFlags::FAST | DefragmentationFlags::FULL).algorithm_name(),
            "Full"
        );
    }
}
