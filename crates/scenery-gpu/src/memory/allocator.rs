//! Tracking GPU memory allocator.

use super::backend::{AllocationHandle, AllocationRequest, BoundMemory, DefragmentationStats, MemoryBackend};
use super::config::{AllocationStrategy, AllocatorConfig, DefragmentationFlags};
use super::pool::{
    AllocationKind, MemoryPool, PoolKey, SizeClass, DEFAULT_CUSTOM_POOL_SIZE, LARGE_BUFFER_SIZE,
    SMALL_BUFFER_SIZE,
};
use super::stats::{
    fragmentation_ratio, is_valid_threshold, AllocationStats, MemoryBudget, MemoryTypeStats,
    DEFAULT_BUDGET_WARNING_THRESHOLD,
};
use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::MemoryLocation;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tracing::{debug, error, info, trace, warn};

/// Native resource behind a tracked allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackedResource {
    Buffer(vk::Buffer),
    Image(vk::Image),
}

impl TrackedResource {
    fn kind(self) -> AllocationKind {
        match self {
            Self::Buffer(_) => AllocationKind::Buffer,
            Self::Image(_) => AllocationKind::Image,
        }
    }
}

/// Bookkeeping for one live allocation.
#[derive(Debug, Clone)]
pub struct AllocInfo {
    /// Bytes bound to the resource.
    pub size: u64,
    pub kind: AllocationKind,
    pub resource: TrackedResource,
    pub pool: PoolKey,
    pub memory_type_index: u32,
    pub host_visible: bool,
    pub name: String,
    map_count: u32,
}

/// A buffer with bound memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferAllocation {
    pub handle: AllocationHandle,
    pub buffer: vk::Buffer,
    /// Requested size.
    pub size: u64,
    /// Bytes actually bound.
    pub allocated_size: u64,
    pub alignment: u64,
}

/// An image with bound memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageAllocation {
    pub handle: AllocationHandle,
    pub image: vk::Image,
    /// Bytes actually bound, including alignment padding.
    pub allocated_size: u64,
}

/// One entry produced by [`MemoryAllocator::allocate_buffer_batch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchBufferAllocation {
    pub handle: AllocationHandle,
    pub buffer: vk::Buffer,
    /// Size after `align_buffer_size`.
    pub size: u64,
}

#[derive(Debug, Clone, Copy)]
struct Settings {
    strategy: AllocationStrategy,
    budget_warning_threshold: f32,
    custom_buffer_alignment: Option<u64>,
    custom_pool_size: u64,
}

struct DefragSession {
    flags: DefragmentationFlags,
    candidates: Vec<AllocationHandle>,
}

/// Single point of truth for GPU memory allocation, tracking and reclamation.
///
/// The allocator is shared through `Arc` and may be called from any thread.
/// The tracking map and the pool map sit behind separate locks; when both the
/// tracking map and the backend are needed they are locked in that order.
pub struct MemoryAllocator {
    backend: Mutex<Box<dyn MemoryBackend>>,
    allocations: Mutex<HashMap<AllocationHandle, AllocInfo>>,
    pools: Mutex<HashMap<PoolKey, MemoryPool>>,
    settings: RwLock<Settings>,
    defrag: Mutex<Option<DefragSession>>,
    next_handle: AtomicU64,
    used_bytes: AtomicU64,
    peak_used_bytes: AtomicU64,
    strict_handle_checks: bool,
    log_allocations: bool,
    shut_down: AtomicBool,
}

impl MemoryAllocator {
    /// Create an allocator over a native backend.
    pub fn new(backend: Box<dyn MemoryBackend>, config: AllocatorConfig) -> Self {
        let threshold = if is_valid_threshold(config.budget_warning_threshold) {
            config.budget_warning_threshold
        } else {
            warn!(
                threshold = config.budget_warning_threshold,
                "Invalid memory budget warning threshold, using {DEFAULT_BUDGET_WARNING_THRESHOLD}"
            );
            DEFAULT_BUDGET_WARNING_THRESHOLD
        };

        let custom_pool_size = match backend.limits().block_size_violation(config.custom_pool_size) {
            None => config.custom_pool_size,
            Some(reason) => {
                warn!("Invalid custom pool size ({reason}), using {DEFAULT_CUSTOM_POOL_SIZE}");
                DEFAULT_CUSTOM_POOL_SIZE
            }
        };

        info!(
            backend = backend.name(),
            strategy = ?config.strategy,
            "Memory allocator initialized"
        );

        Self {
            backend: Mutex::new(backend),
            allocations: Mutex::new(HashMap::new()),
            pools: Mutex::new(HashMap::new()),
            settings: RwLock::new(Settings {
                strategy: config.strategy,
                budget_warning_threshold: threshold,
                custom_buffer_alignment: config
                    .custom_buffer_alignment
                    .filter(|&a| a > 0)
                    .map(u64::next_power_of_two),
                custom_pool_size,
            }),
            defrag: Mutex::new(None),
            next_handle: AtomicU64::new(1),
            used_bytes: AtomicU64::new(0),
            peak_used_bytes: AtomicU64::new(0),
            strict_handle_checks: config.strict_handle_checks,
            log_allocations: config.log_allocations,
            shut_down: AtomicBool::new(false),
        }
    }

    fn next_handle(&self) -> AllocationHandle {
        let raw = self.next_handle.fetch_add(1, Ordering::Relaxed);
        // Starts at 1 and a u64 counter does not wrap in practice.
        AllocationHandle::from_raw(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::Acquire) {
            return Err(GpuError::InvalidState(
                "Memory allocator has been shut down".to_string(),
            ));
        }
        Ok(())
    }

    fn request<'a>(&self, name: &'a str, location: MemoryLocation, kind: AllocationKind) -> AllocationRequest<'a> {
        let settings = *self.settings.read();
        let min_alignment = match kind {
            AllocationKind::Buffer => settings.custom_buffer_alignment.unwrap_or(1),
            AllocationKind::Image => 1,
        };
        AllocationRequest {
            name,
            location,
            dedicated_threshold: settings.strategy.dedicated_threshold(),
            min_alignment,
        }
    }

    /// Create a buffer and bind memory from the matching pool.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn allocate_buffer(
        &self,
        info: &vk::BufferCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<BufferAllocation> {
        self.ensure_running()?;
        let request = self.request(name, location, AllocationKind::Buffer);
        let handle = self.next_handle();

        let created = self.backend.lock().create_buffer(handle, info, &request);
        let (buffer, bound) = created.map_err(|err| {
            error!(name, size = info.size, "Failed to allocate buffer: {err}");
            err
        })?;

        self.track(
            handle,
            TrackedResource::Buffer(buffer),
            &bound,
            location,
            name,
        );

        Ok(BufferAllocation {
            handle,
            buffer,
            size: info.size,
            allocated_size: bound.size,
            alignment: bound.alignment,
        })
    }

    /// Create an image and bind memory to it.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn allocate_image(
        &self,
        info: &vk::ImageCreateInfo<'_>,
        location: MemoryLocation,
        name: &str,
    ) -> Result<ImageAllocation> {
        self.ensure_running()?;
        let request = self.request(name, location, AllocationKind::Image);
        let handle = self.next_handle();

        let created = self.backend.lock().create_image(handle, info, &request);
        let (image, bound) = created.map_err(|err| {
            error!(
                name,
                width = info.extent.width,
                height = info.extent.height,
                "Failed to allocate image: {err}"
            );
            err
        })?;

        self.track(handle, TrackedResource::Image(image), &bound, location, name);

        Ok(ImageAllocation {
            handle,
            image,
            allocated_size: bound.size,
        })
    }

    fn track(
        &self,
        handle: AllocationHandle,
        resource: TrackedResource,
        bound: &BoundMemory,
        location: MemoryLocation,
        name: &str,
    ) {
        let pool = PoolKey::new(resource.kind(), SizeClass::for_bound(bound), location);
        {
            let mut allocations = self.allocations.lock();
            allocations.insert(handle, self.alloc_info(resource, bound, pool, name));
            self.add_used(bound.size);
        }
        self.record_in_pools(std::iter::once((pool, *bound)));

        if self.log_allocations {
            trace!(%handle, name, size = bound.size, pool = %pool, "Allocated");
        }
    }

    fn alloc_info(&self, resource: TrackedResource, bound: &BoundMemory, pool: PoolKey, name: &str) -> AllocInfo {
        AllocInfo {
            size: bound.size,
            kind: resource.kind(),
            resource,
            pool,
            memory_type_index: bound.memory_type_index,
            host_visible: bound.host_visible,
            name: name.to_string(),
            map_count: 0,
        }
    }

    fn add_used(&self, size: u64) {
        let used = self.used_bytes.fetch_add(size, Ordering::AcqRel) + size;
        self.peak_used_bytes.fetch_max(used, Ordering::AcqRel);
    }

    fn record_in_pools(&self, entries: impl IntoIterator<Item = (PoolKey, BoundMemory)>) {
        let custom_pool_size = self.custom_pool_size();
        let mut pools = self.pools.lock();
        for (key, bound) in entries {
            pools
                .entry(key)
                .or_insert_with(|| {
                    let pool = match key.class {
                        SizeClass::Dedicated => MemoryPool::new(key).with_block_size(custom_pool_size),
                        _ => MemoryPool::new(key),
                    };
                    debug!(pool = %key, block_size = pool.block_size(), "Created memory pool");
                    pool
                })
                .record_allocation(&bound);
        }
    }

    fn release_from_pools(&self, entries: impl IntoIterator<Item = (PoolKey, u64)>) {
        let mut pools = self.pools.lock();
        for (key, size) in entries {
            if let Some(pool) = pools.get_mut(&key) {
                pool.record_free(size);
            }
        }
    }

    fn unknown_handle(&self, handle: AllocationHandle, operation: &str) -> GpuError {
        error!(%handle, "{operation} called with an untracked allocation handle");
        debug_assert!(
            !self.strict_handle_checks,
            "{operation} called with untracked allocation handle {handle}"
        );
        GpuError::UnknownAllocation(handle.raw())
    }

    /// Remove a tracking entry and destroy its resource and memory.
    ///
    /// The entry is removed and the memory released while the tracking map is locked.
    fn release(
        &self,
        handle: AllocationHandle,
        expected: Option<TrackedResource>,
        operation: &str,
    ) -> Result<()> {
        let (info, result) = {
            let mut allocations = self.allocations.lock();
            let Some(info) = allocations.remove(&handle) else {
                return Err(self.unknown_handle(handle, operation));
            };
            if let Some(expected) = expected {
                if expected != info.resource {
                    error!(
                        %handle,
                        ?expected,
                        tracked = ?info.resource,
                        "{operation} resource does not match the tracked resource, destroying the tracked one"
                    );
                }
            }
            if info.map_count > 0 {
                warn!(%handle, name = %info.name, "Freeing allocation that is still mapped");
            }

            let mut backend = self.backend.lock();
            let result = match info.resource {
                TrackedResource::Buffer(buffer) => backend.destroy_buffer(handle, buffer),
                TrackedResource::Image(image) => backend.destroy_image(handle, image),
            };
            self.used_bytes.fetch_sub(info.size, Ordering::AcqRel);
            (info, result)
        };

        self.release_from_pools(std::iter::once((info.pool, info.size)));

        if self.log_allocations {
            trace!(%handle, name = %info.name, size = info.size, "Freed");
        }
        result
    }

    /// Free an allocation and the resource bound to it.
    pub fn free(&self, handle: AllocationHandle) -> Result<()> {
        self.release(handle, None, "free")
    }

    /// Destroy a buffer created by [`allocate_buffer`](Self::allocate_buffer).
    pub fn destroy_buffer(&self, buffer: vk::Buffer, handle: AllocationHandle) -> Result<()> {
        self.release(handle, Some(TrackedResource::Buffer(buffer)), "destroy_buffer")
    }

    /// Destroy an image created by [`allocate_image`](Self::allocate_image).
    pub fn destroy_image(&self, image: vk::Image, handle: AllocationHandle) -> Result<()> {
        self.release(handle, Some(TrackedResource::Image(image)), "destroy_image")
    }

    /// Map a host-visible allocation.
    ///
    /// Allocations stay persistently mapped; this call hands out the pointer
    /// and counts outstanding maps so frees of mapped memory can be reported.
    pub fn map_memory<T>(&self, handle: AllocationHandle) -> Result<NonNull<T>> {
        let mut allocations = self.allocations.lock();
        let Some(info) = allocations.get_mut(&handle) else {
            return Err(self.unknown_handle(handle, "map_memory"));
        };

        if !info.host_visible {
            error!(%handle, name = %info.name, "Cannot map memory that is not host visible");
            debug_assert!(
                !self.strict_handle_checks,
                "map_memory on device-local allocation {handle}"
            );
            return Err(GpuError::InvalidState(format!(
                "allocation {handle} is not host visible"
            )));
        }

        let ptr = self
            .backend
            .lock()
            .mapped_ptr(handle)
            .ok_or_else(|| GpuError::InvalidState(format!("allocation {handle} has no mapping")))?;
        info.map_count += 1;
        Ok(ptr.cast())
    }

    /// Release a mapping obtained from [`map_memory`](Self::map_memory).
    pub fn unmap_memory(&self, handle: AllocationHandle) {
        let mut allocations = self.allocations.lock();
        match allocations.get_mut(&handle) {
            Some(info) if info.map_count > 0 => info.map_count -= 1,
            Some(info) => warn!(%handle, name = %info.name, "unmap_memory without a matching map"),
            None => {
                let _ = self.unknown_handle(handle, "unmap_memory");
            }
        }
    }

    /// Persistent host pointer of an allocation, without counting a map.
    pub fn mapped_ptr(&self, handle: AllocationHandle) -> Option<NonNull<u8>> {
        let allocations = self.allocations.lock();
        let info = allocations.get(&handle)?;
        if !info.host_visible {
            return None;
        }
        self.backend.lock().mapped_ptr(handle)
    }

    /// Create many buffers of the same usage in one call.
    ///
    /// Each size is passed through [`align_buffer_size`](Self::align_buffer_size);
    /// zero sizes and failed creations are logged and left out of the result.
    pub fn allocate_buffer_batch(
        &self,
        sizes: &[u64],
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Vec<BatchBufferAllocation> {
        if let Err(err) = self.ensure_running() {
            error!("Failed to allocate buffer batch: {err}");
            return Vec::new();
        }

        let aligned: Vec<(usize, u64)> = sizes
            .iter()
            .enumerate()
            .filter_map(|(index, &size)| {
                if size == 0 {
                    warn!(index, "Skipping zero-sized buffer in batch");
                    None
                } else {
                    Some((index, self.align_buffer_size(size)))
                }
            })
            .collect();

        let request = self.request("batch buffer", location, AllocationKind::Buffer);
        let mut created = Vec::with_capacity(aligned.len());
        {
            let mut backend = self.backend.lock();
            for &(index, size) in &aligned {
                let info = vk::BufferCreateInfo::default()
                    .size(size)
                    .usage(usage)
                    .sharing_mode(vk::SharingMode::EXCLUSIVE);
                let handle = self.next_handle();
                match backend.create_buffer(handle, &info, &request) {
                    Ok((buffer, bound)) => created.push((handle, buffer, bound, size)),
                    Err(err) => error!(index, size, "Failed to allocate batch buffer: {err}"),
                }
            }
        }

        let mut pool_entries = Vec::with_capacity(created.len());
        {
            let mut allocations = self.allocations.lock();
            for &(handle, buffer, bound, _) in &created {
                let resource = TrackedResource::Buffer(buffer);
                let pool = PoolKey::new(AllocationKind::Buffer, SizeClass::for_bound(&bound), location);
                allocations.insert(handle, self.alloc_info(resource, &bound, pool, "batch buffer"));
                self.add_used(bound.size);
                pool_entries.push((pool, bound));
            }
        }
        self.record_in_pools(pool_entries);

        let total: u64 = created.iter().map(|&(_, _, _, size)| size).sum();
        debug!(count = created.len(), requested = sizes.len(), total, "Allocated buffer batch");

        created
            .into_iter()
            .map(|(handle, buffer, _, size)| BatchBufferAllocation { handle, buffer, size })
            .collect()
    }

    /// Free buffers produced by [`allocate_buffer_batch`](Self::allocate_buffer_batch).
    pub fn free_buffer_batch(&self, batch: &[BatchBufferAllocation]) {
        let mut released = Vec::with_capacity(batch.len());
        {
            let mut allocations = self.allocations.lock();
            let mut backend = self.backend.lock();
            for entry in batch {
                if entry.buffer == vk::Buffer::null() {
                    continue;
                }
                let Some(info) = allocations.remove(&entry.handle) else {
                    let _ = self.unknown_handle(entry.handle, "free_buffer_batch");
                    continue;
                };
                let result = match info.resource {
                    TrackedResource::Buffer(buffer) => backend.destroy_buffer(entry.handle, buffer),
                    TrackedResource::Image(image) => backend.destroy_image(entry.handle, image),
                };
                if let Err(err) = result {
                    error!(handle = %entry.handle, "Failed to free batch buffer: {err}");
                }
                self.used_bytes.fetch_sub(info.size, Ordering::AcqRel);
                released.push((info.pool, info.size));
            }
        }
        debug!(count = released.len(), "Freed buffer batch");
        self.release_from_pools(released);
    }

    /// Round a buffer size to the configured or size-class alignment.
    ///
    /// Without a custom alignment: sizes below 256 KiB round up to 256 bytes,
    /// sizes below 16 MiB round up to 4 KiB, larger sizes are left alone.
    pub fn align_buffer_size(&self, size: u64) -> u64 {
        let alignment = match self.settings.read().custom_buffer_alignment {
            Some(alignment) => alignment,
            None if size < SMALL_BUFFER_SIZE => 256,
            None if size < LARGE_BUFFER_SIZE => 4096,
            None => return size,
        };
        size.div_ceil(alignment) * alignment
    }

    /// Set a custom buffer alignment, rounded up to a power of two. Zero clears it.
    pub fn set_buffer_alignment(&self, alignment: u64) {
        let alignment = (alignment > 0).then(|| alignment.next_power_of_two());
        self.settings.write().custom_buffer_alignment = alignment;
        debug!(?alignment, "Buffer alignment updated");
    }

    /// Custom buffer alignment, if one is set.
    pub fn buffer_alignment(&self) -> Option<u64> {
        self.settings.read().custom_buffer_alignment
    }

    /// Block size of dedicated pools.
    pub fn custom_pool_size(&self) -> u64 {
        self.settings.read().custom_pool_size
    }

    /// Change the block size of dedicated pools.
    ///
    /// Returns `false` and keeps the current size when `size` is zero, exceeds
    /// the device's allocation limit or largest heap, or is not a multiple of
    /// the storage buffer offset alignment.
    pub fn set_custom_pool_size(&self, size: u64) -> bool {
        let limits = self.backend.lock().limits();
        if let Some(reason) = limits.block_size_violation(size) {
            warn!("Rejected custom pool size: {reason}");
            return false;
        }

        self.settings.write().custom_pool_size = size;
        for pool in self.pools.lock().values_mut() {
            if pool.key().class == SizeClass::Dedicated {
                pool.set_block_size(size);
            }
        }
        debug!(size, "Custom pool size updated");
        true
    }

    /// Switch the pool selection heuristic for future allocations.
    pub fn set_allocation_strategy(&self, strategy: AllocationStrategy) {
        self.settings.write().strategy = strategy;
        info!(?strategy, "Allocation strategy changed");
    }

    pub fn allocation_strategy(&self) -> AllocationStrategy {
        self.settings.read().strategy
    }

    /// Set the budget warning threshold; values outside `(0, 1]` fall back to the default.
    pub fn set_memory_usage_warning_threshold(&self, threshold: f32) {
        let threshold = if is_valid_threshold(threshold) {
            threshold
        } else {
            warn!(
                threshold,
                "Invalid memory budget warning threshold, using {DEFAULT_BUDGET_WARNING_THRESHOLD}"
            );
            DEFAULT_BUDGET_WARNING_THRESHOLD
        };
        self.settings.write().budget_warning_threshold = threshold;
    }

    pub fn memory_usage_warning_threshold(&self) -> f32 {
        self.settings.read().budget_warning_threshold
    }

    /// Consistent snapshot of allocator usage.
    pub fn stats(&self) -> AllocationStats {
        let allocations = self.allocations.lock();
        let report = self.backend.lock().report();

        let mut used_bytes = 0;
        let mut per_memory_type = std::collections::BTreeMap::new();
        for info in allocations.values() {
            used_bytes += info.size;
            let entry: &mut MemoryTypeStats = per_memory_type.entry(info.memory_type_index).or_default();
            entry.allocation_count += 1;
            entry.bytes += info.size;
        }

        AllocationStats {
            total_bytes: report.reserved_bytes,
            used_bytes,
            allocation_count: allocations.len(),
            fragmentation_ratio: fragmentation_ratio(used_bytes, report.reserved_bytes),
            peak_used_bytes: self.peak_used_bytes.load(Ordering::Acquire),
            block_count: report.block_count,
            per_memory_type,
        }
    }

    /// Heap usage against the warning threshold. Only reports, never blocks.
    pub fn memory_budget(&self) -> MemoryBudget {
        let heaps = self.backend.lock().heap_budgets();
        let total = heaps.iter().map(|heap| heap.budget).sum();
        let used = heaps.iter().map(|heap| heap.usage).sum();
        let budget = MemoryBudget::new(total, used, self.memory_usage_warning_threshold());

        if budget.over_budget {
            warn!(
                used = budget.used_bytes,
                total = budget.total_bytes,
                "GPU memory usage at {:.1}% of budget",
                budget.usage_ratio * 100.0
            );
        }
        budget
    }

    /// Reset the peak usage to the current usage.
    pub fn reset_stats(&self) {
        let used = self.used_bytes.load(Ordering::Acquire);
        self.peak_used_bytes.store(used, Ordering::Release);
        for pool in self.pools.lock().values_mut() {
            pool.reset_peak();
        }
        debug!("Allocator statistics reset");
    }

    /// Snapshot of every pool created so far.
    pub fn pools(&self) -> Vec<MemoryPool> {
        let mut pools: Vec<_> = self.pools.lock().values().cloned().collect();
        pools.sort_by_key(|pool| (pool.key().class, pool.key().kind as u8));
        pools
    }

    /// Whether the handle is tracked.
    pub fn contains(&self, handle: AllocationHandle) -> bool {
        self.allocations.lock().contains_key(&handle)
    }

    /// Bookkeeping of a tracked allocation.
    pub fn allocation_info(&self, handle: AllocationHandle) -> Option<AllocInfo> {
        self.allocations.lock().get(&handle).cloned()
    }

    /// Every outstanding handle, sorted.
    pub fn live_allocations(&self) -> Vec<AllocationHandle> {
        let mut handles: Vec<_> = self.allocations.lock().keys().copied().collect();
        handles.sort_unstable();
        handles
    }

    /// Log a detailed usage report.
    pub fn print_detailed_stats(&self) {
        let stats = self.stats();
        let budget = self.memory_budget();

        info!("===== GPU memory statistics =====");
        info!(
            "Allocations: {} | used {:.2} MiB | reserved {:.2} MiB in {} blocks",
            stats.allocation_count,
            mib(stats.used_bytes),
            mib(stats.total_bytes),
            stats.block_count
        );
        info!(
            "Peak used: {:.2} MiB | fragmentation {:.1}%",
            mib(stats.peak_used_bytes),
            stats.fragmentation_ratio * 100.0
        );
        info!(
            "Budget: {:.2} / {:.2} MiB ({:.1}%, warning at {:.0}%)",
            mib(budget.used_bytes),
            mib(budget.total_bytes),
            budget.usage_ratio * 100.0,
            budget.threshold * 100.0
        );
        for pool in self.pools() {
            info!(
                "  Pool {}: {} allocations, {:.2} MiB used, {:.2} MiB peak, align {}",
                pool.key(),
                pool.allocation_count(),
                mib(pool.used_bytes()),
                mib(pool.peak_bytes()),
                pool.min_alignment()
            );
        }
        for (memory_type, entry) in &stats.per_memory_type {
            info!(
                "  Memory type {memory_type}: {} allocations, {:.2} MiB",
                entry.allocation_count,
                mib(entry.bytes)
            );
        }
    }

    /// Start a defragmentation session, discarding any previous candidates.
    pub fn begin_defragmentation(&self, flags: DefragmentationFlags) {
        let mut session = self.defrag.lock();
        if session.is_some() {
            warn!("Defragmentation already in progress, restarting");
        }
        *session = Some(DefragSession {
            flags,
            candidates: Vec::new(),
        });
        info!(algorithm = flags.algorithm_name(), "Beginning defragmentation");
    }

    /// Mark an allocation for relocation; returns whether it was added.
    pub fn mark_for_defragmentation(&self, handle: AllocationHandle) -> bool {
        let tracked = self.contains(handle);
        let mut guard = self.defrag.lock();
        let Some(session) = guard.as_mut() else {
            warn!(%handle, "No defragmentation in progress");
            return false;
        };
        if !tracked {
            warn!(%handle, "Cannot mark untracked allocation for defragmentation");
            return false;
        }
        if session.candidates.contains(&handle) {
            return false;
        }
        session.candidates.push(handle);
        true
    }

    /// Finish the session and relocate the marked allocations.
    pub fn end_defragmentation(&self) -> DefragmentationStats {
        let Some(session) = self.defrag.lock().take() else {
            warn!("end_defragmentation without begin_defragmentation");
            return DefragmentationStats::default();
        };
        if session.candidates.is_empty() {
            warn!("No allocations marked for defragmentation");
            return DefragmentationStats::default();
        }

        let stats = {
            let allocations = self.allocations.lock();
            let live: Vec<_> = session
                .candidates
                .into_iter()
                .filter(|handle| allocations.contains_key(handle))
                .collect();
            self.backend.lock().defragment(&live)
        };

        info!(
            algorithm = session.flags.algorithm_name(),
            moved = stats.allocations_moved,
            bytes_moved = stats.bytes_moved,
            blocks_freed = stats.blocks_freed,
            bytes_freed = stats.bytes_freed,
            "Defragmentation finished"
        );
        stats
    }

    /// Free every remaining allocation and release the backend.
    ///
    /// Must run before the owning device is destroyed. Later calls do nothing.
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let leaked: Vec<_> = self.allocations.lock().drain().collect();
        {
            let mut backend = self.backend.lock();
            for (handle, info) in &leaked {
                warn!(%handle, name = %info.name, size = info.size, "Freeing leaked allocation on shutdown");
                let result = match info.resource {
                    TrackedResource::Buffer(buffer) => backend.destroy_buffer(*handle, buffer),
                    TrackedResource::Image(image) => backend.destroy_image(*handle, image),
                };
                if let Err(err) = result {
                    error!(%handle, "Failed to free leaked allocation: {err}");
                }
            }
            backend.shutdown();
        }
        self.used_bytes.store(0, Ordering::Release);

        let pools = std::mem::take(&mut *self.pools.lock());
        debug!(pools = pools.len(), leaked = leaked.len(), "Memory allocator shut down");
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }
}

impl Drop for MemoryAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for MemoryAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryAllocator")
            .field("allocations", &self.allocations.lock().len())
            .field("used_bytes", &self.used_bytes.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

fn mib(bytes: u64) -> f64 {
    bytes as f64 / (1024.0 * 1024.0)
}
