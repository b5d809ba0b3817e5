//! GPU capability detection.

use ash::vk;
use std::collections::HashSet;
use std::ffi::CStr;

/// Lowest Vulkan version the renderer runs on.
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_2;

/// GPU vendor identification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    /// Identify vendor from PCI vendor ID.
    pub fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Detected GPU capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub driver_version: u32,

    /// Device-local memory in MB
    pub device_local_memory_mb: u64,
    pub max_memory_allocation_count: u32,
    /// `VK_EXT_memory_budget` is available.
    pub supports_memory_budget: bool,

    /// Nanoseconds per timestamp tick.
    pub timestamp_period: f32,
    /// Graphics and compute queues support timestamps.
    pub supports_timestamps: bool,
    pub supports_pipeline_statistics: bool,

    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = instance.get_physical_device_properties(physical_device);
        let features = instance.get_physical_device_features(physical_device);
        let memory_properties = instance.get_physical_device_memory_properties(physical_device);

        let extensions = instance
            .enumerate_device_extension_properties(physical_device)
            .unwrap_or_default();

        let available_extensions: HashSet<String> = extensions
            .iter()
            .filter_map(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr())
                    .to_str()
                    .ok()
                    .map(String::from)
            })
            .collect();

        let device_name = CStr::from_ptr(properties.device_name.as_ptr())
            .to_string_lossy()
            .into_owned();

        let device_local_memory_mb: u64 = memory_properties
            .memory_heaps
            .iter()
            .take(memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size / (1024 * 1024))
            .sum();

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            driver_version: properties.driver_version,

            device_local_memory_mb,
            max_memory_allocation_count: properties.limits.max_memory_allocation_count,
            supports_memory_budget: available_extensions.contains("VK_EXT_memory_budget"),

            timestamp_period: properties.limits.timestamp_period,
            supports_timestamps: properties.limits.timestamp_compute_and_graphics == vk::TRUE,
            supports_pipeline_statistics: features.pipeline_statistics_query == vk::TRUE,

            available_extensions,
        }
    }

    pub fn supports_extension(&self, name: &CStr) -> bool {
        name.to_str()
            .is_ok_and(|name| self.available_extensions.contains(name))
    }

    /// Check if the GPU meets minimum requirements for the renderer.
    pub fn meets_requirements(&self) -> bool {
        self.api_version >= MIN_API_VERSION && self.supports_extension(ash::khr::swapchain::NAME)
    }

    /// Get a human-readable summary of capabilities.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB VRAM",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.device_local_memory_mb,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn capabilities(api_version: u32, extensions: &[&str]) -> GpuCapabilities {
        GpuCapabilities {
            vendor: GpuVendor::Amd,
            device_name: "Test GPU".to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            api_version,
            driver_version: 0,
            device_local_memory_mb: 8192,
            max_memory_allocation_count: 4096,
            supports_memory_budget: false,
            timestamp_period: 1.0,
            supports_timestamps: true,
            supports_pipeline_statistics: true,
            available_extensions: extensions.iter().map(|e| e.to_string()).collect(),
        }
    }

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x1002), GpuVendor::Amd);
        assert_eq!(GpuVendor::from_vendor_id(0x8086), GpuVendor::Intel);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn requirements_need_swapchain_and_vulkan_1_2() {
        assert!(capabilities(vk::API_VERSION_1_3, &["VK_KHR_swapchain"]).meets_requirements());
        assert!(capabilities(vk::API_VERSION_1_2, &["VK_KHR_swapchain"]).meets_requirements());
        assert!(!capabilities(vk::API_VERSION_1_1, &["VK_KHR_swapchain"]).meets_requirements());
        assert!(!capabilities(vk::API_VERSION_1_3, &[]).meets_requirements());
    }

    #[test]
    fn summary_names_device_and_version() {
        let summary = capabilities(vk::make_api_version(0, 1, 3, 250), &[]).summary();
        assert_eq!(summary, "Test GPU (Amd) - Vulkan 1.3.250 - 8192 MB VRAM");
    }
}
