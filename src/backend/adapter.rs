// Physical device (adapter) selection
//
// Adapters are first turned into plain capability records, then scored.
// Scoring and queue family discovery are pure functions over those
// records so they can be exercised without a GPU.

use ash::{prelude::VkResult, vk};
use std::ffi::CStr;

use super::capability::{find_missing, fixed_name};
use super::surface::Surface;
use crate::error::{RenderError, Result, VkResultExt};

/// Base scores by device type. Doubled per advanced shading feature.
/// CPU, virtual and unknown adapters are never used.
const SCORE_DISCRETE: u32 = 1000;
const SCORE_INTEGRATED: u32 = 100;
const SCORE_OTHER: u32 = 0;

/// Optional features that raise an adapter's score.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdapterFeatures {
    pub geometry_shader: bool,
    pub tessellation_shader: bool,
}

impl From<&vk::PhysicalDeviceFeatures> for AdapterFeatures {
    fn from(features: &vk::PhysicalDeviceFeatures) -> Self {
        Self {
            geometry_shader: features.geometry_shader == vk::TRUE,
            tessellation_shader: features.tessellation_shader == vk::TRUE,
        }
    }
}

/// Everything we need to know about one adapter, queried once.
#[derive(Debug, Clone)]
pub struct AdapterCapabilities {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub features: AdapterFeatures,
    pub extensions: Vec<String>,
    pub surface_formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
    pub queue_families: Vec<vk::QueueFamilyProperties>,
}

impl AdapterCapabilities {
    /// Query one adapter, including its support for `surface`.
    pub fn query(
        instance: &ash::Instance,
        surface: &Surface,
        handle: vk::PhysicalDevice,
    ) -> Result<Self> {
        let properties = unsafe { instance.get_physical_device_properties(handle) };
        let features = unsafe { instance.get_physical_device_features(handle) };
        let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
            .during("enumerate device extensions")?
            .iter()
            .map(|p| fixed_name(&p.extension_name))
            .collect();
        let queue_families =
            unsafe { instance.get_physical_device_queue_family_properties(handle) };
        let name = fixed_name(&properties.device_name);

        // An adapter that cannot report surface support is simply unsuitable
        let (surface_formats, present_modes) = match surface.query_support(handle) {
            Ok(support) => (support.formats, support.present_modes),
            Err(e) => {
                log::warn!("Failed to query surface support for '{}': {}", name, e);
                (Vec::new(), Vec::new())
            }
        };

        Ok(Self {
            handle,
            name,
            device_type: properties.device_type,
            api_version: properties.api_version,
            features: AdapterFeatures::from(&features),
            extensions,
            surface_formats,
            present_modes,
            queue_families,
        })
    }

    /// Query every adapter the instance exposes, in enumeration order.
    pub fn enumerate(instance: &ash::Instance, surface: &Surface) -> Result<Vec<Self>> {
        let handles = unsafe { instance.enumerate_physical_devices() }
            .during("enumerate physical devices")?;
        log::info!("Number of Vulkan-enabled devices: {}", handles.len());

        handles
            .into_iter()
            .map(|handle| Self::query(instance, surface, handle))
            .collect()
    }
}

/// Suitability of an adapter. Zero means unusable.
pub fn suitability_score(adapter: &AdapterCapabilities, required_extensions: &[&CStr]) -> u32 {
    let missing = find_missing(required_extensions, &adapter.extensions);
    if !missing.is_empty() {
        log::warn!(
            "Device '{}' is missing required device extensions: {}",
            adapter.name,
            missing.join(", ")
        );
        return 0;
    }

    if adapter.surface_formats.is_empty() || adapter.present_modes.is_empty() {
        log::warn!(
            "Device '{}' cannot present: no surface formats or present modes",
            adapter.name
        );
        return 0;
    }

    let mut score = match adapter.device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => SCORE_DISCRETE,
        vk::PhysicalDeviceType::INTEGRATED_GPU => SCORE_INTEGRATED,
        _ => SCORE_OTHER,
    };
    if adapter.features.geometry_shader {
        score *= 2;
    }
    if adapter.features.tessellation_shader {
        score *= 2;
    }

    log::debug!("Device '{}' has a score of {}", adapter.name, score);
    score
}

/// Pick the highest scoring adapter. Ties go to the first one enumerated.
pub fn select_adapter<'a>(
    adapters: &'a [AdapterCapabilities],
    required_extensions: &[&CStr],
) -> Result<&'a AdapterCapabilities> {
    let mut best: Option<(u32, &AdapterCapabilities)> = None;
    let mut suitable = 0;

    for adapter in adapters {
        let score = suitability_score(adapter, required_extensions);
        if score == 0 {
            continue;
        }
        suitable += 1;
        if best.map_or(true, |(best_score, _)| score > best_score) {
            best = Some((score, adapter));
        }
    }

    log::info!("Number of suitable Vulkan-enabled devices: {}", suitable);

    best.map(|(_, adapter)| adapter)
        .ok_or(RenderError::NoSuitableAdapter)
}

/// Graphics and present queue families. Either may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilySelection {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilySelection {
    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolve(self) -> Result<ResolvedQueues> {
        match (self.graphics, self.present) {
            (Some(graphics), Some(present)) => Ok(ResolvedQueues { graphics, present }),
            (graphics, present) => Err(RenderError::IncompleteQueueFamilies { graphics, present }),
        }
    }
}

/// Queue families both found. They may be the same index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedQueues {
    pub graphics: u32,
    pub present: u32,
}

impl ResolvedQueues {
    pub fn is_shared(&self) -> bool {
        self.graphics == self.present
    }

    /// Distinct family indices, graphics first.
    pub fn unique(&self) -> Vec<u32> {
        if self.is_shared() {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Scan families in index order for the first graphics family and the first
/// family `supports_present` confirms. Stops as soon as both are known.
pub fn find_queue_families<F>(
    families: &[vk::QueueFamilyProperties],
    mut supports_present: F,
) -> QueueFamilySelection
where
    F: FnMut(u32) -> VkResult<bool>,
{
    let mut selection = QueueFamilySelection::default();
    log::info!("Queue family count: {}", families.len());

    for (index, family) in families.iter().enumerate() {
        let index = index as u32;
        log::debug!("Queue family #{} flags: {:?}", index, family.queue_flags);

        if selection.graphics.is_none() && family.queue_flags.contains(vk::QueueFlags::GRAPHICS) {
            selection.graphics = Some(index);
        }

        if selection.present.is_none() {
            match supports_present(index) {
                Ok(true) => selection.present = Some(index),
                Ok(false) => {}
                Err(e) => log::warn!(
                    "Failed to query surface support for queue family {}: {}",
                    index,
                    e
                ),
            }
        }

        if selection.is_complete() {
            break;
        }
    }

    selection
}
