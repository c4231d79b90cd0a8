// Vulkan instance + validation messenger
//
// The instance is created from a negotiated capability set, never from a
// wish list. The validation messenger is optional and its absence is not
// an error.

use ash::extensions::ext::DebugUtils;
use ash::{vk, Entry};
use std::ffi::{CStr, CString};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::capability::ResolvedSet;
use crate::error::{RenderError, Result, VkResultExt};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Read by the debug callback, which has no other context.
static ABORT_ON_VALIDATION_ERROR: AtomicBool = AtomicBool::new(false);

#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationSettings {
    pub enabled: bool,
    /// Abort the process on ERROR messages
    pub abort_on_error: bool,
}

impl ValidationSettings {
    /// Extensions and layers the settings add on top of the surface ones.
    pub fn requirements(&self) -> (Vec<&'static CStr>, Vec<&'static CStr>) {
        if self.enabled {
            (vec![DebugUtils::name()], vec![VALIDATION_LAYER])
        } else {
            (Vec::new(), Vec::new())
        }
    }
}

pub struct VulkanInstance {
    pub instance: ash::Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    pub entry: Entry,
}

impl VulkanInstance {
    pub fn new(
        entry: Entry,
        app_name: &str,
        capabilities: &ResolvedSet,
        validation: ValidationSettings,
    ) -> Result<Arc<Self>> {
        let app_name_cstr = CString::new(app_name).unwrap_or_else(|_| CString::from(c"Tri"));
        let engine_name = c"No Engine";

        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_cstr)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name)
            .engine_version(vk::make_api_version(0, 0, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extensions = capabilities.extension_ptrs();
        let layers = capabilities.layer_ptrs();

        log::info!("Number of requested instance extensions: {}", extensions.len());
        for name in &capabilities.extensions {
            log::debug!("  {}", name.to_string_lossy());
        }
        log::info!("Number of requested instance layers: {}", layers.len());
        for name in &capabilities.layers {
            log::debug!("  {}", name.to_string_lossy());
        }

        ABORT_ON_VALIDATION_ERROR.store(
            validation.enabled && validation.abort_on_error,
            Ordering::Relaxed,
        );

        // Chained so instance creation itself is validated too
        let mut instance_messenger_info = messenger_create_info();
        let mut create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);
        if validation.enabled {
            create_info = create_info.push_next(&mut instance_messenger_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .during("create Vulkan instance")?;
        log::info!("VkInstance created: {:?}", instance.handle());

        let debug_utils = if validation.enabled {
            Self::setup_debug_messenger(&entry, &instance)
        } else {
            None
        };

        Ok(Arc::new(Self {
            instance,
            debug_utils,
            entry,
        }))
    }

    fn setup_debug_messenger(
        entry: &Entry,
        instance: &ash::Instance,
    ) -> Option<(DebugUtils, vk::DebugUtilsMessengerEXT)> {
        let debug_utils = DebugUtils::new(entry, instance);
        let create_info = messenger_create_info();

        match unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) } {
            Ok(messenger) => Some((debug_utils, messenger)),
            Err(result) => {
                let err = RenderError::Vulkan {
                    op: "create debug messenger",
                    result,
                };
                log::error!("{} - there will be no messages from the validation layer", err);
                None
            }
        }
    }

    pub fn has_validation(&self) -> bool {
        self.debug_utils.is_some()
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan instance {:?}", self.instance.handle());
        unsafe {
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

fn messenger_create_info() -> vk::DebugUtilsMessengerCreateInfoEXTBuilder<'static> {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::INFO
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
}

/// Log level for a validation message severity.
pub fn severity_level(severity: vk::DebugUtilsMessageSeverityFlagsEXT) -> log::Level {
    match severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => log::Level::Error,
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => log::Level::Warn,
        vk::DebugUtilsMessageSeverityFlagsEXT::INFO => log::Level::Info,
        _ => log::Level::Debug,
    }
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);
    let level = severity_level(message_severity);

    log::log!(level, "[Vulkan] {}", message.to_string_lossy());

    if level == log::Level::Error && ABORT_ON_VALIDATION_ERROR.load(Ordering::Relaxed) {
        log::logger().flush();
        std::process::abort();
    }

    vk::FALSE
}
