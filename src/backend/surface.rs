// Presentation surface
//
// Connects a window to Vulkan. Surface creation goes through the raw
// window/display handles so we are not tied to a particular windowing crate.

use ash::extensions::khr;
use ash::{prelude::VkResult, vk};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle};
use std::ffi::{c_void, CStr};
use std::sync::Arc;

use super::instance::VulkanInstance;
use crate::error::{RenderError, Result, VkResultExt};

/// Surface capabilities, formats and present modes for one adapter.
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

/// Instance extensions needed to create a surface for `display`.
pub fn required_extensions(display: RawDisplayHandle) -> Result<Vec<&'static CStr>> {
    let platform = match display {
        RawDisplayHandle::Windows(_) => khr::Win32Surface::name(),
        RawDisplayHandle::Xlib(_) => khr::XlibSurface::name(),
        RawDisplayHandle::Xcb(_) => khr::XcbSurface::name(),
        RawDisplayHandle::Wayland(_) => khr::WaylandSurface::name(),
        other => return Err(RenderError::UnsupportedPlatform(format!("{:?}", other))),
    };
    Ok(vec![khr::Surface::name(), platform])
}

pub struct Surface {
    pub handle: vk::SurfaceKHR,
    pub loader: khr::Surface,
    // Keeps the instance alive until the surface is destroyed
    _instance: Arc<VulkanInstance>,
}

impl Surface {
    pub fn new<W>(instance: Arc<VulkanInstance>, window: &W) -> Result<Self>
    where
        W: HasWindowHandle + HasDisplayHandle,
    {
        let display = window.display_handle()?.as_raw();
        let window = window.window_handle()?.as_raw();

        let handle = unsafe { create_platform_surface(&instance, display, window) }?;
        log::info!("Vulkan window surface created: {:?}", handle);

        let loader = khr::Surface::new(&instance.entry, &instance.instance);
        Ok(Self {
            handle,
            loader,
            _instance: instance,
        })
    }

    /// Capabilities, formats and present modes of this surface on `adapter`.
    pub fn query_support(&self, adapter: vk::PhysicalDevice) -> Result<SurfaceSupport> {
        unsafe {
            let capabilities = self
                .loader
                .get_physical_device_surface_capabilities(adapter, self.handle)
                .during("query surface capabilities")?;
            let formats = self
                .loader
                .get_physical_device_surface_formats(adapter, self.handle)
                .during("query surface formats")?;
            let present_modes = self
                .loader
                .get_physical_device_surface_present_modes(adapter, self.handle)
                .during("query surface present modes")?;

            Ok(SurfaceSupport {
                capabilities,
                formats,
                present_modes,
            })
        }
    }

    pub fn supports_present(&self, adapter: vk::PhysicalDevice, family: u32) -> VkResult<bool> {
        unsafe {
            self.loader
                .get_physical_device_surface_support(adapter, family, self.handle)
        }
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        log::debug!("Destroying surface {:?}", self.handle);
        unsafe { self.loader.destroy_surface(self.handle, None) };
    }
}

unsafe fn create_platform_surface(
    instance: &VulkanInstance,
    display: RawDisplayHandle,
    window: RawWindowHandle,
) -> Result<vk::SurfaceKHR> {
    let entry = &instance.entry;
    let instance = &instance.instance;

    match (display, window) {
        (RawDisplayHandle::Windows(_), RawWindowHandle::Win32(handle)) => {
            let hinstance = handle.hinstance.map(|h| h.get()).unwrap_or(0) as *const c_void;
            let hwnd = handle.hwnd.get() as *const c_void;
            let create_info = vk::Win32SurfaceCreateInfoKHR::builder()
                .hinstance(hinstance)
                .hwnd(hwnd);
            khr::Win32Surface::new(entry, instance)
                .create_win32_surface(&create_info, None)
                .during("create Win32 surface")
        }
        (RawDisplayHandle::Xlib(display), RawWindowHandle::Xlib(handle)) => {
            let dpy = display
                .display
                .map(|d| d.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let create_info = vk::XlibSurfaceCreateInfoKHR::builder()
                .dpy(dpy as *mut vk::Display)
                .window(handle.window as vk::Window);
            khr::XlibSurface::new(entry, instance)
                .create_xlib_surface(&create_info, None)
                .during("create Xlib surface")
        }
        (RawDisplayHandle::Xcb(display), RawWindowHandle::Xcb(handle)) => {
            let connection = display
                .connection
                .map(|c| c.as_ptr())
                .unwrap_or(std::ptr::null_mut());
            let create_info = vk::XcbSurfaceCreateInfoKHR::builder()
                .connection(connection as *mut vk::xcb_connection_t)
                .window(handle.window.get() as vk::xcb_window_t);
            khr::XcbSurface::new(entry, instance)
                .create_xcb_surface(&create_info, None)
                .during("create Xcb surface")
        }
        (RawDisplayHandle::Wayland(display), RawWindowHandle::Wayland(handle)) => {
            let create_info = vk::WaylandSurfaceCreateInfoKHR::builder()
                .display(display.display.as_ptr() as *mut vk::wl_display)
                .surface(handle.surface.as_ptr() as *mut vk::wl_surface);
            khr::WaylandSurface::new(entry, instance)
                .create_wayland_surface(&create_info, None)
                .during("create Wayland surface")
        }
        (display, window) => Err(RenderError::UnsupportedPlatform(format!(
            "{:?} / {:?}",
            display, window
        ))),
    }
}
