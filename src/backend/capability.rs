// Instance capability negotiation
//
// Checks that every extension and layer we want to enable is actually
// offered by the loader before the instance is created.

use ash::{prelude::VkResult, Entry};
use std::cell::OnceCell;
use std::ffi::CStr;

use crate::error::{RenderError, Result, VkResultExt};

/// Where the available instance extensions and layers come from.
pub trait CapabilitySource {
    fn instance_extensions(&self) -> VkResult<Vec<String>>;
    fn instance_layers(&self) -> VkResult<Vec<String>>;
}

impl CapabilitySource for Entry {
    fn instance_extensions(&self) -> VkResult<Vec<String>> {
        let props = self.enumerate_instance_extension_properties(None)?;
        Ok(props.iter().map(|p| fixed_name(&p.extension_name)).collect())
    }

    fn instance_layers(&self) -> VkResult<Vec<String>> {
        let props = self.enumerate_instance_layer_properties()?;
        Ok(props.iter().map(|p| fixed_name(&p.layer_name)).collect())
    }
}

/// Convert a fixed-size, NUL-terminated Vulkan name array.
pub fn fixed_name(raw: &[std::os::raw::c_char]) -> String {
    // Safety: Vulkan guarantees the array is NUL-terminated
    unsafe { CStr::from_ptr(raw.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

/// The exact set of names that passed negotiation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedSet {
    pub extensions: Vec<&'static CStr>,
    pub layers: Vec<&'static CStr>,
}

impl ResolvedSet {
    pub fn extension_ptrs(&self) -> Vec<*const std::os::raw::c_char> {
        self.extensions.iter().map(|name| name.as_ptr()).collect()
    }

    pub fn layer_ptrs(&self) -> Vec<*const std::os::raw::c_char> {
        self.layers.iter().map(|name| name.as_ptr()).collect()
    }
}

#[derive(Debug)]
struct Catalog {
    extensions: Vec<String>,
    layers: Vec<String>,
}

pub struct CapabilityNegotiator<S> {
    source: S,
    catalog: OnceCell<Catalog>,
}

impl<S: CapabilitySource> CapabilityNegotiator<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            catalog: OnceCell::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn into_source(self) -> S {
        self.source
    }

    /// Enumerates once, then serves every later call from the cache.
    fn catalog(&self) -> Result<&Catalog> {
        if let Some(catalog) = self.catalog.get() {
            return Ok(catalog);
        }

        let extensions = self
            .source
            .instance_extensions()
            .during("enumerate instance extensions")?;
        let layers = self
            .source
            .instance_layers()
            .during("enumerate instance layers")?;

        log::info!("Number of available instance extensions: {}", extensions.len());
        for name in &extensions {
            log::debug!("  {}", name);
        }
        log::info!("Number of available instance layers: {}", layers.len());
        for name in &layers {
            log::debug!("  {}", name);
        }

        Ok(self.catalog.get_or_init(|| Catalog { extensions, layers }))
    }

    /// Succeeds only if every requested name is available.
    pub fn negotiate(
        &self,
        required_extensions: &[&'static CStr],
        required_layers: &[&'static CStr],
    ) -> Result<ResolvedSet> {
        let catalog = self.catalog()?;

        let missing_extensions = find_missing(required_extensions, &catalog.extensions);
        let missing_layers = find_missing(required_layers, &catalog.layers);

        for name in &missing_extensions {
            log::error!("Missing instance extension: {}", name);
        }
        for name in &missing_layers {
            log::error!("Missing instance layer: {}", name);
        }

        if !missing_extensions.is_empty() || !missing_layers.is_empty() {
            return Err(RenderError::MissingCapabilities {
                extensions: missing_extensions,
                layers: missing_layers,
            });
        }

        log::info!(
            "All required instance capabilities found ({} extensions, {} layers)",
            required_extensions.len(),
            required_layers.len()
        );

        Ok(ResolvedSet {
            extensions: required_extensions.to_vec(),
            layers: required_layers.to_vec(),
        })
    }
}

/// Names from `required` with no exact (case-sensitive) match in `available`.
pub fn find_missing(required: &[&CStr], available: &[String]) -> Vec<String> {
    required
        .iter()
        .map(|name| name.to_string_lossy())
        .filter(|name| !available.iter().any(|a| a.as_str() == name.as_ref()))
        .map(|name| name.into_owned())
        .collect()
}
