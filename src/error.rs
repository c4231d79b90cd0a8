// Error types for the render core
//
// Initialization errors are fatal and carry the stage that failed.
// Frame errors are logged by the frame executor and the frame is skipped.

use ash::{prelude::VkResult, vk};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::renderer::InitStage;

pub type Result<T, E = RenderError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("failed to load the Vulkan library: {0}")]
    Loading(#[from] ash::LoadingError),

    #[error(
        "missing required instance capabilities (extensions: {extensions:?}, layers: {layers:?})"
    )]
    MissingCapabilities {
        extensions: Vec<String>,
        layers: Vec<String>,
    },

    #[error("no suitable GPU found")]
    NoSuitableAdapter,

    #[error("incomplete queue family selection (graphics: {graphics:?}, present: {present:?})")]
    IncompleteQueueFamilies {
        graphics: Option<u32>,
        present: Option<u32>,
    },

    #[error("unsupported window system: {0}")]
    UnsupportedPlatform(String),

    #[error("window handle unavailable: {0}")]
    WindowHandle(#[from] raw_window_handle::HandleError),

    #[error("failed to read shader binary {}", path.display())]
    ShaderMissing { path: PathBuf },

    #[error("invalid SPIR-V in {origin}: {reason}")]
    InvalidShader { origin: String, reason: String },

    #[error("{op} timed out after {timeout:?}")]
    Timeout { op: &'static str, timeout: Duration },

    #[error("{op} failed: {result}")]
    Vulkan {
        op: &'static str,
        result: vk::Result,
    },

    #[error("initialization failed while creating {stage}")]
    Init {
        stage: InitStage,
        #[source]
        source: Box<RenderError>,
    },
}

impl RenderError {
    /// Tag an error with the initialization stage it came from.
    pub fn at(self, stage: InitStage) -> Self {
        match self {
            // Keep the innermost stage
            err @ RenderError::Init { .. } => err,
            err => RenderError::Init {
                stage,
                source: Box::new(err),
            },
        }
    }

    /// The raw Vulkan status, if this error wraps one.
    pub fn vk_result(&self) -> Option<vk::Result> {
        match self {
            RenderError::Vulkan { result, .. } => Some(*result),
            RenderError::Init { source, .. } => source.vk_result(),
            _ => None,
        }
    }
}

/// Attach the name of the failing call to a raw Vulkan result.
pub trait VkResultExt<T> {
    fn during(self, op: &'static str) -> Result<T>;

    /// Like `during`, but maps `TIMEOUT` to [`RenderError::Timeout`].
    fn bounded(self, op: &'static str, timeout: Duration) -> Result<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn during(self, op: &'static str) -> Result<T> {
        self.map_err(|result| RenderError::Vulkan { op, result })
    }

    fn bounded(self, op: &'static str, timeout: Duration) -> Result<T> {
        self.map_err(|result| match result {
            vk::Result::TIMEOUT | vk::Result::NOT_READY => RenderError::Timeout { op, timeout },
            result => RenderError::Vulkan { op, result },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_tag_keeps_innermost_stage() {
        let err = RenderError::NoSuitableAdapter
            .at(InitStage::Adapter)
            .at(InitStage::Device);

        match err {
            RenderError::Init { stage, source } => {
                assert_eq!(stage, InitStage::Adapter);
                assert!(matches!(*source, RenderError::NoSuitableAdapter));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn timeout_is_mapped_only_for_bounded_waits() {
        let timeout = Duration::from_millis(5);
        let waited: VkResult<()> = Err(vk::Result::TIMEOUT);
        assert!(matches!(
            waited.bounded("wait for in-flight fence", timeout),
            Err(RenderError::Timeout { .. })
        ));

        let created: VkResult<()> = Err(vk::Result::TIMEOUT);
        let err = created.during("create fence").unwrap_err();
        assert_eq!(err.vk_result(), Some(vk::Result::TIMEOUT));
    }
}
