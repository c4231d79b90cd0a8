// Tri - a minimal Vulkan triangle renderer
//
// `backend` wraps ash one object at a time; `renderer` builds those objects
// in order for a window and drives the per-frame loop.

pub mod backend;
pub mod config;
pub mod error;
pub mod renderer;

pub use config::Config;
pub use error::{RenderError, Result};
pub use renderer::{InitStage, Renderer};
