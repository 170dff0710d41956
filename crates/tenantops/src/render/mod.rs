//! Manifest rendering with MiniJinja.

mod engine;
mod error;
pub mod filters;

pub use engine::{render_str, ManifestRenderer, RenderRequest, TemplateSource, DEFAULT_FLAVOR};
pub use error::RenderError;
