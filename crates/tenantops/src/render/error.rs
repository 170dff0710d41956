use std::path::PathBuf;

use thiserror::Error;

use crate::gitops::GitOpsError;

#[derive(Error, Debug)]
pub enum RenderError {
    /// No template for the requested flavor and no usable fallback.
    #[error("TemplateNotFound: no template for flavor '{flavor}' of resource type '{resource_type}'")]
    TemplateNotFound {
        resource_type: String,
        flavor: String,
    },

    /// Syntax or evaluation error inside a template.
    #[error("Template error in '{name}'{}: {message}", at_line(.line))]
    Template {
        name: String,
        line: Option<usize>,
        message: String,
    },

    #[error("Template '{name}' did not produce valid YAML: {message}")]
    InvalidOutput { name: String, message: String },

    #[error("Template source unavailable: {0}")]
    Source(#[from] GitOpsError),

    #[error("Failed to read template '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn at_line(line: &Option<usize>) -> String {
    line.map(|l| format!(" at line {}", l)).unwrap_or_default()
}

impl RenderError {
    pub(crate) fn from_minijinja(err: minijinja::Error, name: &str) -> Self {
        let message = match err.detail() {
            Some(detail) => format!("{}: {}", err.kind(), detail),
            None => err.kind().to_string(),
        };
        Self::Template {
            name: name.to_string(),
            line: err.line(),
            message,
        }
    }

    /// Template source sync and read failures; everything about the
    /// template itself is permanent.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Source(_) | Self::Io { .. })
    }
}
