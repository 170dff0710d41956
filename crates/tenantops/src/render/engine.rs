//! Template resolution and rendering.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use minijinja::{AutoEscape, Environment, UndefinedBehavior};
use serde::Deserialize;
use serde_json::Value;

use super::error::RenderError;
use super::filters;
use crate::gitops::{validate_segment, RepositoryCache};
use crate::resources::{KindRegistry, Spec};

pub const DEFAULT_FLAVOR: &str = "default";

/// File names tried for a flavor, in order.
const TEMPLATE_SUFFIXES: &[&str] = &[".yaml", ".yaml.j2"];

/// Where manifest templates come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    Directory(PathBuf),
    /// A git repository fetched through the repository cache.
    Repository { url: String, branch: String },
}

/// Everything a single render needs.
#[derive(Debug, Clone)]
pub struct RenderRequest<'a> {
    pub resource_type: &'a str,
    /// Directory of the type's templates inside the source.
    pub template_dir: &'a str,
    pub tenant_id: &'a str,
    pub cluster_id: Option<&'a str>,
    pub name: &'a str,
    pub spec: &'a Spec,
}

impl RenderRequest<'_> {
    /// `spec.flavor`, if the caller asked for one.
    pub fn requested_flavor(&self) -> Option<&str> {
        self.spec
            .get("flavor")
            .and_then(Value::as_str)
            .filter(|f| !f.is_empty())
    }
}

#[derive(Debug)]
pub struct ManifestRenderer {
    source: TemplateSource,
    cache: Arc<RepositoryCache>,
    kinds: Arc<KindRegistry>,
}

impl ManifestRenderer {
    pub fn new(source: TemplateSource, cache: Arc<RepositoryCache>, kinds: Arc<KindRegistry>) -> Self {
        Self {
            source,
            cache,
            kinds,
        }
    }

    pub fn source(&self) -> &TemplateSource {
        &self.source
    }

    /// Resolves the template for the request and renders it.
    ///
    /// An explicitly requested flavor must exist. Without one, the
    /// `default` flavor is used, then the kind's inline template.
    pub async fn render(&self, request: &RenderRequest<'_>) -> Result<String, RenderError> {
        let requested = request.requested_flavor();
        let flavor = requested.unwrap_or(DEFAULT_FLAVOR);

        let found = self.load_template(request, flavor).await?;
        let (name, source) = match found {
            Some(found) => found,
            None => match (requested, self.kinds.inline_template(request.resource_type)) {
                (None, Some(inline)) => {
                    log::debug!(
                        "No {} template for {}, using inline template",
                        flavor,
                        request.resource_type
                    );
                    (format!("{}/inline", request.resource_type), inline.to_string())
                }
                _ => {
                    return Err(RenderError::TemplateNotFound {
                        resource_type: request.resource_type.to_string(),
                        flavor: flavor.to_string(),
                    })
                }
            },
        };

        let context = self.build_context(request);
        let output = render_str(&name, &source, &context)?;
        validate_yaml(&name, &output)?;
        Ok(output)
    }

    /// Render context: identity fields, the spec spread on top, then kind
    /// defaults and labels.
    pub fn build_context(&self, request: &RenderRequest<'_>) -> Spec {
        let mut context = Spec::new();
        context.insert("name".to_string(), Value::from(request.name));
        context.insert("tenant_id".to_string(), Value::from(request.tenant_id));
        context.insert(
            "cluster_id".to_string(),
            request.cluster_id.map(Value::from).unwrap_or(Value::Null),
        );
        for (key, value) in request.spec {
            context.insert(key.clone(), value.clone());
        }
        self.kinds
            .enrich(request.resource_type, &mut context, request.tenant_id);
        context
    }

    async fn load_template(
        &self,
        request: &RenderRequest<'_>,
        flavor: &str,
    ) -> Result<Option<(String, String)>, RenderError> {
        let unsafe_dir = request
            .template_dir
            .split('/')
            .any(|segment| validate_segment(segment).is_err());
        if unsafe_dir || validate_segment(flavor).is_err() {
            log::warn!(
                "Rejecting template lookup {}/{}: unsafe path segment",
                request.template_dir,
                flavor
            );
            return Ok(None);
        }

        match &self.source {
            TemplateSource::Directory(root) => read_template(root, request.template_dir, flavor),
            TemplateSource::Repository { url, branch } => {
                let lease = self.cache.acquire(url, branch).await?;
                read_template(lease.path(), request.template_dir, flavor)
            }
        }
    }
}

fn read_template(
    root: &Path,
    template_dir: &str,
    flavor: &str,
) -> Result<Option<(String, String)>, RenderError> {
    for suffix in TEMPLATE_SUFFIXES {
        let relative = format!("{}/{}{}", template_dir, flavor, suffix);
        let path = root.join(template_dir).join(format!("{}{}", flavor, suffix));
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(|e| RenderError::Io {
            path: path.clone(),
            source: e,
        })?;
        return Ok(Some((relative, text)));
    }
    Ok(None)
}

fn environment<'source>() -> Environment<'source> {
    let mut env = Environment::new();
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(true);
    env.set_undefined_behavior(UndefinedBehavior::Lenient);
    env.set_auto_escape_callback(|_| AutoEscape::None);

    env.add_filter("to_yaml", filters::to_yaml);
    env.add_filter("toyaml", filters::to_yaml);
    env.add_filter("tojson", filters::tojson);
    env.add_filter("quote", filters::quote);
    env.add_filter("nindent", filters::nindent);
    env
}

/// Renders one template string against `context`.
pub fn render_str(name: &str, source: &str, context: &Spec) -> Result<String, RenderError> {
    let env = environment();
    let template = env
        .template_from_named_str(name, source)
        .map_err(|e| RenderError::from_minijinja(e, name))?;
    template
        .render(context)
        .map_err(|e| RenderError::from_minijinja(e, name))
}

/// Every document in `output` must parse as YAML.
fn validate_yaml(name: &str, output: &str) -> Result<(), RenderError> {
    for document in serde_yaml::Deserializer::from_str(output) {
        serde_yaml::Value::deserialize(document).map_err(|e| RenderError::InvalidOutput {
            name: name.to_string(),
            message: e.to_string(),
        })?;
    }
    Ok(())
}
