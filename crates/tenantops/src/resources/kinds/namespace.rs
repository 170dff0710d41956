use std::sync::LazyLock;

use regex::Regex;
use serde_json::json;

use super::{effective_name, merge_object, set_default, ResourceKind, MANAGED_BY};
use crate::resources::Spec;

const MAX_NAME_LEN: usize = 63;

static RE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

const TEMPLATE: &str = r#"apiVersion: v1
kind: Namespace
metadata:
  name: {{ name }}
  labels:
{% for key, value in labels|dictsort %}
    {{ key }}: {{ value|quote }}
{% endfor %}
{% if annotations %}
  annotations:
{% for key, value in annotations|dictsort %}
    {{ key }}: {{ value|quote }}
{% endfor %}
{% endif %}
{% if resource_quota %}
---
apiVersion: v1
kind: ResourceQuota
metadata:
  name: {{ name }}-quota
  namespace: {{ name }}
spec:
  hard:
{% for key, value in resource_quota|dictsort %}
    {{ key }}: {{ value|quote }}
{% endfor %}
{% endif %}
"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceKind;

impl ResourceKind for NamespaceKind {
    fn name(&self) -> &'static str {
        "namespace"
    }

    fn validate_spec(&self, name: &str, spec: &Spec) -> Result<(), String> {
        let name = effective_name(name, spec);
        if !RE_NAME.is_match(name) {
            return Err("Namespace name must be alphanumeric with hyphens/underscores".to_string());
        }
        if name.len() > MAX_NAME_LEN {
            return Err(format!(
                "Namespace name must be {} characters or less",
                MAX_NAME_LEN
            ));
        }
        Ok(())
    }

    fn enrich_context(&self, context: &mut Spec, tenant_id: &str) {
        set_default(context, "annotations", json!({}));
        set_default(context, "resource_quota", json!({}));
        set_default(context, "network_policies", json!([]));
        merge_object(
            context,
            "labels",
            &[
                ("tenant.io/id", tenant_id.to_string()),
                ("managed-by", MANAGED_BY.to_string()),
            ],
        );
    }

    fn inline_template(&self) -> Option<&'static str> {
        Some(TEMPLATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::kinds::spec;

    #[test]
    fn test_valid_names() {
        let kind = NamespaceKind;
        assert!(kind.validate_spec("payments", &spec(json!({}))).is_ok());
        assert!(kind.validate_spec("x", &spec(json!({"name": "team_a-1"}))).is_ok());
    }

    #[test]
    fn test_invalid_names() {
        let kind = NamespaceKind;
        assert!(kind.validate_spec("bad name", &spec(json!({}))).is_err());
        assert!(kind.validate_spec("ok", &spec(json!({"name": "dots.not.ok"}))).is_err());
        let long = "a".repeat(64);
        assert!(kind.validate_spec(&long, &spec(json!({}))).is_err());
        assert!(kind.validate_spec(&"a".repeat(63), &spec(json!({}))).is_ok());
    }

    #[test]
    fn test_enrich_adds_tenant_labels() {
        let mut ctx = spec(json!({"name": "payments", "labels": {"team": "core"}}));
        NamespaceKind.enrich_context(&mut ctx, "acme");
        assert_eq!(ctx["labels"]["tenant.io/id"], "acme");
        assert_eq!(ctx["labels"]["managed-by"], MANAGED_BY);
        assert_eq!(ctx["labels"]["team"], "core");
        assert_eq!(ctx["resource_quota"], json!({}));
    }
}
