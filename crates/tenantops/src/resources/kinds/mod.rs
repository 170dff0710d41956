//! Per-kind spec validation, context enrichment and fallback templates.

pub mod app;
pub mod database;
pub mod namespace;
pub mod vm;

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::Spec;

/// Label value identifying manifests written by this system.
pub const MANAGED_BY: &str = "tenantops";

/// Behavior specific to one resource kind.
///
/// Resource types without a kind (for example `osimage` or `misc`) accept
/// any spec, get no enrichment and have no inline template.
pub trait ResourceKind: Send + Sync {
    fn name(&self) -> &'static str;

    /// Checks the submitted spec. `name` is the resource name, used when
    /// the spec carries no `name` of its own.
    fn validate_spec(&self, name: &str, spec: &Spec) -> Result<(), String>;

    /// Adds defaults and tenant labels to a render context.
    fn enrich_context(&self, context: &mut Spec, tenant_id: &str);

    fn inline_template(&self) -> Option<&'static str> {
        None
    }
}

pub struct KindRegistry {
    kinds: HashMap<&'static str, Box<dyn ResourceKind>>,
}

impl KindRegistry {
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(Box::new(namespace::NamespaceKind));
        registry.register(Box::new(vm::VmKind));
        registry.register(Box::new(app::AppKind));
        registry.register(Box::new(database::DatabaseKind));
        registry
    }

    pub fn register(&mut self, kind: Box<dyn ResourceKind>) {
        self.kinds.insert(kind.name(), kind);
    }

    pub fn get(&self, resource_type: &str) -> Option<&dyn ResourceKind> {
        self.kinds.get(resource_type).map(|k| k.as_ref())
    }

    pub fn validate(&self, resource_type: &str, name: &str, spec: &Spec) -> Result<(), String> {
        match self.get(resource_type) {
            Some(kind) => kind.validate_spec(name, spec),
            None => Ok(()),
        }
    }

    pub fn enrich(&self, resource_type: &str, context: &mut Spec, tenant_id: &str) {
        if let Some(kind) = self.get(resource_type) {
            kind.enrich_context(context, tenant_id);
        }
    }

    pub fn inline_template(&self, resource_type: &str) -> Option<&'static str> {
        self.get(resource_type).and_then(|k| k.inline_template())
    }
}

impl Default for KindRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl std::fmt::Debug for KindRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.kinds.keys().collect();
        names.sort();
        f.debug_struct("KindRegistry").field("kinds", &names).finish()
    }
}

/// `spec.name` when present, otherwise the resource name.
pub fn effective_name<'a>(name: &'a str, spec: &'a Spec) -> &'a str {
    spec.get("name").and_then(Value::as_str).unwrap_or(name)
}

pub(crate) fn require_str<'a>(spec: &'a Spec, key: &str) -> Result<&'a str, String> {
    match spec.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Ok(s),
        Some(_) => Err(format!("Field '{}' must be a non-empty string", key)),
        None => Err(format!("Missing required field: {}", key)),
    }
}

pub(crate) fn require_one_of(spec: &Spec, key: &str, allowed: &[&str]) -> Result<(), String> {
    let value = require_str(spec, key)?;
    if allowed.contains(&value) {
        Ok(())
    } else {
        Err(format!(
            "Invalid {}: {} (expected one of {})",
            key,
            value,
            allowed.join(", ")
        ))
    }
}

/// Integer field within `[min, max]`; absent means `default`.
pub(crate) fn int_in_range(
    spec: &Spec,
    key: &str,
    default: i64,
    min: i64,
    max: i64,
    message: &str,
) -> Result<i64, String> {
    let value = match spec.get(key) {
        None => default,
        Some(v) => v.as_i64().ok_or_else(|| message.to_string())?,
    };
    if (min..=max).contains(&value) {
        Ok(value)
    } else {
        Err(message.to_string())
    }
}

pub(crate) fn set_default(context: &mut Spec, key: &str, value: Value) {
    let slot = context.entry(key.to_string()).or_insert(Value::Null);
    if slot.is_null() {
        *slot = value;
    }
}

/// Merges `pairs` into the object at `key`, replacing non-objects.
pub(crate) fn merge_object(context: &mut Spec, key: &str, pairs: &[(&str, String)]) {
    let slot = context
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    if let Value::Object(map) = slot {
        for (k, v) in pairs {
            map.insert((*k).to_string(), Value::String(v.clone()));
        }
    }
}

#[cfg(test)]
pub(crate) fn spec(value: Value) -> Spec {
    match value {
        Value::Object(map) => map,
        _ => panic!("spec must be an object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_kinds() {
        let registry = KindRegistry::builtin();
        for name in ["namespace", "vm", "app", "database"] {
            assert!(registry.get(name).is_some(), "missing {}", name);
            assert!(registry.inline_template(name).is_some());
        }
        assert!(registry.get("osimage").is_none());
    }

    #[test]
    fn test_unknown_kind_accepts_anything() {
        let registry = KindRegistry::builtin();
        assert!(registry
            .validate("misc", "x", &spec(json!({"anything": [1, 2]})))
            .is_ok());

        let mut ctx = spec(json!({"a": 1}));
        registry.enrich("misc", &mut ctx, "acme");
        assert_eq!(ctx, spec(json!({"a": 1})));
    }

    #[test]
    fn test_effective_name() {
        assert_eq!(effective_name("web", &spec(json!({}))), "web");
        assert_eq!(effective_name("web", &spec(json!({"name": "api"}))), "api");
    }

    #[test]
    fn test_int_in_range() {
        let s = spec(json!({"n": 5, "bad": "x"}));
        assert_eq!(int_in_range(&s, "n", 1, 1, 10, "m"), Ok(5));
        assert_eq!(int_in_range(&s, "missing", 3, 1, 10, "m"), Ok(3));
        assert!(int_in_range(&s, "n", 1, 6, 10, "m").is_err());
        assert!(int_in_range(&s, "bad", 1, 1, 10, "m").is_err());
    }

    #[test]
    fn test_merge_object_keeps_user_keys() {
        let mut ctx = spec(json!({"labels": {"team": "core"}}));
        merge_object(&mut ctx, "labels", &[("managed-by", MANAGED_BY.to_string())]);
        assert_eq!(ctx["labels"], json!({"team": "core", "managed-by": "tenantops"}));

        let mut replaced = spec(json!({"labels": "oops"}));
        merge_object(&mut replaced, "labels", &[("a", "b".to_string())]);
        assert_eq!(replaced["labels"], json!({"a": "b"}));
    }

    #[test]
    fn test_set_default_only_fills_missing() {
        let mut ctx = spec(json!({"replicas": 3, "empty": null}));
        set_default(&mut ctx, "replicas", json!(1));
        set_default(&mut ctx, "empty", json!("x"));
        set_default(&mut ctx, "new", json!(true));
        assert_eq!(ctx["replicas"], json!(3));
        assert_eq!(ctx["empty"], json!("x"));
        assert_eq!(ctx["new"], json!(true));
    }
}
