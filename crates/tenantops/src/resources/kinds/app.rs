use serde_json::{json, Value};

use super::{int_in_range, merge_object, require_str, set_default, ResourceKind, MANAGED_BY};
use crate::resources::Spec;

const TEMPLATE: &str = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {{ name }}
  namespace: {{ namespace }}
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
spec:
  replicas: {{ replicas }}
  selector:
    matchLabels:
      app: {{ name }}
  template:
    metadata:
      labels:
        app: {{ name }}
{% for key, value in labels|dictsort %}
        {{ key }}: {{ value|quote }}
{% endfor %}
    spec:
      containers:
      - name: {{ name }}
        image: {{ image }}
        ports:
        - containerPort: {{ port }}
{% if env_vars %}
        env:
{% for key, value in env_vars|dictsort %}
        - name: {{ key }}
          value: {{ value|quote }}
{% endfor %}
{% endif %}
{% if resources %}
        resources:{{ resources|to_yaml|nindent(10) }}
{% endif %}
{% if health_check.liveness %}
        livenessProbe:
          httpGet:
            path: {{ health_check.liveness.path|default("/health") }}
            port: {{ port }}
          initialDelaySeconds: {{ health_check.liveness.initial_delay|default(30) }}
          periodSeconds: {{ health_check.liveness.period|default(10) }}
{% endif %}
{% if health_check.readiness %}
        readinessProbe:
          httpGet:
            path: {{ health_check.readiness.path|default("/ready") }}
            port: {{ port }}
          initialDelaySeconds: {{ health_check.readiness.initial_delay|default(5) }}
          periodSeconds: {{ health_check.readiness.period|default(5) }}
{% endif %}
---
apiVersion: v1
kind: Service
metadata:
  name: {{ name }}-service
  namespace: {{ namespace }}
  labels:
{% for key, value in labels|dictsort %}
    {{ key }}: {{ value|quote }}
{% endfor %}
spec:
  selector:
    app: {{ name }}
  ports:
  - port: {{ port }}
    targetPort: {{ port }}
  type: {{ service_type }}
{% if ingress.rules %}
---
apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: {{ name }}-ingress
  namespace: {{ namespace }}
{% if ingress.annotations %}
  annotations:
{% for key, value in ingress.annotations|dictsort %}
    {{ key }}: {{ value|quote }}
{% endfor %}
{% endif %}
spec:
{% if ingress.tls %}
  tls:
{% for tls in ingress.tls %}
  - hosts:
{% for host in tls.hosts %}
    - {{ host }}
{% endfor %}
    secretName: {{ tls.secret_name }}
{% endfor %}
{% endif %}
  rules:
{% for rule in ingress.rules %}
  - host: {{ rule.host }}
    http:
      paths:
      - path: {{ rule.path|default("/") }}
        pathType: {{ rule.path_type|default("Prefix") }}
        backend:
          service:
            name: {{ name }}-service
            port:
              number: {{ port }}
{% endfor %}
{% endif %}
"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct AppKind;

impl ResourceKind for AppKind {
    fn name(&self) -> &'static str {
        "app"
    }

    fn validate_spec(&self, _name: &str, spec: &Spec) -> Result<(), String> {
        require_str(spec, "image")?;
        if !spec.contains_key("port") {
            return Err("Missing required field: port".to_string());
        }
        int_in_range(spec, "port", 0, 1, 65535, "Port must be between 1 and 65535")?;
        int_in_range(spec, "replicas", 1, 1, 10, "Replicas must be between 1 and 10")?;
        Ok(())
    }

    fn enrich_context(&self, context: &mut Spec, tenant_id: &str) {
        let name = context
            .get("name")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        set_default(context, "namespace", json!(format!("{}-apps", tenant_id)));
        set_default(context, "replicas", json!(1));
        set_default(context, "env_vars", json!({}));
        set_default(context, "resources", json!({}));
        set_default(context, "annotations", json!({}));
        set_default(context, "service_type", json!("ClusterIP"));
        set_default(context, "ingress", json!({}));
        set_default(context, "health_check", json!({}));
        merge_object(
            context,
            "labels",
            &[
                ("tenant.io/id", tenant_id.to_string()),
                ("managed-by", MANAGED_BY.to_string()),
                ("app.kubernetes.io/name", name),
            ],
        );
    }

    fn inline_template(&self) -> Option<&'static str> {
        Some(TEMPLATE)
    }
}
