use serde_json::{json, Value};

use super::{int_in_range, merge_object, require_one_of, require_str, set_default, ResourceKind, MANAGED_BY};
use crate::resources::Spec;

pub const INSTANCE_TYPES: &[&str] = &[
    "t3.micro", "t3.small", "t3.medium", "t3.large", "m5.large", "m5.xlarge", "c5.large",
    "c5.xlarge",
];

const TEMPLATE: &str = r#"apiVersion: ec2.aws.crossplane.io/v1alpha1
kind: Instance
metadata:
  name: {{ name }}
  namespace: {{ tenant_id }}
  labels:
    tenant.io/id: {{ tenant_id }}
    managed-by: tenantops
spec:
  forProvider:
    instanceType: {{ instance_type }}
    imageId: {{ image }}
    keyName: {{ key_name }}
{% if subnet_id %}
    subnetId: {{ subnet_id }}
{% endif %}
{% if security_groups %}
    securityGroupIds:
{% for sg in security_groups %}
    - {{ sg }}
{% endfor %}
{% endif %}
    blockDeviceMappings:
    - deviceName: /dev/xvda
      ebs:
        volumeSize: {{ disk_size }}
        volumeType: gp3
        encrypted: true
        deleteOnTermination: true
{% if user_data %}
    userData: |{{ user_data|nindent(6) }}
{% endif %}
    tags:
{% for key, value in tags|dictsort %}
      {{ key }}: {{ value|quote }}
{% endfor %}
  writeConnectionSecretsToNamespace: {{ tenant_id }}
"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct VmKind;

impl ResourceKind for VmKind {
    fn name(&self) -> &'static str {
        "vm"
    }

    fn validate_spec(&self, _name: &str, spec: &Spec) -> Result<(), String> {
        require_one_of(spec, "instance_type", INSTANCE_TYPES)?;
        require_str(spec, "image")?;
        int_in_range(
            spec,
            "disk_size",
            20,
            8,
            1000,
            "Disk size must be between 8 and 1000 GB",
        )?;
        Ok(())
    }

    fn enrich_context(&self, context: &mut Spec, tenant_id: &str) {
        let environment = context
            .get("environment")
            .and_then(Value::as_str)
            .unwrap_or("dev")
            .to_string();

        set_default(context, "disk_size", json!(20));
        set_default(context, "key_name", json!(format!("{}-default", tenant_id)));
        set_default(context, "security_groups", json!([]));
        set_default(context, "user_data", json!(""));
        merge_object(
            context,
            "tags",
            &[
                ("Tenant", tenant_id.to_string()),
                ("ManagedBy", MANAGED_BY.to_string()),
                ("Environment", environment),
            ],
        );
    }

    fn inline_template(&self) -> Option<&'static str> {
        Some(TEMPLATE)
    }
}
