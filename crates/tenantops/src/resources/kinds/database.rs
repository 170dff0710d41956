use serde_json::{json, Value};

use super::{int_in_range, merge_object, require_one_of, set_default, ResourceKind, MANAGED_BY};
use crate::resources::Spec;

pub const ENGINES: &[&str] = &["mysql", "postgres", "mariadb", "oracle-ee", "sqlserver-se"];

pub const INSTANCE_CLASSES: &[&str] = &[
    "db.t3.micro",
    "db.t3.small",
    "db.t3.medium",
    "db.t3.large",
    "db.m5.large",
    "db.m5.xlarge",
    "db.r5.large",
    "db.r5.xlarge",
];

const TEMPLATE: &str = r#"apiVersion: rds.aws.crossplane.io/v1alpha1
kind: DBInstance
metadata:
  name: {{ name }}
  namespace: {{ tenant_id }}
  labels:
    tenant.io/id: {{ tenant_id }}
    managed-by: tenantops
spec:
  forProvider:
    dbInstanceClass: {{ instance_class }}
    engine: {{ engine }}
{% if engine_version %}
    engineVersion: {{ engine_version|quote }}
{% endif %}
    allocatedStorage: {{ allocated_storage }}
    storageType: {{ storage_type }}
    multiAZ: {{ multi_az|tojson }}
    publiclyAccessible: {{ publicly_accessible|tojson }}
    backupRetentionPeriod: {{ backup_retention_period }}
    preferredBackupWindow: {{ backup_window|quote }}
    preferredMaintenanceWindow: {{ maintenance_window|quote }}
{% if parameter_group %}
    dbParameterGroupName: {{ parameter_group }}
{% endif %}
{% if security_groups %}
    vpcSecurityGroupIds:
{% for sg in security_groups %}
    - {{ sg }}
{% endfor %}
{% endif %}
{% if subnet_group %}
    dbSubnetGroupName: {{ subnet_group }}
{% endif %}
    storageEncrypted: true
    deletionProtection: true
    tags:
{% for key, value in tags|dictsort %}
      {{ key }}: {{ value|quote }}
{% endfor %}
  writeConnectionSecretsToNamespace: {{ tenant_id }}
  writeConnectionSecretToRef:
    name: {{ name }}-connection
    namespace: {{ tenant_id }}
"#;

#[derive(Debug, Clone, Copy, Default)]
pub struct DatabaseKind;

impl ResourceKind for DatabaseKind {
    fn name(&self) -> &'static str {
        "database"
    }

    fn validate_spec(&self, _name: &str, spec: &Spec) -> Result<(), String> {
        require_one_of(spec, "engine", ENGINES)?;
        require_one_of(spec, "instance_class", INSTANCE_CLASSES)?;
        int_in_range(
            spec,
            "allocated_storage",
            20,
            20,
            1000,
            "Allocated storage must be between 20 and 1000 GB",
        )?;
        Ok(())
    }

    fn enrich_context(&self, context: &mut Spec, tenant_id: &str) {
        let environment = context
            .get("environment")
            .and_then(Value::as_str)
            .unwrap_or("dev")
            .to_string();

        set_default(context, "engine_version", json!(""));
        set_default(context, "allocated_storage", json!(20));
        set_default(context, "storage_type", json!("gp2"));
        set_default(context, "multi_az", json!(false));
        set_default(context, "publicly_accessible", json!(false));
        set_default(context, "backup_retention_period", json!(7));
        set_default(context, "backup_window", json!("03:00-04:00"));
        set_default(context, "maintenance_window", json!("sun:04:00-sun:05:00"));
        set_default(context, "parameter_group", json!(""));
        set_default(context, "security_groups", json!([]));
        set_default(context, "subnet_group", json!(""));
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
