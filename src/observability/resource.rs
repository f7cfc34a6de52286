//! Process-wide resource descriptor.
//!
//! The SDK defaults (`telemetry.sdk.*` plus anything found in
//! `OTEL_RESOURCE_ATTRIBUTES`) are merged with the service identity. Values
//! set here override the defaults. Host details are best effort.

use opentelemetry::KeyValue;
use opentelemetry_sdk::Resource;
use opentelemetry_semantic_conventions::resource::{
    HOST_NAME, PROCESS_PID, SERVICE_INSTANCE_ID, SERVICE_NAMESPACE, SERVICE_VERSION,
};

use crate::config::Config;

/// Service identity attached to every span, metric and log record.
#[derive(Debug, Clone)]
pub struct ServiceIdentity {
    pub name: String,
    pub version: String,
    pub namespace: String,
    pub instance_id: String,
}

impl ServiceIdentity {
    /// Build the identity from configuration with a freshly generated instance id.
    pub fn from_config(config: &Config) -> Self {
        Self {
            name: config.service_name.clone(),
            version: config.service_version().to_string(),
            namespace: config.service_namespace.clone(),
            instance_id: crate::generate_instance_id(),
        }
    }
}

/// Build the immutable resource shared by the tracer, meter and logger providers.
pub fn build_resource(identity: &ServiceIdentity) -> Resource {
    Resource::builder()
        .with_attributes(process_attributes())
        .with_service_name(identity.name.clone())
        .with_attributes([
            KeyValue::new(SERVICE_VERSION, identity.version.clone()),
            KeyValue::new(SERVICE_NAMESPACE, identity.namespace.clone()),
            KeyValue::new(SERVICE_INSTANCE_ID, identity.instance_id.clone()),
        ])
        .build()
}

/// Attributes describing the running process. Unreadable values are skipped.
fn process_attributes() -> Vec<KeyValue> {
    let mut attributes = vec![KeyValue::new(PROCESS_PID, i64::from(std::process::id()))];

    match hostname::get() {
        Ok(name) => attributes.push(KeyValue::new(HOST_NAME, name.to_string_lossy().into_owned())),
        Err(e) => tracing::debug!(error = %e, "Host name unavailable, omitting from resource"),
    }

    attributes
}

#[cfg(test)]
mod tests {
    use super::*;
    use opentelemetry::{Key, Value};
    use opentelemetry_semantic_conventions::resource::{SERVICE_NAME, TELEMETRY_SDK_NAME};

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            name: "todo-service".into(),
            version: "1.2.3".into(),
            namespace: "rust".into(),
            instance_id: "instance-1".into(),
        }
    }

    fn get(resource: &Resource, key: &'static str) -> Option<Value> {
        resource.get(&Key::from_static_str(key))
    }

    #[test]
    fn test_service_identity_is_present() {
        let resource = build_resource(&identity());

        assert_eq!(get(&resource, SERVICE_NAME), Some(Value::from("todo-service")));
        assert_eq!(get(&resource, SERVICE_VERSION), Some(Value::from("1.2.3")));
        assert_eq!(get(&resource, SERVICE_NAMESPACE), Some(Value::from("rust")));
        assert_eq!(get(&resource, SERVICE_INSTANCE_ID), Some(Value::from("instance-1")));
    }

    #[test]
    fn test_sdk_defaults_are_merged() {
        let resource = build_resource(&identity());
        assert!(get(&resource, TELEMETRY_SDK_NAME).is_some());
        assert!(get(&resource, PROCESS_PID).is_some());
    }

    #[test]
    fn test_instance_id_is_fresh_per_identity() {
        let config = Config::default();
        let a = ServiceIdentity::from_config(&config);
        let b = ServiceIdentity::from_config(&config);
        assert_ne!(a.instance_id, b.instance_id);
        assert_eq!(a.version, env!("CARGO_PKG_VERSION"));
    }
}
