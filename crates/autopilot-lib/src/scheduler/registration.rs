//! Application registration requests and their validation

use crate::error::RegistrationError;
use crate::models::AppRegistration;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Lowest port a registration may expose
pub const PORT_MIN: u16 = 30000;
/// Highest port a registration may expose
pub const PORT_MAX: u16 = 32767;

/// Registration as submitted; `ports` is checked before it is typed
#[derive(Debug, Clone, Deserialize)]
pub struct RegisterAppRequest {
    pub app_name: String,
    pub namespace: String,
    pub app2: String,
    pub namespace2: String,
    pub url_key: String,
    pub current_backend: String,
    #[serde(default)]
    pub ports: Value,
}

impl RegisterAppRequest {
    pub fn validate(self) -> Result<AppRegistration, RegistrationError> {
        for (field, value) in [
            ("app_name", &self.app_name),
            ("namespace", &self.namespace),
            ("app2", &self.app2),
            ("namespace2", &self.namespace2),
            ("url_key", &self.url_key),
            ("current_backend", &self.current_backend),
        ] {
            if value.trim().is_empty() {
                return Err(RegistrationError::MissingField(field));
            }
        }

        let ports = validate_ports(&self.ports)?;
        Ok(AppRegistration {
            app_name: self.app_name,
            namespace: self.namespace,
            mirror_app: self.app2,
            mirror_namespace: self.namespace2,
            routing_env_key: self.url_key,
            current_backend: self.current_backend,
            ports,
        })
    }
}

/// Check a port map: non-empty, a JSON object, integer values inside
/// `PORT_MIN..=PORT_MAX`
pub fn validate_ports(ports: &Value) -> Result<BTreeMap<String, u16>, RegistrationError> {
    let is_empty = match ports {
        Value::Null => true,
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::String(s) => s.is_empty(),
        _ => false,
    };
    if is_empty {
        return Err(RegistrationError::EmptyPorts);
    }

    let Value::Object(map) = ports else {
        return Err(RegistrationError::PortsNotMap);
    };

    let mut validated = BTreeMap::new();
    for (name, value) in map {
        let port = value
            .as_i64()
            .ok_or_else(|| RegistrationError::PortNotInteger { name: name.clone() })?;
        if port < i64::from(PORT_MIN) || port > i64::from(PORT_MAX) {
            return Err(RegistrationError::PortOutOfRange {
                name: name.clone(),
                port,
                min: PORT_MIN,
                max: PORT_MAX,
            });
        }
        validated.insert(name.clone(), port as u16);
    }
    Ok(validated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request(ports: Value) -> RegisterAppRequest {
        serde_json::from_value(json!({
            "app_name": "frontend",
            "namespace": "ns-a",
            "app2": "backend",
            "namespace2": "ns-b",
            "url_key": "BACKEND_URL",
            "current_backend": "10.0.0.1",
            "ports": ports,
        }))
        .unwrap()
    }

    #[test]
    fn test_valid_registration() {
        let reg = request(json!({"80": 30080, "443": 32767})).validate().unwrap();
        assert_eq!(reg.mirror_app, "backend");
        assert_eq!(reg.routing_env_key, "BACKEND_URL");
        assert_eq!(reg.ports["443"], 32767);
    }

    #[test]
    fn test_port_outside_node_port_range_is_rejected() {
        assert_eq!(
            validate_ports(&json!({"80": 40000})),
            Err(RegistrationError::PortOutOfRange {
                name: "80".into(),
                port: 40000,
                min: PORT_MIN,
                max: PORT_MAX,
            })
        );
        assert!(validate_ports(&json!({"80": 29999})).is_err());
        assert!(validate_ports(&json!({"80": 30000})).is_ok());
    }

    #[test]
    fn test_empty_and_malformed_ports() {
        assert_eq!(validate_ports(&json!({})), Err(RegistrationError::EmptyPorts));
        assert_eq!(validate_ports(&Value::Null), Err(RegistrationError::EmptyPorts));
        assert_eq!(validate_ports(&json!([])), Err(RegistrationError::EmptyPorts));
        assert_eq!(
            validate_ports(&json!([30080])),
            Err(RegistrationError::PortsNotMap)
        );
        assert_eq!(
            validate_ports(&json!({"80": "30080"})),
            Err(RegistrationError::PortNotInteger { name: "80".into() })
        );
        assert_eq!(
            validate_ports(&json!({"80": 30080.5})),
            Err(RegistrationError::PortNotInteger { name: "80".into() })
        );
    }

    #[test]
    fn test_missing_field() {
        let mut req = request(json!({"80": 30080}));
        req.url_key = " ".into();
        assert_eq!(
            req.validate(),
            Err(RegistrationError::MissingField("url_key"))
        );
    }
}
