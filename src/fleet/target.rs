// ABOUTME: Target descriptors identifying remote endpoints
//
// A descriptor is immutable once built; sessions keep their own copy.

use serde::{Deserialize, Serialize};

use super::error::{FleetError, FleetResult};

/// Identity of a remote endpoint: host, principal and credential reference
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetDescriptor {
    host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    principal: Option<String>,
    /// Opaque secret-store handle, never the secret itself
    #[serde(default, skip_serializing_if = "Option::is_none")]
    credential_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    label: Option<String>,
}

impl TargetDescriptor {
    /// Create a descriptor for a host with no port, principal or credential
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: None,
            principal: None,
            credential_ref: None,
            label: None,
        }
    }

    #[must_use]
    pub const fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    #[must_use]
    pub fn with_principal(mut self, principal: impl Into<String>) -> Self {
        self.principal = Some(principal.into());
        self
    }

    #[must_use]
    pub fn with_credential_ref(mut self, credential_ref: impl Into<String>) -> Self {
        self.credential_ref = Some(credential_ref.into());
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub const fn port(&self) -> Option<u16> {
        self.port
    }

    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn credential_ref(&self) -> Option<&str> {
        self.credential_ref.as_deref()
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// `host:port` when a port is set, otherwise the bare host
    pub fn address(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{}", self.host, port),
            None => self.host.clone(),
        }
    }

    /// Reject malformed descriptors before any connect attempt
    pub fn validate(&self) -> FleetResult<()> {
        if self.host.trim().is_empty() {
            return Err(FleetError::InvalidConfiguration(
                "target host must not be empty".to_string(),
            ));
        }
        if self.host.chars().any(char::is_whitespace) {
            return Err(FleetError::InvalidConfiguration(format!(
                "target host '{}' contains whitespace",
                self.host
            )));
        }
        if self.port == Some(0) {
            return Err(FleetError::InvalidConfiguration(format!(
                "target '{}' has port 0",
                self.host
            )));
        }
        if self.label.as_deref().is_some_and(|l| l.trim().is_empty()) {
            return Err(FleetError::InvalidConfiguration(format!(
                "target '{}' has an empty label",
                self.host
            )));
        }
        if self
            .principal
            .as_deref()
            .is_some_and(|p| p.trim().is_empty())
        {
            return Err(FleetError::InvalidConfiguration(format!(
                "target '{}' has an empty principal",
                self.host
            )));
        }
        Ok(())
    }
}

impl std::fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(label) = &self.label {
            return f.write_str(label);
        }
        match &self.principal {
            Some(principal) => write!(f, "{}@{}", principal, self.address()),
            None => f.write_str(&self.address()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefers_label() {
        let target = TargetDescriptor::new("10.0.0.5")
            .with_port(3389)
            .with_principal("ops");
        assert_eq!(target.to_string(), "ops@10.0.0.5:3389");

        let labelled = target.with_label("build-agent-1");
        assert_eq!(labelled.to_string(), "build-agent-1");
    }

    #[test]
    fn test_validate_rejects_malformed_targets() {
        assert!(TargetDescriptor::new("").validate().is_err());
        assert!(TargetDescriptor::new("bad host").validate().is_err());
        assert!(TargetDescriptor::new("host").with_port(0).validate().is_err());
        assert!(TargetDescriptor::new("host").with_label(" ").validate().is_err());
        assert!(TargetDescriptor::new("host")
            .with_principal("")
            .validate()
            .is_err());
    }

    #[test]
    fn test_validate_accepts_minimal_target() {
        assert!(TargetDescriptor::new("example.internal").validate().is_ok());
        assert!(TargetDescriptor::new("example.internal")
            .with_port(50051)
            .with_credential_ref("cred-1")
            .validate()
            .is_ok());
    }

    #[test]
    fn test_deserialize_from_toml() {
        let target: TargetDescriptor = toml::from_str(
            r#"
            host = "rdp-01.lab"
            port = 3389
            principal = "admin"
            "#,
        )
        .unwrap();
        assert_eq!(target.host(), "rdp-01.lab");
        assert_eq!(target.port(), Some(3389));
        assert_eq!(target.principal(), Some("admin"));
        assert_eq!(target.credential_ref(), None);
    }
}
