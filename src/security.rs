use crate::error::ApiError;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Serialize;

/// Receipt signature verification config forwarded to the billing service.
/// With no key configured the service skips signature checks entirely.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SecurityCheck {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rsa_public_key: Option<String>,
}

impl SecurityCheck {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            rsa_public_key: None,
        }
    }

    pub fn enabled(rsa_public_key: String) -> Self {
        Self {
            enabled: true,
            rsa_public_key: Some(rsa_public_key),
        }
    }

    /// Builds the security check from the caller-supplied RSA public key.
    /// Absent or empty key disables verification; otherwise the key must be
    /// the base64 DER blob the developer console hands out. Whitespace and
    /// line breaks from copy-pasted keys are stripped before validation.
    pub fn from_key(rsa_public_key: Option<&str>) -> Result<Self, ApiError> {
        let key = match rsa_public_key {
            None => return Ok(Self::disabled()),
            Some(k) => k,
        };

        let normalized: String = key.split_whitespace().collect();
        if normalized.is_empty() {
            return Ok(Self::disabled());
        }

        BASE64.decode(&normalized).map_err(|e| {
            ApiError::InvalidArgument(format!("Invalid RSA public key: {}", e))
        })?;

        Ok(Self::enabled(normalized))
    }
}
