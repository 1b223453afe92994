//! API credentials for authenticating against a TelemetryFlow collector.

use std::collections::HashMap;
use std::fmt;

use thiserror::Error;

/// Required prefix for API key ids.
pub const KEY_ID_PREFIX: &str = "tfk_";
/// Required prefix for API key secrets.
pub const KEY_SECRET_PREFIX: &str = "tfs_";

/// Errors raised when credentials fail format validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CredentialsError {
    /// The key id was empty.
    #[error("API key ID is required")]
    MissingKeyId,

    /// The key secret was empty.
    #[error("API key secret is required")]
    MissingKeySecret,

    /// The key id did not carry the `tfk_` prefix.
    #[error("API key ID must start with '{KEY_ID_PREFIX}'")]
    InvalidKeyIdPrefix,

    /// The key secret did not carry the `tfs_` prefix.
    #[error("API key secret must start with '{KEY_SECRET_PREFIX}'")]
    InvalidKeySecretPrefix,
}

/// Immutable value object holding a validated key-id/key-secret pair.
///
/// Credentials are created once through [`Credentials::new`], never mutated,
/// and live as long as the [`TelemetryConfig`](crate::TelemetryConfig) that
/// owns them. Equality is structural. The `Display` implementation redacts
/// the secret so credentials can be logged safely.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    key_id: String,
    key_secret: String,
}

impl Credentials {
    /// Validates and creates a new credentials pair.
    ///
    /// The key id must be non-empty and start with `tfk_`; the key secret
    /// must be non-empty and start with `tfs_`.
    pub fn new(
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
    ) -> Result<Self, CredentialsError> {
        let key_id = key_id.into();
        let key_secret = key_secret.into();

        if key_id.is_empty() {
            return Err(CredentialsError::MissingKeyId);
        }
        if key_secret.is_empty() {
            return Err(CredentialsError::MissingKeySecret);
        }
        if !key_id.starts_with(KEY_ID_PREFIX) {
            return Err(CredentialsError::InvalidKeyIdPrefix);
        }
        if !key_secret.starts_with(KEY_SECRET_PREFIX) {
            return Err(CredentialsError::InvalidKeySecretPrefix);
        }

        Ok(Credentials { key_id, key_secret })
    }

    /// The API key id.
    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    /// The `Authorization` header value, `Bearer {key_id}:{key_secret}`.
    pub fn authorization_header(&self) -> String {
        format!("Bearer {}:{}", self.key_id, self.key_secret)
    }

    /// All authentication headers expected by the TelemetryFlow API.
    pub fn auth_headers(&self) -> HashMap<String, String> {
        HashMap::from([
            ("Authorization".to_owned(), self.authorization_header()),
            ("X-TelemetryFlow-Key-ID".to_owned(), self.key_id.clone()),
            (
                "X-TelemetryFlow-Key-Secret".to_owned(),
                self.key_secret.clone(),
            ),
        ])
    }

    fn secret_preview(&self) -> String {
        // truncate by characters, not bytes, so any valid secret redacts
        let mut chars = self.key_secret.chars();
        let prefix: String = chars.by_ref().take(8).collect();
        if chars.next().is_some() {
            format!("{prefix}...")
        } else {
            "***".to_owned()
        }
    }
}

impl fmt::Display for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Credentials(key_id={}, key_secret={})",
            self.key_id,
            self.secret_preview()
        )
    }
}

// Manual impl so the secret never leaks through `{:?}` either.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("key_id", &self.key_id)
            .field("key_secret", &self.secret_preview())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_keys() {
        let creds = Credentials::new("tfk_abc123", "tfs_def456").unwrap();
        assert_eq!(creds.key_id(), "tfk_abc123");
        assert_eq!(
            creds.authorization_header(),
            "Bearer tfk_abc123:tfs_def456"
        );
    }

    #[test]
    fn rejects_empty_key_id() {
        let err = Credentials::new("", "tfs_def").unwrap_err();
        assert_eq!(err, CredentialsError::MissingKeyId);
    }

    #[test]
    fn rejects_empty_key_secret() {
        let err = Credentials::new("tfk_abc", "").unwrap_err();
        assert_eq!(err, CredentialsError::MissingKeySecret);
    }

    #[test]
    fn rejects_bad_key_id_prefix() {
        let err = Credentials::new("key_abc", "tfs_def").unwrap_err();
        assert_eq!(err, CredentialsError::InvalidKeyIdPrefix);
        assert!(err.to_string().contains("tfk_"));
    }

    #[test]
    fn rejects_bad_key_secret_prefix() {
        let err = Credentials::new("tfk_abc", "secret_def").unwrap_err();
        assert_eq!(err, CredentialsError::InvalidKeySecretPrefix);
        assert!(err.to_string().contains("tfs_"));
    }

    #[test]
    fn equality_is_structural() {
        let a = Credentials::new("tfk_abc", "tfs_def").unwrap();
        let b = Credentials::new("tfk_abc", "tfs_def").unwrap();
        let c = Credentials::new("tfk_abc", "tfs_other").unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn display_redacts_secret() {
        let creds = Credentials::new("tfk_abc", "tfs_supersecret").unwrap();
        let shown = creds.to_string();
        assert!(shown.contains("tfk_abc"));
        assert!(shown.contains("tfs_supe..."));
        assert!(!shown.contains("tfs_supersecret"));

        let short = Credentials::new("tfk_abc", "tfs_1").unwrap();
        assert!(short.to_string().contains("***"));
    }

    #[test]
    fn display_handles_multibyte_secrets() {
        let creds = Credentials::new("tfk_abc", "tfs_abcédef").unwrap();
        let shown = creds.to_string();
        assert!(shown.contains("tfs_abcé..."));
        assert!(!shown.contains("tfs_abcédef"));

        // exactly 8 characters (9 bytes) is still fully redacted
        let boundary = Credentials::new("tfk_abc", "tfs_abcé").unwrap();
        assert!(boundary.to_string().contains("***"));
    }

    #[test]
    fn auth_headers_carry_all_fields() {
        let creds = Credentials::new("tfk_abc", "tfs_def").unwrap();
        let headers = creds.auth_headers();
        assert_eq!(
            headers.get("Authorization").map(String::as_str),
            Some("Bearer tfk_abc:tfs_def")
        );
        assert_eq!(
            headers.get("X-TelemetryFlow-Key-ID").map(String::as_str),
            Some("tfk_abc")
        );
        assert_eq!(
            headers.get("X-TelemetryFlow-Key-Secret").map(String::as_str),
            Some("tfs_def")
        );
    }
}
