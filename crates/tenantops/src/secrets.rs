//! Credential resolution for git tokens and sync engine logins.
//!
//! A credential can be given inline, read from a mounted file, or taken
//! from an environment variable. The first non-empty source wins.

use std::fs;

use secrecy::SecretString;
use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("No secret source configured (need one of: value, file, env)")]
    NoSourceProvided,

    #[error("Failed to read secret from file '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Environment variable '{name}' not set")]
    EnvVarNotSet { name: String },

    #[error("Environment variable '{name}' contains invalid UTF-8")]
    EnvVarNotUnicode { name: String },
}

pub type Result<T> = std::result::Result<T, SecretError>;

/// Where a credential comes from, as written in the config file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SecretSource {
    /// Inline value. Plaintext in the config file, so only for local setups.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,

    /// Path to a file holding the value (mounted secrets).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Name of an environment variable holding the value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<String>,
}

impl SecretSource {
    pub fn inline(value: impl Into<String>) -> Self {
        Self {
            value: Some(value.into()),
            ..Default::default()
        }
    }

    pub fn from_env(name: impl Into<String>) -> Self {
        Self {
            env: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn is_configured(&self) -> bool {
        has_secret_source(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env.as_deref(),
        )
    }

    pub fn resolve(&self) -> Result<SecretString> {
        resolve_secret(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env.as_deref(),
        )
    }

    /// Resolves the secret, treating "nothing configured" as `None`.
    pub fn resolve_optional(&self) -> Result<Option<SecretString>> {
        resolve_secret_optional(
            self.value.as_deref(),
            self.file.as_deref(),
            self.env.as_deref(),
        )
    }
}

/// Resolves a secret from the first non-empty source, in order:
/// direct value, file contents, environment variable.
///
/// File and env values are trimmed.
pub fn resolve_secret(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<SecretString> {
    if let Some(value) = direct.filter(|v| !v.is_empty()) {
        return Ok(SecretString::from(value.to_string()));
    }

    if let Some(path) = file_path.filter(|p| !p.is_empty()) {
        let expanded = expand_home(path);
        return fs::read_to_string(&expanded)
            .map(|content| SecretString::from(content.trim().to_string()))
            .map_err(|source| SecretError::FileRead {
                path: expanded,
                source,
            });
    }

    if let Some(name) = env_var.filter(|n| !n.is_empty()) {
        return match std::env::var(name) {
            Ok(value) => Ok(SecretString::from(value.trim().to_string())),
            Err(std::env::VarError::NotPresent) => Err(SecretError::EnvVarNotSet {
                name: name.to_string(),
            }),
            Err(std::env::VarError::NotUnicode(_)) => Err(SecretError::EnvVarNotUnicode {
                name: name.to_string(),
            }),
        };
    }

    Err(SecretError::NoSourceProvided)
}

pub fn resolve_secret_optional(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> Result<Option<SecretString>> {
    if !has_secret_source(direct, file_path, env_var) {
        return Ok(None);
    }
    resolve_secret(direct, file_path, env_var).map(Some)
}

pub fn has_secret_source(
    direct: Option<&str>,
    file_path: Option<&str>,
    env_var: Option<&str>,
) -> bool {
    [direct, file_path, env_var]
        .iter()
        .any(|source| source.is_some_and(|s| !s.is_empty()))
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use serial_test::serial;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_direct_value_wins() {
        let secret = resolve_secret(Some("direct"), Some("/nonexistent"), Some("NOPE")).unwrap();
        assert_eq!(secret.expose_secret(), "direct");
    }

    #[test]
    fn test_file_is_trimmed_and_beats_env() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "  from-file  ").unwrap();
        let path = file.path().to_string_lossy().to_string();

        let secret = resolve_secret(None, Some(&path), Some("TENANTOPS_UNUSED")).unwrap();
        assert_eq!(secret.expose_secret(), "from-file");
    }

    #[test]
    #[serial]
    fn test_env_fallback() {
        std::env::set_var("TENANTOPS_TEST_SECRET", "from-env\n");
        let source = SecretSource::from_env("TENANTOPS_TEST_SECRET");
        assert_eq!(source.resolve().unwrap().expose_secret(), "from-env");
        std::env::remove_var("TENANTOPS_TEST_SECRET");
    }

    #[test]
    #[serial]
    fn test_missing_env_var() {
        std::env::remove_var("TENANTOPS_MISSING_SECRET");
        let err = resolve_secret(None, None, Some("TENANTOPS_MISSING_SECRET")).unwrap_err();
        assert!(matches!(err, SecretError::EnvVarNotSet { .. }));
    }

    #[test]
    fn test_empty_sources_are_ignored() {
        assert!(matches!(
            resolve_secret(Some(""), Some(""), Some("")),
            Err(SecretError::NoSourceProvided)
        ));
        assert!(!SecretSource::default().is_configured());
        assert!(SecretSource::default().resolve_optional().unwrap().is_none());
    }

    #[test]
    fn test_unreadable_file() {
        let err = resolve_secret(None, Some("/nonexistent/tenantops/token"), None).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/tenantops/token"));
    }

    #[test]
    fn test_expand_home() {
        assert_eq!(expand_home("/abs/path"), "/abs/path");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(
                expand_home("~/token"),
                home.join("token").to_string_lossy()
            );
        }
    }
}
