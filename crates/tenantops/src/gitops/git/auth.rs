//! Credentials for network-facing git commands.

use std::path::PathBuf;

use secrecy::ExposeSecret;

use crate::config::{GitAuthSettings, GitAuthType};
use crate::gitops::error::{GitOpsError, Result};

/// Escapes a value for use inside single quotes in a POSIX shell.
pub fn shell_escape(value: &str) -> String {
    value.replace('\'', "'\\''")
}

#[cfg(windows)]
fn escape_for_batch(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() * 2);
    for ch in value.chars() {
        match ch {
            '%' => escaped.push_str("%%"),
            '^' | '&' | '|' | '<' | '>' | '(' | ')' | '"' => {
                escaped.push('^');
                escaped.push(ch);
            }
            _ => escaped.push(ch),
        }
    }
    escaped
}

/// Deletes the askpass script when dropped.
#[derive(Debug)]
pub struct AskpassCleanup {
    path: Option<PathBuf>,
}

impl AskpassCleanup {
    fn new(path: PathBuf) -> Self {
        Self { path: Some(path) }
    }

    fn empty() -> Self {
        Self { path: None }
    }
}

impl Drop for AskpassCleanup {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            if let Err(e) = std::fs::remove_file(&path) {
                log::warn!("Failed to clean up askpass script: {}", e);
            }
        }
    }
}

/// Environment for one git invocation.
#[derive(Debug)]
pub struct AuthEnv {
    pub env_vars: Vec<(String, String)>,
    /// Must outlive the git command.
    pub _cleanup: AskpassCleanup,
}

impl AuthEnv {
    fn plain(env_vars: Vec<(String, String)>) -> Self {
        Self {
            env_vars,
            _cleanup: AskpassCleanup::empty(),
        }
    }
}

pub fn build_auth_env(auth: &GitAuthSettings) -> Result<AuthEnv> {
    // Never block on an interactive prompt inside a worker.
    let mut env = vec![("GIT_TERMINAL_PROMPT".to_string(), "0".to_string())];

    match auth.auth_type {
        GitAuthType::None => Ok(AuthEnv::plain(env)),
        GitAuthType::Token => {
            let token = auth.token.resolve().map_err(|e| {
                GitOpsError::GitAuthFailed(format!(
                    "Failed to resolve git token: {}. Configure git.auth.token (value, file or env).",
                    e
                ))
            })?;
            let askpass_path = write_askpass_script(token.expose_secret())?;
            let cleanup = AskpassCleanup::new(askpass_path.clone());

            let askpass = askpass_path
                .to_str()
                .ok_or_else(|| {
                    GitOpsError::GitAuthFailed(
                        "Temp directory path contains non-UTF8 characters".to_string(),
                    )
                })?
                .to_string();
            env.push(("GIT_ASKPASS".to_string(), askpass));

            Ok(AuthEnv {
                env_vars: env,
                _cleanup: cleanup,
            })
        }
        GitAuthType::SshKey => {
            let key_path = ssh_key_path(&auth.ssh_key_path);
            if !key_path.exists() {
                return Err(GitOpsError::GitAuthFailed(format!(
                    "SSH key file not found: {}",
                    key_path.display()
                )));
            }

            let display = shell_escape(&key_path.display().to_string());
            let quoted = if display.starts_with('-') {
                format!("'./{}'", display)
            } else {
                format!("'{}'", display)
            };
            env.push((
                "GIT_SSH_COMMAND".to_string(),
                format!("ssh -i {} -o StrictHostKeyChecking=accept-new", quoted),
            ));
            Ok(AuthEnv::plain(env))
        }
    }
}

fn ssh_key_path(configured: &str) -> PathBuf {
    if configured.is_empty() {
        return dirs::home_dir()
            .map(|h| h.join(".ssh").join("id_ed25519"))
            .unwrap_or_else(|| PathBuf::from(".ssh/id_ed25519"));
    }
    PathBuf::from(crate::secrets::expand_home(configured))
}

fn write_askpass_script(token: &str) -> Result<PathBuf> {
    let suffix = uuid::Uuid::new_v4().to_string();

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;

        let path = std::env::temp_dir().join(format!(".tenantops-askpass-{}.sh", suffix));
        let script = format!("#!/bin/sh\necho '{}'\n", shell_escape(token));
        let mut file = std::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .mode(0o700)
            .open(&path)?;
        std::io::Write::write_all(&mut file, script.as_bytes())?;
        Ok(path)
    }

    #[cfg(windows)]
    {
        let path = std::env::temp_dir().join(format!(".tenantops-askpass-{}.bat", suffix));
        let script = format!("@echo off\r\necho {}\r\n", escape_for_batch(token));
        std::fs::write(&path, script)?;
        Ok(path)
    }
}
