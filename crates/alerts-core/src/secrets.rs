//! Secret lookup: Docker secrets first, then the process environment.
//!
//! Docker mounts secrets as files under `/run/secrets/`, named after the
//! lowercase key (`SMTP_PASS` → `/run/secrets/smtp_pass`). Trailing
//! whitespace is stripped since secret files usually end with a newline.

use std::path::{Path, PathBuf};

/// Default Docker secrets mount point.
pub const DOCKER_SECRETS_DIR: &str = "/run/secrets";

/// Resolves configuration keys from a secrets directory and the environment.
#[derive(Debug, Clone)]
pub struct SecretResolver {
    secrets_dir: Option<PathBuf>,
    use_env: bool,
}

impl Default for SecretResolver {
    fn default() -> Self {
        Self {
            secrets_dir: Some(PathBuf::from(DOCKER_SECRETS_DIR)),
            use_env: true,
        }
    }
}

impl SecretResolver {
    /// Resolver reading only from the given directory (no environment).
    pub fn from_dir(dir: impl Into<PathBuf>) -> Self {
        Self {
            secrets_dir: Some(dir.into()),
            use_env: false,
        }
    }

    pub fn lookup(&self, key: &str) -> Option<String> {
        if let Some(dir) = &self.secrets_dir {
            if let Some(value) = read_secret(dir, key) {
                return Some(value);
            }
        }
        if self.use_env {
            return std::env::var(key).ok();
        }
        None
    }
}

fn read_secret(dir: &Path, key: &str) -> Option<String> {
    let path = dir.join(key.to_lowercase());
    if !path.is_file() {
        return None;
    }
    match std::fs::read_to_string(&path) {
        Ok(content) => Some(content.trim().to_string()),
        Err(e) => {
            tracing::warn!("Failed to read secret '{key}' from {}: {e}", path.display());
            None
        }
    }
}
