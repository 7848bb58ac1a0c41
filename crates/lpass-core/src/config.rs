//! Injected environment (Design Note §9): config-root resolution and
//! the rest of the environment variables `config.py` reads scattered
//! across calls, gathered here so the core is deterministic under test.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LpError, LpResult};

const DEFAULT_AGENT_TIMEOUT: u64 = 3600;

pub struct Environment {
    pub config_dir: PathBuf,
    overrides: std::collections::HashMap<String, String>,
}

impl Environment {
    /// Resolve the config root the way `config.py`'s `_get_config_dir`
    /// does: `LPASS_HOME` wins outright, otherwise XDG config dir / "lpass".
    pub fn from_system() -> LpResult<Self> {
        let config_dir = if let Ok(home) = std::env::var("LPASS_HOME") {
            PathBuf::from(home)
        } else {
            dirs::config_dir()
                .ok_or_else(|| LpError::Config("could not resolve a config directory".into()))?
                .join("lpass")
        };
        Ok(Environment { config_dir, overrides: std::collections::HashMap::new() })
    }

    /// Pin the config root to a caller-owned temp directory and take
    /// environment variables from an explicit map rather than the
    /// process environment, for deterministic tests.
    pub fn for_test(dir: &Path) -> Self {
        Environment { config_dir: dir.to_path_buf(), overrides: std::collections::HashMap::new() }
    }

    pub fn with_override(mut self, key: &str, value: &str) -> Self {
        self.overrides.insert(key.to_string(), value.to_string());
        self
    }

    fn env(&self, key: &str) -> Option<String> {
        self.overrides.get(key).cloned().or_else(|| std::env::var(key).ok())
    }

    pub fn session_path(&self) -> PathBuf {
        self.config_dir.join("session")
    }

    pub fn verify_path(&self) -> PathBuf {
        self.config_dir.join("verify")
    }

    pub fn plaintext_key_path(&self) -> PathBuf {
        self.config_dir.join("plaintext_key")
    }

    pub fn queue_dir(&self) -> PathBuf {
        self.config_dir.join("upload-queue")
    }

    pub fn queue_locks_dir(&self) -> PathBuf {
        self.queue_dir().join("locks")
    }

    pub fn queue_failed_dir(&self) -> PathBuf {
        self.queue_dir().join("failed")
    }

    pub fn queue_pid_file(&self) -> PathBuf {
        self.queue_dir().join("processor.pid")
    }

    pub fn agent_socket_path(&self) -> PathBuf {
        self.config_dir.join("agent.sock")
    }

    pub fn agent_timeout_secs(&self) -> u64 {
        self.env("LPASS_AGENT_TIMEOUT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_AGENT_TIMEOUT)
    }

    pub fn agent_disabled(&self) -> bool {
        self.env("LPASS_AGENT_DISABLE").as_deref() == Some("1")
    }

    pub fn clipboard_command(&self) -> Option<String> {
        self.env("LPASS_CLIPBOARD_COMMAND")
    }

    pub fn clip_clear_time(&self) -> Option<u64> {
        self.env("LPASS_CLIP_CLEAR_TIME").and_then(|v| v.parse().ok())
    }

    pub fn askpass(&self) -> Option<String> {
        self.env("LPASS_ASKPASS")
    }

    pub fn pinentry(&self) -> Option<String> {
        self.env("LPASS_PINENTRY")
    }

    pub fn pinentry_disabled(&self) -> bool {
        self.env("LPASS_DISABLE_PINENTRY").as_deref() == Some("1")
    }

    pub fn log_level(&self) -> String {
        self.env("LPASS_LOG_LEVEL").unwrap_or_else(|| "ERROR".to_string()).to_uppercase()
    }

    pub fn secure_tmpdir(&self) -> Option<String> {
        self.env("SECURE_TMPDIR")
    }

    pub fn browser(&self) -> Option<String> {
        self.env("BROWSER")
    }

    fn ensure_config_dir(&self) -> LpResult<()> {
        fs::create_dir_all(&self.config_dir)
            .map_err(|e| LpError::Config(format!("cannot create {}: {e}", self.config_dir.display())))?;
        set_owner_only_dir(&self.config_dir)?;
        Ok(())
    }

    /// Write a secret file under the config root with owner-only (0600)
    /// permissions, creating the config dir (0700) if needed.
    pub fn write_secret_file(&self, name: &str, data: &[u8]) -> LpResult<()> {
        self.ensure_config_dir()?;
        let path = self.config_dir.join(name);
        fs::write(&path, data).map_err(|e| LpError::Config(format!("cannot write {}: {e}", path.display())))?;
        set_owner_only_file(&path)?;
        Ok(())
    }

    pub fn read_secret_file(&self, name: &str) -> LpResult<Option<Vec<u8>>> {
        let path = self.config_dir.join(name);
        match fs::read(&path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(LpError::Config(format!("cannot read {}: {e}", path.display()))),
        }
    }

    pub fn unlink_secret_file(&self, name: &str) -> LpResult<()> {
        let path = self.config_dir.join(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LpError::Config(format!("cannot remove {}: {e}", path.display()))),
        }
    }
}

#[cfg(unix)]
fn set_owner_only_dir(path: &Path) -> LpResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700))
        .map_err(|e| LpError::Config(format!("cannot chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn set_owner_only_dir(_path: &Path) -> LpResult<()> {
    Ok(())
}

#[cfg(unix)]
fn set_owner_only_file(path: &Path) -> LpResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| LpError::Config(format!("cannot chmod {}: {e}", path.display())))
}

#[cfg(not(unix))]
fn set_owner_only_file(_path: &Path) -> LpResult<()> {
    Ok(())
}
