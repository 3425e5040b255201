//! Configuration file support for sshpn
//!
//! Loads and validates sshpn configuration from TOML files.
//! Default location: /etc/sshpn/sshpn.toml

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use sshpn_common::{TunnelError, TunnelResult};
use tracing::debug;

use crate::state::DEFAULT_STATE_DIR;
use crate::types::{DEFAULT_SOCKET, DEFAULT_USER};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/sshpn/sshpn.toml";

/// ssh session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Multiplex control socket; `%h`/`%p` are expanded by ssh
    #[serde(default = "default_socket")]
    pub socket: String,

    /// Remote login user
    #[serde(default = "default_user")]
    pub user: String,
}

/// Persisted state configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateConfig {
    #[serde(default = "default_state_dir")]
    pub dir: String,
}

/// Local host configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalConfig {
    /// Prefix local commands with sudo
    #[serde(default = "default_sudo")]
    pub sudo: bool,
}

/// Complete sshpn configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshpnConfig {
    #[serde(default)]
    pub session: SessionConfig,

    #[serde(default)]
    pub state: StateConfig,

    #[serde(default)]
    pub local: LocalConfig,
}

fn default_socket() -> String {
    DEFAULT_SOCKET.to_string()
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

fn default_state_dir() -> String {
    DEFAULT_STATE_DIR.to_string()
}

fn default_sudo() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            socket: default_socket(),
            user: default_user(),
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: default_state_dir(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            sudo: default_sudo(),
        }
    }
}

impl SshpnConfig {
    /// Load configuration from file, falling back to defaults if file not found
    pub fn load_or_default(path: impl AsRef<Path>) -> TunnelResult<Self> {
        let path = path.as_ref();

        match fs::read_to_string(path) {
            Ok(content) => Self::parse_file(path, &content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "Config file not found, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Self::read_error(path, e)),
        }
    }

    /// Load configuration from a file that must exist.
    pub fn load_file(path: impl AsRef<Path>) -> TunnelResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| Self::read_error(path, e))?;
        Self::parse_file(path, &content)
    }

    fn parse_file(path: &Path, content: &str) -> TunnelResult<Self> {
        Self::parse(content).map_err(|e| match e {
            TunnelError::InvalidConfig { field, message } => {
                TunnelError::invalid_config(field, format!("{}: {}", path.display(), message))
            }
            other => other,
        })
    }

    fn read_error(path: &Path, e: io::Error) -> TunnelError {
        TunnelError::invalid_config("path", format!("cannot read {}: {}", path.display(), e))
    }

    /// Load from the default location or defaults
    pub fn load() -> TunnelResult<Self> {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    /// Parse and validate TOML content.
    pub fn parse(content: &str) -> TunnelResult<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| TunnelError::invalid_config("toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> TunnelResult<()> {
        if self.session.socket.trim().is_empty() {
            return Err(TunnelError::invalid_config(
                "session.socket",
                "must not be empty",
            ));
        }
        if self.session.user.trim().is_empty() {
            return Err(TunnelError::invalid_config("session.user", "must not be empty"));
        }
        if self.state.dir.trim().is_empty() {
            return Err(TunnelError::invalid_config("state.dir", "must not be empty"));
        }
        Ok(())
    }
}
