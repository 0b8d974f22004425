//! Mirror identity and listen settings.

use serde::Deserialize;

use super::ConfigError;

/// `[server]` section: who the mirror is and where it listens.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname users type to reach the mirror, without scheme or port.
    pub my_host_name: String,

    /// Public port of the mirror, omitted from URLs when `None`.
    pub my_port: Option<u16>,

    /// `http://` or `https://`; every mirror-space URL starts with this.
    pub my_scheme: String,

    /// Development mode: more verbose error pages.
    pub is_dev: bool,

    /// Address the built-in server binds to.
    pub bind_host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            my_host_name: "127.0.0.1".into(),
            my_port: Some(3000),
            my_scheme: "http://".into(),
            is_dev: false,
            bind_host: "0.0.0.0".into(),
        }
    }
}

impl ServerConfig {
    pub(super) fn validate(&self) -> Result<(), ConfigError> {
        if self.my_host_name.is_empty() {
            return Err(ConfigError::Validation("server.my_host_name must not be empty".into()));
        }
        if self.my_scheme != "http://" && self.my_scheme != "https://" {
            return Err(ConfigError::Validation(format!(
                "server.my_scheme must be \"http://\" or \"https://\", got {:?}",
                self.my_scheme
            )));
        }
        Ok(())
    }
}
