use std::sync::OnceLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use signon_ipc::SignonError;

pub const DEFAULT_SERVICE_NAME: &str = "com.google.code.AccountsSSO.SingleSignOn";
pub const DEFAULT_OBJECT_PATH: &str = "/com/google/code/AccountsSSO/SingleSignOn";

const ENV_SERVICE_NAME: &str = "SIGNON_SERVICE_NAME";
const ENV_OBJECT_PATH: &str = "SIGNON_OBJECT_PATH";
const ENV_CALL_TIMEOUT_MS: &str = "SIGNON_CALL_TIMEOUT_MS";

/// Where to find the daemon and how long identity calls may take.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
#[non_exhaustive]
pub struct ServiceConfig {
    /// Bus name the daemon owns.
    pub service_name: String,
    /// Path of the daemon's service object.
    pub object_path: String,
    /// Upper bound on identity calls. Sessions are never bounded since
    /// authentication may wait on the user.
    pub call_timeout_ms: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            service_name: DEFAULT_SERVICE_NAME.to_owned(),
            object_path: DEFAULT_OBJECT_PATH.to_owned(),
            call_timeout_ms: None,
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `SIGNON_*` environment variables. Read once per process.
    pub fn from_env() -> Result<Self, SignonError> {
        static FROM_ENV: OnceLock<Result<ServiceConfig, SignonError>> = OnceLock::new();
        FROM_ENV
            .get_or_init(|| Self::from_lookup(|key| std::env::var(key).ok()))
            .clone()
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, SignonError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(name) = lookup(ENV_SERVICE_NAME) {
            config.service_name = name.trim().to_owned();
        }
        if let Some(path) = lookup(ENV_OBJECT_PATH) {
            config.object_path = path.trim().to_owned();
        }
        if let Some(raw) = lookup(ENV_CALL_TIMEOUT_MS) {
            let raw = raw.trim();
            config.call_timeout_ms = match raw {
                "" | "0" | "none" => None,
                _ => Some(raw.parse().map_err(|_| SignonError::InvalidArgument {
                    message: format!("{ENV_CALL_TIMEOUT_MS}={raw} is not a number of milliseconds"),
                })?),
            };
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, SignonError> {
        let config: Self = toml::from_str(raw)
            .map_err(|err| SignonError::InvalidArgument {
                message: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), SignonError> {
        if self.service_name.is_empty() {
            return Err(SignonError::InvalidArgument {
                message: "service_name must not be empty".to_owned(),
            });
        }
        if !self.object_path.starts_with('/') {
            return Err(SignonError::InvalidArgument {
                message: format!("object_path {:?} is not absolute", self.object_path),
            });
        }
        if self.call_timeout_ms == Some(0) {
            return Err(SignonError::InvalidArgument {
                message: "call_timeout_ms must be positive; omit it for no timeout".to_owned(),
            });
        }
        Ok(())
    }

    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout_ms.map(Duration::from_millis)
    }
}
