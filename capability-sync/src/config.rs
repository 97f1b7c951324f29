use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// What a stored-but-empty override means to the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmptyOverridePolicy {
    /// `[]` is an intentional "no capabilities" edit and hides the server set
    #[default]
    Suppress,
    /// `[]` is treated like a missing override
    FallBackToServer,
}

impl EmptyOverridePolicy {
    fn from_env(value: &str) -> Result<Self, ConfigError> {
        match value {
            "suppress" => Ok(Self::Suppress),
            "fallback" => Ok(Self::FallBackToServer),
            other => Err(ConfigError::InvalidValue {
                key: "CAPABILITY_EMPTY_OVERRIDE".to_string(),
                value: other.to_string(),
                reason: "expected 'suppress' or 'fallback'".to_string(),
            }),
        }
    }
}

/// Storage key prefixes. Every key the override store touches is derived here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverrideKeys {
    pub capabilities_prefix: String,
    pub categories_prefix: String,
    pub toggle_prefix: String,
}

impl Default for OverrideKeys {
    fn default() -> Self {
        Self {
            capabilities_prefix: "assistant_tools_".to_string(),
            categories_prefix: "assistant_tool_categories_".to_string(),
            toggle_prefix: "assistant_env_grant_".to_string(),
        }
    }
}

impl OverrideKeys {
    pub fn capabilities(&self, entity_id: &str) -> String {
        format!("{}{entity_id}", self.capabilities_prefix)
    }

    pub fn categories(&self, entity_id: &str) -> String {
        format!("{}{entity_id}", self.categories_prefix)
    }

    pub fn toggle(&self, entity_id: &str) -> String {
        format!("{}{entity_id}", self.toggle_prefix)
    }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the assistant API (no trailing slash)
    pub api_base: String,
    /// Path of the active-capabilities endpoint
    pub registry_path: String,
    /// Per-request timeout for registry and assistant calls
    pub request_timeout: Duration,
    /// Directory for the file-backed override cache (native builds)
    pub storage_dir: PathBuf,
    pub keys: OverrideKeys,
    /// Capability ids granted when an assistant's environment toggle is on
    pub environment_grants: Vec<String>,
    pub empty_override: EmptyOverridePolicy,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8080".to_string(),
            registry_path: "/api/tools/active".to_string(),
            request_timeout: Duration::from_secs(10),
            storage_dir: PathBuf::from("./data/capability-cache"),
            keys: OverrideKeys::default(),
            environment_grants: vec!["edit_file".to_string()],
            empty_override: EmptyOverridePolicy::Suppress,
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let defaults = Self::default();
        Ok(Self {
            api_base: env_str("CAPABILITY_API_BASE", &defaults.api_base)
                .trim_end_matches('/')
                .to_string(),
            registry_path: env_str("CAPABILITY_REGISTRY_PATH", &defaults.registry_path),
            request_timeout: Duration::from_secs(env_parse(
                "CAPABILITY_REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            storage_dir: std::env::var("CAPABILITY_STORAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_dir),
            keys: OverrideKeys {
                capabilities_prefix: env_str(
                    "CAPABILITY_OVERRIDE_PREFIX",
                    &defaults.keys.capabilities_prefix,
                ),
                categories_prefix: env_str(
                    "CAPABILITY_CATEGORY_PREFIX",
                    &defaults.keys.categories_prefix,
                ),
                toggle_prefix: env_str("CAPABILITY_TOGGLE_PREFIX", &defaults.keys.toggle_prefix),
            },
            environment_grants: env_csv("CAPABILITY_ENVIRONMENT_GRANTS", &["edit_file"]),
            empty_override: EmptyOverridePolicy::from_env(&env_str(
                "CAPABILITY_EMPTY_OVERRIDE",
                "suppress",
            ))?,
        })
    }

    pub fn registry_url(&self) -> String {
        format!("{}{}", self.api_base, self.registry_path)
    }

    pub fn assistant_url(&self, assistant_id: &str) -> String {
        format!("{}/api/assistants/{assistant_id}", self.api_base)
    }
}

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(val) => val.parse::<T>().map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            value: val.clone(),
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}

fn env_csv(key: &str, default: &[&str]) -> Vec<String> {
    match std::env::var(key) {
        Ok(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        Err(_) => default.iter().map(|s| (*s).to_string()).collect(),
    }
}
