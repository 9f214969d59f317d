use axum::http::HeaderName;
use thiserror::Error;

use crate::reference::{DEFAULT_CALL_REFERENCE_LENGTH, DEFAULT_DELETE_REFERENCE_LENGTH};
use crate::store::StoreSettings;
use crate::users::DEFAULT_AUTHORIZATION_TOKEN_LENGTH;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

const DEFAULT_WHITELISTED_CONTENT_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/gif",
    "text/plain",
    "text/plain; charset=utf-8",
    "video/mp4",
    "video/mpeg",
    "video/mpg4",
    "video/mpeg4",
    "video/flv",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    pub references: ReferenceConfig,
    /// Content types served inline; everything else is an attachment
    pub whitelisted_content_types: Vec<String>,
    /// Number of random bytes in a freshly issued authorization token
    pub authorization_token_length: usize,
    /// Maximum upload size in bytes
    pub max_upload_size: u64,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: String,
    pub data_dir: String,
    /// Header carrying the real client address when behind a reverse proxy
    pub reverse_proxy_header: Option<HeaderName>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    Memory,
}

#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Directory for local storage backend
    pub local_storage_path: String,
}

#[derive(Debug, Clone, Copy)]
pub struct ReferenceConfig {
    pub call_reference_length: usize,
    pub delete_reference_length: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:10711".to_string(),
            data_dir: "./data".to_string(),
            reverse_proxy_header: None,
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_storage_path: "./files".to_string(),
        }
    }
}

impl Default for ReferenceConfig {
    fn default() -> Self {
        Self {
            call_reference_length: DEFAULT_CALL_REFERENCE_LENGTH,
            delete_reference_length: DEFAULT_DELETE_REFERENCE_LENGTH,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            references: ReferenceConfig::default(),
            whitelisted_content_types: DEFAULT_WHITELISTED_CONTENT_TYPES
                .iter()
                .map(|s| s.to_string())
                .collect(),
            authorization_token_length: DEFAULT_AUTHORIZATION_TOKEN_LENGTH,
            max_upload_size: 50 * 1024 * 1024, // 50MB
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_vars<F>(var: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();

        let bind_address = var("BIND_ADDRESS").unwrap_or(defaults.server.bind_address);
        let data_dir = var("DATA_DIR").unwrap_or(defaults.server.data_dir);

        let reverse_proxy_header = match var("REVERSE_PROXY_HEADER")
            .map(|name| name.trim().to_string())
            .filter(|name| !name.is_empty())
        {
            Some(name) => Some(HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                ConfigError::ValidationError(format!(
                    "REVERSE_PROXY_HEADER '{name}' is not a valid header name"
                ))
            })?),
            None => None,
        };

        let backend = match var("STORAGE_BACKEND")
            .unwrap_or_else(|| "local".to_string())
            .to_lowercase()
            .as_str()
        {
            "local" => StorageBackend::Local,
            "memory" => StorageBackend::Memory,
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "unknown STORAGE_BACKEND '{other}' (expected local or memory)"
                )))
            }
        };

        let local_storage_path =
            var("LOCAL_STORAGE_PATH").unwrap_or(defaults.storage.local_storage_path);

        let whitelisted_content_types = var("WHITELISTED_CONTENT_TYPES")
            .map(|list| {
                list.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or(defaults.whitelisted_content_types);

        let call_reference_length = parse_var(
            &var,
            "CALL_REFERENCE_LENGTH",
            defaults.references.call_reference_length,
        )?;
        let delete_reference_length = parse_var(
            &var,
            "DELETE_REFERENCE_LENGTH",
            defaults.references.delete_reference_length,
        )?;
        let authorization_token_length = parse_var(
            &var,
            "AUTHORIZATION_TOKEN_LENGTH",
            defaults.authorization_token_length,
        )?;
        let max_upload_size = parse_var(&var, "MAX_UPLOAD_SIZE", defaults.max_upload_size)?;

        let config = Config {
            server: ServerConfig {
                bind_address,
                data_dir,
                reverse_proxy_header,
            },
            storage: StorageConfig {
                backend,
                local_storage_path,
            },
            references: ReferenceConfig {
                call_reference_length,
                delete_reference_length,
            },
            whitelisted_content_types,
            authorization_token_length,
            max_upload_size,
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.references.call_reference_length == 0 {
            return Err(ConfigError::ValidationError(
                "CALL_REFERENCE_LENGTH must be greater than 0".to_string(),
            ));
        }

        if self.references.delete_reference_length == 0 {
            return Err(ConfigError::ValidationError(
                "DELETE_REFERENCE_LENGTH must be greater than 0".to_string(),
            ));
        }

        // Both references share one alphabet, so only the length tells them apart
        if self.references.call_reference_length == self.references.delete_reference_length {
            return Err(ConfigError::ValidationError(
                "CALL_REFERENCE_LENGTH and DELETE_REFERENCE_LENGTH must differ".to_string(),
            ));
        }

        if self.authorization_token_length == 0 {
            return Err(ConfigError::ValidationError(
                "AUTHORIZATION_TOKEN_LENGTH must be greater than 0".to_string(),
            ));
        }

        if self.references.call_reference_length < DEFAULT_CALL_REFERENCE_LENGTH {
            tracing::warn!(
                "CALL_REFERENCE_LENGTH {} is short. Uploads become easier to enumerate.",
                self.references.call_reference_length
            );
        }

        Ok(())
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            call_reference_length: self.references.call_reference_length,
            delete_reference_length: self.references.delete_reference_length,
        }
    }

    /// Whether `content_type` may be displayed inline by browsers.
    pub fn is_whitelisted(&self, content_type: &str) -> bool {
        self.whitelisted_content_types
            .iter()
            .any(|allowed| allowed.eq_ignore_ascii_case(content_type))
    }
}

fn parse_var<F, T>(var: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match var(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::ValidationError(format!("{key} must be a non-negative integer, got '{raw}'"))
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_vars(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.server.bind_address, "127.0.0.1:10711");
        assert_eq!(config.storage.backend, StorageBackend::Local);
        assert_eq!(config.references.call_reference_length, 6);
        assert_eq!(config.references.delete_reference_length, 16);
        assert_eq!(config.authorization_token_length, 20);
        assert_eq!(config.max_upload_size, 50 * 1024 * 1024);
        assert!(config.is_whitelisted("image/png"));
        assert!(config.is_whitelisted("TEXT/PLAIN; CHARSET=UTF-8"));
        assert!(!config.is_whitelisted("text/html"));
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("STORAGE_BACKEND", "Memory"),
            ("CALL_REFERENCE_LENGTH", "8"),
            ("DELETE_REFERENCE_LENGTH", "24"),
            ("WHITELISTED_CONTENT_TYPES", "image/webp, ,application/pdf"),
        ])
        .unwrap();
        assert_eq!(config.storage.backend, StorageBackend::Memory);
        assert_eq!(config.store_settings().call_reference_length, 8);
        assert_eq!(config.store_settings().delete_reference_length, 24);
        assert_eq!(
            config.whitelisted_content_types,
            vec!["image/webp".to_string(), "application/pdf".to_string()]
        );
    }

    #[test]
    fn test_rejects_invalid_lengths() {
        assert!(load(&[("CALL_REFERENCE_LENGTH", "0")]).is_err());
        assert!(load(&[("DELETE_REFERENCE_LENGTH", "6")]).is_err());
        assert!(load(&[("AUTHORIZATION_TOKEN_LENGTH", "0")]).is_err());
        assert!(load(&[("MAX_UPLOAD_SIZE", "lots")]).is_err());
    }

    #[test]
    fn test_reverse_proxy_header() {
        assert!(load(&[]).unwrap().server.reverse_proxy_header.is_none());
        assert!(load(&[("REVERSE_PROXY_HEADER", "  ")])
            .unwrap()
            .server
            .reverse_proxy_header
            .is_none());

        let config = load(&[("REVERSE_PROXY_HEADER", "X-Real-IP")]).unwrap();
        assert_eq!(
            config.server.reverse_proxy_header,
            Some(HeaderName::from_static("x-real-ip"))
        );

        assert!(load(&[("REVERSE_PROXY_HEADER", "not a header")]).is_err());
    }

    #[test]
    fn test_rejects_unknown_backend() {
        assert!(load(&[("STORAGE_BACKEND", "gridfs")]).is_err());
    }
}
