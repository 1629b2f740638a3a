//! Configuration types
//!
//! Loaded from TOML or from `TAGCACHE_*` environment variables, then
//! validated before any namespace is built from it.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::expiry::Expiry;
use crate::namespace::{KeyNamespace, KEY_TAGS_PREFIX, TAG_PREFIX};

/// LMDB backend settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LmdbConfig {
    /// Directory holding the LMDB environment
    pub path: PathBuf,
    /// Map size in megabytes
    pub max_size_mb: usize,
}

/// Master configuration for the tag index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TagCacheConfig {
    /// Prefix of tag-set records
    #[serde(default = "default_tag_prefix")]
    pub tag_prefix: String,
    /// Prefix of per-key tag-membership records
    #[serde(default = "default_key_tags_prefix")]
    pub key_tags_prefix: String,
    /// TTL applied when callers do not pass one (0 = never expires)
    #[serde(default)]
    pub default_ttl_secs: u64,
    /// LMDB backend, if used
    #[serde(default)]
    pub lmdb: Option<LmdbConfig>,
}

fn default_tag_prefix() -> String {
    TAG_PREFIX.to_string()
}

fn default_key_tags_prefix() -> String {
    KEY_TAGS_PREFIX.to_string()
}

impl Default for TagCacheConfig {
    fn default() -> Self {
        Self {
            tag_prefix: default_tag_prefix(),
            key_tags_prefix: default_key_tags_prefix(),
            default_ttl_secs: 0,
            lmdb: None,
        }
    }
}

impl TagCacheConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the tag-set record prefix.
    pub fn with_tag_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.tag_prefix = prefix.into();
        self
    }

    /// Set the key-tags record prefix.
    pub fn with_key_tags_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_tags_prefix = prefix.into();
        self
    }

    /// Set the default TTL in seconds.
    pub fn with_default_ttl_secs(mut self, secs: u64) -> Self {
        self.default_ttl_secs = secs;
        self
    }

    /// Use an LMDB backend at `path`.
    pub fn with_lmdb(mut self, path: impl Into<PathBuf>, max_size_mb: usize) -> Self {
        self.lmdb = Some(LmdbConfig {
            path: path.into(),
            max_size_mb,
        });
        self
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TagCacheConfig = toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    /// Build from environment variables, falling back to defaults.
    ///
    /// - `TAGCACHE_TAG_PREFIX`
    /// - `TAGCACHE_KEY_TAGS_PREFIX`
    /// - `TAGCACHE_DEFAULT_TTL_SECS`
    /// - `TAGCACHE_LMDB_PATH` / `TAGCACHE_LMDB_MAX_SIZE_MB` (both or neither)
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`Self::from_env`] with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(prefix) = lookup("TAGCACHE_TAG_PREFIX") {
            config.tag_prefix = prefix;
        }
        if let Some(prefix) = lookup("TAGCACHE_KEY_TAGS_PREFIX") {
            config.key_tags_prefix = prefix;
        }
        if let Some(raw) = lookup("TAGCACHE_DEFAULT_TTL_SECS") {
            config.default_ttl_secs = parse_number("TAGCACHE_DEFAULT_TTL_SECS", &raw)?;
        }

        match (
            lookup("TAGCACHE_LMDB_PATH"),
            lookup("TAGCACHE_LMDB_MAX_SIZE_MB"),
        ) {
            (Some(path), Some(size)) => {
                let max_size_mb = parse_number("TAGCACHE_LMDB_MAX_SIZE_MB", &size)?;
                config.lmdb = Some(LmdbConfig {
                    path: PathBuf::from(path),
                    max_size_mb,
                });
            }
            (Some(_), None) => {
                return Err(ConfigError::MissingRequired {
                    field: "TAGCACHE_LMDB_MAX_SIZE_MB".to_string(),
                })
            }
            (None, Some(_)) => {
                return Err(ConfigError::MissingRequired {
                    field: "TAGCACHE_LMDB_PATH".to_string(),
                })
            }
            (None, None) => {}
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("tag_prefix", &self.tag_prefix),
            ("key_tags_prefix", &self.key_tags_prefix),
        ] {
            if value.is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    value: value.clone(),
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if self.tag_prefix.starts_with(&self.key_tags_prefix)
            || self.key_tags_prefix.starts_with(&self.tag_prefix)
        {
            return Err(ConfigError::InvalidValue {
                field: "key_tags_prefix".to_string(),
                value: self.key_tags_prefix.clone(),
                reason: format!("must not overlap tag_prefix {}", self.tag_prefix),
            });
        }
        if let Some(lmdb) = &self.lmdb {
            if lmdb.path.as_os_str().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "lmdb.path".to_string(),
                    value: String::new(),
                    reason: "must not be empty".to_string(),
                });
            }
            if lmdb.max_size_mb == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "lmdb.max_size_mb".to_string(),
                    value: "0".to_string(),
                    reason: "must be > 0".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Key layout for index records.
    pub fn namespace(&self) -> Result<KeyNamespace, ConfigError> {
        self.validate()?;
        Ok(KeyNamespace::new(
            self.tag_prefix.clone(),
            self.key_tags_prefix.clone(),
        ))
    }

    pub fn default_expiry(&self) -> Expiry {
        Expiry::from_secs(self.default_ttl_secs)
    }
}

fn parse_number<N: std::str::FromStr>(field: &str, raw: &str) -> Result<N, ConfigError> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: raw.to_string(),
        reason: "must be a non-negative integer".to_string(),
    })
}
