//! Store configuration
//!
//! A store is described in YAML:
//!
//! ```yaml
//! backends:
//!   - id: disk-a
//!     path: /mnt/a/chunks
//!     quota: 1073741824
//!   - id: disk-b
//!     path: /mnt/b/chunks
//! min_copies: 2
//! parity:
//!   data: 4
//!   parity: 2
//! chunk_size: 1048576
//! compress: true
//! slots: 8
//! ```
//!
//! Omitted fields take the defaults below. A backend without `quota` is
//! unlimited.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::placement::Quota;

/// One storage backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Stable backend identity, recorded nowhere but in the registry
    pub id: String,

    /// Root directory holding the chunk files
    pub path: PathBuf,

    /// Capacity in bytes; unlimited when absent
    #[serde(default)]
    pub quota: Option<u64>,
}

impl BackendConfig {
    pub fn quota(&self) -> Quota {
        Quota::from(self.quota)
    }
}

/// Erasure coding layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParityConfig {
    /// Data shards (k)
    pub data: usize,
    /// Parity shards (m)
    pub parity: usize,
}

impl ParityConfig {
    pub fn total(&self) -> usize {
        self.data + self.parity
    }
}

/// Full store description
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    pub backends: Vec<BackendConfig>,

    /// Copies kept of every stored chunk
    #[serde(default = "default_min_copies")]
    pub min_copies: usize,

    /// Erasure code every chunk before storing its shards
    #[serde(default)]
    pub parity: Option<ParityConfig>,

    /// Payload size of the pieces the input is split into
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// LZ4-compress stored chunks
    #[serde(default = "default_compress")]
    pub compress: bool,

    /// Concurrent writes or reads per chunk
    #[serde(default = "default_slots")]
    pub slots: usize,
}

fn default_min_copies() -> usize {
    2
}

fn default_chunk_size() -> usize {
    1024 * 1024
}

fn default_compress() -> bool {
    true
}

fn default_slots() -> usize {
    8
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backends: Vec::new(),
            min_copies: default_min_copies(),
            parity: None,
            chunk_size: default_chunk_size(),
            compress: default_compress(),
            slots: default_slots(),
        }
    }
}

impl StoreConfig {
    /// Parse and validate a YAML description
    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: StoreConfig = serde_yaml::from_str(text)
            .map_err(|e| Error::Config(format!("invalid store config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read '{}': {}", path.display(), e)))?;
        Self::from_yaml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn validate(&self) -> Result<()> {
        if self.backends.is_empty() {
            return Err(Error::Config("at least one backend is required".into()));
        }
        let mut seen = HashSet::new();
        for backend in &self.backends {
            if backend.id.is_empty() {
                return Err(Error::Config("backend id must not be empty".into()));
            }
            if !seen.insert(backend.id.as_str()) {
                return Err(Error::Config(format!("duplicate backend id {:?}", backend.id)));
            }
        }
        if self.min_copies == 0 {
            return Err(Error::Config("min_copies must be greater than 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(Error::Config("chunk_size must be greater than 0".into()));
        }
        if self.slots == 0 {
            return Err(Error::Config("slots must be greater than 0".into()));
        }
        if let Some(parity) = &self.parity {
            if parity.data == 0 || parity.parity == 0 {
                return Err(Error::InvalidEcConfig(
                    "parity needs at least one data and one parity shard".into(),
                ));
            }
            // GF(2^8) limits a stripe to 256 shards.
            if parity.total() > 256 {
                return Err(Error::InvalidEcConfig(format!(
                    "{} shards exceed the limit of 256",
                    parity.total()
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const FULL: &str = r#"
backends:
  - id: a
    path: /tmp/a
    quota: 100
  - id: b
    path: /tmp/b
min_copies: 1
parity:
  data: 2
  parity: 1
chunk_size: 4096
compress: false
slots: 2
"#;

    #[test]
    fn test_full_config() {
        let config = StoreConfig::from_yaml(FULL).unwrap();
        assert_eq!(config.backends.len(), 2);
        assert_eq!(config.backends[0].quota(), Quota::Limited(100));
        assert_eq!(config.backends[1].quota(), Quota::Unlimited);
        assert_eq!(config.parity, Some(ParityConfig { data: 2, parity: 1 }));
        assert_eq!(config.chunk_size, 4096);
        assert!(!config.compress);
    }

    #[test]
    fn test_defaults() {
        let config = StoreConfig::from_yaml("backends:\n  - id: a\n    path: /tmp/a\n").unwrap();
        assert_eq!(config.min_copies, 2);
        assert_eq!(config.chunk_size, 1024 * 1024);
        assert!(config.compress);
        assert_eq!(config.slots, 8);
        assert!(config.parity.is_none());
    }

    #[test]
    fn test_validation() {
        let base = StoreConfig::from_yaml(FULL).unwrap();

        let mut c = base.clone();
        c.backends.clear();
        assert_matches!(c.validate(), Err(Error::Config(_)));

        let mut c = base.clone();
        c.backends[1].id = "a".into();
        assert_matches!(c.validate(), Err(Error::Config(msg)) if msg.contains("duplicate"));

        let mut c = base.clone();
        c.min_copies = 0;
        assert_matches!(c.validate(), Err(Error::Config(_)));

        let mut c = base.clone();
        c.chunk_size = 0;
        assert_matches!(c.validate(), Err(Error::Config(_)));

        let mut c = base.clone();
        c.parity = Some(ParityConfig { data: 2, parity: 0 });
        assert_matches!(c.validate(), Err(Error::InvalidEcConfig(_)));

        let mut c = base;
        c.parity = Some(ParityConfig { data: 200, parity: 100 });
        assert_matches!(c.validate(), Err(Error::InvalidEcConfig(_)));
    }

    #[test]
    fn test_malformed_yaml() {
        assert_matches!(StoreConfig::from_yaml("backends: 7"), Err(Error::Config(_)));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(StoreConfig::load(Path::new("/nonexistent/store.yaml")).is_err());
    }
}
